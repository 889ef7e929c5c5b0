//! In-memory columnar table
//!
//! The exchange format between the simulation driver, the on-disk parquet
//! bridge, the map-by-condition dispatcher and the summary pipeline. Column
//! order is stable and meaningful (it becomes the parquet schema order).
//!
//! Three physical column types cover the whole schema: `Float` for
//! parameters and response times, `Int` for indices, `Tiny` for the
//! two-boundary choice column.

use std::collections::HashMap;

use crate::error::{Result, SimError};

/// A single named column's storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Tiny(Vec<i8>),
    Str(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Tiny(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `i` widened to f64. NaN marks missing in `Float` columns
    /// and stands in for string cells.
    pub fn value_f64(&self, i: usize) -> f64 {
        match self {
            Column::Float(v) => v[i],
            Column::Int(v) => v[i] as f64,
            Column::Tiny(v) => v[i] as f64,
            Column::Str(_) => f64::NAN,
        }
    }

    /// Copy of the rows at `idx`, preserving the physical type.
    fn take(&self, idx: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(idx.iter().map(|&i| v[i]).collect()),
            Column::Int(v) => Column::Int(idx.iter().map(|&i| v[i]).collect()),
            Column::Tiny(v) => Column::Tiny(idx.iter().map(|&i| v[i]).collect()),
            Column::Str(v) => Column::Str(idx.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn key_value(&self, i: usize) -> KeyValue {
        match self {
            Column::Float(v) => KeyValue::Float(v[i].to_bits()),
            Column::Int(v) => KeyValue::Int(v[i]),
            Column::Tiny(v) => KeyValue::Int(v[i] as i64),
            Column::Str(v) => KeyValue::Str(v[i].clone()),
        }
    }
}

/// A grouping-key cell. Floats compare by bit pattern, which is exact for
/// values that came out of the same column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyValue {
    Int(i64),
    Float(u64),
    Str(String),
}

impl KeyValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            KeyValue::Int(v) => *v as f64,
            KeyValue::Float(bits) => f64::from_bits(*bits),
            KeyValue::Str(_) => f64::NAN,
        }
    }

    /// Render for use in a pivoted column-name suffix: `1` not `1.0`.
    pub fn label(&self) -> String {
        match self {
            KeyValue::Int(v) => v.to_string(),
            KeyValue::Float(bits) => {
                let v = f64::from_bits(*bits);
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", v as i64)
                } else {
                    format!("{v}")
                }
            }
            KeyValue::Str(s) => s.clone(),
        }
    }
}

/// Column-major table with stable column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    names: Vec<String>,
    columns: Vec<Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.columns.iter())
    }

    /// Append a column. All columns must agree on row count.
    pub fn push(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        if !self.columns.is_empty() && column.len() != self.n_rows() {
            return Err(SimError::LengthMismatch {
                name,
                got: column.len(),
                need: self.n_rows(),
            });
        }
        if self.names.contains(&name) {
            return Err(SimError::ConfigInvalid(format!(
                "duplicate column '{name}'"
            )));
        }
        self.names.push(name);
        self.columns.push(column);
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.columns[i])
    }

    /// Column widened to f64, or an error naming the missing column.
    pub fn f64s(&self, name: &str) -> Result<Vec<f64>> {
        let col = self
            .column(name)
            .ok_or_else(|| SimError::ConfigInvalid(format!("no column '{name}'")))?;
        Ok((0..col.len()).map(|i| col.value_f64(i)).collect())
    }

    /// New table holding only the rows at `idx`, columns unchanged.
    pub fn take_rows(&self, idx: &[usize]) -> Table {
        Table {
            names: self.names.clone(),
            columns: self.columns.iter().map(|c| c.take(idx)).collect(),
        }
    }

    /// Group rows by the key columns, in first-occurrence order.
    ///
    /// Every returned group carries the key cells (same order as `keys`)
    /// and the row indices belonging to it.
    pub fn group_rows(&self, keys: &[String]) -> Result<Vec<(Vec<KeyValue>, Vec<usize>)>> {
        let key_cols: Vec<&Column> = keys
            .iter()
            .map(|k| {
                self.column(k)
                    .ok_or_else(|| SimError::ConfigInvalid(format!("no grouping column '{k}'")))
            })
            .collect::<Result<_>>()?;
        let mut order: Vec<(Vec<KeyValue>, Vec<usize>)> = Vec::new();
        let mut seen: HashMap<Vec<KeyValue>, usize> = HashMap::new();
        for row in 0..self.n_rows() {
            let key: Vec<KeyValue> = key_cols.iter().map(|c| c.key_value(row)).collect();
            match seen.get(&key) {
                Some(&slot) => order[slot].1.push(row),
                None => {
                    seen.insert(key.clone(), order.len());
                    order.push((key, vec![row]));
                }
            }
        }
        Ok(order)
    }

    /// Row-concatenate tables preserving the column union.
    ///
    /// Column order is first-seen order across the inputs. A column absent
    /// from some input fills with NaN there; mixed or partially-absent
    /// columns are widened to `Float`.
    pub fn concat(tables: &[Table]) -> Table {
        let mut names: Vec<String> = Vec::new();
        for t in tables {
            for n in &t.names {
                if !names.contains(n) {
                    names.push(n.clone());
                }
            }
        }
        // A column keeps its physical type only when every non-empty input
        // has it with the same type; otherwise it widens to Float.
        let mut out_cols: Vec<Column> = Vec::with_capacity(names.len());
        for name in &names {
            let everywhere = tables
                .iter()
                .filter(|t| t.n_rows() > 0)
                .all(|t| t.column(name).is_some());
            let all_int = everywhere
                && tables
                    .iter()
                    .filter(|t| t.n_rows() > 0)
                    .all(|t| matches!(t.column(name), Some(Column::Int(_))));
            let all_tiny = everywhere
                && tables
                    .iter()
                    .filter(|t| t.n_rows() > 0)
                    .all(|t| matches!(t.column(name), Some(Column::Tiny(_))));
            let any_str = tables
                .iter()
                .any(|t| matches!(t.column(name), Some(Column::Str(_))));
            if any_str {
                // string columns never widen; absent cells become ""
                let mut v = Vec::new();
                for t in tables {
                    match t.column(name) {
                        Some(Column::Str(c)) => v.extend_from_slice(c),
                        Some(c) => v.extend((0..c.len()).map(|i| KeyValue::label(&c.key_value(i)))),
                        None => v.extend(std::iter::repeat(String::new()).take(t.n_rows())),
                    }
                }
                out_cols.push(Column::Str(v));
            } else if all_int {
                let mut v = Vec::new();
                for t in tables {
                    if let Some(Column::Int(c)) = t.column(name) {
                        v.extend_from_slice(c);
                    }
                }
                out_cols.push(Column::Int(v));
            } else if all_tiny {
                let mut v = Vec::new();
                for t in tables {
                    if let Some(Column::Tiny(c)) = t.column(name) {
                        v.extend_from_slice(c);
                    }
                }
                out_cols.push(Column::Tiny(v));
            } else {
                let mut v = Vec::new();
                for t in tables {
                    match t.column(name) {
                        Some(c) => v.extend((0..c.len()).map(|i| c.value_f64(i))),
                        None => v.extend(std::iter::repeat(f64::NAN).take(t.n_rows())),
                    }
                }
                out_cols.push(Column::Float(v));
            }
        }
        Table {
            names,
            columns: out_cols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut t = Table::new();
        t.push("cond", Column::Int(vec![1, 1, 2, 2])).unwrap();
        t.push("rt", Column::Float(vec![0.4, 0.5, 0.6, 0.7])).unwrap();
        t
    }

    #[test]
    fn push_rejects_ragged_columns() {
        let mut t = sample();
        let err = t.push("bad", Column::Float(vec![1.0])).unwrap_err();
        assert!(matches!(err, SimError::LengthMismatch { got: 1, need: 4, .. }));
    }

    #[test]
    fn group_rows_keeps_first_occurrence_order() {
        let t = sample();
        let groups = t.group_rows(&["cond".to_string()]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1, vec![0, 1]);
        assert_eq!(groups[1].1, vec![2, 3]);
        assert_eq!(groups[0].0[0], KeyValue::Int(1));
    }

    #[test]
    fn concat_fills_missing_columns_with_nan() {
        let mut a = Table::new();
        a.push("x", Column::Float(vec![1.0])).unwrap();
        let mut b = Table::new();
        b.push("x", Column::Float(vec![2.0])).unwrap();
        b.push("y", Column::Float(vec![3.0])).unwrap();
        let c = Table::concat(&[a, b]);
        assert_eq!(c.n_rows(), 2);
        let y = c.f64s("y").unwrap();
        assert!(y[0].is_nan());
        assert_eq!(y[1], 3.0);
    }

    #[test]
    fn concat_preserves_int_type_when_uniform() {
        let mut a = Table::new();
        a.push("i", Column::Int(vec![1])).unwrap();
        let mut b = Table::new();
        b.push("i", Column::Int(vec![2])).unwrap();
        let c = Table::concat(&[a, b]);
        assert_eq!(c.column("i"), Some(&Column::Int(vec![1, 2])));
    }

    #[test]
    fn key_label_renders_integral_floats_bare() {
        assert_eq!(KeyValue::Float(2.0f64.to_bits()).label(), "2");
        assert_eq!(KeyValue::Float(2.5f64.to_bits()).label(), "2.5");
        assert_eq!(KeyValue::Int(7).label(), "7");
    }
}
