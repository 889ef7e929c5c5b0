//! Composable summary-statistic specifications
//!
//! A spec is built once and applied many times: a list of atoms, each a
//! `(aggregations, by, wider_by)` triple. Applying an atom groups the data
//! by `by`, evaluates every aggregation per group, then pivots the
//! `by \ wider_by` keys into column-name suffixes. Atoms compose with `+`;
//! applied tables outer-join on their `wider_by` identifier columns, and
//! joining tables with different `wider_by` metadata is an error.

use std::collections::HashMap;
use std::sync::Arc;

use statrs::statistics::{Data, OrderStatistics};

use crate::error::{Result, SimError};
use crate::sim::{map_by_condition, MapOptions, SimulationOutput};
use crate::table::{Column, KeyValue, Table};

/// One named aggregation over a group's rows.
#[derive(Clone)]
pub struct Aggregation {
    name: String,
    func: Arc<dyn Fn(&Table) -> Result<AggValue> + Send + Sync>,
}

impl std::fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregation").field("name", &self.name).finish()
    }
}

/// What an aggregation may return: one value, a named vector (element
/// names become column suffixes) or an unnamed vector (suffixed `_X1`…).
pub enum AggValue {
    Scalar(f64),
    Named(Vec<(String, f64)>),
    Vector(Vec<f64>),
}

impl Aggregation {
    pub fn custom(
        name: impl Into<String>,
        func: impl Fn(&Table) -> Result<AggValue> + Send + Sync + 'static,
    ) -> Aggregation {
        Aggregation {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn mean(name: impl Into<String>, column: impl Into<String>) -> Aggregation {
        let column = column.into();
        Aggregation::custom(name, move |t| {
            let v = t.f64s(&column)?;
            if v.is_empty() {
                return Ok(AggValue::Scalar(f64::NAN));
            }
            Ok(AggValue::Scalar(v.iter().sum::<f64>() / v.len() as f64))
        })
    }

    pub fn sd(name: impl Into<String>, column: impl Into<String>) -> Aggregation {
        let column = column.into();
        Aggregation::custom(name, move |t| {
            let v = t.f64s(&column)?;
            if v.len() < 2 {
                return Ok(AggValue::Scalar(f64::NAN));
            }
            let mean = v.iter().sum::<f64>() / v.len() as f64;
            let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (v.len() - 1) as f64;
            Ok(AggValue::Scalar(var.sqrt()))
        })
    }

    pub fn median(name: impl Into<String>, column: impl Into<String>) -> Aggregation {
        let column = column.into();
        Aggregation::custom(name, move |t| {
            let v = t.f64s(&column)?;
            if v.is_empty() {
                return Ok(AggValue::Scalar(f64::NAN));
            }
            Ok(AggValue::Scalar(Data::new(v).median()))
        })
    }

    /// Row count of the group.
    pub fn count(name: impl Into<String>) -> Aggregation {
        Aggregation::custom(name, |t| Ok(AggValue::Scalar(t.n_rows() as f64)))
    }

    /// Empirical quantiles as a named vector; `0.025` becomes the suffix
    /// `q2.5`, so the probabilities stay readable in column names.
    pub fn quantiles(
        name: impl Into<String>,
        column: impl Into<String>,
        probs: Vec<f64>,
    ) -> Aggregation {
        let column = column.into();
        Aggregation::custom(name, move |t| {
            let v = t.f64s(&column)?;
            let mut data = Data::new(v);
            Ok(AggValue::Named(
                probs
                    .iter()
                    .map(|&p| (quantile_label(p), data.quantile(p)))
                    .collect(),
            ))
        })
    }
}

/// `q<percent>` label for a probability, rounded so float residue never
/// leaks into column names (`0.05` → `q5`, `0.025` → `q2.5`).
pub(crate) fn quantile_label(p: f64) -> String {
    let pct = (p * 100.0 * 1e6).round() / 1e6;
    format!("q{pct}")
}

/// One `(aggregations, by, wider_by)` triple.
#[derive(Clone, Debug)]
struct SpecAtom {
    aggs: Vec<Aggregation>,
    by: Vec<String>,
    wider_by: Vec<String>,
}

/// Ordered list of atoms; composition is concatenation.
#[derive(Clone, Default, Debug)]
pub struct SummaryStatSpec {
    atoms: Vec<SpecAtom>,
}

impl SummaryStatSpec {
    /// Single-atom spec. `wider_by` must be a subset of `by`.
    pub fn new(
        aggs: Vec<Aggregation>,
        by: Vec<impl Into<String>>,
        wider_by: Vec<impl Into<String>>,
    ) -> Result<SummaryStatSpec> {
        let by: Vec<String> = by.into_iter().map(Into::into).collect();
        let wider_by: Vec<String> = wider_by.into_iter().map(Into::into).collect();
        if let Some(stray) = wider_by.iter().find(|&w| !by.contains(w)) {
            return Err(SimError::ConfigInvalid(format!(
                "wider_by key '{stray}' is not a grouping key"
            )));
        }
        if aggs.is_empty() {
            return Err(SimError::ConfigInvalid(
                "summary spec needs at least one aggregation".into(),
            ));
        }
        Ok(SummaryStatSpec {
            atoms: vec![SpecAtom { aggs, by, wider_by }],
        })
    }

    /// Concatenate two specs' atoms (what the `+` operator does).
    pub fn compose(mut self, other: SummaryStatSpec) -> SummaryStatSpec {
        self.atoms.extend(other.atoms);
        self
    }

    /// The shared identifier keys across atoms, which every applied atom
    /// is joined on.
    pub fn wider_by(&self) -> Result<&[String]> {
        match self.atoms.first() {
            Some(atom) => Ok(&atom.wider_by),
            None => Err(SimError::EmptyResults("summary spec has no atoms".into())),
        }
    }

    /// Apply every atom to `data` and join the results on `wider_by`.
    pub fn apply(&self, data: &Table) -> Result<SummaryTable> {
        let mut out: Option<SummaryTable> = None;
        for atom in &self.atoms {
            let applied = apply_atom(atom, data)?;
            out = Some(match out {
                None => applied,
                Some(acc) => acc.join(applied)?,
            });
        }
        out.ok_or_else(|| SimError::EmptyResults("summary spec has no atoms".into()))
    }
}

impl std::ops::Add for SummaryStatSpec {
    type Output = SummaryStatSpec;
    fn add(self, rhs: SummaryStatSpec) -> SummaryStatSpec {
        self.compose(rhs)
    }
}

/// An applied spec: a wide table plus the `wider_by` metadata the join
/// contract depends on.
#[derive(Debug, Clone)]
pub struct SummaryTable {
    pub table: Table,
    pub wider_by: Vec<String>,
}

impl SummaryTable {
    /// Full outer join on the `wider_by` identifier columns. Fails with
    /// `WiderByMismatch` when the metadata differs.
    pub fn join(self, other: SummaryTable) -> Result<SummaryTable> {
        if self.wider_by != other.wider_by {
            return Err(SimError::WiderByMismatch {
                left: self.wider_by,
                right: other.wider_by,
            });
        }
        let wider_by = self.wider_by.clone();
        let mut builder = WideBuilder::new(wider_by.clone());
        for side in [&self, &other] {
            let ids = id_rows(&side.table, &wider_by)?;
            for (row, id) in ids.into_iter().enumerate() {
                let slot = builder.row(id);
                for (name, col) in side.table.columns() {
                    if wider_by.iter().any(|w| w == name) {
                        continue;
                    }
                    builder.set(slot, name, col.value_f64(row));
                }
            }
        }
        builder.finish()
    }

    /// Value column names (everything except the identifiers).
    pub fn value_columns(&self) -> Vec<String> {
        self.table
            .names()
            .iter()
            .filter(|n| !self.wider_by.contains(*n))
            .cloned()
            .collect()
    }
}

impl std::ops::Add for SummaryTable {
    type Output = Result<SummaryTable>;
    fn add(self, rhs: SummaryTable) -> Result<SummaryTable> {
        self.join(rhs)
    }
}

/// Apply one spec per condition across the whole on-disk dataset and
/// reassemble a single summary table: the canonical bridge between the
/// dispatcher and the ABC input builder.
pub fn apply_by_condition(
    spec: &SummaryStatSpec,
    output: &SimulationOutput,
    opts: MapOptions,
) -> Result<SummaryTable> {
    let wider_by = spec.wider_by()?.to_vec();
    let table = map_by_condition(output, opts, |cond| spec.apply(cond).map(|s| s.table))?;
    Ok(SummaryTable { table, wider_by })
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect()
}

/// KeyValue id tuple of every row, read back from identifier columns.
fn id_rows(table: &Table, wider_by: &[String]) -> Result<Vec<Vec<KeyValue>>> {
    let groups = table.group_rows(wider_by)?;
    let mut out = vec![Vec::new(); table.n_rows()];
    for (key, rows) in groups {
        for row in rows {
            out[row] = key.clone();
        }
    }
    Ok(out)
}

fn apply_atom(atom: &SpecAtom, data: &Table) -> Result<SummaryTable> {
    let groups = data.group_rows(&atom.by)?;
    let wider_pos: Vec<usize> = atom
        .wider_by
        .iter()
        .map(|w| atom.by.iter().position(|b| b == w).expect("validated subset"))
        .collect();
    let spread_pos: Vec<usize> = (0..atom.by.len())
        .filter(|i| !wider_pos.contains(i))
        .collect();

    let mut builder = WideBuilder::new(atom.wider_by.clone());
    for (key, rows) in groups {
        let group = data.take_rows(&rows);
        let id: Vec<KeyValue> = wider_pos.iter().map(|&p| key[p].clone()).collect();
        let suffix: String = spread_pos
            .iter()
            .map(|&p| format!("_{}_{}", atom.by[p], key[p].label()))
            .collect();
        let slot = builder.row(id);
        for agg in &atom.aggs {
            match (agg.func)(&group)? {
                AggValue::Scalar(v) => {
                    builder.set(slot, &format!("{}{suffix}", agg.name), v);
                }
                AggValue::Named(pairs) => {
                    for (elem, v) in pairs {
                        let col = format!("{}_{}{suffix}", agg.name, sanitize(&elem));
                        builder.set(slot, &col, v);
                    }
                }
                AggValue::Vector(values) => {
                    for (i, v) in values.into_iter().enumerate() {
                        let col = format!("{}_X{}{suffix}", agg.name, i + 1);
                        builder.set(slot, &col, v);
                    }
                }
            }
        }
    }
    builder.finish()
}

/// Accumulates the wide table: identifier rows in first-occurrence order,
/// value columns in first-encounter order, NaN for absent combinations.
struct WideBuilder {
    wider_by: Vec<String>,
    ids: Vec<Vec<KeyValue>>,
    id_index: HashMap<Vec<KeyValue>, usize>,
    col_names: Vec<String>,
    col_index: HashMap<String, usize>,
    cells: Vec<Vec<f64>>, // [column][row]
}

impl WideBuilder {
    fn new(wider_by: Vec<String>) -> WideBuilder {
        WideBuilder {
            wider_by,
            ids: Vec::new(),
            id_index: HashMap::new(),
            col_names: Vec::new(),
            col_index: HashMap::new(),
            cells: Vec::new(),
        }
    }

    fn row(&mut self, id: Vec<KeyValue>) -> usize {
        if let Some(&slot) = self.id_index.get(&id) {
            return slot;
        }
        let slot = self.ids.len();
        self.id_index.insert(id.clone(), slot);
        self.ids.push(id);
        for col in &mut self.cells {
            col.push(f64::NAN);
        }
        slot
    }

    fn set(&mut self, row: usize, name: &str, value: f64) {
        let col = match self.col_index.get(name) {
            Some(&c) => c,
            None => {
                let c = self.col_names.len();
                self.col_index.insert(name.to_string(), c);
                self.col_names.push(name.to_string());
                self.cells.push(vec![f64::NAN; self.ids.len()]);
                c
            }
        };
        self.cells[col][row] = value;
    }

    fn finish(self) -> Result<SummaryTable> {
        let mut table = Table::new();
        for (k, name) in self.wider_by.iter().enumerate() {
            let all_int = self.ids.iter().all(|id| matches!(id[k], KeyValue::Int(_)));
            let any_str = self.ids.iter().any(|id| matches!(id[k], KeyValue::Str(_)));
            if any_str {
                table.push(
                    name,
                    Column::Str(self.ids.iter().map(|id| id[k].label()).collect()),
                )?;
            } else if all_int {
                let v = self
                    .ids
                    .iter()
                    .map(|id| match id[k] {
                        KeyValue::Int(x) => x,
                        _ => unreachable!(),
                    })
                    .collect();
                table.push(name, Column::Int(v))?;
            } else {
                table.push(
                    name,
                    Column::Float(self.ids.iter().map(|id| id[k].as_f64()).collect()),
                )?;
            }
        }
        for (name, values) in self.col_names.into_iter().zip(self.cells) {
            table.push(name, Column::Float(values))?;
        }
        Ok(SummaryTable {
            table,
            wider_by: self.wider_by,
        })
    }
}
