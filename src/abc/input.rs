//! ABC input assembly
//!
//! ABC needs three congruent arrays: a target summary vector, an `N×P`
//! matrix of simulation parameters and an `N×S` matrix of simulation
//! summaries. Row `i` of `param` and `sumstat` describe the same
//! simulated condition; `target` aligns column-wise with `sumstat`. The
//! builder enforces the congruence instead of trusting the caller.

use std::collections::HashMap;

use crate::error::{Result, SimError};
use crate::summary::SummaryTable;
use crate::table::Table;

/// Dense row-major matrix with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMatrix {
    names: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl NamedMatrix {
    pub fn new(names: Vec<String>, rows: Vec<Vec<f64>>) -> Result<NamedMatrix> {
        if let Some(bad) = rows.iter().find(|r| r.len() != names.len()) {
            return Err(SimError::ConfigInvalid(format!(
                "matrix row of width {} does not match {} column names",
                bad.len(),
                names.len()
            )));
        }
        Ok(NamedMatrix { names, rows })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.rows[i]
    }

    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        let j = self
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| SimError::ConfigInvalid(format!("no matrix column '{name}'")))?;
        Ok(self.rows.iter().map(|r| r[j]).collect())
    }

    /// New matrix holding the rows at `idx` (duplicates allowed).
    pub fn take_rows(&self, idx: &[usize]) -> NamedMatrix {
        NamedMatrix {
            names: self.names.clone(),
            rows: idx.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Extract named columns from a table, row-major.
    pub fn from_table(table: &Table, columns: &[String]) -> Result<NamedMatrix> {
        let cols: Vec<Vec<f64>> = columns
            .iter()
            .map(|c| table.f64s(c))
            .collect::<Result<_>>()?;
        let n = table.n_rows();
        let rows = (0..n)
            .map(|i| cols.iter().map(|c| c[i]).collect())
            .collect();
        Ok(NamedMatrix {
            names: columns.to_vec(),
            rows,
        })
    }
}

/// The three congruent arrays handed to the ABC engine.
#[derive(Debug, Clone)]
pub struct AbcInput {
    pub target: Vec<f64>,
    pub stat_names: Vec<String>,
    pub param: NamedMatrix,
    pub sumstat: NamedMatrix,
}

impl AbcInput {
    pub fn new(
        target: Vec<f64>,
        stat_names: Vec<String>,
        param: NamedMatrix,
        sumstat: NamedMatrix,
    ) -> Result<AbcInput> {
        if param.n_rows() != sumstat.n_rows() {
            return Err(SimError::ConfigInvalid(format!(
                "param has {} rows but sumstat has {}",
                param.n_rows(),
                sumstat.n_rows()
            )));
        }
        if param.n_rows() == 0 {
            return Err(SimError::EmptyResults("abc input holds no simulations".into()));
        }
        if target.len() != stat_names.len() || sumstat.names() != stat_names.as_slice() {
            return Err(SimError::ConfigInvalid(
                "target / sumstat column alignment broken".into(),
            ));
        }
        Ok(AbcInput {
            target,
            stat_names,
            param,
            sumstat,
        })
    }

    pub fn n_simulations(&self) -> usize {
        self.param.n_rows()
    }
}

/// Align per-condition parameters, per-condition simulation summaries and
/// the observed-data summary into one `AbcInput`.
///
/// `conditions` is the evaluated-conditions table (needs `condition_idx`
/// plus the chosen `param_cols`); `sim_summaries` carries one row per
/// condition keyed by `condition_idx`; `target_summaries` is the same spec
/// applied to the observed data and must reduce to a single row with the
/// same value columns.
pub fn build_abc_input(
    conditions: &Table,
    sim_summaries: &SummaryTable,
    target_summaries: &SummaryTable,
    param_cols: &[String],
) -> Result<AbcInput> {
    let stat_names = sim_summaries.value_columns();
    if stat_names.is_empty() {
        return Err(SimError::EmptyResults("summary table has no value columns".into()));
    }
    if target_summaries.table.n_rows() != 1 {
        return Err(SimError::ConfigInvalid(format!(
            "target summaries must reduce to one row, got {}",
            target_summaries.table.n_rows()
        )));
    }
    // target aligned column-wise to the simulation summaries
    let target: Vec<f64> = stat_names
        .iter()
        .map(|name| {
            target_summaries
                .table
                .f64s(name)
                .map(|v| v[0])
                .map_err(|_| {
                    SimError::ConfigInvalid(format!(
                        "target summaries lack the simulated statistic '{name}'"
                    ))
                })
        })
        .collect::<Result<_>>()?;

    // row alignment: sim summary order drives everything; parameters are
    // looked up by condition_idx
    let sum_ids = sim_summaries.table.f64s("condition_idx").map_err(|_| {
        SimError::ConfigInvalid("simulation summaries lack condition_idx".into())
    })?;
    let cond_ids = conditions.f64s("condition_idx")?;
    let by_id: HashMap<i64, usize> = cond_ids
        .iter()
        .enumerate()
        .map(|(row, &id)| (id as i64, row))
        .collect();
    let cond_rows: Vec<usize> = sum_ids
        .iter()
        .map(|&id| {
            by_id.get(&(id as i64)).copied().ok_or_else(|| {
                SimError::ConfigInvalid(format!(
                    "summary references condition {id} absent from the conditions table"
                ))
            })
        })
        .collect::<Result<_>>()?;

    let param =
        NamedMatrix::from_table(conditions, param_cols)?.take_rows(&cond_rows);
    let sumstat = NamedMatrix::from_table(&sim_summaries.table, &stat_names)?;
    AbcInput::new(target, stat_names, param, sumstat)
}
