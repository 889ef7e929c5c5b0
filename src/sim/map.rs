//! Out-of-core map-by-condition
//!
//! Iterates the dataset one chunk partition at a time, splits each chunk
//! by `condition_idx`, applies a user function per condition and combines
//! the results. Conditions never straddle chunks (they are assigned to
//! chunks up front), so every invocation sees all rows of exactly one
//! condition.
//!
//! Output order is chunk order, then condition order within chunk; callers
//! needing a strict global order sort by `condition_idx` afterwards.

use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::sim::output::SimulationOutput;
use crate::table::Table;

/// Knobs for a dispatch pass. Parallel mode fans chunks out on the global
/// rayon pool; memory stays bounded at one chunk per worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct MapOptions {
    pub parallel: bool,
    pub progress: bool,
}

/// Apply `f` to every condition's rows and row-concatenate the results
/// (column union; absent columns fill as NaN).
pub fn map_by_condition<F>(output: &SimulationOutput, opts: MapOptions, f: F) -> Result<Table>
where
    F: Fn(&Table) -> Result<Table> + Sync,
{
    map_by_condition_reduce(output, opts, f, |pieces| Ok(Table::concat(&pieces)))
}

/// General form: apply `f` per condition, then fold every result through
/// `combine` in chunk/condition order.
pub fn map_by_condition_reduce<T, F, C>(
    output: &SimulationOutput,
    opts: MapOptions,
    f: F,
    combine: C,
) -> Result<T>
where
    T: Send,
    F: Fn(&Table) -> Result<T> + Sync,
    C: FnOnce(Vec<T>) -> Result<T>,
{
    let dataset = output.open_dataset();
    let keys = dataset.chunk_keys()?;
    let n_chunks = keys.len();

    let per_chunk = |k: u32| -> Result<Vec<T>> {
        let chunk = dataset.read_chunk(k)?;
        let groups = chunk.group_rows(&["condition_idx".to_string()])?;
        let out = groups
            .iter()
            .map(|(_, rows)| f(&chunk.take_rows(rows)))
            .collect::<Result<Vec<T>>>()?;
        if opts.progress {
            debug!(chunk = k, of = n_chunks, conditions = out.len(), "condition map");
        }
        Ok(out)
    };

    let nested: Vec<Vec<T>> = if opts.parallel {
        keys.into_par_iter()
            .map(per_chunk)
            .collect::<Result<Vec<_>>>()?
    } else {
        keys.into_iter().map(per_chunk).collect::<Result<Vec<_>>>()?
    };

    combine(nested.into_iter().flatten().collect())
}
