//! Resampling-based uncertainty assessment
//!
//! Bootstraps the simulation pool (`resample_abc`), re-running ABC per
//! iteration, plus posterior bootstrap and the summary tables consumed by
//! forest and density plots.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::Rng;
use statrs::statistics::{Data, OrderStatistics};
use tracing::warn;

use super::engine::{run_abc, AbcOptions, AbcResult};
use super::input::{AbcInput, NamedMatrix};
use crate::error::{Result, SimError};
use crate::table::{Column, Table};

/// Repeatedly resample the simulation pool and rerun ABC.
///
/// Each iteration draws `n_samples` pool rows (with or without
/// replacement), extracts the congruent sub-matrices and calls `run_abc`
/// with the same passthrough options. Without replacement the draw cannot
/// exceed the pool; with replacement an oversized draw only warns.
pub fn resample_abc(
    input: &AbcInput,
    n_iterations: usize,
    n_samples: usize,
    replace: bool,
    opts: &AbcOptions,
    rng: &mut StdRng,
) -> Result<Vec<AbcResult>> {
    if n_iterations == 0 || n_samples == 0 {
        return Err(SimError::ConfigInvalid(
            "n_iterations and n_samples must be at least 1".into(),
        ));
    }
    let n = input.n_simulations();
    if !replace && n_samples > n {
        return Err(SimError::ResampleSizeExceeded {
            requested: n_samples,
            available: n,
        });
    }
    if replace && n_samples > n {
        warn!(
            n_samples,
            pool = n,
            "resampling more draws than the pool holds; duplicates guaranteed"
        );
    }

    (0..n_iterations)
        .map(|_| {
            let idx = draw_indices(n, n_samples, replace, rng);
            let sub = AbcInput {
                target: input.target.clone(),
                stat_names: input.stat_names.clone(),
                param: input.param.take_rows(&idx),
                sumstat: input.sumstat.take_rows(&idx),
            };
            run_abc(&sub, opts)
        })
        .collect()
}

/// Sample rows of a result's posterior, uniformly, with or without
/// replacement. Returns an `n_samples × P` matrix with the same columns.
pub fn bootstrap_posterior(
    result: &AbcResult,
    n_samples: usize,
    replace: bool,
    rng: &mut StdRng,
) -> Result<NamedMatrix> {
    let pool = result.posterior_samples();
    let n = pool.n_rows();
    if n == 0 {
        return Err(SimError::EmptyResults("posterior holds no draws".into()));
    }
    if !replace && n_samples > n {
        return Err(SimError::ResampleSizeExceeded {
            requested: n_samples,
            available: n,
        });
    }
    let idx = draw_indices(n, n_samples, replace, rng);
    Ok(pool.take_rows(&idx))
}

fn draw_indices(n: usize, k: usize, replace: bool, rng: &mut StdRng) -> Vec<usize> {
    if replace {
        (0..k).map(|_| rng.gen_range(0..n)).collect()
    } else {
        index::sample(rng, n, k).into_vec()
    }
}

/// Per-iteration parameter medians condensed into a forest-plot table:
/// one row per parameter with mean, median and symmetric quantile bounds,
/// the bounds spelled literally in the column names (`q2.5`, `q97.5` for
/// `ci_level = 0.95`).
pub fn summarise_resample_medians(results: &[AbcResult], ci_level: f64) -> Result<Table> {
    if results.is_empty() {
        return Err(SimError::EmptyResults("no resample iterations".into()));
    }
    let names = results[0].posterior_samples().names().to_vec();
    // K×P matrix of per-iteration medians, one inner vec per parameter
    let mut medians: Vec<Vec<f64>> = vec![Vec::with_capacity(results.len()); names.len()];
    for result in results {
        let posterior = result.posterior_samples();
        if posterior.names() != names.as_slice() {
            return Err(SimError::ConfigInvalid(
                "resample iterations disagree on parameter columns".into(),
            ));
        }
        for (j, name) in names.iter().enumerate() {
            medians[j].push(Data::new(posterior.column(name)?).median());
        }
    }
    per_param_summary(&names, medians, ci_level)
}

/// Single-fit analogue of `summarise_resample_medians`: summarize the
/// preferred posterior draws of one result.
pub fn summarise_posterior(result: &AbcResult, ci_level: f64) -> Result<Table> {
    let posterior = result.posterior_samples();
    if posterior.n_rows() == 0 {
        return Err(SimError::EmptyResults("posterior holds no draws".into()));
    }
    let names = posterior.names().to_vec();
    let values = names
        .iter()
        .map(|n| posterior.column(n))
        .collect::<Result<Vec<_>>>()?;
    per_param_summary(&names, values, ci_level)
}

/// Long-format posterior export for density plotting: one row per
/// `(iteration, parameter, value)` draw.
pub fn posterior_long(results: &[AbcResult]) -> Result<Table> {
    if results.is_empty() {
        return Err(SimError::EmptyResults("no results to export".into()));
    }
    let mut iteration = Vec::new();
    let mut parameter = Vec::new();
    let mut value = Vec::new();
    for (it, result) in results.iter().enumerate() {
        let posterior = result.posterior_samples();
        for name in posterior.names() {
            for v in posterior.column(name)? {
                iteration.push((it + 1) as i64);
                parameter.push(name.clone());
                value.push(v);
            }
        }
    }
    let mut table = Table::new();
    table.push("iteration", Column::Int(iteration))?;
    table.push("parameter", Column::Str(parameter))?;
    table.push("value", Column::Float(value))?;
    Ok(table)
}

fn per_param_summary(
    names: &[String],
    values_per_param: Vec<Vec<f64>>,
    ci_level: f64,
) -> Result<Table> {
    if !(ci_level > 0.0 && ci_level < 1.0) {
        return Err(SimError::ConfigInvalid(format!(
            "ci_level must lie in (0, 1), got {ci_level}"
        )));
    }
    let lo = (1.0 - ci_level) / 2.0;
    let hi = 1.0 - lo;

    let mut mean = Vec::with_capacity(names.len());
    let mut median = Vec::with_capacity(names.len());
    let mut q_lo = Vec::with_capacity(names.len());
    let mut q_hi = Vec::with_capacity(names.len());
    for values in values_per_param {
        mean.push(values.iter().sum::<f64>() / values.len().max(1) as f64);
        let mut data = Data::new(values);
        median.push(data.median());
        q_lo.push(data.quantile(lo));
        q_hi.push(data.quantile(hi));
    }

    let mut table = Table::new();
    table.push("parameter", Column::Str(names.to_vec()))?;
    table.push("mean", Column::Float(mean))?;
    table.push("median", Column::Float(median))?;
    table.push(crate::summary::quantile_label(lo), Column::Float(q_lo))?;
    table.push(crate::summary::quantile_label(hi), Column::Float(q_hi))?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn pool(n: usize) -> AbcInput {
        let param = NamedMatrix::new(
            vec!["V".into(), "A".into()],
            (0..n).map(|i| vec![i as f64, 2.0 * i as f64]).collect(),
        )
        .unwrap();
        let sumstat = NamedMatrix::new(
            vec!["s1".into()],
            (0..n).map(|i| vec![i as f64 / n as f64]).collect(),
        )
        .unwrap();
        AbcInput::new(vec![0.5], vec!["s1".into()], param, sumstat).unwrap()
    }

    #[test]
    fn returns_one_result_per_iteration_with_bounded_acceptance() {
        let mut rng = StdRng::seed_from_u64(5);
        let results = resample_abc(
            &pool(10),
            3,
            5,
            false,
            &AbcOptions::rejection(1.0),
            &mut rng,
        )
        .unwrap();
        assert_eq!(results.len(), 3);
        for r in &results {
            assert!(r.unadj.n_rows() <= 5);
        }
    }

    #[test]
    fn oversized_draw_without_replacement_fails() {
        let mut rng = StdRng::seed_from_u64(5);
        let err = resample_abc(
            &pool(10),
            3,
            11,
            false,
            &AbcOptions::rejection(0.5),
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SimError::ResampleSizeExceeded { requested: 11, available: 10 }
        ));
    }

    #[test]
    fn oversized_draw_with_replacement_warns_and_continues() {
        let mut rng = StdRng::seed_from_u64(5);
        let results = resample_abc(
            &pool(4),
            2,
            9,
            true,
            &AbcOptions::rejection(1.0),
            &mut rng,
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].unadj.n_rows(), 9);
    }

    #[test]
    fn full_pool_without_replacement_is_a_permutation_each_iteration() {
        let mut rng = StdRng::seed_from_u64(31);
        let results = resample_abc(
            &pool(8),
            4,
            8,
            false,
            &AbcOptions::rejection(1.0),
            &mut rng,
        )
        .unwrap();
        for r in &results {
            let mut vs: Vec<f64> = r.unadj.rows().iter().map(|row| row[0]).collect();
            vs.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(vs, (0..8).map(|i| i as f64).collect::<Vec<_>>());
        }
        // fixed seed ⇒ reproducible permutation sequence
        let mut rng2 = StdRng::seed_from_u64(31);
        let again = resample_abc(
            &pool(8),
            4,
            8,
            false,
            &AbcOptions::rejection(1.0),
            &mut rng2,
        )
        .unwrap();
        for (a, b) in results.iter().zip(&again) {
            assert_eq!(a.unadj.rows(), b.unadj.rows());
        }
    }

    #[test]
    fn bootstrap_posterior_has_requested_shape() {
        let mut rng = StdRng::seed_from_u64(6);
        let results = resample_abc(
            &pool(10),
            1,
            10,
            false,
            &AbcOptions::rejection(0.5),
            &mut rng,
        )
        .unwrap();
        let boot = bootstrap_posterior(&results[0], 7, true, &mut rng).unwrap();
        assert_eq!(boot.n_rows(), 7);
        assert_eq!(boot.names(), results[0].posterior_samples().names());

        let n_post = results[0].posterior_samples().n_rows();
        let err = bootstrap_posterior(&results[0], n_post + 1, false, &mut rng).unwrap_err();
        assert!(matches!(err, SimError::ResampleSizeExceeded { .. }));
    }

    #[test]
    fn median_summary_names_quantile_bounds_literally() {
        let mut rng = StdRng::seed_from_u64(7);
        let results = resample_abc(
            &pool(20),
            5,
            20,
            false,
            &AbcOptions::rejection(0.5),
            &mut rng,
        )
        .unwrap();
        let table = summarise_resample_medians(&results, 0.95).unwrap();
        assert_eq!(
            table.names(),
            &["parameter", "mean", "median", "q2.5", "q97.5"]
        );
        assert_eq!(table.n_rows(), 2);
        assert_eq!(
            table.column("parameter"),
            Some(&Column::Str(vec!["V".into(), "A".into()]))
        );
    }

    #[test]
    fn posterior_long_is_one_row_per_draw() {
        let mut rng = StdRng::seed_from_u64(8);
        let results = resample_abc(
            &pool(10),
            2,
            10,
            false,
            &AbcOptions::rejection(0.5),
            &mut rng,
        )
        .unwrap();
        let long = posterior_long(&results).unwrap();
        let expected: usize = results
            .iter()
            .map(|r| r.posterior_samples().n_rows() * r.posterior_samples().n_cols())
            .sum();
        assert_eq!(long.n_rows(), expected);
    }
}
