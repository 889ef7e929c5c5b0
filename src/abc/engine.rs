//! ABC engine
//!
//! Rejection acceptance is native: summaries are MAD-normalized, Euclidean
//! distance to the target ranks the pool, and `tol` keeps the closest
//! fraction. Posterior *adjustment* (local-linear regression, neural
//! network) is deliberately not reimplemented here — a caller-supplied
//! `PosteriorAdjuster` does that work and its output is stored verbatim,
//! preferred over the unadjusted draws by `posterior_samples()`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use super::input::{AbcInput, NamedMatrix};
use crate::error::{Result, SimError};

/// Which posterior approximation produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbcMethodKind {
    Rejection,
    LocalLinear,
    NeuralNet,
}

impl std::fmt::Display for AbcMethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            AbcMethodKind::Rejection => "rejection",
            AbcMethodKind::LocalLinear => "loclinear",
            AbcMethodKind::NeuralNet => "neuralnet",
        })
    }
}

/// External posterior-adjustment hook. Receives the accepted rows and
/// returns an adjusted parameter matrix whose columns must match the
/// parameter names.
pub trait PosteriorAdjuster: Send + Sync {
    fn adjust(
        &self,
        accepted_params: &NamedMatrix,
        accepted_sumstats: &NamedMatrix,
        target: &[f64],
        distances: &[f64],
    ) -> Result<NamedMatrix>;
}

/// Posterior approximation method, carrying the external adjuster where
/// one is involved.
#[derive(Clone)]
pub enum AbcMethod {
    Rejection,
    LocalLinear(Arc<dyn PosteriorAdjuster>),
    NeuralNet(Arc<dyn PosteriorAdjuster>),
}

impl AbcMethod {
    pub fn kind(&self) -> AbcMethodKind {
        match self {
            AbcMethod::Rejection => AbcMethodKind::Rejection,
            AbcMethod::LocalLinear(_) => AbcMethodKind::LocalLinear,
            AbcMethod::NeuralNet(_) => AbcMethodKind::NeuralNet,
        }
    }
}

/// Passthrough options for one ABC call.
#[derive(Clone)]
pub struct AbcOptions {
    /// Accepted fraction of the simulation pool, in (0, 1].
    pub tol: f64,
    pub method: AbcMethod,
}

impl AbcOptions {
    pub fn rejection(tol: f64) -> AbcOptions {
        AbcOptions {
            tol,
            method: AbcMethod::Rejection,
        }
    }
}

/// One posterior approximation: the accepted pool rows, their distances,
/// the unadjusted draws and (for regression methods) the adjusted draws.
#[derive(Debug, Clone)]
pub struct AbcResult {
    pub method: AbcMethodKind,
    pub accepted: Vec<usize>,
    pub distances: Vec<f64>,
    pub unadj: NamedMatrix,
    pub adj: Option<NamedMatrix>,
}

impl AbcResult {
    /// Posterior draws, preferring adjusted over unadjusted values.
    pub fn posterior_samples(&self) -> &NamedMatrix {
        self.adj.as_ref().unwrap_or(&self.unadj)
    }
}

/// Run one ABC pass over a built input.
pub fn run_abc(input: &AbcInput, opts: &AbcOptions) -> Result<AbcResult> {
    if !(opts.tol > 0.0 && opts.tol <= 1.0) {
        return Err(SimError::ConfigInvalid(format!(
            "tol must lie in (0, 1], got {}",
            opts.tol
        )));
    }
    let n = input.n_simulations();
    let n_stats = input.stat_names.len();

    // MAD-normalize each summary column; a constant column scales by 1.
    let mut scale = vec![1.0; n_stats];
    for j in 0..n_stats {
        let col: Vec<f64> = (0..n).map(|i| input.sumstat.row(i)[j]).collect();
        let mad = median_absolute_deviation(&col);
        if mad > 0.0 {
            scale[j] = mad;
        }
    }

    let mut ranked: Vec<(usize, f64)> = (0..n)
        .map(|i| {
            let row = input.sumstat.row(i);
            let d2: f64 = (0..n_stats)
                .map(|j| {
                    let z = (row[j] - input.target[j]) / scale[j];
                    z * z
                })
                .sum();
            (i, d2.sqrt())
        })
        .collect();
    // NaN distances (missing summaries) sort to the back
    ranked.sort_by(|a, b| match (a.1.is_nan(), b.1.is_nan()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal),
    });

    let n_accept = ((opts.tol * n as f64).ceil() as usize).clamp(1, n);
    let accepted: Vec<usize> = ranked[..n_accept].iter().map(|(i, _)| *i).collect();
    let distances: Vec<f64> = ranked[..n_accept].iter().map(|(_, d)| *d).collect();

    let unadj = input.param.take_rows(&accepted);
    let adj = match &opts.method {
        AbcMethod::Rejection => None,
        AbcMethod::LocalLinear(adjuster) | AbcMethod::NeuralNet(adjuster) => {
            let accepted_stats = input.sumstat.take_rows(&accepted);
            let adjusted =
                adjuster.adjust(&unadj, &accepted_stats, &input.target, &distances)?;
            if adjusted.names() != input.param.names() {
                return Err(SimError::ConfigInvalid(format!(
                    "adjusted posterior columns {:?} do not match parameters {:?}",
                    adjusted.names(),
                    input.param.names()
                )));
            }
            Some(adjusted)
        }
    };

    Ok(AbcResult {
        method: opts.method.kind(),
        accepted,
        distances,
        unadj,
        adj,
    })
}

fn median_absolute_deviation(values: &[f64]) -> f64 {
    let clean: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if clean.is_empty() {
        return 0.0;
    }
    let med = Data::new(clean.clone()).median();
    let dev: Vec<f64> = clean.iter().map(|v| (v - med).abs()).collect();
    Data::new(dev).median()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> AbcInput {
        // parameter equals the summary; target sits at 0.35 so rows 3 and 4
        // (0.3, 0.4) are the two closest
        let values = vec![0.1, 0.2, 0.3, 0.4, 0.9];
        let param = NamedMatrix::new(
            vec!["V".into()],
            values.iter().map(|&v| vec![v]).collect(),
        )
        .unwrap();
        let sumstat = NamedMatrix::new(
            vec!["mean_rt".into()],
            values.iter().map(|&v| vec![v]).collect(),
        )
        .unwrap();
        AbcInput::new(vec![0.35], vec!["mean_rt".into()], param, sumstat).unwrap()
    }

    #[test]
    fn rejection_keeps_the_closest_fraction() {
        let result = run_abc(&input(), &AbcOptions::rejection(0.4)).unwrap();
        assert_eq!(result.method, AbcMethodKind::Rejection);
        assert_eq!(result.unadj.n_rows(), 2);
        let mut accepted: Vec<f64> =
            result.unadj.rows().iter().map(|r| r[0]).collect();
        accepted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(accepted, vec![0.3, 0.4]);
        assert!(result.adj.is_none());
    }

    #[test]
    fn tolerance_outside_unit_interval_is_rejected() {
        assert!(run_abc(&input(), &AbcOptions::rejection(0.0)).is_err());
        assert!(run_abc(&input(), &AbcOptions::rejection(1.5)).is_err());
    }

    struct ShiftAdjuster;
    impl PosteriorAdjuster for ShiftAdjuster {
        fn adjust(
            &self,
            accepted_params: &NamedMatrix,
            _accepted_sumstats: &NamedMatrix,
            _target: &[f64],
            _distances: &[f64],
        ) -> Result<NamedMatrix> {
            NamedMatrix::new(
                accepted_params.names().to_vec(),
                accepted_params
                    .rows()
                    .iter()
                    .map(|r| r.iter().map(|v| v + 100.0).collect())
                    .collect(),
            )
        }
    }

    #[test]
    fn adjusted_values_are_stored_verbatim_and_preferred() {
        let opts = AbcOptions {
            tol: 0.4,
            method: AbcMethod::LocalLinear(Arc::new(ShiftAdjuster)),
        };
        let result = run_abc(&input(), &opts).unwrap();
        assert_eq!(result.method, AbcMethodKind::LocalLinear);
        let posterior = result.posterior_samples();
        assert!(posterior.rows().iter().all(|r| r[0] > 99.0));
        // unadjusted draws stay available
        assert!(result.unadj.rows().iter().all(|r| r[0] < 1.0));
    }
}
