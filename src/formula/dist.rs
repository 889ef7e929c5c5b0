//! Parameterized sampling distributions
//!
//! A resolved distribution holds its parameters as plain vectors; drawing
//! `n` samples recycles parameter vectors elementwise, so a formula like
//! `Normal(mu_vec, 0.2)` gives every draw its own mean.

use rand::rngs::StdRng;
use rand_distr::{Beta, Binomial, Distribution, Exp, Gamma, LogNormal, Normal, Poisson, Uniform};

use crate::error::{Result, SimError};

/// Cap on rejection-sampling attempts per truncated-normal draw.
const TRUNC_NORMAL_MAX_REJECT: usize = 10_000;

/// A distribution with fully-resolved parameter vectors.
///
/// Construction does not validate parameters; `generate` does, reporting
/// bad parameters as `ConfigInvalid` since they describe a mis-specified
/// model rather than a runtime fault.
#[derive(Debug, Clone)]
pub enum Dist {
    Uniform { low: Vec<f64>, high: Vec<f64> },
    Normal { mean: Vec<f64>, sd: Vec<f64> },
    LogNormal { mu: Vec<f64>, sigma: Vec<f64> },
    Binomial { size: Vec<f64>, prob: Vec<f64> },
    Beta { alpha: Vec<f64>, beta: Vec<f64> },
    Gamma { shape: Vec<f64>, scale: Vec<f64> },
    Exponential { rate: Vec<f64> },
    Poisson { lambda: Vec<f64> },
    TruncNormal { mean: Vec<f64>, sd: Vec<f64>, low: Vec<f64>, high: Vec<f64> },
}

/// Parameter value for draw `i`, recycling the vector.
fn par(v: &[f64], i: usize) -> Result<f64> {
    if v.is_empty() {
        return Err(SimError::ConfigInvalid(
            "empty distribution parameter".into(),
        ));
    }
    Ok(v[i % v.len()])
}

impl Dist {
    /// Draw exactly `n` i.i.d. samples.
    pub fn generate(&self, n: usize, rng: &mut StdRng) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(self.draw_one(i, rng)?);
        }
        Ok(out)
    }

    fn draw_one(&self, i: usize, rng: &mut StdRng) -> Result<f64> {
        match self {
            Dist::Uniform { low, high } => {
                let (lo, hi) = (par(low, i)?, par(high, i)?);
                if !(lo < hi) {
                    return Err(SimError::ConfigInvalid(format!(
                        "uniform: low {lo} must be below high {hi}"
                    )));
                }
                Ok(Uniform::new(lo, hi).sample(rng))
            }
            Dist::Normal { mean, sd } => {
                let d = Normal::new(par(mean, i)?, par(sd, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("normal: {e}")))?;
                Ok(d.sample(rng))
            }
            Dist::LogNormal { mu, sigma } => {
                let d = LogNormal::new(par(mu, i)?, par(sigma, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("lognormal: {e}")))?;
                Ok(d.sample(rng))
            }
            Dist::Binomial { size, prob } => {
                let size = par(size, i)?;
                if size < 0.0 || size.fract() != 0.0 {
                    return Err(SimError::ConfigInvalid(format!(
                        "binomial: size {size} must be a non-negative integer"
                    )));
                }
                let d = Binomial::new(size as u64, par(prob, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("binomial: {e}")))?;
                Ok(d.sample(rng) as f64)
            }
            Dist::Beta { alpha, beta } => {
                let d = Beta::new(par(alpha, i)?, par(beta, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("beta: {e}")))?;
                Ok(d.sample(rng))
            }
            Dist::Gamma { shape, scale } => {
                let d = Gamma::new(par(shape, i)?, par(scale, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("gamma: {e}")))?;
                Ok(d.sample(rng))
            }
            Dist::Exponential { rate } => {
                let d = Exp::new(par(rate, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("exponential: {e}")))?;
                Ok(d.sample(rng))
            }
            Dist::Poisson { lambda } => {
                let d = Poisson::new(par(lambda, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("poisson: {e}")))?;
                Ok(d.sample(rng))
            }
            Dist::TruncNormal { mean, sd, low, high } => {
                let (lo, hi) = (par(low, i)?, par(high, i)?);
                if !(lo < hi) {
                    return Err(SimError::ConfigInvalid(format!(
                        "truncnormal: low {lo} must be below high {hi}"
                    )));
                }
                let d = Normal::new(par(mean, i)?, par(sd, i)?)
                    .map_err(|e| SimError::ConfigInvalid(format!("truncnormal: {e}")))?;
                for _ in 0..TRUNC_NORMAL_MAX_REJECT {
                    let x = d.sample(rng);
                    if x >= lo && x <= hi {
                        return Ok(x);
                    }
                }
                Err(SimError::ConfigInvalid(format!(
                    "truncnormal: bounds [{lo}, {hi}] reject nearly all mass"
                )))
            }
        }
    }
}
