//! Noise generation for the Euler–Maruyama steps
//!
//! A noise callable has signature `(rng, count, dt) → vector`; the factory
//! builds one per trial, closing over the trial's resolved parameters. How
//! the kernel consumes the vector is governed by `NoiseMechanism`.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::formula::Env;

/// Per-step noise callable: `(rng, count, dt) → vector of length count`.
pub type NoiseFn = Box<dyn Fn(&mut StdRng, usize, f64) -> Vec<f64> + Send>;

/// Builds a noise callable from a trial's resolved environment.
pub type NoiseFactory = Arc<dyn Fn(&Env) -> NoiseFn + Send + Sync>;

/// How the kernel couples noise into the accumulator update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseMechanism {
    /// `x += V·dt + ε`
    Add,
    /// `x += V·dt + x·ε`
    MultEvidence,
    /// `x += V·dt + ε·√dt`
    MultT,
}

impl NoiseMechanism {
    /// Parse a config string. `"mult"` is accepted as an alias of
    /// `mult_evidence` (the validation layer has always taken both).
    pub fn parse(s: &str) -> Result<NoiseMechanism> {
        match s {
            "add" => Ok(NoiseMechanism::Add),
            "mult" | "mult_evidence" => Ok(NoiseMechanism::MultEvidence),
            "mult_t" => Ok(NoiseMechanism::MultT),
            other => Err(SimError::ConfigInvalid(format!(
                "unknown noise_mechanism '{other}' (expected add, mult, mult_evidence or mult_t)"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NoiseMechanism::Add => "add",
            NoiseMechanism::MultEvidence => "mult_evidence",
            NoiseMechanism::MultT => "mult_t",
        }
    }
}

/// Gaussian diffusion noise.
///
/// Reads the optional trial parameter `s` (noise scale, default 1.0) and
/// draws `N(0, s²·dt)` — pre-scaled by `√dt` so that `add` coupling is a
/// standard Euler–Maruyama step. Under `mult_t` the kernel applies its own
/// `√dt`, so pair that mechanism with an unscaled custom factory instead.
pub fn gaussian_noise() -> NoiseFactory {
    Arc::new(|env: &Env| -> NoiseFn {
        let s = env.scalar("s").unwrap_or(1.0);
        Box::new(move |rng: &mut StdRng, count: usize, dt: f64| {
            let sd = s * dt.sqrt();
            if sd <= 0.0 {
                return vec![0.0; count];
            }
            match Normal::new(0.0, sd) {
                Ok(d) => (0..count).map(|_| d.sample(rng)).collect(),
                Err(_) => vec![0.0; count],
            }
        })
    })
}

/// Zero noise: the convention by which the ballistic LBA runs on the
/// two-boundary diffusion kernel.
pub fn zero_noise() -> NoiseFactory {
    Arc::new(|_env: &Env| -> NoiseFn {
        Box::new(|_rng: &mut StdRng, count: usize, _dt: f64| vec![0.0; count])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn parse_accepts_mult_alias() {
        assert_eq!(
            NoiseMechanism::parse("mult").unwrap(),
            NoiseMechanism::MultEvidence
        );
        assert_eq!(NoiseMechanism::parse("add").unwrap(), NoiseMechanism::Add);
        assert!(NoiseMechanism::parse("multiplicative").is_err());
    }

    #[test]
    fn gaussian_noise_scales_with_s_and_dt() {
        let mut rng = StdRng::seed_from_u64(7);
        let env = Env::from_pairs([("s", vec![0.0])]);
        let f = gaussian_noise()(&env);
        assert_eq!(f(&mut rng, 3, 0.001), vec![0.0, 0.0, 0.0]);

        let env = Env::from_pairs([("s", vec![1.0])]);
        let f = gaussian_noise()(&env);
        let eps = f(&mut rng, 1000, 0.01);
        let var: f64 = eps.iter().map(|e| e * e).sum::<f64>() / eps.len() as f64;
        // Var ≈ s²·dt = 0.01
        assert!((var - 0.01).abs() < 0.003, "var {var}");
    }

    #[test]
    fn zero_noise_is_identically_zero() {
        let mut rng = StdRng::seed_from_u64(8);
        let f = zero_noise()(&Env::new());
        assert!(f(&mut rng, 5, 0.1).iter().all(|&e| e == 0.0));
    }
}
