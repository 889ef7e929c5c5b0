//! Integrator kernels
//!
//! Euler–Maruyama stepped simulators for the three accumulator families:
//! single-boundary DDM, two-boundary DDM, and the leaky competing
//! accumulator with global inhibition. One trial in, an ordered list of
//! boundary crossings out.
//!
//! All kernels share the stepping contract: per step, draw one noise
//! vector over the active items, update every active accumulator, then
//! record at most one crossing (smallest item index wins a tie — a
//! dt-resolution artifact; shrink `dt` to sharpen crossing order).

mod ddm;
mod lca;
pub mod noise;

pub use ddm::{ddm_1b, ddm_2b, Ddm1bInput, Ddm2bInput};
pub use lca::{lca_gi, LcaGiInput};
pub use noise::{gaussian_noise, zero_noise, NoiseFactory, NoiseFn, NoiseMechanism};

use rand::rngs::StdRng;

use crate::error::{Result, SimError};
use crate::formula::Env;
use crate::model::Backend;

/// One recorded boundary crossing. `item_idx` is 1-based; `choice` is
/// `Some(+1 | -1)` for the two-boundary kernel only.
#[derive(Debug, Clone, PartialEq)]
pub struct Crossing {
    pub item_idx: usize,
    pub rt: f64,
    pub choice: Option<i8>,
}

/// Stepping knobs shared by every kernel.
#[derive(Debug, Clone, Copy)]
pub struct StepConfig {
    pub max_t: f64,
    pub dt: f64,
    pub max_reached: usize,
    pub mechanism: NoiseMechanism,
}

impl StepConfig {
    fn validate(&self, n_items: usize) -> Result<()> {
        if n_items == 0 {
            return Err(SimError::InvalidKernelInput("no items".into()));
        }
        if !(self.dt > 0.0) || !self.dt.is_finite() {
            return Err(SimError::InvalidKernelInput(format!(
                "dt must be a positive finite number, got {}",
                self.dt
            )));
        }
        if !(self.max_t > 0.0) {
            return Err(SimError::InvalidKernelInput(format!(
                "max_t must be positive, got {}",
                self.max_t
            )));
        }
        if self.max_reached == 0 || self.max_reached > n_items {
            return Err(SimError::InvalidKernelInput(format!(
                "max_reached {} outside [1, {n_items}]",
                self.max_reached
            )));
        }
        Ok(())
    }
}

/// Noise contribution for one item under the configured coupling.
#[inline]
fn couple(mechanism: NoiseMechanism, x: f64, eps: f64, dt: f64) -> f64 {
    match mechanism {
        NoiseMechanism::Add => eps,
        NoiseMechanism::MultEvidence => x * eps,
        NoiseMechanism::MultT => eps * dt.sqrt(),
    }
}

/// Required per-item parameter, recycled to `n_items`.
fn item_param(env: &Env, name: &str, n: usize) -> Result<Vec<f64>> {
    let v = env.get(name).ok_or_else(|| {
        SimError::InvalidKernelInput(format!("missing per-item parameter '{name}'"))
    })?;
    recycle_items(name, v, n)
}

/// Optional per-item parameter; absent means a constant `default`.
fn item_param_or(env: &Env, name: &str, n: usize, default: f64) -> Result<Vec<f64>> {
    match env.get(name) {
        Some(v) => recycle_items(name, v, n),
        None => Ok(vec![default; n]),
    }
}

fn recycle_items(name: &str, v: &[f64], n: usize) -> Result<Vec<f64>> {
    let k = v.len();
    if k == n {
        return Ok(v.to_vec());
    }
    if k == 0 || n % k != 0 {
        return Err(SimError::InvalidKernelInput(format!(
            "parameter '{name}' has length {k}, expected {n} (or a divisor)"
        )));
    }
    let mut out = Vec::with_capacity(n);
    for _ in 0..n / k {
        out.extend_from_slice(v);
    }
    Ok(out)
}

/// Run the backend's kernel against a fully-resolved item environment.
pub fn run_kernel(
    backend: Backend,
    env: &Env,
    n_items: usize,
    cfg: &StepConfig,
    noise: &NoiseFn,
    rng: &mut StdRng,
) -> Result<Vec<Crossing>> {
    match backend {
        Backend::Ddm => ddm_1b(&Ddm1bInput::from_env(env, n_items)?, cfg, noise, rng),
        Backend::Ddm2b => ddm_2b(&Ddm2bInput::from_env(env, n_items)?, cfg, noise, rng),
        Backend::LcaGi => lca_gi(&LcaGiInput::from_env(env, n_items)?, cfg, noise, rng),
    }
}
