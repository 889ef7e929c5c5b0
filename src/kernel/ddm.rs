//! Drift-diffusion kernels
//!
//! `ddm_1b` races items toward a single upper boundary; `ddm_2b` adds a
//! lower boundary and reports the signed choice. Items step in lockstep
//! over the shared time grid so the one-crossing-per-step rule is
//! well-defined across items.

use rand::rngs::StdRng;

use super::noise::NoiseFn;
use super::{couple, item_param, item_param_or, Crossing, StepConfig};
use crate::error::Result;
use crate::formula::Env;

/// Per-item parameters for the single-boundary kernel.
#[derive(Debug, Clone)]
pub struct Ddm1bInput {
    pub v: Vec<f64>,
    pub a: Vec<f64>,
    pub z: Vec<f64>,
    pub ndt: Vec<f64>,
}

impl Ddm1bInput {
    pub fn from_env(env: &Env, n_items: usize) -> Result<Ddm1bInput> {
        Ok(Ddm1bInput {
            v: item_param(env, "V", n_items)?,
            a: item_param(env, "A", n_items)?,
            z: item_param_or(env, "Z", n_items, 0.0)?,
            ndt: item_param_or(env, "ndt", n_items, 0.0)?,
        })
    }
}

/// Per-item parameters for the two-boundary kernel.
#[derive(Debug, Clone)]
pub struct Ddm2bInput {
    pub v: Vec<f64>,
    pub a_upper: Vec<f64>,
    pub a_lower: Vec<f64>,
    pub z: Vec<f64>,
    pub ndt: Vec<f64>,
}

impl Ddm2bInput {
    pub fn from_env(env: &Env, n_items: usize) -> Result<Ddm2bInput> {
        Ok(Ddm2bInput {
            v: item_param(env, "V", n_items)?,
            a_upper: item_param(env, "A_upper", n_items)?,
            a_lower: item_param(env, "A_lower", n_items)?,
            z: item_param_or(env, "Z", n_items, 0.0)?,
            ndt: item_param_or(env, "ndt", n_items, 0.0)?,
        })
    }
}

/// Single-boundary drift diffusion: first items to reach `A` respond.
pub fn ddm_1b(
    input: &Ddm1bInput,
    cfg: &StepConfig,
    noise: &NoiseFn,
    rng: &mut StdRng,
) -> Result<Vec<Crossing>> {
    let n = input.v.len();
    cfg.validate(n)?;

    let mut x = input.z.clone();
    let mut active: Vec<usize> = (0..n).collect();
    let mut crossings = Vec::with_capacity(cfg.max_reached);

    let mut k: u64 = 0;
    loop {
        k += 1;
        let t = k as f64 * cfg.dt;
        if t > cfg.max_t + 1e-12 {
            break;
        }
        let eps = noise(rng, active.len(), cfg.dt);
        for (j, &i) in active.iter().enumerate() {
            let e = eps.get(j).copied().unwrap_or(0.0);
            x[i] += input.v[i] * cfg.dt + couple(cfg.mechanism, x[i], e, cfg.dt);
        }
        // active is ascending, so position() yields the smallest item index
        if let Some(pos) = active.iter().position(|&i| x[i] >= input.a[i]) {
            let i = active.remove(pos);
            crossings.push(Crossing {
                item_idx: i + 1,
                rt: t + input.ndt[i],
                choice: None,
            });
            if crossings.len() == cfg.max_reached || active.is_empty() {
                break;
            }
        }
    }
    Ok(crossings)
}

/// Two-boundary drift diffusion: `+1` at the upper boundary, `-1` at the
/// lower; either outcome finishes that item.
pub fn ddm_2b(
    input: &Ddm2bInput,
    cfg: &StepConfig,
    noise: &NoiseFn,
    rng: &mut StdRng,
) -> Result<Vec<Crossing>> {
    let n = input.v.len();
    cfg.validate(n)?;

    let mut x = input.z.clone();
    let mut active: Vec<usize> = (0..n).collect();
    let mut crossings = Vec::with_capacity(cfg.max_reached);

    let mut k: u64 = 0;
    loop {
        k += 1;
        let t = k as f64 * cfg.dt;
        if t > cfg.max_t + 1e-12 {
            break;
        }
        let eps = noise(rng, active.len(), cfg.dt);
        for (j, &i) in active.iter().enumerate() {
            let e = eps.get(j).copied().unwrap_or(0.0);
            x[i] += input.v[i] * cfg.dt + couple(cfg.mechanism, x[i], e, cfg.dt);
        }
        let hit = active
            .iter()
            .position(|&i| x[i] >= input.a_upper[i] || x[i] <= input.a_lower[i]);
        if let Some(pos) = hit {
            let i = active.remove(pos);
            let choice = if x[i] >= input.a_upper[i] { 1 } else { -1 };
            crossings.push(Crossing {
                item_idx: i + 1,
                rt: t + input.ndt[i],
                choice: Some(choice),
            });
            if crossings.len() == cfg.max_reached || active.is_empty() {
                break;
            }
        }
    }
    Ok(crossings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::noise::{gaussian_noise, zero_noise, NoiseMechanism};
    use rand::SeedableRng;

    fn cfg(max_t: f64, dt: f64, max_reached: usize) -> StepConfig {
        StepConfig {
            max_t,
            dt,
            max_reached,
            mechanism: NoiseMechanism::Add,
        }
    }

    #[test]
    fn huge_drift_crosses_on_the_first_step() {
        let input = Ddm1bInput {
            v: vec![1e9],
            a: vec![1.0],
            z: vec![0.0],
            ndt: vec![0.0],
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let out = ddm_1b(&input, &cfg(1.0, 1e-3, 1), &noise, &mut rng).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].item_idx, 1);
        assert!((out[0].rt - 1e-3).abs() < 1e-12);
        assert_eq!(out[0].choice, None);
    }

    #[test]
    fn zero_drift_zero_noise_never_crosses() {
        let input = Ddm1bInput {
            v: vec![0.0],
            a: vec![1.0],
            z: vec![0.0],
            ndt: vec![0.0],
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let out = ddm_1b(&input, &cfg(0.1, 1e-3, 1), &noise, &mut rng).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn non_decision_time_shifts_rt() {
        let input = Ddm1bInput {
            v: vec![1e9],
            a: vec![1.0],
            z: vec![0.0],
            ndt: vec![0.25],
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let out = ddm_1b(&input, &cfg(1.0, 1e-3, 1), &noise, &mut rng).unwrap();
        assert!((out[0].rt - 0.251).abs() < 1e-12);
    }

    #[test]
    fn rank_order_follows_drift_magnitude() {
        let input = Ddm1bInput {
            v: vec![1.0, 4.0, 2.0],
            a: vec![1.0, 1.0, 1.0],
            z: vec![0.0; 3],
            ndt: vec![0.0; 3],
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let out = ddm_1b(&input, &cfg(2.0, 1e-3, 3), &noise, &mut rng).unwrap();
        let order: Vec<usize> = out.iter().map(|c| c.item_idx).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn max_reached_truncates_the_race() {
        let input = Ddm1bInput {
            v: vec![4.0, 2.0, 1.0],
            a: vec![1.0; 3],
            z: vec![0.0; 3],
            ndt: vec![0.0; 3],
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let out = ddm_1b(&input, &cfg(2.0, 1e-3, 2), &noise, &mut rng).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].item_idx, 1);
        assert_eq!(out[1].item_idx, 2);
    }

    #[test]
    fn tie_goes_to_the_smaller_item_index() {
        let input = Ddm1bInput {
            v: vec![1e9, 1e9],
            a: vec![1.0, 1.0],
            z: vec![0.0, 0.0],
            ndt: vec![0.0, 0.0],
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let out = ddm_1b(&input, &cfg(1.0, 1e-3, 2), &noise, &mut rng).unwrap();
        assert_eq!(out[0].item_idx, 1);
        assert_eq!(out[1].item_idx, 2);
        // second crossing lands on the next step
        assert!(out[1].rt > out[0].rt);
    }

    #[test]
    fn two_boundary_reports_signed_choice() {
        let up = Ddm2bInput {
            v: vec![1e9],
            a_upper: vec![1.0],
            a_lower: vec![-1.0],
            z: vec![0.0],
            ndt: vec![0.0],
        };
        let down = Ddm2bInput {
            v: vec![-1e9],
            ..up.clone()
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let hit_up = ddm_2b(&up, &cfg(1.0, 1e-3, 1), &noise, &mut rng).unwrap();
        let hit_down = ddm_2b(&down, &cfg(1.0, 1e-3, 1), &noise, &mut rng).unwrap();
        assert_eq!(hit_up[0].choice, Some(1));
        assert_eq!(hit_down[0].choice, Some(-1));
    }

    #[test]
    fn symmetric_diffusion_splits_choices_evenly() {
        let input = Ddm2bInput {
            v: vec![0.0],
            a_upper: vec![1.0],
            a_lower: vec![-1.0],
            z: vec![0.0],
            ndt: vec![0.0],
        };
        let env = Env::from_pairs([("s", vec![3.0])]);
        let noise = gaussian_noise()(&env);
        let mut rng = StdRng::seed_from_u64(1234);
        let mut ups = 0usize;
        let mut total = 0usize;
        for _ in 0..10_000 {
            let out = ddm_2b(&input, &cfg(5.0, 1e-2, 1), &noise, &mut rng).unwrap();
            if let Some(c) = out.first() {
                total += 1;
                if c.choice == Some(1) {
                    ups += 1;
                }
            }
        }
        let p_up = ups as f64 / total as f64;
        assert!((p_up - 0.5).abs() < 0.02, "P(choice=+1) = {p_up}");
    }

    #[test]
    fn bad_step_config_is_invalid_kernel_input() {
        let input = Ddm1bInput {
            v: vec![1.0],
            a: vec![1.0],
            z: vec![0.0],
            ndt: vec![0.0],
        };
        let noise = zero_noise()(&Env::new());
        let mut rng = StdRng::seed_from_u64(0);
        let bad = StepConfig {
            max_t: 1.0,
            dt: -0.1,
            max_reached: 1,
            mechanism: NoiseMechanism::Add,
        };
        assert!(matches!(
            ddm_1b(&input, &bad, &noise, &mut rng),
            Err(crate::error::SimError::InvalidKernelInput(_))
        ));
    }
}
