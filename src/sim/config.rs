//! Simulation configuration
//!
//! A validated recipe for one simulation run: the three formula tiers, the
//! kernel selection, grid sizes, time grid, noise setup and partitioning /
//! parallelism knobs. Construction goes through the builder; `build()`
//! validates everything up front so the driver never has to.

use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, SimError};
use crate::formula::Binding;
use crate::kernel::{gaussian_noise, NoiseFactory, NoiseMechanism};
use crate::model::{route, Backend};

/// Row cap per chunk used by the partitioning heuristic.
const MAX_ROWS_PER_CHUNK: usize = 200_000;

/// Complete, validated recipe for a simulation run.
#[derive(Clone)]
pub struct SimulationConfig {
    pub model: String,
    pub backend: Backend,
    pub prior_params: Vec<(String, f64)>,
    pub prior_formulas: Vec<Binding>,
    pub between_trial_formulas: Vec<Binding>,
    pub item_formulas: Vec<Binding>,
    pub n_conditions: usize,
    pub n_trials_per_condition: usize,
    pub n_items: usize,
    pub max_reached: usize,
    pub max_t: f64,
    pub dt: f64,
    pub noise_mechanism: NoiseMechanism,
    pub noise_factory: NoiseFactory,
    pub n_conditions_per_chunk: usize,
    pub parallel: bool,
    pub n_cores: usize,
    pub rand_seed: u64,
}

impl SimulationConfig {
    pub fn builder(model: impl Into<String>) -> SimulationConfigBuilder {
        SimulationConfigBuilder::new(model)
    }

    /// Number of chunk partitions this run will produce.
    pub fn n_chunks(&self) -> u32 {
        self.n_conditions.div_ceil(self.n_conditions_per_chunk) as u32
    }

    /// Every LHS name across all tiers plus prior-constant keys.
    pub fn lhs_names(&self) -> HashSet<String> {
        let mut names: HashSet<String> =
            self.prior_params.iter().map(|(k, _)| k.clone()).collect();
        for b in self
            .prior_formulas
            .iter()
            .chain(&self.between_trial_formulas)
            .chain(&self.item_formulas)
        {
            names.insert(b.name.clone());
        }
        names
    }
}

impl fmt::Debug for SimulationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationConfig")
            .field("model", &self.model)
            .field("backend", &self.backend)
            .field("n_conditions", &self.n_conditions)
            .field("n_trials_per_condition", &self.n_trials_per_condition)
            .field("n_items", &self.n_items)
            .field("max_reached", &self.max_reached)
            .field("max_t", &self.max_t)
            .field("dt", &self.dt)
            .field("noise_mechanism", &self.noise_mechanism)
            .field("n_conditions_per_chunk", &self.n_conditions_per_chunk)
            .field("parallel", &self.parallel)
            .field("n_cores", &self.n_cores)
            .field("rand_seed", &self.rand_seed)
            .finish_non_exhaustive()
    }
}

/// Builder with the knobs a caller may leave to defaults: noise factory
/// (seeded Gaussian), `max_reached` (`n_items`), chunk size (heuristic),
/// `n_cores` / `rand_seed` (auto-filled when parallel).
pub struct SimulationConfigBuilder {
    model: String,
    backend: Option<Backend>,
    prior_params: Vec<(String, f64)>,
    prior_formulas: Vec<Binding>,
    between_trial_formulas: Vec<Binding>,
    item_formulas: Vec<Binding>,
    n_conditions: Option<usize>,
    n_trials_per_condition: Option<usize>,
    n_items: usize,
    max_reached: Option<usize>,
    max_t: Option<f64>,
    dt: Option<f64>,
    noise_mechanism: NoiseMechanism,
    noise_factory: Option<NoiseFactory>,
    n_conditions_per_chunk: Option<usize>,
    parallel: bool,
    n_cores: Option<usize>,
    rand_seed: Option<u64>,
}

impl SimulationConfigBuilder {
    fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            backend: None,
            prior_params: Vec::new(),
            prior_formulas: Vec::new(),
            between_trial_formulas: Vec::new(),
            item_formulas: Vec::new(),
            n_conditions: None,
            n_trials_per_condition: None,
            n_items: 1,
            max_reached: None,
            max_t: None,
            dt: None,
            noise_mechanism: NoiseMechanism::Add,
            noise_factory: None,
            n_conditions_per_chunk: None,
            parallel: false,
            n_cores: None,
            rand_seed: None,
        }
    }

    /// Name the backend directly, bypassing detection (the escape hatch
    /// for an ambiguous model declaration).
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn prior_param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.prior_params.push((name.into(), value));
        self
    }

    pub fn prior_formulas(mut self, bindings: Vec<Binding>) -> Self {
        self.prior_formulas = bindings;
        self
    }

    pub fn between_trial_formulas(mut self, bindings: Vec<Binding>) -> Self {
        self.between_trial_formulas = bindings;
        self
    }

    pub fn item_formulas(mut self, bindings: Vec<Binding>) -> Self {
        self.item_formulas = bindings;
        self
    }

    pub fn n_conditions(mut self, n: usize) -> Self {
        self.n_conditions = Some(n);
        self
    }

    pub fn n_trials_per_condition(mut self, n: usize) -> Self {
        self.n_trials_per_condition = Some(n);
        self
    }

    pub fn n_items(mut self, n: usize) -> Self {
        self.n_items = n;
        self
    }

    pub fn max_reached(mut self, n: usize) -> Self {
        self.max_reached = Some(n);
        self
    }

    pub fn max_t(mut self, t: f64) -> Self {
        self.max_t = Some(t);
        self
    }

    pub fn dt(mut self, dt: f64) -> Self {
        self.dt = Some(dt);
        self
    }

    pub fn noise_mechanism(mut self, mechanism: NoiseMechanism) -> Self {
        self.noise_mechanism = mechanism;
        self
    }

    /// Parse-and-set variant accepting the config strings, including the
    /// `mult` alias.
    pub fn noise_mechanism_str(mut self, mechanism: &str) -> Result<Self> {
        self.noise_mechanism = NoiseMechanism::parse(mechanism)?;
        Ok(self)
    }

    pub fn noise_factory(mut self, factory: NoiseFactory) -> Self {
        self.noise_factory = Some(factory);
        self
    }

    pub fn n_conditions_per_chunk(mut self, n: usize) -> Self {
        self.n_conditions_per_chunk = Some(n);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn n_cores(mut self, n: usize) -> Self {
        self.n_cores = Some(n);
        self
    }

    pub fn rand_seed(mut self, seed: u64) -> Self {
        self.rand_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SimulationConfig> {
        let n_conditions = require(self.n_conditions, "n_conditions")?;
        let n_trials_per_condition =
            require(self.n_trials_per_condition, "n_trials_per_condition")?;
        let max_t = require(self.max_t, "max_t")?;
        let dt = require(self.dt, "dt")?;

        if self.n_items == 0 {
            return Err(SimError::ConfigInvalid("n_items must be at least 1".into()));
        }
        let max_reached = self.max_reached.unwrap_or(self.n_items);
        if max_reached == 0 || max_reached > self.n_items {
            return Err(SimError::ConfigInvalid(format!(
                "max_reached {max_reached} outside [1, n_items = {}]",
                self.n_items
            )));
        }
        for (label, value) in [("max_t", max_t), ("dt", dt)] {
            if !(value > 0.0) || !value.is_finite() {
                return Err(SimError::ConfigInvalid(format!(
                    "{label} must be a positive finite number, got {value}"
                )));
            }
        }
        if n_conditions == 0 || n_trials_per_condition == 0 {
            return Err(SimError::ConfigInvalid(
                "n_conditions and n_trials_per_condition must be at least 1".into(),
            ));
        }

        // Resolve the kernel, then check it can actually be parameterized.
        let mut lhs: HashSet<String> = self.prior_params.iter().map(|(k, _)| k.clone()).collect();
        for b in self
            .prior_formulas
            .iter()
            .chain(&self.between_trial_formulas)
            .chain(&self.item_formulas)
        {
            lhs.insert(b.name.clone());
        }
        let backend = match self.backend {
            Some(b) => b,
            None => route(&self.model, &lhs)?,
        };
        let missing: Vec<&str> = backend
            .required_params()
            .iter()
            .copied()
            .filter(|p| !lhs.contains(*p))
            .collect();
        if !missing.is_empty() {
            return Err(SimError::ConfigInvalid(format!(
                "backend {backend} requires parameters {missing:?}, none of the formula tiers bind them"
            )));
        }

        let n_cores = match (self.parallel, self.n_cores) {
            (false, _) => 1,
            (true, Some(n)) if n >= 1 => n,
            (true, Some(n)) => {
                return Err(SimError::ConfigInvalid(format!(
                    "n_cores must be at least 1, got {n}"
                )))
            }
            (true, None) => num_cpus::get().saturating_sub(1).max(1),
        };
        let rand_seed = self.rand_seed.unwrap_or_else(rand::random);

        let n_conditions_per_chunk = match self.n_conditions_per_chunk {
            Some(n) if n >= 1 => n,
            Some(n) => {
                return Err(SimError::ConfigInvalid(format!(
                    "n_conditions_per_chunk must be at least 1, got {n}"
                )))
            }
            None => default_conditions_per_chunk(
                n_conditions,
                n_trials_per_condition,
                self.n_items,
                self.parallel,
                n_cores,
            ),
        };

        Ok(SimulationConfig {
            model: self.model,
            backend,
            prior_params: self.prior_params,
            prior_formulas: self.prior_formulas,
            between_trial_formulas: self.between_trial_formulas,
            item_formulas: self.item_formulas,
            n_conditions,
            n_trials_per_condition,
            n_items: self.n_items,
            max_reached,
            max_t,
            dt,
            noise_mechanism: self.noise_mechanism,
            noise_factory: self.noise_factory.unwrap_or_else(gaussian_noise),
            n_conditions_per_chunk,
            parallel: self.parallel,
            n_cores,
            rand_seed,
        })
    }
}

fn require<T>(value: Option<T>, label: &str) -> Result<T> {
    value.ok_or_else(|| SimError::ConfigInvalid(format!("{label} is required")))
}

/// Chunk-size heuristic.
///
/// Aim for roughly `√n_conditions` partitions, clamped into
/// `[n_cores, 10·n_cores]` when parallel so the pool stays busy without
/// drowning in tiny chunks, then cap the chunk so one chunk's rows
/// (`n_items · n_trials · conditions_per_chunk`) stay at most
/// `MAX_ROWS_PER_CHUNK`. Floor 1.
fn default_conditions_per_chunk(
    n_conditions: usize,
    n_trials: usize,
    n_items: usize,
    parallel: bool,
    n_cores: usize,
) -> usize {
    let sqrt = (n_conditions as f64).sqrt().round().max(1.0);
    let target_partitions = if parallel {
        sqrt.clamp(n_cores as f64, (10 * n_cores) as f64)
    } else {
        sqrt
    };
    let per_chunk = (n_conditions as f64 / target_partitions).ceil() as usize;
    let rows_per_condition = (n_items * n_trials).max(1);
    let cap = (MAX_ROWS_PER_CHUNK / rows_per_condition).max(1);
    per_chunk.min(cap).max(1)
}
