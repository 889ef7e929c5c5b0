//! Simulation output handle
//!
//! A `SimulationOutput` is a lazy reference to one on-disk run directory:
//! a `config.bin` manifest, the pre-evaluated conditions table and the
//! simulation-rows dataset, both partitioned by `chunk_idx`. The handle
//! can be rehydrated later from just the directory.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::kernel::NoiseMechanism;
use crate::model::Backend;
use crate::sim::config::SimulationConfig;
use crate::store::Dataset;

const CONFIG_FILE: &str = "config.bin";
const MANIFEST_JSON: &str = "manifest.json";
const DATASET_DIR: &str = "dataset";
const CONDITIONS_DIR: &str = "evaluated_conditions";

/// Everything about a run that is not a closure, persisted alongside the
/// datasets so a directory is self-describing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub crate_version: String,
    pub created_at: DateTime<Utc>,
    pub model: String,
    pub backend: Backend,
    pub n_conditions: usize,
    pub n_trials_per_condition: usize,
    pub n_items: usize,
    pub max_reached: usize,
    pub max_t: f64,
    pub dt: f64,
    pub noise_mechanism: NoiseMechanism,
    pub n_conditions_per_chunk: usize,
    pub n_chunks: u32,
    pub parallel: bool,
    pub n_cores: usize,
    pub rand_seed: u64,
    pub prior_params: Vec<(String, f64)>,
    pub prior_lhs: Vec<String>,
    pub between_trial_lhs: Vec<String>,
    pub item_lhs: Vec<String>,
}

impl RunManifest {
    pub fn from_config(config: &SimulationConfig) -> RunManifest {
        let lhs = |bindings: &[crate::formula::Binding]| {
            bindings.iter().map(|b| b.name.clone()).collect()
        };
        RunManifest {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            model: config.model.clone(),
            backend: config.backend,
            n_conditions: config.n_conditions,
            n_trials_per_condition: config.n_trials_per_condition,
            n_items: config.n_items,
            max_reached: config.max_reached,
            max_t: config.max_t,
            dt: config.dt,
            noise_mechanism: config.noise_mechanism,
            n_conditions_per_chunk: config.n_conditions_per_chunk,
            n_chunks: config.n_chunks(),
            parallel: config.parallel,
            n_cores: config.n_cores,
            rand_seed: config.rand_seed,
            prior_params: config.prior_params.clone(),
            prior_lhs: lhs(&config.prior_formulas),
            between_trial_lhs: lhs(&config.between_trial_formulas),
            item_lhs: lhs(&config.item_formulas),
        }
    }
}

/// Lazy handle to a run directory. Deleting the directory invalidates the
/// handle; nothing is cached beyond the manifest.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    root: PathBuf,
    manifest: RunManifest,
}

impl SimulationOutput {
    /// Initialize a fresh output directory: it must not exist yet or be an
    /// empty directory. Writes the manifest and creates both dataset
    /// subdirectories.
    pub(crate) fn create(root: impl Into<PathBuf>, manifest: RunManifest) -> Result<SimulationOutput> {
        let root = root.into();
        if root.exists() {
            if !root.is_dir() {
                return Err(SimError::Io(format!(
                    "{} exists and is not a directory",
                    root.display()
                )));
            }
            if std::fs::read_dir(&root)?.next().is_some() {
                return Err(SimError::Io(format!(
                    "{} exists and is not empty",
                    root.display()
                )));
            }
        }
        std::fs::create_dir_all(root.join(DATASET_DIR))?;
        std::fs::create_dir_all(root.join(CONDITIONS_DIR))?;
        let bytes = bincode::serialize(&manifest)
            .map_err(|e| SimError::Io(format!("manifest encode: {e}")))?;
        std::fs::write(root.join(CONFIG_FILE), bytes)?;
        // human-readable companion; rehydration reads only config.bin
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| SimError::Io(format!("manifest json encode: {e}")))?;
        std::fs::write(root.join(MANIFEST_JSON), json)?;
        Ok(SimulationOutput { root, manifest })
    }

    /// Rehydrate from an existing run directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<SimulationOutput> {
        let root = root.into();
        let config_path = root.join(CONFIG_FILE);
        if !config_path.is_file() || !root.join(DATASET_DIR).is_dir() {
            return Err(SimError::Io(format!(
                "{} is not a recognizable simulation output directory",
                root.display()
            )));
        }
        let bytes = std::fs::read(&config_path)?;
        let manifest: RunManifest = bincode::deserialize(&bytes)
            .map_err(|e| SimError::Io(format!("manifest decode: {e}")))?;
        Ok(SimulationOutput { root, manifest })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> &RunManifest {
        &self.manifest
    }

    /// Lazy handle to the simulation-rows dataset.
    pub fn open_dataset(&self) -> Dataset {
        Dataset::new(self.root.join(DATASET_DIR))
    }

    /// Lazy handle to the pre-evaluated conditions table.
    pub fn open_conditions(&self) -> Dataset {
        Dataset::new(self.root.join(CONDITIONS_DIR))
    }

    /// Whether every chunk the manifest planned is present on disk.
    /// False after a partial run (written chunks are never rolled back).
    pub fn is_complete(&self) -> Result<bool> {
        let keys = self.open_dataset().chunk_keys()?;
        let expected: Vec<u32> = (1..=self.manifest.n_chunks).collect();
        Ok(keys == expected)
    }
}
