//! Simulation configuration, driver and output handles

mod config;
mod driver;
mod map;
mod output;

pub use config::{SimulationConfig, SimulationConfigBuilder};
pub use driver::run_simulation;
pub use map::{map_by_condition, map_by_condition_reduce, MapOptions};
pub use output::{RunManifest, SimulationOutput};
