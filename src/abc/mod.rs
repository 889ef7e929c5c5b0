//! Approximate Bayesian Computation
//!
//! Input assembly, the rejection engine with external posterior
//! adjustment, and the resampling / bootstrap layer on top.

mod engine;
mod input;
mod resample;

pub use engine::{
    run_abc, AbcMethod, AbcMethodKind, AbcOptions, AbcResult, PosteriorAdjuster,
};
pub use input::{build_abc_input, AbcInput, NamedMatrix};
pub use resample::{
    bootstrap_posterior, posterior_long, resample_abc, summarise_posterior,
    summarise_resample_medians,
};
