//! Hierarchical formula language
//!
//! Models are declared as three ordered tiers of `name ← expression`
//! bindings (condition-level priors, between-trial draws, item-level
//! derivations). Each expression may reference every earlier name, may
//! resolve to a deterministic vector or to a distribution that is sampled
//! `n` times, and vectorizes with length-1 recycling.

mod dist;
mod eval;
mod expr;

pub use dist::Dist;
pub use eval::{evaluate_bindings, Binding, Env, Value};
pub use expr::{
    beta, binomial, exponential, gamma, lognormal, normal, poisson, trunc_normal, uniform,
    DistSpec, Expr, Op, UserFn,
};
