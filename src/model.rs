//! Model-name → integrator-backend routing
//!
//! Maps the user-declared model string plus the set of formula LHS names
//! onto a concrete kernel. Detectors run as an ordered list and all of
//! them vote; zero hits is `UnknownModel`, conflicting hits are
//! `AmbiguousModel` (the caller disambiguates by naming the backend
//! directly in the config builder).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, SimError};

/// Concrete integrator kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// Single upper-boundary drift diffusion.
    Ddm,
    /// Two-boundary drift diffusion (also realizes RDM, LBA, LFM).
    Ddm2b,
    /// Leaky competing accumulator with global inhibition.
    LcaGi,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Ddm => "ddm",
            Backend::Ddm2b => "ddm_2b",
            Backend::LcaGi => "lca_gi",
        }
    }

    /// Parameter names that must be bound by some formula tier or prior
    /// constant for this kernel to run.
    pub fn required_params(self) -> &'static [&'static str] {
        match self {
            Backend::Ddm => &["V", "A"],
            Backend::Ddm2b => &["V", "A_upper", "A_lower"],
            Backend::LcaGi => &["V", "A", "beta", "kappa"],
        }
    }

    /// Parameter names the kernel reads when present (start point,
    /// non-decision time, noise scale).
    pub fn optional_params(self) -> &'static [&'static str] {
        &["Z", "ndt", "s"]
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the backend for `model` given every LHS name across all formula
/// tiers plus the prior-constant keys. Case-insensitive on the model
/// string.
///
/// The `lba` route runs the two-boundary kernel; its ballistic character
/// comes from supplying the zero-noise factory, not from a separate
/// integrator.
pub fn route(model: &str, lhs_names: &HashSet<String>) -> Result<Backend> {
    let model_lc = model.to_ascii_lowercase();
    let has_upper = lhs_names.contains("A_upper");

    let detectors: [(&str, bool, Backend); 3] = [
        (
            "two-boundary",
            matches!(model_lc.as_str(), "ddm-2b" | "rdm" | "lba" | "lfm")
                || (model_lc == "ddm" && has_upper),
            Backend::Ddm2b,
        ),
        (
            "one-boundary",
            model_lc == "ddm-1b" || (model_lc == "ddm" && !has_upper),
            Backend::Ddm,
        ),
        (
            "lca",
            matches!(model_lc.as_str(), "lca" | "lca-gi"),
            Backend::LcaGi,
        ),
    ];

    let mut hits: Vec<(&'static str, Backend)> = detectors
        .iter()
        .filter(|(_, fired, _)| *fired)
        .map(|(name, _, backend)| (*name, *backend))
        .collect();
    hits.dedup_by_key(|(_, b)| *b);

    match hits.as_slice() {
        [] => Err(SimError::UnknownModel(model.to_string())),
        [(_, backend)] => Ok(*backend),
        many => Err(SimError::AmbiguousModel {
            model: model.to_string(),
            candidates: many.iter().map(|(name, _)| *name).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ddm_with_upper_boundary_routes_two_boundary() {
        let backend = route("ddm", &names(&["V", "A_upper", "A_lower"])).unwrap();
        assert_eq!(backend, Backend::Ddm2b);
    }

    #[test]
    fn ddm_with_single_boundary_routes_one_boundary() {
        assert_eq!(route("ddm", &names(&["V", "A"])).unwrap(), Backend::Ddm);
        assert_eq!(route("ddm-1b", &names(&["V", "A"])).unwrap(), Backend::Ddm);
    }

    #[test]
    fn rdm_lba_lfm_share_the_two_boundary_kernel() {
        for model in ["rdm", "lba", "lfm", "ddm-2b", "DDM-2B"] {
            assert_eq!(route(model, &names(&[])).unwrap(), Backend::Ddm2b, "{model}");
        }
    }

    #[test]
    fn lca_variants_route_lca_gi() {
        assert_eq!(route("lca", &names(&[])).unwrap(), Backend::LcaGi);
        assert_eq!(route("lca-gi", &names(&[])).unwrap(), Backend::LcaGi);
    }

    #[test]
    fn unknown_model_is_an_error() {
        assert!(matches!(
            route("foo", &names(&[])),
            Err(SimError::UnknownModel(m)) if m == "foo"
        ));
    }
}
