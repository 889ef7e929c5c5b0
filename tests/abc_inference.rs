//! ABC inference over simulated output
//!
//! The full data flow of an analysis: simulate → summarize per condition →
//! align the ABC input → rejection posterior → resampling, bootstrap and
//! posterior summaries.

use eamsim::formula::{trunc_normal, Binding, Expr};
use eamsim::{
    apply_by_condition, bootstrap_posterior, build_abc_input, posterior_long, resample_abc,
    run_abc, run_simulation, summarise_posterior, summarise_resample_medians, AbcOptions,
    Aggregation, MapOptions, SimError, SimulationConfig, SummaryStatSpec,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

const N_CONDITIONS: usize = 12;

fn simulate() -> (tempfile::TempDir, eamsim::SimulationOutput) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SimulationConfig::builder("ddm")
        .prior_formulas(vec![
            Binding::new("V", trunc_normal(1.5, 0.5, 0.2, 4.0)),
            Binding::new("A_upper", trunc_normal(1.0, 0.3, 0.3, 2.5)),
            Binding::new("A_lower", -Expr::var("A_upper")),
        ])
        .n_conditions(N_CONDITIONS)
        .n_trials_per_condition(20)
        .max_t(5.0)
        .dt(1e-2)
        .n_conditions_per_chunk(4)
        .rand_seed(2718)
        .build()
        .unwrap();
    let out = run_simulation(&cfg, dir.path().join("run")).unwrap();
    (dir, out)
}

fn rt_spec() -> SummaryStatSpec {
    SummaryStatSpec::new(
        vec![
            Aggregation::mean("mean_rt", "rt"),
            Aggregation::sd("sd_rt", "rt"),
            Aggregation::mean("p_upper", "choice"),
        ],
        vec!["condition_idx"],
        vec!["condition_idx"],
    )
    .unwrap()
}

#[test]
fn rejection_posterior_flows_from_simulation_to_samples() -> anyhow::Result<()> {
    let (_dir, out) = simulate();
    let spec = rt_spec();
    let sim_summaries = apply_by_condition(&spec, &out, MapOptions::default())?;

    // treat condition 1 as the observed dataset
    let rows = out.open_dataset().read_all()?;
    let cond_ids = rows.f64s("condition_idx")?;
    let observed_rows: Vec<usize> = (0..rows.n_rows()).filter(|&i| cond_ids[i] == 1.0).collect();
    let target = spec.apply(&rows.take_rows(&observed_rows))?;

    let conditions = out.open_conditions().read_all()?;
    let input = build_abc_input(
        &conditions,
        &sim_summaries,
        &target,
        &["V".to_string(), "A_upper".to_string()],
    )?;
    assert_eq!(input.n_simulations(), N_CONDITIONS);

    let result = run_abc(&input, &AbcOptions::rejection(0.25))?;
    let posterior = result.posterior_samples();
    assert_eq!(posterior.n_rows(), 3); // ceil(0.25 · 12)
    assert_eq!(posterior.names(), &["V".to_string(), "A_upper".to_string()]);
    // the observed condition itself should be among the closest matches
    assert!(result.accepted.contains(&0));

    let summary = summarise_posterior(&result, 0.9)?;
    assert_eq!(summary.names(), &["parameter", "mean", "median", "q5", "q95"]);
    assert_eq!(summary.n_rows(), 2);
    Ok(())
}

#[test]
fn resample_abc_matches_the_requested_shape() {
    let (_dir, out) = simulate();
    let spec = rt_spec();
    let sim_summaries = apply_by_condition(&spec, &out, MapOptions::default()).unwrap();
    let rows = out.open_dataset().read_all().unwrap();
    let cond_ids = rows.f64s("condition_idx").unwrap();
    let observed: Vec<usize> = (0..rows.n_rows()).filter(|&i| cond_ids[i] == 2.0).collect();
    let target = spec.apply(&rows.take_rows(&observed)).unwrap();
    let conditions = out.open_conditions().read_all().unwrap();
    let input = build_abc_input(
        &conditions,
        &sim_summaries,
        &target,
        &["V".to_string(), "A_upper".to_string()],
    )
    .unwrap();

    let mut rng = StdRng::seed_from_u64(55);
    let results = resample_abc(&input, 3, 5, false, &AbcOptions::rejection(0.5), &mut rng).unwrap();
    assert_eq!(results.len(), 3);
    for r in &results {
        assert!(r.unadj.n_rows() <= 5);
    }

    // oversized draw without replacement
    let err = resample_abc(
        &input,
        1,
        N_CONDITIONS + 1,
        false,
        &AbcOptions::rejection(0.5),
        &mut rng,
    )
    .unwrap_err();
    assert!(matches!(err, SimError::ResampleSizeExceeded { .. }));

    // forest table and density export
    let forest = summarise_resample_medians(&results, 0.95).unwrap();
    assert_eq!(
        forest.names(),
        &["parameter", "mean", "median", "q2.5", "q97.5"]
    );
    assert_eq!(forest.n_rows(), 2);

    let long = posterior_long(&results).unwrap();
    assert_eq!(long.names(), &["iteration", "parameter", "value"]);
    assert!(long.n_rows() > 0);

    // posterior bootstrap shape
    let boot = bootstrap_posterior(&results[0], 9, true, &mut rng).unwrap();
    assert_eq!(boot.n_rows(), 9);
    assert_eq!(boot.n_cols(), 2);
}
