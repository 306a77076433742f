use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use tracing::debug;

use super::error::SimulationError;
use super::types::{OutcomeSummary, SimulationParameters, TrajectoryMatrix};

/// Simulates `trial_count` independent paths of `horizon_periods` steps.
///
/// Every step multiplies each trial's previous value by `1 + r`, with `r`
/// drawn from a normal distribution scaled from the annual drift and
/// volatility. Draws are consumed period-major, trial-minor, so the same
/// seeded generator always reproduces the same matrix.
///
/// A draw of -100% or below takes a path to zero or below. Such values are
/// kept as they are; the increment model is not switched to log-normal.
pub fn simulate<R: Rng + ?Sized>(
    params: &SimulationParameters,
    rng: &mut R,
) -> Result<TrajectoryMatrix, SimulationError> {
    params.validate()?;
    let returns = period_distribution(params)?;
    let (periods, trials) = matrix_shape(params)?;

    debug!(
        periods,
        trials,
        drift = params.period_drift(),
        volatility = params.period_volatility(),
        "simulating trajectories"
    );

    let mut values = Vec::with_capacity(periods * trials);
    values.resize(trials, params.initial_value);
    for period in 1..periods {
        let prev_start = (period - 1) * trials;
        for trial in 0..trials {
            let sampled_return = returns.sample(rng);
            values.push(values[prev_start + trial] * (1.0 + sampled_return));
        }
    }

    Ok(TrajectoryMatrix::from_raw(periods, trials, values))
}

/// Same model as [`simulate`], with trials spread over the rayon pool.
///
/// Trial `j` draws from its own generator seeded with
/// `derive_seed(base_seed, j)`, so the output depends only on `base_seed`
/// and not on how many worker threads ran it.
pub fn simulate_parallel(
    params: &SimulationParameters,
    base_seed: u64,
) -> Result<TrajectoryMatrix, SimulationError> {
    params.validate()?;
    let returns = period_distribution(params)?;
    let (periods, trials) = matrix_shape(params)?;

    debug!(periods, trials, base_seed, "simulating trajectories in parallel");

    let paths: Vec<Vec<f64>> = (0..params.trial_count)
        .into_par_iter()
        .map(|trial| {
            let mut rng = StdRng::seed_from_u64(derive_seed(base_seed, trial));
            let mut path = Vec::with_capacity(periods);
            let mut value = params.initial_value;
            path.push(value);
            for _ in 1..periods {
                value *= 1.0 + returns.sample(&mut rng);
                path.push(value);
            }
            path
        })
        .collect();

    let mut values = vec![0.0; periods * trials];
    for (trial, path) in paths.iter().enumerate() {
        for (period, value) in path.iter().enumerate() {
            values[period * trials + trial] = *value;
        }
    }

    Ok(TrajectoryMatrix::from_raw(periods, trials, values))
}

/// Reduces the terminal row of `matrix` to mean, median and 5th/95th
/// percentiles. The matrix is left untouched.
pub fn summarize(matrix: &TrajectoryMatrix) -> Result<OutcomeSummary, SimulationError> {
    if matrix.is_empty() {
        return Err(SimulationError::EmptyInput);
    }

    let mut terminal = matrix.terminal().to_vec();
    terminal.sort_by(|a, b| a.total_cmp(b));

    Ok(OutcomeSummary {
        trial_count: terminal.len(),
        mean: mean(&terminal),
        median: percentile(&terminal, 50.0),
        p5: percentile(&terminal, 5.0),
        p95: percentile(&terminal, 95.0),
    })
}

fn period_distribution(params: &SimulationParameters) -> Result<Normal<f64>, SimulationError> {
    Normal::new(params.period_drift(), params.period_volatility())
        .map_err(|e| SimulationError::invalid(format!("period return distribution: {e}")))
}

fn matrix_shape(params: &SimulationParameters) -> Result<(usize, usize), SimulationError> {
    let periods = params.horizon_periods as usize + 1;
    let trials = params.trial_count as usize;
    let fits = periods
        .checked_mul(trials)
        .and_then(|cells| cells.checked_mul(size_of::<f64>()))
        .is_some_and(|bytes| bytes <= isize::MAX as usize);
    if !fits {
        return Err(SimulationError::invalid(
            "horizon_periods x trial_count is too large",
        ));
    }
    Ok((periods, trials))
}

// Running mean: a constant input comes back bit-identical.
fn mean(values: &[f64]) -> f64 {
    let mut acc = 0.0;
    for (idx, value) in values.iter().enumerate() {
        if idx == 0 {
            acc = *value;
        } else {
            acc += (value - acc) / (idx as f64 + 1.0);
        }
    }
    acc
}

/// Linear interpolation between order statistics; `sorted` must be ascending.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    let lo = sorted[lower];
    let hi = sorted[upper];
    if lower == upper || lo == hi {
        return lo;
    }
    let w = rank - lower as f64;
    (lo + (hi - lo) * w).clamp(lo, hi)
}

pub(crate) fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    let mixed = base_seed ^ ((trial as u64) << 32) ^ trial as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PERIODS_PER_YEAR;
    use rand::RngCore;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_params() -> SimulationParameters {
        SimulationParameters {
            initial_value: 100_000.0,
            expected_annual_return: 0.2003,
            annual_volatility: 0.45,
            horizon_periods: 10,
            trial_count: 200,
        }
    }

    fn seeded(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_matrix_shape_and_initial_row_hold(
            seed in any::<u64>(),
            initial_cents in 1u64..100_000_000,
            mean_bp in -5_000i32..5_000,
            vol_bp in 0u32..20_000,
            horizon in 1u32..40,
            trials in 1u32..60
        ) {
            let params = SimulationParameters {
                initial_value: initial_cents as f64 / 100.0,
                expected_annual_return: mean_bp as f64 / 10_000.0,
                annual_volatility: vol_bp as f64 / 10_000.0,
                horizon_periods: horizon,
                trial_count: trials,
            };
            let matrix = simulate(&params, &mut seeded(seed)).expect("valid params");

            prop_assert_eq!(matrix.periods(), horizon as usize + 1);
            prop_assert_eq!(matrix.trials(), trials as usize);
            for value in matrix.row(0) {
                prop_assert_eq!(*value, params.initial_value);
            }
        }

        #[test]
        fn prop_percentiles_are_ordered(
            seed in any::<u64>(),
            vol_bp in 0u32..30_000,
            trials in 1u32..120
        ) {
            let mut params = sample_params();
            params.annual_volatility = vol_bp as f64 / 10_000.0;
            params.trial_count = trials;

            let matrix = simulate(&params, &mut seeded(seed)).expect("valid params");
            let summary = summarize(&matrix).expect("non-empty matrix");

            prop_assert!(summary.p5 <= summary.median);
            prop_assert!(summary.median <= summary.p95);
            prop_assert_eq!(summary.trial_count, trials as usize);
        }

        #[test]
        fn prop_same_seed_reproduces_matrix(seed in any::<u64>(), trials in 1u32..40) {
            let mut params = sample_params();
            params.trial_count = trials;

            let a = simulate(&params, &mut seeded(seed)).expect("valid params");
            let b = simulate(&params, &mut seeded(seed)).expect("valid params");
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn zero_volatility_compounds_period_drift_exactly() {
        let params = SimulationParameters::new(100_000.0, 0.2003, 0.0, 10, 5).expect("valid");
        let matrix = simulate(&params, &mut seeded(7)).expect("valid params");

        let terminal = matrix.terminal();
        assert_eq!(terminal.len(), 5);
        for value in terminal {
            assert_eq!(*value, terminal[0]);
        }

        let expected = 100_000.0 * (1.0 + 0.2003 / PERIODS_PER_YEAR).powi(10);
        assert!(
            (terminal[0] - expected).abs() <= expected * 1e-12,
            "expected {expected}, got {}",
            terminal[0]
        );

        let summary = summarize(&matrix).expect("non-empty matrix");
        assert_eq!(summary.mean, terminal[0]);
        assert_eq!(summary.median, terminal[0]);
        assert_eq!(summary.p5, terminal[0]);
        assert_eq!(summary.p95, terminal[0]);
    }

    #[test]
    fn zero_volatility_rows_follow_hand_calculation() {
        let params = SimulationParameters::new(1_000.0, 2.52, 0.0, 3, 2).expect("valid");
        let matrix = simulate(&params, &mut seeded(1)).expect("valid params");

        // 2.52 / 252 = 1% per period
        assert_approx(matrix.value(1, 0), 1_010.0);
        assert_approx(matrix.value(2, 1), 1_020.1);
        assert_approx(matrix.value(3, 0), 1_030.301);
    }

    #[test]
    fn single_trial_summary_is_degenerate() {
        let mut params = sample_params();
        params.trial_count = 1;

        let matrix = simulate(&params, &mut seeded(99)).expect("valid params");
        let terminal = matrix.terminal()[0];
        let summary = summarize(&matrix).expect("non-empty matrix");

        assert_eq!(summary.mean, terminal);
        assert_eq!(summary.median, terminal);
        assert_eq!(summary.p5, terminal);
        assert_eq!(summary.p95, terminal);
    }

    #[test]
    fn simulate_rejects_invalid_parameters() {
        let base = sample_params();
        let cases = [
            SimulationParameters {
                trial_count: 0,
                ..base
            },
            SimulationParameters {
                horizon_periods: 0,
                ..base
            },
            SimulationParameters {
                initial_value: 0.0,
                ..base
            },
            SimulationParameters {
                initial_value: -5.0,
                ..base
            },
            SimulationParameters {
                annual_volatility: -0.1,
                ..base
            },
            SimulationParameters {
                expected_annual_return: f64::NAN,
                ..base
            },
        ];

        for params in cases {
            let err = simulate(&params, &mut seeded(1)).expect_err("must reject");
            assert!(
                matches!(err, SimulationError::InvalidParameter(_)),
                "unexpected error {err:?} for {params:?}"
            );
            let err = simulate_parallel(&params, 1).expect_err("must reject");
            assert!(matches!(err, SimulationError::InvalidParameter(_)));
        }
    }

    #[test]
    fn simulate_does_not_consume_rng_on_invalid_parameters() {
        let mut params = sample_params();
        params.trial_count = 0;

        let mut rng = seeded(5);
        let _ = simulate(&params, &mut rng);
        let mut fresh = seeded(5);
        assert_eq!(rng.next_u64(), fresh.next_u64());
    }

    #[test]
    fn negative_values_are_kept_when_returns_exceed_total_loss() {
        let mut params = sample_params();
        params.expected_annual_return = 0.0;
        params.annual_volatility = 50.0;
        params.trial_count = 50;

        let matrix = simulate(&params, &mut seeded(3)).expect("valid params");
        let has_non_positive = matrix.rows().skip(1).flatten().any(|v| *v <= 0.0);
        assert!(has_non_positive);
        assert!(summarize(&matrix).is_ok());
    }

    #[test]
    fn summarize_rejects_matrix_without_trials() {
        let matrix = TrajectoryMatrix::from_rows(vec![vec![]]).expect("1x0 is well formed");
        assert_eq!(matrix.periods(), 1);
        assert_eq!(matrix.trials(), 0);
        assert_eq!(summarize(&matrix), Err(SimulationError::EmptyInput));
    }

    #[test]
    fn summarize_rejects_matrix_without_rows() {
        let matrix = TrajectoryMatrix::from_rows(Vec::new()).expect("0x0 is well formed");
        assert_eq!(summarize(&matrix), Err(SimulationError::EmptyInput));
    }

    #[test]
    fn summarize_uses_only_terminal_row() {
        let matrix = TrajectoryMatrix::from_rows(vec![
            vec![10.0, 10.0, 10.0, 10.0, 10.0],
            vec![1.0, 2.0, 3.0, 4.0, 100.0],
        ])
        .expect("rectangular rows");
        let before = matrix.clone();

        let summary = summarize(&matrix).expect("non-empty matrix");
        assert_approx(summary.mean, 22.0);
        assert_approx(summary.median, 3.0);
        // rank 0.2 between 1 and 2, rank 3.8 between 4 and 100
        assert_approx(summary.p5, 1.2);
        assert_approx(summary.p95, 80.8);
        assert_eq!(matrix, before);
    }

    #[test]
    fn percentile_interpolates_between_points() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_approx(percentile(&values, 25.0), 1.75);
        assert_approx(percentile(&values, 50.0), 2.5);
        assert_approx(percentile(&values, 100.0), 4.0);
    }

    #[test]
    fn percentile_of_ties_is_exact() {
        let values = [0.1 + 0.2; 7];
        assert_eq!(percentile(&values, 5.0), values[0]);
        assert_eq!(percentile(&values, 95.0), values[0]);
        assert_eq!(mean(&values), values[0]);
    }

    #[test]
    fn oversized_matrix_is_rejected_before_allocating() {
        let mut params = sample_params();
        params.horizon_periods = u32::MAX;
        params.trial_count = u32::MAX;

        let err = simulate(&params, &mut seeded(1)).expect_err("must reject");
        assert!(matches!(err, SimulationError::InvalidParameter(msg) if msg.contains("too large")));
        let err = simulate_parallel(&params, 1).expect_err("must reject");
        assert!(matches!(err, SimulationError::InvalidParameter(_)));
    }

    #[test]
    fn percentile_of_infinite_neighbours_is_not_nan() {
        let values = [f64::NEG_INFINITY, f64::NEG_INFINITY, 1.0, f64::INFINITY, f64::INFINITY];
        assert_eq!(percentile(&values, 5.0), f64::NEG_INFINITY);
        assert_eq!(percentile(&values, 95.0), f64::INFINITY);
        assert_eq!(percentile(&values, 50.0), 1.0);

        let matrix = TrajectoryMatrix::from_rows(vec![values.to_vec()]).expect("one row");
        let summary = summarize(&matrix).expect("non-empty matrix");
        assert!(summary.p5 <= summary.median && summary.median <= summary.p95);
    }

    #[test]
    fn parallel_simulation_is_reproducible_and_thread_count_independent() {
        let params = sample_params();
        let a = simulate_parallel(&params, 42).expect("valid params");
        let b = simulate_parallel(&params, 42).expect("valid params");
        assert_eq!(a, b);

        let single = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .expect("thread pool")
            .install(|| simulate_parallel(&params, 42))
            .expect("valid params");
        assert_eq!(a, single);

        let other = simulate_parallel(&params, 43).expect("valid params");
        assert_ne!(a, other);
    }

    #[test]
    fn parallel_simulation_matches_shape_and_zero_volatility_path() {
        let mut params = sample_params();
        params.annual_volatility = 0.0;
        params.trial_count = 9;

        let parallel = simulate_parallel(&params, 11).expect("valid params");
        let sequential = simulate(&params, &mut seeded(11)).expect("valid params");

        assert_eq!(parallel.periods(), 11);
        assert_eq!(parallel.trials(), 9);
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn parallel_trials_draw_distinct_paths() {
        let params = sample_params();
        let matrix = simulate_parallel(&params, 8).expect("valid params");
        assert_ne!(matrix.trial_path(0), matrix.trial_path(1));
        assert_eq!(matrix.trial_path(0)[0], params.initial_value);
    }

    #[test]
    fn derive_seed_changes_per_trial_and_base() {
        let a = derive_seed(42, 0);
        let b = derive_seed(42, 1);
        let c = derive_seed(43, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn large_sample_mean_tracks_compounded_drift() {
        let mut params = sample_params();
        params.trial_count = 20_000;
        params.annual_volatility = 0.3;

        let matrix = simulate(&params, &mut seeded(2024)).expect("valid params");
        let summary = summarize(&matrix).expect("non-empty matrix");
        let expected = params.initial_value * (1.0 + params.period_drift()).powi(10);
        // Terminal sd is roughly initial * 0.3/sqrt(252) * sqrt(10) ~ 6_000,
        // so the sample mean lands well inside 1% of the expectation.
        assert!(
            (summary.mean - expected).abs() < expected * 0.01,
            "mean {} too far from {expected}",
            summary.mean
        );
    }
}
