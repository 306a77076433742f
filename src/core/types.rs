use serde::Serialize;

use super::error::SimulationError;

/// Trading-day granularity used to scale an annual drift/volatility pair
/// down to a single-step distribution.
pub const PERIODS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationParameters {
    pub initial_value: f64,
    pub expected_annual_return: f64,
    pub annual_volatility: f64,
    pub horizon_periods: u32,
    pub trial_count: u32,
}

impl SimulationParameters {
    pub fn new(
        initial_value: f64,
        expected_annual_return: f64,
        annual_volatility: f64,
        horizon_periods: u32,
        trial_count: u32,
    ) -> Result<Self, SimulationError> {
        let params = Self {
            initial_value,
            expected_annual_return,
            annual_volatility,
            horizon_periods,
            trial_count,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.initial_value.is_finite() || self.initial_value <= 0.0 {
            return Err(SimulationError::invalid("initial_value must be > 0"));
        }
        if !self.expected_annual_return.is_finite() {
            return Err(SimulationError::invalid(
                "expected_annual_return must be finite",
            ));
        }
        if !self.annual_volatility.is_finite() || self.annual_volatility < 0.0 {
            return Err(SimulationError::invalid("annual_volatility must be >= 0"));
        }
        if self.horizon_periods == 0 {
            return Err(SimulationError::invalid("horizon_periods must be >= 1"));
        }
        if self.trial_count == 0 {
            return Err(SimulationError::invalid("trial_count must be >= 1"));
        }
        Ok(())
    }

    /// Mean of the single-period return distribution.
    pub fn period_drift(&self) -> f64 {
        self.expected_annual_return / PERIODS_PER_YEAR
    }

    /// Standard deviation of the single-period return distribution.
    pub fn period_volatility(&self) -> f64 {
        self.annual_volatility / PERIODS_PER_YEAR.sqrt()
    }
}

/// Simulated portfolio values indexed by (period, trial), stored row-major.
///
/// Row 0 holds the starting capital for every trial; row `t` holds the
/// values after `t` periods.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryMatrix {
    periods: usize,
    trials: usize,
    values: Vec<f64>,
}

impl TrajectoryMatrix {
    pub(crate) fn from_raw(periods: usize, trials: usize, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), periods * trials);
        Self {
            periods,
            trials,
            values,
        }
    }

    /// Builds a matrix from caller-supplied rows. All rows must share a length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, SimulationError> {
        let periods = rows.len();
        let trials = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != trials) {
            return Err(SimulationError::invalid(
                "trajectory rows must all have the same length",
            ));
        }
        let values = rows.into_iter().flatten().collect();
        Ok(Self::from_raw(periods, trials, values))
    }

    /// Number of rows, i.e. `horizon_periods + 1` for a simulated matrix.
    pub fn periods(&self) -> usize {
        self.periods
    }

    pub fn trials(&self) -> usize {
        self.trials
    }

    pub fn is_empty(&self) -> bool {
        self.periods == 0 || self.trials == 0
    }

    pub fn row(&self, period: usize) -> &[f64] {
        let start = period * self.trials;
        &self.values[start..start + self.trials]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.periods).map(move |period| self.row(period))
    }

    /// Final row. Empty when the matrix has no rows.
    pub fn terminal(&self) -> &[f64] {
        match self.periods {
            0 => &[],
            n => self.row(n - 1),
        }
    }

    pub fn value(&self, period: usize, trial: usize) -> f64 {
        self.values[period * self.trials + trial]
    }

    /// One trial's path across all periods.
    pub fn trial_path(&self, trial: usize) -> Vec<f64> {
        (0..self.periods)
            .map(|period| self.value(period, trial))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub trial_count: usize,
    pub mean: f64,
    pub median: f64,
    pub p5: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outlook {
    pub expected_to_grow: bool,
    pub worst_case_grows: bool,
}

impl Outlook {
    pub fn classify(summary: &OutcomeSummary, initial_value: f64) -> Self {
        Self {
            expected_to_grow: summary.mean > initial_value,
            worst_case_grows: summary.p5 > initial_value,
        }
    }
}
