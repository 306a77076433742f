use super::error::SimulationError;
use super::types::PERIODS_PER_YEAR;

/// Simple period-over-period returns. A pair is skipped when the earlier
/// price is zero, negative or not finite.
pub fn periodic_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter_map(|pair| {
            let (prev, next) = (pair[0], pair[1]);
            if !prev.is_finite() || prev <= 0.0 || !next.is_finite() {
                return None;
            }
            Some(next / prev - 1.0)
        })
        .collect()
}

/// Sample standard deviation of `returns`, annualized by `sqrt(252)`.
pub fn estimate_annual_volatility(returns: &[f64]) -> Result<f64, SimulationError> {
    if returns.len() < 2 {
        return Err(SimulationError::InsufficientHistory {
            needed: 2,
            got: returns.len(),
        });
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Ok(variance.sqrt() * PERIODS_PER_YEAR.sqrt())
}

/// Expected annual return implied by fundamentals: earnings growth plus
/// dividend yield, both as fractions.
pub fn expected_return_from_fundamentals(earnings_growth_rate: f64, dividend_yield: f64) -> f64 {
    earnings_growth_rate + dividend_yield
}
