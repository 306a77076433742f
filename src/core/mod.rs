mod engine;
mod error;
mod types;
mod volatility;

pub use engine::{simulate, simulate_parallel, summarize};
pub use error::SimulationError;
pub use types::{OutcomeSummary, Outlook, PERIODS_PER_YEAR, SimulationParameters, TrajectoryMatrix};
pub use volatility::{estimate_annual_volatility, expected_return_from_fundamentals, periodic_returns};
