use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("empty input: trajectory matrix has no rows or no trials")]
    EmptyInput,
    #[error("insufficient history: need at least {needed} returns, got {got}")]
    InsufficientHistory { needed: usize, got: usize },
}

impl SimulationError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
