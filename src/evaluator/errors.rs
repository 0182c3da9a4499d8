use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("simulation did not converge: {0}")]
    NonConvergence(String),

    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),

    #[error("evaluator crashed: {0}")]
    Crashed(String),

    #[error("could not connect to evaluator: {0}")]
    Connection(String),

    #[error("invalid performance report: {0}")]
    InvalidReport(String),
}
