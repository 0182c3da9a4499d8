//! The boundary to the external circuit-performance evaluator.

mod errors;
mod traits;
mod types;

pub use errors::EvaluatorError;
pub use traits::{BlockingEvaluator, Evaluator, EvaluatorFactory, Simulator};
pub(crate) use traits::panic_message;
pub use types::{DesignPoint, EvaluatorParams, PerformanceReport};
