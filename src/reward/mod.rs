//! Target-distance reward: per-metric conditions aggregated into a shaped
//! scalar.

mod condition;
mod engine;
mod target;

pub use condition::{Comparator, Condition, ConditionEvaluator, evaluate};
pub use engine::{Outcome, RewardEngine, Shaping};
pub use target::{MetricTarget, TargetSpec};
