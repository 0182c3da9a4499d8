use crate::config::ConfigError;
use crate::evaluator::EvaluatorError;
use crate::runtime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("evaluator unavailable: {0}")]
    EvaluatorUnavailable(#[source] EvaluatorError),

    #[error("environment must be reset before stepping")]
    NotReset,

    #[error("episode is done; reset before stepping")]
    EpisodeDone,

    #[error("action has {got} components, expected {expected}")]
    ActionShape { expected: usize, got: usize },

    #[error("got {got} actions for {expected} environments")]
    BatchSize { expected: usize, got: usize },

    #[error("environment instance {index} was lost: {source}")]
    WorkerLost {
        index: usize,
        #[source]
        source: runtime::Error,
    },

    #[error("unknown environment `{0}`")]
    UnknownEnv(String),

    #[error("invalid environment id `{0}`")]
    InvalidEnvId(String),

    #[error("environment contract violated: {0}")]
    Contract(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
