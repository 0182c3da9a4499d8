use super::errors::EvaluatorError;
use super::types::{DesignPoint, EvaluatorParams, PerformanceReport};
use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A session with an external circuit-performance evaluator.
///
/// One session belongs to exactly one environment. Calls may be slow (tens
/// of milliseconds to seconds); callers bound them with a timeout.
#[async_trait]
pub trait Evaluator: Send {
    /// Open the underlying session. Called once, before the first
    /// evaluation.
    async fn connect(&mut self) -> Result<(), EvaluatorError> {
        Ok(())
    }

    async fn evaluate(&mut self, design: &DesignPoint) -> Result<PerformanceReport, EvaluatorError>;

    async fn close(&mut self) -> Result<(), EvaluatorError> {
        Ok(())
    }
}

/// A synchronous, possibly CPU-heavy simulator call.
pub trait Simulator: Send + Sync + 'static {
    fn simulate(&self, design: &DesignPoint) -> Result<PerformanceReport, EvaluatorError>;
}

impl<F> Simulator for F
where
    F: Fn(&DesignPoint) -> Result<PerformanceReport, EvaluatorError> + Send + Sync + 'static,
{
    fn simulate(&self, design: &DesignPoint) -> Result<PerformanceReport, EvaluatorError> {
        self(design)
    }
}

/// Runs a blocking [`Simulator`] on tokio's blocking thread pool.
///
/// A panic inside the simulator is reported as [`EvaluatorError::Crashed`].
///
/// At most one simulation per evaluator runs at a time. A simulation whose
/// caller gave up (for example on timeout) keeps the session busy until it
/// returns, and the next call waits for it. Clones share the simulator but
/// are separate sessions.
pub struct BlockingEvaluator<S> {
    sim: Arc<S>,
    busy: Arc<Mutex<()>>,
}

impl<S> Clone for BlockingEvaluator<S> {
    fn clone(&self) -> Self {
        Self {
            sim: Arc::clone(&self.sim),
            busy: Arc::new(Mutex::new(())),
        }
    }
}

impl<S: Simulator> BlockingEvaluator<S> {
    pub fn new(sim: S) -> Self {
        Self::from_arc(Arc::new(sim))
    }

    pub fn from_arc(sim: Arc<S>) -> Self {
        Self {
            sim,
            busy: Arc::new(Mutex::new(())),
        }
    }
}

impl<F> BlockingEvaluator<F>
where
    F: Fn(&DesignPoint) -> Result<PerformanceReport, EvaluatorError> + Send + Sync + 'static,
{
    pub fn from_fn(f: F) -> Self {
        Self::new(f)
    }
}

#[async_trait]
impl<S: Simulator> Evaluator for BlockingEvaluator<S> {
    async fn evaluate(
        &mut self,
        design: &DesignPoint,
    ) -> Result<PerformanceReport, EvaluatorError> {
        let sim = Arc::clone(&self.sim);
        let design = design.clone();
        // Held by the blocking task itself, so it outlives a cancelled caller.
        let session = Arc::clone(&self.busy).lock_owned().await;

        let task = tokio::task::spawn_blocking(move || {
            let _session = session;
            sim.simulate(&design)
        });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(EvaluatorError::Crashed(panic_message(e.into_panic()))),
            Err(e) => Err(EvaluatorError::Crashed(e.to_string())),
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "simulator panicked".to_string()
    }
}

/// Opens evaluator sessions from the opaque connection parameters of an
/// environment configuration.
pub trait EvaluatorFactory: Send + Sync {
    fn open(
        &self,
        env_id: &str,
        params: &EvaluatorParams,
    ) -> Result<Box<dyn Evaluator>, EvaluatorError>;
}

impl<F> EvaluatorFactory for F
where
    F: Fn(&str, &EvaluatorParams) -> Result<Box<dyn Evaluator>, EvaluatorError> + Send + Sync,
{
    fn open(
        &self,
        env_id: &str,
        params: &EvaluatorParams,
    ) -> Result<Box<dyn Evaluator>, EvaluatorError> {
        self(env_id, params)
    }
}
