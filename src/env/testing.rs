//! Toy amplifier model shared by the environment tests.

use crate::evaluator::{
    BlockingEvaluator, DesignPoint, Evaluator, EvaluatorError, PerformanceReport, Simulator,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Gain grows with log-width (20 dB at 1µm, 80 dB at 100µm), power is
/// proportional to the bias current.
pub(crate) fn amp_model(d: &DesignPoint) -> Result<PerformanceReport, EvaluatorError> {
    let w = d.get("W").ok_or_else(|| EvaluatorError::InvalidReport("missing W".into()))?;
    let ib = d.get("Ib").ok_or_else(|| EvaluatorError::InvalidReport("missing Ib".into()))?;
    Ok([("gain", 20.0 + 30.0 * (w / 1e-6).log10()), ("power", 33.0 * ib)]
        .into_iter()
        .collect())
}

type AmpModel = fn(&DesignPoint) -> Result<PerformanceReport, EvaluatorError>;

pub(crate) fn amp_evaluator() -> BlockingEvaluator<AmpModel> {
    BlockingEvaluator::new(amp_model as AmpModel)
}

/// Always fails with the given error.
pub(crate) struct Failing(pub EvaluatorError);

#[async_trait]
impl Evaluator for Failing {
    async fn evaluate(
        &mut self,
        _design: &DesignPoint,
    ) -> Result<PerformanceReport, EvaluatorError> {
        Err(self.0.clone())
    }
}

/// Succeeds at reset, then hangs for `delay` on every later call.
pub(crate) struct Slow {
    pub delay: Duration,
    pub calls: usize,
}

#[async_trait]
impl Evaluator for Slow {
    async fn evaluate(
        &mut self,
        design: &DesignPoint,
    ) -> Result<PerformanceReport, EvaluatorError> {
        self.calls += 1;
        if self.calls > 1 {
            tokio::time::sleep(self.delay).await;
        }
        amp_model(design)
    }
}

/// Refuses to open a session.
pub(crate) struct Unreachable;

#[async_trait]
impl Evaluator for Unreachable {
    async fn connect(&mut self) -> Result<(), EvaluatorError> {
        Err(EvaluatorError::Connection("license server down".into()))
    }

    async fn evaluate(
        &mut self,
        _design: &DesignPoint,
    ) -> Result<PerformanceReport, EvaluatorError> {
        Err(EvaluatorError::Connection("not connected".into()))
    }
}

/// Panics inside the async call for designs wider than 20µm.
pub(crate) struct Panicking;

#[async_trait]
impl Evaluator for Panicking {
    async fn evaluate(
        &mut self,
        design: &DesignPoint,
    ) -> Result<PerformanceReport, EvaluatorError> {
        if design.get("W").is_some_and(|w| w > 20e-6) {
            panic!("evaluator lost its license");
        }
        amp_model(design)
    }
}

/// Blocking simulator that is fast once, then takes `delay` per call.
/// Records how many simulations ran at the same time.
pub(crate) struct Stuck {
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Stuck {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl Simulator for Stuck {
    fn simulate(&self, design: &DesignPoint) -> Result<PerformanceReport, EvaluatorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if call > 0 {
            std::thread::sleep(self.delay);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        amp_model(design)
    }
}
