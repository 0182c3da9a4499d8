use crate::config::EnvConfig;
use crate::env::{CircuitEnv, EnvError, VecEnv};
use crate::evaluator::{
    BlockingEvaluator, DesignPoint, EvaluatorError, PerformanceReport, Simulator,
};
use crate::runtime::PoolConfig;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A Python callable taking a design dict and returning a metrics dict.
struct PySimulator(PyObject);

impl Simulator for PySimulator {
    fn simulate(&self, design: &DesignPoint) -> Result<PerformanceReport, EvaluatorError> {
        Python::with_gil(|py| {
            let result = self
                .0
                .call1(py, (design.as_map().clone(),))
                .map_err(|e| EvaluatorError::Crashed(e.to_string()))?;
            let metrics: BTreeMap<String, f64> = result
                .extract(py)
                .map_err(|e| EvaluatorError::InvalidReport(e.to_string()))?;
            Ok(PerformanceReport::from(metrics))
        })
    }
}

fn to_py_err(e: EnvError) -> PyErr {
    match e {
        EnvError::Configuration(_) | EnvError::BatchSize { .. } | EnvError::ActionShape { .. } => {
            PyValueError::new_err(e.to_string())
        }
        e => PyRuntimeError::new_err(e.to_string()),
    }
}

/// Batched circuit environment driven by a Python simulator.
#[pyclass(name = "VecEnv", unsendable)]
struct PyVecEnv {
    runtime: tokio::runtime::Runtime,
    inner: VecEnv<CircuitEnv>,
}

#[pymethods]
impl PyVecEnv {
    #[new]
    #[pyo3(signature = (config_json, count, simulator, seed=None, workers=None))]
    fn new(
        config_json: &str,
        count: usize,
        simulator: PyObject,
        seed: Option<u64>,
        workers: Option<usize>,
    ) -> PyResult<Self> {
        let config = EnvConfig::from_json_str(config_json)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let config = Arc::new(config);
        let evaluator = BlockingEvaluator::new(PySimulator(simulator));

        let envs = (0..count)
            .map(|i| {
                let mut builder =
                    CircuitEnv::builder(Arc::clone(&config)).evaluator(evaluator.clone());
                if let Some(seed) = seed.or(config.seed) {
                    builder = builder.seed(seed.wrapping_add(i as u64));
                }
                builder.build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(to_py_err)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;

        Ok(Self {
            runtime,
            inner: VecEnv::from_envs(envs, PoolConfig { workers }),
        })
    }

    fn reset(&mut self, py: Python<'_>) -> PyResult<Vec<Vec<f32>>> {
        let Self { runtime, inner } = self;
        py.allow_threads(|| runtime.block_on(inner.reset_all()))
            .map_err(to_py_err)
    }

    /// Returns `(observations, rewards, dones, infos)`; each info is a JSON string.
    fn step(
        &mut self,
        py: Python<'_>,
        actions: Vec<Vec<f32>>,
    ) -> PyResult<(Vec<Vec<f32>>, Vec<f32>, Vec<bool>, Vec<String>)> {
        let Self { runtime, inner } = self;
        let batch = py
            .allow_threads(|| runtime.block_on(inner.step_all(actions)))
            .map_err(to_py_err)?;
        let infos = batch
            .infos
            .iter()
            .map(|info| info.to_json().to_string())
            .collect();
        Ok((batch.observations, batch.rewards, batch.dones, infos))
    }

    fn reset_done(&mut self, py: Python<'_>) -> PyResult<Vec<(usize, Vec<f32>)>> {
        let Self { runtime, inner } = self;
        py.allow_threads(|| runtime.block_on(inner.reset_done()))
            .map_err(to_py_err)
    }

    fn seed(&mut self, base: u64) {
        self.inner.seed(base);
    }

    fn close(&mut self, py: Python<'_>) -> PyResult<()> {
        let Self { runtime, inner } = self;
        py.allow_threads(|| runtime.block_on(inner.close()))
            .map_err(to_py_err)
    }

    #[getter]
    fn action_low(&self) -> Vec<f32> {
        self.inner.get(0).map(|e| e.action_space().low()).unwrap_or_default()
    }

    #[getter]
    fn action_high(&self) -> Vec<f32> {
        self.inner.get(0).map(|e| e.action_space().high()).unwrap_or_default()
    }

    #[getter]
    fn observation_names(&self) -> Vec<String> {
        self.inner
            .get(0)
            .map(|e| e.observation_names().to_vec())
            .unwrap_or_default()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }
}

/// Python module exposing the batched environment.
/// The name of this function must match the lib.name in Cargo.toml
#[pymodule]
fn gace(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyVecEnv>()?;
    Ok(())
}
