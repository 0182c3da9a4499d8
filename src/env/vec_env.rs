use super::{Env, EnvError};
use crate::env::circuit::CircuitEnv;
use crate::env::types::BatchStep;
use crate::runtime::{self, PoolConfig, WorkerPool};
use crate::space::ScaledSpace;
use futures::future::join_all;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, error, info};

/// Runs many independent environments as one batched environment.
///
/// Index `i` of every batched result always belongs to instance `i`. Each
/// call dispatches the instances onto a bounded [`WorkerPool`] and returns
/// once all of them have finished.
pub struct VecEnv<E> {
    slots: Vec<Option<E>>,
    dones: Vec<bool>,
    pool: WorkerPool,
}

impl<E: Env + 'static> VecEnv<E> {
    pub fn new<F>(mut make_env: F, num_envs: usize) -> Self
    where
        F: FnMut(usize) -> E,
    {
        Self::from_envs((0..num_envs).map(&mut make_env).collect(), PoolConfig::default())
    }

    pub fn from_envs(envs: Vec<E>, config: PoolConfig) -> Self {
        let pool = WorkerPool::new(config);
        info!(envs = envs.len(), workers = pool.workers(), "vectorized environment created");
        Self {
            dones: vec![false; envs.len()],
            slots: envs.into_iter().map(Some).collect(),
            pool,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn workers(&self) -> usize {
        self.pool.workers()
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Done flags reported by the most recent step of each instance.
    pub fn dones(&self) -> &[bool] {
        &self.dones
    }

    pub async fn reset_all(&mut self) -> Result<Vec<E::Obs>, EnvError> {
        let jobs = (0..self.len()).map(|i| (i, ())).collect();
        let observations = self
            .dispatch(jobs, |mut env, ()| async move {
                let result = env.reset().await;
                (env, result)
            })
            .await?;
        self.dones.fill(false);
        Ok(observations)
    }

    pub async fn step_all(
        &mut self,
        actions: Vec<E::Act>,
    ) -> Result<BatchStep<E::Obs, E::Info>, EnvError> {
        if actions.len() != self.len() {
            return Err(EnvError::BatchSize {
                expected: self.len(),
                got: actions.len(),
            });
        }

        // Reject the whole batch before any instance advances.
        for (i, act) in actions.iter().enumerate() {
            let env = self.get(i).ok_or(EnvError::WorkerLost {
                index: i,
                source: runtime::Error::Canceled,
            })?;
            env.check_step(act)?;
        }

        let started = Instant::now();
        let jobs = actions.into_iter().enumerate().collect();
        let results = self
            .dispatch(jobs, |mut env, act| async move {
                let result = env.step(act).await;
                (env, result)
            })
            .await?;

        let mut batch = BatchStep::with_capacity(results.len());
        for result in results {
            batch.push(result);
        }
        self.dones.copy_from_slice(&batch.dones);
        debug!(
            envs = batch.len(),
            done = batch.dones.iter().filter(|&&d| d).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batched step"
        );
        Ok(batch)
    }

    pub async fn reset_at(&mut self, index: usize) -> Result<E::Obs, EnvError> {
        if index >= self.len() {
            return Err(EnvError::Contract(format!(
                "no environment at index {index}, batch has {}",
                self.len()
            )));
        }
        let mut observations = self
            .dispatch(vec![(index, ())], |mut env, ()| async move {
                let result = env.reset().await;
                (env, result)
            })
            .await?;
        self.dones[index] = false;
        observations.pop().ok_or(EnvError::WorkerLost {
            index,
            source: runtime::Error::Canceled,
        })
    }

    /// Reset every instance whose last step reported done.
    pub async fn reset_done(&mut self) -> Result<Vec<(usize, E::Obs)>, EnvError> {
        let indices: Vec<usize> = (0..self.len()).filter(|&i| self.dones[i]).collect();
        let jobs = indices.iter().map(|&i| (i, ())).collect();
        let observations = self
            .dispatch(jobs, |mut env, ()| async move {
                let result = env.reset().await;
                (env, result)
            })
            .await?;
        for &i in &indices {
            self.dones[i] = false;
        }
        Ok(indices.into_iter().zip(observations).collect())
    }

    /// Seed instance `i` with `base + i`.
    pub fn seed(&mut self, base: u64) {
        for (i, env) in self.slots.iter_mut().enumerate() {
            if let Some(env) = env {
                env.seed(base.wrapping_add(i as u64));
            }
        }
    }

    pub fn render_all(&self) -> Vec<Option<String>> {
        self.slots
            .iter()
            .map(|env| env.as_ref().and_then(|e| e.render()))
            .collect()
    }

    pub async fn close(&mut self) -> Result<(), EnvError> {
        for env in self.slots.iter_mut().flatten() {
            env.close().await?;
        }
        self.pool.close();
        Ok(())
    }

    /// Move each addressed instance into a pool task, wait for all of them and
    /// put every instance back into its slot.
    ///
    /// The first instance error is returned only after all instances have
    /// been restored.
    async fn dispatch<A, T, F, Fut>(
        &mut self,
        jobs: Vec<(usize, A)>,
        job: F,
    ) -> Result<Vec<T>, EnvError>
    where
        F: Fn(E, A) -> Fut,
        Fut: Future<Output = (E, Result<T, EnvError>)> + Send + 'static,
        T: Send + 'static,
    {
        if let Some(&(index, _)) = jobs.iter().find(|(i, _)| self.get(*i).is_none()) {
            return Err(EnvError::WorkerLost {
                index,
                source: runtime::Error::Canceled,
            });
        }

        let mut indices = Vec::with_capacity(jobs.len());
        let mut handles = Vec::with_capacity(jobs.len());
        for (i, arg) in jobs {
            if let Some(env) = self.slots[i].take() {
                indices.push(i);
                handles.push(self.pool.submit(job(env, arg)));
            }
        }

        let finished = join_all(handles).await;

        let mut values = Vec::with_capacity(finished.len());
        let mut first_err = None;
        for (i, outcome) in indices.into_iter().zip(finished) {
            match outcome {
                Ok((env, result)) => {
                    self.slots[i] = Some(env);
                    match result {
                        Ok(value) => values.push(value),
                        Err(e) => {
                            first_err.get_or_insert(e);
                        }
                    }
                }
                Err(source) => {
                    error!(index = i, error = %source, "environment instance lost");
                    first_err.get_or_insert(EnvError::WorkerLost { index: i, source });
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }
}

impl VecEnv<CircuitEnv> {
    pub fn action_spaces(&self) -> Vec<&ScaledSpace> {
        self.slots.iter().flatten().map(CircuitEnv::action_space).collect()
    }

    pub fn observation_spaces(&self) -> Vec<&ScaledSpace> {
        self.slots.iter().flatten().map(CircuitEnv::observation_space).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::amplifier;
    use crate::env::testing::{Failing, Panicking, amp_evaluator};
    use crate::env::types::FailureReason;
    use crate::evaluator::{DesignPoint, Evaluator, EvaluatorError, PerformanceReport};
    use async_trait::async_trait;
    use std::time::Duration;

    // Simple test environment
    struct Counter {
        step_count: usize,
    }

    #[async_trait]
    impl Env for Counter {
        type Obs = usize;
        type Act = usize;
        type Info = ();

        async fn reset(&mut self) -> Result<Self::Obs, EnvError> {
            self.step_count = 0;
            Ok(0)
        }

        async fn step(
            &mut self,
            act: Self::Act,
        ) -> Result<(Self::Obs, f32, bool, Self::Info), EnvError> {
            if act == 99 {
                panic!("bad action");
            }
            self.step_count += act;
            Ok((self.step_count, 1.0, self.step_count >= 3, ()))
        }
    }

    /// The toy amplifier, answering only after `delay`.
    struct Delayed(Duration);

    #[async_trait]
    impl Evaluator for Delayed {
        async fn evaluate(
            &mut self,
            design: &DesignPoint,
        ) -> Result<PerformanceReport, EvaluatorError> {
            tokio::time::sleep(self.0).await;
            crate::env::testing::amp_model(design)
        }
    }

    fn circuit(evaluator: impl Evaluator + 'static) -> CircuitEnv {
        CircuitEnv::builder(amplifier())
            .evaluator(evaluator)
            .seed(1)
            .build()
            .unwrap()
    }

    fn actions() -> Vec<Vec<f32>> {
        vec![vec![-1.0, 0.0], vec![0.0, 0.0], vec![0.5, 0.5], vec![1.0, 0.0]]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_failure_does_not_touch_siblings() {
        let envs = (0..4)
            .map(|i| {
                if i == 2 {
                    circuit(Failing(EvaluatorError::Crashed("simulator exited".into())))
                } else {
                    circuit(amp_evaluator())
                }
            })
            .collect();
        let mut vec_env = VecEnv::from_envs(envs, PoolConfig { workers: Some(2) });

        let obs = vec_env.reset_all().await.unwrap();
        assert_eq!(obs.len(), 4);

        let batch = vec_env.step_all(actions()).await.unwrap();
        assert_eq!(batch.len(), 4);

        assert!(batch.dones[2]);
        assert_eq!(batch.rewards[2], -1.0e3);
        assert!(batch.infos[2].is_failure());

        for i in [0, 1, 3] {
            let mut alone = circuit(amp_evaluator());
            alone.reset().await.unwrap();
            let (o, r, d, info) = alone.step(actions()[i].clone()).await.unwrap();

            assert!(!batch.infos[i].is_failure());
            assert_eq!(batch.observations[i], o);
            assert_eq!(batch.rewards[i], r);
            assert_eq!(batch.dones[i], d);
            assert_eq!(batch.infos[i].mask, info.mask);
        }
        assert_eq!(vec_env.dones(), &batch.dones[..]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn panicking_evaluator_does_not_abort_batch() {
        let envs = (0..4)
            .map(|i| if i == 2 { circuit(Panicking) } else { circuit(amp_evaluator()) })
            .collect();
        let mut vec_env = VecEnv::from_envs(envs, PoolConfig { workers: Some(4) });
        vec_env.reset_all().await.unwrap();

        let batch = vec_env.step_all(actions()).await.unwrap();
        assert_eq!(batch.len(), 4);
        assert!(batch.dones[2]);
        assert_eq!(batch.rewards[2], -1.0e3);
        assert!(matches!(batch.infos[2].failure, Some(FailureReason::Crashed(_))));
        for i in [0, 1, 3] {
            assert!(!batch.infos[i].is_failure());
        }

        assert_eq!(vec_env.reset_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn contract_violation_leaves_siblings_untouched() {
        let envs = vec![
            circuit(Failing(EvaluatorError::Crashed("simulator exited".into()))),
            circuit(amp_evaluator()),
        ];
        let mut vec_env = VecEnv::from_envs(envs, PoolConfig { workers: Some(2) });
        vec_env.reset_all().await.unwrap();

        let batch = vec_env.step_all(vec![vec![0.0, 0.0]; 2]).await.unwrap();
        assert_eq!(batch.dones, vec![true, false]);

        let err = vec_env.step_all(vec![vec![0.0, 0.0]; 2]).await.unwrap_err();
        assert!(matches!(err, EnvError::EpisodeDone));
        assert_eq!(vec_env.get(1).unwrap().episode().unwrap().steps, 1);
        assert_eq!(vec_env.dones(), &[true, false]);

        let err = vec_env.step_all(vec![vec![0.0, 0.0], vec![0.0]]).await.unwrap_err();
        assert!(matches!(err, EnvError::EpisodeDone | EnvError::ActionShape { .. }));
        assert_eq!(vec_env.get(1).unwrap().episode().unwrap().steps, 1);

        let reset = vec_env.reset_done().await.unwrap();
        assert_eq!(reset.len(), 1);
        assert_eq!(reset[0].0, 0);
        let batch = vec_env.step_all(vec![vec![0.0, 0.0]; 2]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(vec_env.get(1).unwrap().episode().unwrap().steps, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn results_keep_instance_order() {
        // Later instances finish first.
        let envs = (0..4u64)
            .map(|i| circuit(Delayed(Duration::from_millis(10 * (4 - i)))))
            .collect();
        let mut vec_env = VecEnv::from_envs(envs, PoolConfig { workers: Some(4) });
        vec_env.reset_all().await.unwrap();

        let batch = vec_env.step_all(actions()).await.unwrap();
        for (i, info) in batch.infos.iter().enumerate() {
            let expected = vec_env.get(i).unwrap().design_point(&actions()[i]);
            assert_eq!(info.design, expected);
        }
    }

    #[tokio::test]
    async fn single_worker_still_completes_batch() {
        let envs = (0..3).map(|_| circuit(amp_evaluator())).collect();
        let mut vec_env = VecEnv::from_envs(envs, PoolConfig { workers: Some(1) });
        vec_env.reset_all().await.unwrap();

        let batch = vec_env.step_all(vec![vec![0.0, 0.0]; 3]).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(vec_env.action_spaces().len(), 3);
        assert_eq!(vec_env.observation_spaces()[0].dim(), 6);
    }

    #[tokio::test]
    async fn rejects_mismatched_action_count() {
        let mut vec_env = VecEnv::new(|_| Counter { step_count: 0 }, 3);
        vec_env.reset_all().await.unwrap();
        assert!(matches!(
            vec_env.step_all(vec![1, 1]).await,
            Err(EnvError::BatchSize { expected: 3, got: 2 })
        ));
    }

    #[tokio::test]
    async fn reset_done_only_touches_finished_instances() {
        let mut vec_env = VecEnv::new(|_| Counter { step_count: 0 }, 3);
        vec_env.reset_all().await.unwrap();

        let batch = vec_env.step_all(vec![3, 1, 5]).await.unwrap();
        assert_eq!(batch.dones, vec![true, false, true]);

        let reset = vec_env.reset_done().await.unwrap();
        assert_eq!(reset, vec![(0, 0), (2, 0)]);
        assert_eq!(vec_env.dones(), &[false, false, false]);

        let batch = vec_env.step_all(vec![1, 1, 1]).await.unwrap();
        assert_eq!(batch.observations, vec![1, 2, 1]);
        assert_eq!(vec_env.reset_at(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn panicking_instance_is_reported_and_siblings_survive() {
        let mut vec_env = VecEnv::new(|_| Counter { step_count: 0 }, 3);
        vec_env.reset_all().await.unwrap();

        let err = vec_env.step_all(vec![1, 99, 1]).await.unwrap_err();
        assert!(matches!(err, EnvError::WorkerLost { index: 1, .. }));
        assert!(vec_env.get(0).is_some());
        assert!(vec_env.get(1).is_none());
        assert!(vec_env.get(2).is_some());

        assert!(matches!(
            vec_env.step_all(vec![1, 1, 1]).await,
            Err(EnvError::WorkerLost { index: 1, .. })
        ));
    }

    #[tokio::test]
    async fn seeding_offsets_each_instance() {
        let mut cfg = amplifier();
        cfg.random_target = true;
        let make = |_: usize| {
            CircuitEnv::builder(cfg.clone())
                .evaluator(amp_evaluator())
                .build()
                .unwrap()
        };

        let mut a = VecEnv::new(make, 2);
        let mut b = VecEnv::new(make, 2);
        a.seed(100);
        b.seed(100);
        a.reset_all().await.unwrap();
        b.reset_all().await.unwrap();

        let target = |v: &VecEnv<CircuitEnv>, i: usize| {
            v.get(i).unwrap().episode().unwrap().target.clone()
        };
        assert_eq!(target(&a, 0), target(&b, 0));
        assert_eq!(target(&a, 1), target(&b, 1));
        assert_ne!(target(&a, 0), target(&a, 1));
    }
}
