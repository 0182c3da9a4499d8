//! Named environment configurations and the constructors built on them.
//!
//! Environments are addressed by ids of the form `circuit-technology-vN`,
//! optionally prefixed with `gace:`. Variant `v0` sizes electrical
//! parameters, `v1` geometric ones.

use crate::config::EnvConfig;
use crate::env::{CircuitEnv, EnvError, RewardFn, VecEnv};
use crate::evaluator::{Evaluator, EvaluatorFactory, EvaluatorParams};
use crate::runtime::PoolConfig;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

const ID_PREFIX: &str = "gace:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant {
    /// Sizes electrical parameters (currents, gm/Id).
    Electrical,
    /// Sizes geometric parameters (widths, lengths).
    Geometric,
    Other(u32),
}

impl Variant {
    pub fn number(self) -> u32 {
        match self {
            Variant::Electrical => 0,
            Variant::Geometric => 1,
            Variant::Other(n) => n,
        }
    }
}

impl From<u32> for Variant {
    fn from(n: u32) -> Self {
        match n {
            0 => Variant::Electrical,
            1 => Variant::Geometric,
            n => Variant::Other(n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId {
    pub circuit: String,
    pub technology: String,
    pub variant: Variant,
}

impl FromStr for EnvId {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EnvError::InvalidEnvId(s.to_string());
        let bare = s.strip_prefix(ID_PREFIX).unwrap_or(s);

        // The circuit name may itself contain dashes.
        let mut parts = bare.rsplitn(3, '-');
        let variant = parts.next().ok_or_else(invalid)?;
        let technology = parts.next().ok_or_else(invalid)?;
        let circuit = parts.next().ok_or_else(invalid)?;
        if circuit.is_empty() || technology.is_empty() {
            return Err(invalid());
        }

        let variant = variant
            .strip_prefix('v')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(invalid)?;

        Ok(EnvId {
            circuit: circuit.to_string(),
            technology: technology.to_string(),
            variant: Variant::from(variant),
        })
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-v{}", self.circuit, self.technology, self.variant.number())
    }
}

/// Maps environment ids to validated configurations and opens evaluators
/// for the environments it builds.
pub struct Registry {
    configs: BTreeMap<EnvId, Arc<EnvConfig>>,
    factory: Arc<dyn EvaluatorFactory>,
    reward_fn: Option<Arc<RewardFn>>,
    pool: PoolConfig,
}

impl Registry {
    pub fn new(factory: impl EvaluatorFactory + 'static) -> Self {
        Self {
            configs: BTreeMap::new(),
            factory: Arc::new(factory),
            reward_fn: None,
            pool: PoolConfig::default(),
        }
    }

    /// Replace the built-in reward for every environment made from now on.
    pub fn with_reward_fn(mut self, f: Arc<RewardFn>) -> Self {
        self.reward_fn = Some(f);
        self
    }

    /// Worker pool settings for batches made by this registry.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validate and store `config` under `id`, replacing any earlier entry.
    pub fn register(&mut self, id: &str, config: EnvConfig) -> Result<EnvId, EnvError> {
        let id: EnvId = id.parse()?;
        config.validate()?;
        info!(
            env = %id,
            metrics = config.metrics.len(),
            parameters = config.parameters.len(),
            "environment registered"
        );
        self.configs.insert(id.clone(), Arc::new(config));
        Ok(id)
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<EnvConfig>, EnvError> {
        let parsed: EnvId = id.parse()?;
        self.configs
            .get(&parsed)
            .cloned()
            .ok_or_else(|| EnvError::UnknownEnv(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.resolve(id).is_ok()
    }

    /// Registered ids in canonical form, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.configs.keys().map(EnvId::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Register every entry of a JSON object mapping ids to configurations.
    /// Nothing is registered if any entry is invalid.
    pub fn load_json_str(&mut self, json: &str) -> Result<Vec<EnvId>, EnvError> {
        let entries: BTreeMap<String, EnvConfig> = serde_json::from_str(json)?;

        let mut parsed = Vec::with_capacity(entries.len());
        for (id, config) in entries {
            let id: EnvId = id.parse()?;
            config.validate()?;
            parsed.push((id, config));
        }

        Ok(parsed
            .into_iter()
            .map(|(id, config)| {
                info!(env = %id, "environment registered");
                self.configs.insert(id.clone(), Arc::new(config));
                id
            })
            .collect())
    }

    pub fn load_json(&mut self, path: impl AsRef<Path>) -> Result<Vec<EnvId>, EnvError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let ids = self.load_json_str(&json)?;
        info!(
            path = %path.as_ref().display(),
            count = ids.len(),
            "environment configurations loaded"
        );
        Ok(ids)
    }

    pub fn make(&self, id: &str) -> Result<CircuitEnv, EnvError> {
        self.build(id, None)
    }

    /// Like [`Registry::make`] with an explicit seed.
    pub fn make_seeded(&self, id: &str, seed: u64) -> Result<CircuitEnv, EnvError> {
        self.build(id, Some(seed))
    }

    /// `count` identically configured instances. When the configuration
    /// carries a seed `s`, instance `i` is seeded with `s + i`.
    pub fn make_batch(&self, id: &str, count: usize) -> Result<VecEnv<CircuitEnv>, EnvError> {
        let seed = self.resolve(id)?.seed;
        let envs = (0..count)
            .map(|i| self.build(id, seed.map(|s| s.wrapping_add(i as u64))))
            .collect::<Result<Vec<_>, _>>()?;
        info!(env = id, count, "batch created");
        Ok(VecEnv::from_envs(envs, self.pool.clone()))
    }

    /// One instance per id, possibly of different circuits, in the given order.
    pub fn make_mixed(&self, ids: &[&str]) -> Result<VecEnv<CircuitEnv>, EnvError> {
        let envs = ids
            .iter()
            .map(|id| self.make(id))
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = envs.len(), "mixed batch created");
        Ok(VecEnv::from_envs(envs, self.pool.clone()))
    }

    fn build(&self, id: &str, seed: Option<u64>) -> Result<CircuitEnv, EnvError> {
        let config = self.resolve(id)?;
        let canonical: EnvId = id.parse()?;
        let evaluator = self.open(&canonical, &config.evaluator)?;

        let mut builder = CircuitEnv::builder(config)
            .id(canonical.to_string())
            .boxed_evaluator(evaluator)
            .shared_reward_fn(self.reward_fn.clone());
        if let Some(seed) = seed {
            builder = builder.seed(seed);
        }
        builder.build()
    }

    fn open(&self, id: &EnvId, params: &EvaluatorParams) -> Result<Box<dyn Evaluator>, EnvError> {
        self.factory
            .open(&id.to_string(), params)
            .map_err(EnvError::EvaluatorUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::amplifier;
    use crate::env::Env;
    use crate::env::testing::amp_evaluator;
    use crate::evaluator::EvaluatorError;

    fn registry() -> Registry {
        let mut registry = Registry::new(
            |_: &str, _: &EvaluatorParams| -> Result<Box<dyn Evaluator>, EvaluatorError> {
                Ok(Box::new(amp_evaluator()))
            },
        );
        registry.register("op2-xh035-v0", amplifier()).unwrap();
        registry
    }

    #[test]
    fn parses_ids() {
        let id: EnvId = "gace:op2-xh035-v1".parse().unwrap();
        assert_eq!(id.circuit, "op2");
        assert_eq!(id.technology, "xh035");
        assert_eq!(id.variant, Variant::Geometric);
        assert_eq!(id.to_string(), "op2-xh035-v1");

        let id: EnvId = "nand-4-sky130-v3".parse().unwrap();
        assert_eq!(id.circuit, "nand-4");
        assert_eq!(id.variant, Variant::Other(3));

        for bad in ["op2", "op2-v0", "op2-xh035-0", "op2-xh035-vx", "-xh035-v0"] {
            assert!(
                matches!(bad.parse::<EnvId>(), Err(EnvError::InvalidEnvId(_))),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn resolves_with_or_without_prefix() {
        let registry = registry();
        assert!(registry.resolve("op2-xh035-v0").is_ok());
        assert!(registry.resolve("gace:op2-xh035-v0").is_ok());
        assert!(matches!(
            registry.resolve("op2-xh035-v1"),
            Err(EnvError::UnknownEnv(_))
        ));
        assert_eq!(registry.ids(), vec!["op2-xh035-v0"]);
    }

    #[test]
    fn register_rejects_invalid_config() {
        let mut registry = registry();
        let mut cfg = amplifier();
        cfg.metrics.clear();
        assert!(matches!(
            registry.register("op1-xh035-v0", cfg),
            Err(EnvError::Configuration(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn load_json_is_all_or_nothing() {
        let mut registry = registry();
        let good = serde_json::to_value(amplifier()).unwrap();
        let json = serde_json::json!({ "op8-gpdk180-v0": good, "bad-id": good }).to_string();
        assert!(registry.load_json_str(&json).is_err());
        assert_eq!(registry.len(), 1);

        let json =
            serde_json::json!({ "op8-gpdk180-v0": good, "op8-gpdk180-v1": good }).to_string();
        let ids = registry.load_json_str(&json).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn unavailable_evaluator_fails_make() {
        let mut registry = Registry::new(
            |_: &str, _: &EvaluatorParams| -> Result<Box<dyn Evaluator>, EvaluatorError> {
                Err(EvaluatorError::Connection("no license".into()))
            },
        );
        registry.register("op2-xh035-v0", amplifier()).unwrap();
        assert!(matches!(
            registry.make("op2-xh035-v0"),
            Err(EnvError::EvaluatorUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn batches_are_seeded_per_instance() {
        let mut registry = registry();
        let mut cfg = amplifier();
        cfg.random_target = true;
        cfg.seed = Some(7);
        registry.register("op2-xh035-v1", cfg).unwrap();

        let mut batch = registry.make_batch("op2-xh035-v1", 2).unwrap();
        batch.reset_all().await.unwrap();
        let mut alone = registry.make_seeded("op2-xh035-v1", 8).unwrap();
        alone.reset().await.unwrap();

        assert_eq!(batch.get(0).unwrap().id(), "op2-xh035-v1");
        assert_eq!(
            batch.get(1).unwrap().episode().unwrap().target,
            alone.episode().unwrap().target
        );
    }

    #[tokio::test]
    async fn mixed_batch_keeps_order() {
        let mut registry = registry();
        let mut cfg = amplifier();
        cfg.parameters.pop();
        registry.register("op1-xh035-v1", cfg).unwrap();

        let mut batch = registry.make_mixed(&["op2-xh035-v0", "gace:op1-xh035-v1"]).unwrap();
        batch.reset_all().await.unwrap();
        let dims: Vec<usize> = batch.action_spaces().iter().map(|s| s.dim()).collect();
        assert_eq!(dims, vec![2, 1]);
        assert_eq!(batch.get(1).unwrap().id(), "op1-xh035-v1");
    }
}
