use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named physical circuit parameters submitted to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignPoint(BTreeMap<String, f64>);

/// Named electrical metrics measured for one design point.
///
/// Values may be non-finite when the simulation did not converge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerformanceReport(BTreeMap<String, f64>);

macro_rules! named_values {
    ($ty:ident) => {
        impl $ty {
            pub fn new() -> Self {
                Self(BTreeMap::new())
            }

            pub fn insert(&mut self, name: impl Into<String>, value: f64) -> Option<f64> {
                self.0.insert(name.into(), value)
            }

            pub fn get(&self, name: &str) -> Option<f64> {
                self.0.get(name).copied()
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
                self.0.iter().map(|(k, v)| (k.as_str(), *v))
            }

            pub fn as_map(&self) -> &BTreeMap<String, f64> {
                &self.0
            }

            pub fn into_map(self) -> BTreeMap<String, f64> {
                self.0
            }
        }

        impl From<BTreeMap<String, f64>> for $ty {
            fn from(map: BTreeMap<String, f64>) -> Self {
                Self(map)
            }
        }

        impl<K: Into<String>> FromIterator<(K, f64)> for $ty {
            fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
                Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
            }
        }
    };
}

named_values!(DesignPoint);
named_values!(PerformanceReport);

/// Opaque evaluator connection parameters (technology and circuit paths,
/// simulator handles, ...).
pub type EvaluatorParams = serde_json::Map<String, serde_json::Value>;
