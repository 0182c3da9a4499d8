//! Mapping between the agent-facing normalized space and physical units.
//!
//! Circuit parameters span many orders of magnitude (widths in meters,
//! frequencies in Hertz), so every component carries its own physical range
//! and may be interpolated logarithmically.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Map a normalized value onto the physical range.
///
/// `x` is clamped to `[lo_norm, hi_norm]` first, so the result never leaves
/// `[lo_phys, hi_phys]`. With `log` set the interpolation happens in
/// log-space and both physical bounds must be positive.
pub fn unscale_value(
    x: f64,
    lo_norm: f64,
    hi_norm: f64,
    lo_phys: f64,
    hi_phys: f64,
    log: bool,
) -> f64 {
    let x = x.clamp(lo_norm, hi_norm);
    let frac = (x - lo_norm) / (hi_norm - lo_norm);
    if log {
        let (lo, hi) = (lo_phys.ln(), hi_phys.ln());
        (lo + frac * (hi - lo)).exp()
    } else {
        lo_phys + frac * (hi_phys - lo_phys)
    }
}

/// Inverse of [`unscale_value`].
///
/// No clamping happens here; a physical value outside its range maps outside
/// the normalized bounds. On a log scale a non-positive value maps to
/// `lo_norm`.
pub fn scale_value(
    p: f64,
    lo_norm: f64,
    hi_norm: f64,
    lo_phys: f64,
    hi_phys: f64,
    log: bool,
) -> f64 {
    if log && p <= 0.0 {
        return lo_norm;
    }
    let frac = if log {
        let (lo, hi) = (lo_phys.ln(), hi_phys.ln());
        (p.ln() - lo) / (hi - lo)
    } else {
        (p - lo_phys) / (hi_phys - lo_phys)
    };
    lo_norm + frac * (hi_norm - lo_norm)
}

/// One dimension of a [`ScaledSpace`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub low: f64,
    pub high: f64,
    pub phys_low: f64,
    pub phys_high: f64,
    #[serde(default)]
    pub log: bool,
}

impl Component {
    pub fn unscale(&self, x: f64) -> f64 {
        unscale_value(x, self.low, self.high, self.phys_low, self.phys_high, self.log)
    }

    pub fn scale(&self, p: f64) -> f64 {
        scale_value(p, self.low, self.high, self.phys_low, self.phys_high, self.log)
    }
}

/// A bounded box space whose components map onto physical values.
///
/// Used both as the action space and the observation space of an
/// environment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScaledSpace {
    components: Vec<Component>,
}

impl ScaledSpace {
    pub fn new(components: Vec<Component>) -> Self {
        Self { components }
    }

    pub fn dim(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name.clone()).collect()
    }

    pub fn low(&self) -> Vec<f32> {
        self.components.iter().map(|c| c.low as f32).collect()
    }

    pub fn high(&self) -> Vec<f32> {
        self.components.iter().map(|c| c.high as f32).collect()
    }

    /// True when every component satisfies `|low| == |high|`.
    pub fn is_symmetric(&self) -> bool {
        self.components.iter().all(|c| (c.low.abs() - c.high.abs()).abs() <= f64::EPSILON)
    }

    pub fn contains(&self, x: &[f32]) -> bool {
        x.len() == self.dim()
            && self
                .components
                .iter()
                .zip(x)
                .all(|(c, &v)| v.is_finite() && (c.low..=c.high).contains(&(v as f64)))
    }

    /// Clamp each component into its normalized bounds. NaN maps to the
    /// component's midpoint.
    pub fn clamp(&self, x: &[f32]) -> Vec<f32> {
        self.components
            .iter()
            .zip(x)
            .map(|(c, &v)| {
                if v.is_nan() {
                    ((c.low + c.high) / 2.0) as f32
                } else {
                    (v as f64).clamp(c.low, c.high) as f32
                }
            })
            .collect()
    }

    pub fn unscale(&self, x: &[f32]) -> Vec<f64> {
        self.clamp(x)
            .iter()
            .zip(&self.components)
            .map(|(&v, c)| c.unscale(v as f64))
            .collect()
    }

    pub fn scale(&self, p: &[f64]) -> Vec<f32> {
        self.components
            .iter()
            .zip(p)
            .map(|(c, &v)| c.scale(v) as f32)
            .collect()
    }

    /// Draw a point uniformly from the normalized box.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f32> {
        self.components
            .iter()
            .map(|c| rng.gen_range(c.low..=c.high) as f32)
            .collect()
    }
}
