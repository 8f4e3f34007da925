//! Bounded, mean-reverting random walk used by every life-support reading.

use rand::Rng;

/// Correction toward baseline applied per tick.
pub const DEFAULT_CORRECTION: f64 = 0.06;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Percent,
    Kilogram,
    KiloPascal,
    Celsius,
    Minutes,
    Other,
}

impl Unit {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "%" | "percent" | "pct" => Self::Percent,
            "kg" => Self::Kilogram,
            "kpa" => Self::KiloPascal,
            "°c" | "c" | "celsius" => Self::Celsius,
            "min" | "minutes" | "minuten" => Self::Minutes,
            _ => Self::Other,
        }
    }

    /// Jitter amplitude for a reading of this unit around `baseline`.
    pub fn jitter_scale(self, baseline: f64) -> f64 {
        let magnitude = baseline.abs();
        match self {
            Self::Percent => (magnitude * 0.004).max(0.15),
            Self::Kilogram => magnitude * 0.01,
            Self::KiloPascal => 0.08,
            Self::Celsius => 0.07,
            Self::Minutes => (magnitude * 0.005).max(0.4),
            Self::Other => (magnitude * 0.005).max(0.1),
        }
    }

    pub fn decimals(self) -> u32 {
        match self {
            Self::Kilogram => 2,
            Self::Minutes => 0,
            Self::Percent | Self::KiloPascal | Self::Celsius | Self::Other => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSpec {
    pub unit: Unit,
    /// Constant directional push added every tick.
    pub bias: f64,
    pub min: f64,
    pub max: f64,
    /// Overrides the unit's decimal count.
    pub decimals: Option<u32>,
    pub correction: f64,
    /// Multiplier on the unit's jitter scale; zero makes the walk
    /// deterministic.
    pub jitter: f64,
}

impl DriftSpec {
    pub fn new(unit: Unit, min: f64, max: f64) -> Self {
        Self {
            unit,
            bias: 0.0,
            min,
            max,
            decimals: None,
            correction: DEFAULT_CORRECTION,
            jitter: 1.0,
        }
    }

    #[must_use]
    pub fn with_bias(mut self, bias: f64) -> Self {
        self.bias = bias;
        self
    }

    #[must_use]
    pub fn with_correction(mut self, correction: f64, jitter: f64) -> Self {
        self.correction = correction;
        self.jitter = jitter;
        self
    }
}

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX).min(9));
    (value * factor).round() / factor
}

/// One step of the walk: pull toward `baseline`, add jitter and bias, clamp
/// and round. The result always lies in `[spec.min, spec.max]`.
pub fn drift_value(current: f64, baseline: f64, spec: &DriftSpec, rng: &mut impl Rng) -> f64 {
    let (lo, hi) = if spec.min <= spec.max {
        (spec.min, spec.max)
    } else {
        (spec.max, spec.min)
    };
    let current = if current.is_finite() { current } else { baseline };

    let correction = (baseline - current) * spec.correction;
    let jitter = rng.gen_range(-1.0..=1.0) * spec.unit.jitter_scale(baseline) * spec.jitter;
    let next = (current + correction + jitter + spec.bias).clamp(lo, hi);

    let decimals = spec.decimals.unwrap_or_else(|| spec.unit.decimals());
    round_to(next, decimals).clamp(lo, hi)
}
