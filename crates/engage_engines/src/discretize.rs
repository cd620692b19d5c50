#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Qualitative bucket of a normalized [0, 1] observation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DiscreteLevel {
    None,
    Low,
    High,
    Full,
}

impl DiscreteLevel {
    pub const ALL: [DiscreteLevel; 4] = [
        DiscreteLevel::None,
        DiscreteLevel::Low,
        DiscreteLevel::High,
        DiscreteLevel::Full,
    ];

    pub const LOWEST: DiscreteLevel = DiscreteLevel::None;
    pub const HIGHEST: DiscreteLevel = DiscreteLevel::Full;

    /// Representative value of the bucket.
    pub fn value(self) -> f64 {
        match self {
            DiscreteLevel::None => 0.0,
            DiscreteLevel::Low => 1.0 / 3.0,
            DiscreteLevel::High => 2.0 / 3.0,
            DiscreteLevel::Full => 1.0,
        }
    }

    /// The value rounded to two decimals, as shown to people (0.00, 0.33, 0.67, 1.00).
    pub fn hundredths(self) -> u8 {
        match self {
            DiscreteLevel::None => 0,
            DiscreteLevel::Low => 33,
            DiscreteLevel::High => 67,
            DiscreteLevel::Full => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiscreteLevel::None => "none",
            DiscreteLevel::Low => "low",
            DiscreteLevel::High => "high",
            DiscreteLevel::Full => "full",
        }
    }
}

impl fmt::Display for DiscreteLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.value())
    }
}

/// Interior boundaries between consecutive levels.
///
/// A value on a boundary belongs to the upper level.
pub const LEVEL_BOUNDARIES: [f64; 3] = [1.0 / 6.0, 0.5, 5.0 / 6.0];

/// Maps a normalized value to the nearest of the four levels.
///
/// Inputs are clamped into [0, 1]. NaN maps to the lowest level; callers that care about
/// missing data must filter it before discretizing.
pub fn float_bucket(x: f64) -> DiscreteLevel {
    if x.is_nan() {
        return DiscreteLevel::LOWEST;
    }
    let x = x.clamp(0.0, 1.0);
    match LEVEL_BOUNDARIES.iter().position(|b| x < *b) {
        Some(0) => DiscreteLevel::None,
        Some(1) => DiscreteLevel::Low,
        Some(2) => DiscreteLevel::High,
        _ => DiscreteLevel::Full,
    }
}

/// Shared discretization table used by both decision making and explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Discretizer;

impl Discretizer {
    pub fn mvp_v1() -> Self {
        Discretizer
    }

    pub fn bucket(&self, x: f64) -> DiscreteLevel {
        float_bucket(x)
    }

    /// Value of `x`'s bucket; what decision scores are compared on.
    pub fn round(&self, x: f64) -> f64 {
        self.bucket(x).value()
    }

    pub fn domain(&self) -> &'static [DiscreteLevel] {
        &DiscreteLevel::ALL
    }
}
