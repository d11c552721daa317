//! Confidence scores clamped to the unit interval.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Confidence score that is always within `[0.0, 1.0]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Confidence(f64);

impl Confidence {
    /// Lowest possible score.
    pub const MIN: Self = Self(0.0);
    /// Highest possible score.
    pub const MAX: Self = Self(1.0);

    /// Creates a confidence score, clamping finite values into `[0.0, 1.0]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NonFiniteConfidence`] for NaN or infinite input.
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::NonFiniteConfidence { value });
        }
        Ok(Self(value.clamp(0.0, 1.0)))
    }

    /// Returns the raw score.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl Display for Confidence {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = f64::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}
