//! Type-safe wrappers for physical units
//!
//! Newtype wrappers around f64 so meters, seconds and track fractions
//! cannot be mixed up when they flow between the normalizer and projector.
//!
//! Meters and seconds serialize with 4 decimal places to keep curve payloads small.

use serde::{Deserialize, Serialize};

/// Round f64 to 4 decimal places for compact JSON serialization
fn round4<S: serde::Serializer>(val: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64((*val * 10000.0).round() / 10000.0)
}

/// Meters
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Meters(#[serde(serialize_with = "round4")] pub f64);

/// Meters per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct MetersPerSecond(#[serde(serialize_with = "round4")] pub f64);

/// Seconds (timestamps, durations)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Seconds(#[serde(serialize_with = "round4")] pub f64);

impl Seconds {
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.0.max(0.0))
    }
}

/// Fraction of a whole (0.0 to 1.0)
///
/// Used for both time fractions and track distance fractions.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Fraction(pub f64);

impl Fraction {
    /// Create a new fraction, clamping to [0.0, 1.0]
    ///
    /// NaN clamps to 0.0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Get as percentage (0-100)
    pub fn as_percent(&self) -> f64 {
        self.0 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_clamps() {
        assert_eq!(Fraction::new(1.5).value(), 1.0);
        assert_eq!(Fraction::new(-0.2).value(), 0.0);
        assert_eq!(Fraction::new(f64::NAN).value(), 0.0);
        assert_eq!(Fraction::new(0.25).as_percent(), 25.0);
    }

    #[test]
    fn test_meters_serialize_rounded() {
        let json = serde_json::to_string(&Meters(12.345678)).unwrap();
        assert_eq!(json, "12.3457");
    }

    #[test]
    fn test_seconds_as_duration() {
        assert_eq!(Seconds(1.5).as_duration(), std::time::Duration::from_millis(1500));
        assert_eq!(Seconds(-3.0).as_duration(), std::time::Duration::ZERO);
    }
}
