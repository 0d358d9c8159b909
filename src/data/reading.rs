//! Validated temperature readings.

use chrono::{DateTime, Utc};
use std::ops::RangeInclusive;

use crate::error::{Error, Result};
use crate::utils::celsius_to_fahrenheit;

/// Lowest accepted temperature in °C.
pub const MIN_VALID_TEMPERATURE: f32 = 20.0;
/// Highest accepted temperature in °C.
pub const MAX_VALID_TEMPERATURE: f32 = 45.0;

/// A temperature reported by the sensor that passed range validation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TemperatureReading {
    value: f32,
    observed_at: DateTime<Utc>,
}

impl TemperatureReading {
    /// The accepted range, inclusive on both ends.
    pub const VALID_RANGE: RangeInclusive<f32> = MIN_VALID_TEMPERATURE..=MAX_VALID_TEMPERATURE;

    /// Validate `value` and stamp it with the current time.
    pub fn new(value: f32) -> Result<Self> {
        Self::observed(value, Utc::now())
    }

    /// Validate `value` observed at `observed_at`.
    pub fn observed(value: f32, observed_at: DateTime<Utc>) -> Result<Self> {
        if !Self::VALID_RANGE.contains(&value) {
            return Err(Error::OutOfRange {
                value,
                min: MIN_VALID_TEMPERATURE,
                max: MAX_VALID_TEMPERATURE,
            });
        }
        Ok(Self { value, observed_at })
    }

    /// Temperature in °C.
    pub fn celsius(&self) -> f32 {
        self.value
    }

    /// Temperature in °F.
    pub fn fahrenheit(&self) -> f32 {
        celsius_to_fahrenheit(self.value)
    }

    /// When the value was received.
    pub fn observed_at(&self) -> DateTime<Utc> {
        self.observed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_boundaries_accepted() {
        assert_eq!(TemperatureReading::new(20.0).unwrap().celsius(), 20.0);
        assert_eq!(TemperatureReading::new(45.0).unwrap().celsius(), 45.0);
    }

    #[test]
    fn test_just_outside_rejected() {
        assert!(matches!(
            TemperatureReading::new(19.99),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            TemperatureReading::new(45.01),
            Err(Error::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        assert!(TemperatureReading::new(f32::NAN).is_err());
        assert!(TemperatureReading::new(f32::INFINITY).is_err());
    }

    #[test]
    fn test_fahrenheit() {
        let reading = TemperatureReading::new(37.0).unwrap();
        assert!((reading.fahrenheit() - 98.6).abs() < 0.001);
    }

    proptest! {
        #[test]
        fn prop_accepts_exactly_valid_range(value in -100.0f32..150.0) {
            let accepted = TemperatureReading::new(value).is_ok();
            prop_assert_eq!(accepted, (20.0..=45.0).contains(&value));
        }
    }
}
