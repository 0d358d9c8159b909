//! Temperature unit helpers.

/// Convert Celsius to Fahrenheit.
///
/// ```
/// use thermo_sensor_ble::celsius_to_fahrenheit;
///
/// assert!((celsius_to_fahrenheit(37.0) - 98.6).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert Fahrenheit to Celsius.
///
/// ```
/// use thermo_sensor_ble::fahrenheit_to_celsius;
///
/// assert!((fahrenheit_to_celsius(98.6) - 37.0).abs() < 0.001);
/// ```
#[inline]
pub fn fahrenheit_to_celsius(fahrenheit: f32) -> f32 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_at_range_bounds() {
        assert!((celsius_to_fahrenheit(20.0) - 68.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(45.0) - 113.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(68.0) - 20.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(113.0) - 45.0).abs() < 0.001);
    }

    #[test]
    fn test_fixed_point() {
        assert!((celsius_to_fahrenheit(-40.0) + 40.0).abs() < 0.001);
    }
}
