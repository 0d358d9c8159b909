//! Temperature payload decoding.
//!
//! The sensor firmware pushes the temperature characteristic either as ASCII
//! decimal text (e.g. `b"36.6"`) or as a 4-byte little-endian IEEE-754 float.
//! Which one is in use is fixed per deployment through [`PayloadFormat`].

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::trace;

use crate::data::TemperatureReading;
use crate::error::{Error, Result};

/// Wire encoding of the temperature characteristic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PayloadFormat {
    /// ASCII decimal text, optionally padded with whitespace or NULs.
    #[default]
    Utf8Text,
    /// Four bytes, IEEE-754 binary32, little-endian.
    Float32Le,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8Text => write!(f, "text"),
            Self::Float32Le => write!(f, "float32-le"),
        }
    }
}

/// Parse the raw value into degrees Celsius without range validation.
pub fn decode_value(payload: &[u8], format: PayloadFormat) -> Result<f32> {
    trace!("Decoding {} byte payload as {}: {:02X?}", payload.len(), format, payload);

    match format {
        PayloadFormat::Utf8Text => {
            let text = std::str::from_utf8(payload).map_err(|_| Error::InvalidData {
                context: "temperature payload is not valid UTF-8".to_string(),
            })?;
            let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
            text.parse::<f32>().map_err(|_| Error::InvalidData {
                context: format!("'{}' is not a temperature", text),
            })
        }
        PayloadFormat::Float32Le => {
            let bytes: [u8; 4] = payload.try_into().map_err(|_| Error::InvalidData {
                context: format!("expected 4 bytes, got {}", payload.len()),
            })?;
            Ok(f32::from_le_bytes(bytes))
        }
    }
}

/// Decode and validate a notification payload.
pub fn decode_reading(
    payload: &[u8],
    format: PayloadFormat,
    observed_at: DateTime<Utc>,
) -> Result<TemperatureReading> {
    let value = decode_value(payload, format)?;
    TemperatureReading::observed(value, observed_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_value(b"36.6", PayloadFormat::Utf8Text).unwrap(), 36.6);
        assert_eq!(decode_value(b" 25\r\n", PayloadFormat::Utf8Text).unwrap(), 25.0);
        assert_eq!(decode_value(b"30.5\0\0", PayloadFormat::Utf8Text).unwrap(), 30.5);
    }

    #[test]
    fn test_decode_text_malformed() {
        assert!(matches!(
            decode_value(b"abc", PayloadFormat::Utf8Text),
            Err(Error::InvalidData { .. })
        ));
        assert!(matches!(
            decode_value(b"", PayloadFormat::Utf8Text),
            Err(Error::InvalidData { .. })
        ));
        assert!(matches!(
            decode_value(&[0xFF, 0xFE], PayloadFormat::Utf8Text),
            Err(Error::InvalidData { .. })
        ));
    }

    #[test]
    fn test_decode_float() {
        let payload = 36.5f32.to_le_bytes();
        assert_eq!(decode_value(&payload, PayloadFormat::Float32Le).unwrap(), 36.5);
    }

    #[test]
    fn test_decode_float_wrong_length() {
        assert!(decode_value(&[0, 0, 0], PayloadFormat::Float32Le).is_err());
        assert!(decode_value(&[0, 0, 0, 0, 0], PayloadFormat::Float32Le).is_err());
    }

    #[test]
    fn test_decode_reading_validates_range() {
        let now = Utc::now();
        let reading = decode_reading(b"20.0", PayloadFormat::Utf8Text, now).unwrap();
        assert_eq!(reading.celsius(), 20.0);
        assert_eq!(reading.observed_at(), now);

        assert!(decode_reading(b"45.0", PayloadFormat::Utf8Text, now).is_ok());
        assert!(matches!(
            decode_reading(b"19.99", PayloadFormat::Utf8Text, now),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            decode_reading(b"45.01", PayloadFormat::Utf8Text, now),
            Err(Error::OutOfRange { .. })
        ));
        assert!(matches!(
            decode_reading(&50.0f32.to_le_bytes(), PayloadFormat::Float32Le, now),
            Err(Error::OutOfRange { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_text_matches_float_encoding(value in 20.0f32..=45.0) {
            let text = value.to_string();
            let from_text = decode_value(text.as_bytes(), PayloadFormat::Utf8Text).unwrap();
            let from_float = decode_value(&value.to_le_bytes(), PayloadFormat::Float32Le).unwrap();
            prop_assert_eq!(from_text, from_float);
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(payload in proptest::collection::vec(any::<u8>(), 0..16)) {
            let _ = decode_value(&payload, PayloadFormat::Utf8Text);
            let _ = decode_value(&payload, PayloadFormat::Float32Le);
        }
    }
}
