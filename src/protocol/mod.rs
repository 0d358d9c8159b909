//! Protocol module for decoding sensor payloads.

pub mod decoder;

pub use decoder::{decode_reading, decode_value, PayloadFormat};
