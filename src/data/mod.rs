//! Data structures for sensor readings.
//!
//! This module contains the validated temperature reading and the sinks
//! that persist the latest one.

pub mod reading;
pub mod store;

pub use reading::{TemperatureReading, MAX_VALID_TEMPERATURE, MIN_VALID_TEMPERATURE};
pub use store::{FileReadingStore, MemoryReadingStore, ReadingStore, LATEST_READING_KEY};
