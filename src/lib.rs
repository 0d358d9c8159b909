// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # thermo-sensor-ble
//!
//! A Rust library that keeps a live connection to a single BLE temperature
//! sensor (an ESP32 advertising as `ESP32-Thermo`) and streams its readings.
//!
//! ## Features
//!
//! - **Discovery**: Scan by advertised name with a bounded timeout
//! - **Connection State Machine**: Disconnected, Connecting, Connected, Disconnecting
//! - **Subscription**: Resolve the temperature characteristic and enable notifications
//! - **Validation**: Accept readings in 20.0..=45.0 °C only
//! - **Recovery**: Bounded reconnection after link loss or setup failure
//! - **Persistence**: Optionally store the latest reading after a short delay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use thermo_sensor_ble::{
//!     event_channel, BtleplugRadio, ConnectionState, ManagerConfig, Result, SensorManager,
//!     TracingMessageSink,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (queue, events) = event_channel();
//!     let radio = BtleplugRadio::new(queue.radio_sender()).await?;
//!
//!     let handle = SensorManager::new(radio, ManagerConfig::default(), &queue)?
//!         .with_message_sink(TracingMessageSink)
//!         .spawn(events);
//!
//!     handle.start_scan()?;
//!     handle.wait_for_state(ConnectionState::Connected).await?;
//!
//!     let mut updates = handle.subscribe();
//!     while updates.changed().await.is_ok() {
//!         if let Some(reading) = updates.borrow().latest_reading {
//!             println!("Temperature: {:.1}°C", reading.celsius());
//!         }
//!     }
//!
//!     handle.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Android
//! Runtime permissions depend on the API level; see [`required_permissions`].
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod listener;
pub mod permissions;
pub mod protocol;
pub mod sensor_manager;
pub mod utils;

// Re-exports for convenience
pub use config::ManagerConfig;
pub use error::{Error, Result};
pub use listener::{MessageSink, StateChangeListener, TracingMessageSink};
pub use permissions::{required_permissions, Permission, PermissionStatus, Platform};
pub use sensor_manager::{
    event_channel, EventQueue, EventReceiver, ManagerSnapshot, SensorManager,
    SensorManagerHandle, TargetDevice,
};
pub use utils::{celsius_to_fahrenheit, fahrenheit_to_celsius};

// Re-export commonly used types from submodules
pub use ble::{
    BtleplugRadio, ConnectionState, DeviceAddress, RadioDriver, RadioEnabler, RadioEvent,
    ScanFailureCode,
};
pub use data::{FileReadingStore, MemoryReadingStore, ReadingStore, TemperatureReading};
pub use protocol::PayloadFormat;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<SensorManagerHandle>();
        let _ = std::any::TypeId::of::<ManagerConfig>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<TemperatureReading>();
        let _ = std::any::TypeId::of::<ManagerSnapshot>();
        let _ = std::any::TypeId::of::<BtleplugRadio>();
    }

    #[test]
    fn test_temperature_conversion() {
        assert!((celsius_to_fahrenheit(45.0) - 113.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(113.0) - 45.0).abs() < 0.001);
    }
}
