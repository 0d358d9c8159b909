//! BLE communication module.
//!
//! This module holds the radio abstraction and the pieces of the connection
//! pipeline: adapter gate, scanner, connection state, service resolution,
//! reconnection policy and the btleplug-backed driver.

pub mod adapter;
pub mod btleplug_radio;
pub mod connection;
pub mod radio;
pub mod reconnect;
pub mod resolver;
pub mod scanner;
pub mod uuids;

pub use adapter::{AdapterStatus, EnableRequest, RadioEnabler};
pub use btleplug_radio::BtleplugRadio;
pub use connection::{ConnectPhase, ConnectionState};
pub use radio::{
    CharacteristicRef, DeviceAddress, GattCharacteristic, GattService, RadioDriver, RadioEvent,
    RadioEventSender,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
pub use resolver::resolve_target;
pub use scanner::{ScanFailureCode, Scanner};
pub use uuids::*;
