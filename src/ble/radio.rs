//! Abstract radio driver interface.
//!
//! The sensor manager never talks to a platform Bluetooth stack directly.
//! It issues non-blocking requests through [`RadioDriver`] and receives the
//! outcomes later as [`RadioEvent`]s on its event queue, in the order the
//! stack delivered them.

use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::ble::scanner::ScanFailureCode;
use crate::sensor_manager::ManagerEvent;

/// Platform address of a peripheral (MAC on Linux/Android, UUID on macOS).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceAddress(String);

impl DeviceAddress {
    /// Wrap a platform address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A characteristic as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Whether the characteristic supports notify or indicate.
    pub notifiable: bool,
    /// UUIDs of the descriptors attached to it.
    pub descriptors: Vec<Uuid>,
}

/// A primary service as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics in this service.
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Find a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Addresses one characteristic on the connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    /// Owning service UUID.
    pub service: Uuid,
    /// Characteristic UUID.
    pub characteristic: Uuid,
}

/// Outcome of an asynchronous radio request, or an unsolicited radio event.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// An advertisement was observed during a scan.
    Advertisement {
        /// Peripheral address.
        address: DeviceAddress,
        /// Advertised local name, if present.
        name: Option<String>,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// The stack reported a scan failure after the scan was started.
    ScanFailed(ScanFailureCode),
    /// The low-level link came up.
    Connected(DeviceAddress),
    /// The low-level connect request failed.
    ConnectFailed {
        /// Peripheral address.
        address: DeviceAddress,
        /// Stack-provided reason.
        reason: String,
    },
    /// The link went down, either requested or radio-initiated.
    Disconnected(DeviceAddress),
    /// Service discovery finished.
    ServicesDiscovered(std::result::Result<Vec<GattService>, String>),
    /// A descriptor write finished.
    DescriptorWritten {
        /// Characteristic owning the descriptor.
        target: CharacteristicRef,
        /// Descriptor UUID.
        descriptor: Uuid,
        /// Write outcome.
        result: std::result::Result<(), String>,
    },
    /// A characteristic value was pushed or read.
    Notification {
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Raw value.
        value: Bytes,
    },
    /// The adapter changed power state.
    AdapterPowered(bool),
}

/// Channel through which a driver reports [`RadioEvent`]s to the manager.
#[derive(Debug, Clone)]
pub struct RadioEventSender {
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl RadioEventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ManagerEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event for the manager. Events sent after the manager has
    /// stopped are discarded.
    pub fn send(&self, event: RadioEvent) {
        if self.tx.send(ManagerEvent::Radio(event)).is_err() {
            trace!("Sensor manager gone, dropping radio event");
        }
    }
}

/// Non-blocking interface to the platform BLE stack.
///
/// Every method returns immediately. Requests that complete later report
/// their outcome through the [`RadioEventSender`] the driver was built with.
#[cfg_attr(test, mockall::automock)]
pub trait RadioDriver: Send {
    /// Whether the platform exposes BLE at all.
    fn is_supported(&self) -> bool;

    /// Whether the adapter exists and is powered on.
    fn is_enabled(&self) -> bool;

    /// Start a scan reporting only advertisements whose local name equals `name`.
    fn start_scan(&mut self, name: &str) -> std::result::Result<(), ScanFailureCode>;

    /// Stop the active scan, if any.
    fn stop_scan(&mut self);

    /// Request a link to `address`. Reports `Connected` or `ConnectFailed`.
    fn connect(&mut self, address: &DeviceAddress);

    /// Request service discovery on the current link. Reports `ServicesDiscovered`.
    fn discover_services(&mut self);

    /// Enable or disable local delivery of notifications for a characteristic.
    fn set_characteristic_notification(
        &mut self,
        target: CharacteristicRef,
        enable: bool,
    ) -> std::result::Result<(), String>;

    /// Write a descriptor value. Reports `DescriptorWritten`.
    fn write_descriptor(&mut self, target: CharacteristicRef, descriptor: Uuid, value: &[u8]);

    /// Request an orderly disconnect. Reports `Disconnected` when done.
    fn disconnect(&mut self);

    /// Release the connection handle immediately. Idempotent, reports nothing.
    fn close(&mut self);
}
