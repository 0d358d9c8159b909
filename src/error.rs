//! Error types for the thermo-sensor-ble crate.
//!
//! Inside the sensor manager every variant is turned into a listener event;
//! its `Display` text is the message shown to the user.

use thiserror::Error;

use crate::ble::scanner::ScanFailureCode;
use crate::permissions::Permission;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The platform has no Bluetooth Low Energy support at all.
    #[error("Bluetooth LE not supported on this device")]
    BleUnsupported,

    /// Required runtime permissions have not been granted.
    #[error("Bluetooth permissions required: {}", format_permissions(.missing))]
    PermissionsRequired {
        /// The permissions still missing.
        missing: Vec<Permission>,
    },

    /// The radio adapter exists but is powered off.
    #[error("Bluetooth is disabled")]
    BluetoothDisabled,

    /// The user declined to turn the radio on.
    #[error("Bluetooth is required for this feature")]
    EnableDeclined,

    /// The radio was switched off while in use.
    #[error("Bluetooth was turned off")]
    BluetoothTurnedOff,

    /// The scan could not be started.
    #[error("Failed to scan for device: {code}")]
    ScanFailed {
        /// Reason reported by the radio stack.
        code: ScanFailureCode,
    },

    /// The scan timed out without seeing the target advertisement.
    #[error("Device '{name}' not found")]
    DeviceNotFound {
        /// The advertised name that was searched for.
        name: String,
    },

    /// Failed to establish a connection to the sensor.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The reconnection bound was exhausted.
    #[error("Failed to connect after {attempts} attempts")]
    MaxAttemptsReached {
        /// Number of attempts that were made.
        attempts: u32,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The client characteristic configuration descriptor is missing.
    #[error("Descriptor not found: {uuid}")]
    DescriptorNotFound {
        /// The UUID of the descriptor that was not found.
        uuid: String,
    },

    /// Enabling notifications or writing the descriptor failed.
    #[error("Failed to enable notifications: {reason}")]
    SubscriptionFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Invalid data was received from the sensor.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// A decoded temperature lies outside the accepted range.
    #[error("Temperature {value:.2}°C outside valid range {min:.1}..={max:.1}")]
    OutOfRange {
        /// The decoded value.
        value: f32,
        /// Lower bound (inclusive).
        min: f32,
        /// Upper bound (inclusive).
        max: f32,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// Filesystem error from a reading store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manager event loop is no longer running.
    #[error("Sensor manager stopped")]
    ManagerStopped,
}

impl Error {
    /// Whether the error ends the current session and needs the caller to act.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::BleUnsupported
                | Self::BluetoothDisabled
                | Self::BluetoothTurnedOff
                | Self::MaxAttemptsReached { .. }
        )
    }
}

fn format_permissions(permissions: &[Permission]) -> String {
    permissions
        .iter()
        .map(|p| p.identifier())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_classification() {
        assert!(Error::BluetoothDisabled.is_critical());
        assert!(Error::MaxAttemptsReached { attempts: 3 }.is_critical());
        assert!(!Error::EnableDeclined.is_critical());
        assert!(!Error::DeviceNotFound {
            name: "ESP32-Thermo".to_string()
        }
        .is_critical());
        assert!(!Error::OutOfRange {
            value: 50.0,
            min: 20.0,
            max: 45.0
        }
        .is_critical());
    }

    #[test]
    fn test_messages() {
        assert!(Error::BluetoothDisabled.to_string().contains("disabled"));

        let err = Error::PermissionsRequired {
            missing: vec![Permission::BluetoothScan, Permission::BluetoothConnect],
        };
        assert_eq!(
            err.to_string(),
            "Bluetooth permissions required: android.permission.BLUETOOTH_SCAN, android.permission.BLUETOOTH_CONNECT"
        );

        let err = Error::ScanFailed {
            code: ScanFailureCode::AlreadyStarted,
        };
        assert!(err.to_string().contains("already started"));
    }
}
