//! Sensor manager configuration.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::reconnect::ReconnectPolicy;
use crate::ble::uuids::{
    TARGET_DEVICE_NAME, TEMPERATURE_CHARACTERISTIC_UUID, TEMPERATURE_SERVICE_UUID,
};
use crate::error::{Error, Result};
use crate::permissions::Platform;
use crate::protocol::PayloadFormat;

/// Default scan timeout.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// Default delay before handing a reading to the persisted-reading sink.
pub const DEFAULT_PERSIST_DELAY: Duration = Duration::from_secs(2);

/// Tunables for a [`SensorManager`](crate::SensorManager).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagerConfig {
    /// Advertised local name of the sensor.
    pub target_name: String,
    /// Temperature service UUID.
    pub service_uuid: Uuid,
    /// Temperature characteristic UUID.
    pub characteristic_uuid: Uuid,
    /// How the characteristic value is encoded.
    pub payload_format: PayloadFormat,
    /// How long to scan before reporting the device as not found.
    pub scan_timeout: Duration,
    /// Optional bound on a single connection attempt.
    pub connect_timeout: Option<Duration>,
    /// Reconnection bound and delay.
    pub reconnect: ReconnectPolicy,
    /// Delay before persisting an accepted reading; `None` disables persistence.
    pub persist_delay: Option<Duration>,
    /// Platform used to compute required permissions.
    pub platform: Platform,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            target_name: TARGET_DEVICE_NAME.to_string(),
            service_uuid: TEMPERATURE_SERVICE_UUID,
            characteristic_uuid: TEMPERATURE_CHARACTERISTIC_UUID,
            payload_format: PayloadFormat::default(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: None,
            reconnect: ReconnectPolicy::default(),
            persist_delay: Some(DEFAULT_PERSIST_DELAY),
            platform: Platform::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the advertised name to look for.
    pub fn with_target_name(mut self, name: impl Into<String>) -> Self {
        self.target_name = name.into();
        self
    }

    /// Set the service and characteristic UUIDs.
    pub fn with_characteristic(mut self, service: Uuid, characteristic: Uuid) -> Self {
        self.service_uuid = service;
        self.characteristic_uuid = characteristic;
        self
    }

    /// Set the payload encoding.
    pub fn with_payload_format(mut self, format: PayloadFormat) -> Self {
        self.payload_format = format;
        self
    }

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Bound each connection attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the reconnection parameters.
    pub fn with_reconnect(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.reconnect = ReconnectPolicy::new(max_attempts, delay);
        self
    }

    /// Set or disable the persistence delay.
    pub fn with_persist_delay(mut self, delay: Option<Duration>) -> Self {
        self.persist_delay = delay;
        self
    }

    /// Set the platform for permission checks.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Check the configuration for values the manager cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.target_name.is_empty() {
            return Err(Error::InvalidParameter {
                name: "target_name".to_string(),
                value: String::new(),
            });
        }

        if self.scan_timeout.is_zero() {
            return Err(Error::InvalidParameter {
                name: "scan_timeout".to_string(),
                value: format!("{:?}", self.scan_timeout),
            });
        }

        if let Some(timeout) = self.connect_timeout {
            if timeout.is_zero() {
                return Err(Error::InvalidParameter {
                    name: "connect_timeout".to_string(),
                    value: format!("{:?}", timeout),
                });
            }
        }

        Ok(())
    }
}
