//! BLE Service and Characteristic UUIDs.
//!
//! Wire protocol constants shared with the sensor firmware.

use uuid::Uuid;

// Temperature Service (sensor firmware custom)
/// Temperature service UUID advertised by the sensor.
pub const TEMPERATURE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x1234_5678_1234_1234_1234_1234567890ab);
/// Temperature characteristic UUID (Read, Notify).
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd_1234_ab12_cd34_ef56_abcdef123456);

// Client Characteristic Configuration (Standard BLE)
/// Standard Client Characteristic Configuration Descriptor UUID.
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Value written to the CCCD to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Advertised local name of the sensor.
pub const TARGET_DEVICE_NAME: &str = "ESP32-Thermo";

/// Check if a service UUID is the temperature service.
pub fn is_temperature_service(uuid: &Uuid) -> bool {
    *uuid == TEMPERATURE_SERVICE_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            TEMPERATURE_SERVICE_UUID.to_string(),
            "12345678-1234-1234-1234-1234567890ab"
        );
        assert_eq!(
            TEMPERATURE_CHARACTERISTIC_UUID.to_string(),
            "abcd1234-ab12-cd34-ef56-abcdef123456"
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_is_temperature_service() {
        assert!(is_temperature_service(&TEMPERATURE_SERVICE_UUID));
        assert!(!is_temperature_service(&CLIENT_CHARACTERISTIC_CONFIG_UUID));
    }
}
