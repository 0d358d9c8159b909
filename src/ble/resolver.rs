//! Service and characteristic resolution.
//!
//! Locates the temperature characteristic in the discovered GATT database
//! and checks it can be subscribed to before any write is issued.

use tracing::debug;
use uuid::Uuid;

use crate::ble::radio::{CharacteristicRef, GattService};
use crate::ble::uuids::CLIENT_CHARACTERISTIC_CONFIG_UUID;
use crate::error::{Error, Result};

/// Find `characteristic` inside `service` and verify it supports notifications
/// through a client characteristic configuration descriptor.
pub fn resolve_target(
    services: &[GattService],
    service: &Uuid,
    characteristic: &Uuid,
) -> Result<CharacteristicRef> {
    debug!("Resolving {} in {} discovered services", characteristic, services.len());

    let found_service = services
        .iter()
        .find(|s| s.uuid == *service)
        .ok_or_else(|| Error::ServiceNotFound {
            uuid: service.to_string(),
        })?;

    let found = found_service
        .characteristic(characteristic)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: characteristic.to_string(),
        })?;

    if !found.notifiable {
        return Err(Error::SubscriptionFailed {
            reason: format!("characteristic {} does not support notifications", characteristic),
        });
    }

    if !found.descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIG_UUID) {
        return Err(Error::DescriptorNotFound {
            uuid: CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
        });
    }

    Ok(CharacteristicRef {
        service: *service,
        characteristic: *characteristic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::radio::GattCharacteristic;
    use crate::ble::uuids::{TEMPERATURE_CHARACTERISTIC_UUID, TEMPERATURE_SERVICE_UUID};

    fn services(notifiable: bool, descriptors: Vec<Uuid>) -> Vec<GattService> {
        vec![
            GattService {
                uuid: Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb),
                characteristics: vec![],
            },
            GattService {
                uuid: TEMPERATURE_SERVICE_UUID,
                characteristics: vec![GattCharacteristic {
                    uuid: TEMPERATURE_CHARACTERISTIC_UUID,
                    notifiable,
                    descriptors,
                }],
            },
        ]
    }

    #[test]
    fn test_resolve_success() {
        let db = services(true, vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        let target = resolve_target(
            &db,
            &TEMPERATURE_SERVICE_UUID,
            &TEMPERATURE_CHARACTERISTIC_UUID,
        )
        .unwrap();
        assert_eq!(target.service, TEMPERATURE_SERVICE_UUID);
        assert_eq!(target.characteristic, TEMPERATURE_CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_missing_service() {
        let db = services(true, vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        let err = resolve_target(&db, &Uuid::from_u128(7), &TEMPERATURE_CHARACTERISTIC_UUID)
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound { .. }));
    }

    #[test]
    fn test_missing_characteristic() {
        let db = services(true, vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        let err = resolve_target(&db, &TEMPERATURE_SERVICE_UUID, &Uuid::from_u128(7)).unwrap_err();
        assert!(matches!(err, Error::CharacteristicNotFound { .. }));
    }

    #[test]
    fn test_not_notifiable() {
        let db = services(false, vec![CLIENT_CHARACTERISTIC_CONFIG_UUID]);
        let err = resolve_target(
            &db,
            &TEMPERATURE_SERVICE_UUID,
            &TEMPERATURE_CHARACTERISTIC_UUID,
        )
        .unwrap_err();
        assert!(matches!(err, Error::SubscriptionFailed { .. }));
    }

    #[test]
    fn test_missing_cccd() {
        let db = services(true, vec![]);
        let err = resolve_target(
            &db,
            &TEMPERATURE_SERVICE_UUID,
            &TEMPERATURE_CHARACTERISTIC_UUID,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DescriptorNotFound { .. }));
    }
}
