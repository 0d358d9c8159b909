//! [`RadioDriver`] backed by btleplug.
//!
//! btleplug is async; the manager expects non-blocking calls. Every request
//! here spawns a task that performs the btleplug operation and reports the
//! outcome through the [`RadioEventSender`].

use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::radio::{
    CharacteristicRef, DeviceAddress, GattCharacteristic, GattService, RadioDriver, RadioEvent,
    RadioEventSender,
};
use crate::ble::scanner::{matches_target, ScanFailureCode};
use crate::ble::uuids::{
    is_temperature_service, CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE,
};
use crate::error::{Error, Result};

/// The single peripheral link the driver holds.
struct Link {
    address: DeviceAddress,
    peripheral: Peripheral,
    generation: u64,
    /// Characteristics whose notifications are forwarded.
    forwarded: Arc<RwLock<HashSet<Uuid>>>,
    notification_task: Option<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(task) = self.notification_task.take() {
            task.abort();
        }
    }
}

/// State shared between the driver and its tasks.
struct Shared {
    events: RadioEventSender,
    powered: AtomicBool,
    /// Name filter of the active scan.
    scan_name: RwLock<Option<String>>,
    /// Peripheral ids seen while scanning, by address.
    known: RwLock<HashMap<DeviceAddress, PeripheralId>>,
    link: RwLock<Option<Link>>,
    /// Bumped on every new link and on close; stale tasks stay silent.
    generation: AtomicU64,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Report `event` only if the link it belongs to is still current.
    fn send_for(&self, generation: u64, event: RadioEvent) {
        if self.is_current(generation) {
            self.events.send(event);
        } else {
            trace!("Dropping event from released link: {:?}", event);
        }
    }

    fn peripheral(&self) -> Option<(Peripheral, u64)> {
        self.link
            .read()
            .as_ref()
            .map(|link| (link.peripheral.clone(), link.generation))
    }
}

/// BLE radio driver using the first system adapter.
pub struct BtleplugRadio {
    adapter: Adapter,
    shared: Arc<Shared>,
    event_task: JoinHandle<()>,
}

impl BtleplugRadio {
    /// Open the first Bluetooth adapter and start watching its events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BleUnsupported`] if no adapter is available.
    pub async fn new(events: RadioEventSender) -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| {
            error!("Failed to open Bluetooth manager: {}", e);
            Error::BleUnsupported
        })?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BleUnsupported)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter, events).await
    }

    /// Build a driver on a specific adapter.
    pub async fn with_adapter(adapter: Adapter, events: RadioEventSender) -> Result<Self> {
        let powered = match adapter.adapter_state().await {
            Ok(state) => !matches!(state, CentralState::PoweredOff),
            Err(e) => {
                warn!("Could not read adapter state, assuming powered: {}", e);
                true
            }
        };

        let central_events = adapter.events().await?;

        let shared = Arc::new(Shared {
            events,
            powered: AtomicBool::new(powered),
            scan_name: RwLock::new(None),
            known: RwLock::new(HashMap::new()),
            link: RwLock::new(None),
            generation: AtomicU64::new(0),
        });

        let task_adapter = adapter.clone();
        let task_shared = shared.clone();
        let event_task = tokio::spawn(async move {
            let mut central_events = central_events;
            while let Some(event) = central_events.next().await {
                Self::handle_central_event(event, &task_adapter, &task_shared).await;
            }
            debug!("Adapter event stream ended");
        });

        Ok(Self {
            adapter,
            shared,
            event_task,
        })
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn handle_central_event(event: CentralEvent, adapter: &Adapter, shared: &Shared) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                Self::process_advertisement(adapter, id, shared).await;
            }
            CentralEvent::DeviceDisconnected(id) => {
                let lost = shared
                    .link
                    .read()
                    .as_ref()
                    .filter(|link| link.peripheral.id() == id)
                    .map(|link| (link.address.clone(), link.generation));

                if let Some((address, generation)) = lost {
                    debug!("Link to {} dropped", address);
                    shared.send_for(generation, RadioEvent::Disconnected(address));
                }
            }
            CentralEvent::StateUpdate(state) => {
                let powered = matches!(state, CentralState::PoweredOn);
                debug!("Adapter state: {:?}", state);
                if shared.powered.swap(powered, Ordering::SeqCst) != powered {
                    shared.events.send(RadioEvent::AdapterPowered(powered));
                }
            }
            _ => {}
        }
    }

    async fn process_advertisement(adapter: &Adapter, id: PeripheralId, shared: &Shared) {
        let Some(target) = shared.scan_name.read().clone() else {
            return;
        };

        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        if !matches_target(properties.local_name.as_deref(), &target) {
            return;
        }

        // The scan may have been stopped while properties were fetched.
        if shared.scan_name.read().is_none() {
            return;
        }

        let address = DeviceAddress::new(id.to_string());
        shared.known.write().insert(address.clone(), id);
        shared.events.send(RadioEvent::Advertisement {
            address,
            name: properties.local_name,
            rssi: properties.rssi,
        });
    }

    fn find_characteristic(peripheral: &Peripheral, target: CharacteristicRef) -> Option<Characteristic> {
        peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == target.service)
            .flat_map(|s| s.characteristics)
            .find(|c| c.uuid == target.characteristic)
    }

    fn start_notification_forwarding(link: &mut Link, shared: &Arc<Shared>) {
        if link.notification_task.is_some() {
            return;
        }

        let peripheral = link.peripheral.clone();
        let forwarded = link.forwarded.clone();
        let generation = link.generation;
        let shared = shared.clone();

        link.notification_task = Some(tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                if !forwarded.read().contains(&notification.uuid) {
                    continue;
                }
                trace!(
                    "Notification from {}: {:02X?}",
                    notification.uuid,
                    notification.value
                );
                shared.send_for(
                    generation,
                    RadioEvent::Notification {
                        characteristic: notification.uuid,
                        value: Bytes::from(notification.value),
                    },
                );
            }

            debug!("Notification stream ended");
        }));
    }
}

/// Map btleplug's service table into the driver-neutral form.
fn map_services(services: impl IntoIterator<Item = Service>) -> Vec<GattService> {
    services
        .into_iter()
        .map(|service| GattService {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .into_iter()
                .map(map_characteristic)
                .collect(),
        })
        .collect()
}

fn map_characteristic(characteristic: Characteristic) -> GattCharacteristic {
    let notifiable = characteristic
        .properties
        .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);

    let mut descriptors: Vec<Uuid> = characteristic.descriptors.iter().map(|d| d.uuid).collect();

    // Some backends never list the CCCD but manage it through subscribe().
    if notifiable && descriptors.is_empty() {
        descriptors.push(CLIENT_CHARACTERISTIC_CONFIG_UUID);
    }

    GattCharacteristic {
        uuid: characteristic.uuid,
        notifiable,
        descriptors,
    }
}

impl RadioDriver for BtleplugRadio {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.shared.powered.load(Ordering::SeqCst)
    }

    fn start_scan(&mut self, name: &str) -> std::result::Result<(), ScanFailureCode> {
        {
            let mut scan_name = self.shared.scan_name.write();
            if scan_name.is_some() {
                return Err(ScanFailureCode::AlreadyStarted);
            }
            *scan_name = Some(name.to_string());
        }

        info!("Starting BLE scan for '{}'", name);

        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                error!("Failed to start scan: {}", e);
                *shared.scan_name.write() = None;
                shared
                    .events
                    .send(RadioEvent::ScanFailed(ScanFailureCode::InternalError));
            }
        });

        Ok(())
    }

    fn stop_scan(&mut self) {
        if self.shared.scan_name.write().take().is_none() {
            return;
        }

        info!("Stopping BLE scan");
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Failed to stop scan: {}", e);
            }
        });
    }

    fn connect(&mut self, address: &DeviceAddress) {
        self.close();

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let id = self.shared.known.read().get(address).cloned();
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let address = address.clone();

        tokio::spawn(async move {
            let Some(id) = id else {
                shared.send_for(
                    generation,
                    RadioEvent::ConnectFailed {
                        address,
                        reason: "unknown peripheral".to_string(),
                    },
                );
                return;
            };

            let peripheral = match adapter.peripheral(&id).await {
                Ok(p) => p,
                Err(e) => {
                    shared.send_for(
                        generation,
                        RadioEvent::ConnectFailed {
                            address,
                            reason: e.to_string(),
                        },
                    );
                    return;
                }
            };

            if !shared.is_current(generation) {
                return;
            }
            *shared.link.write() = Some(Link {
                address: address.clone(),
                peripheral: peripheral.clone(),
                generation,
                forwarded: Arc::new(RwLock::new(HashSet::new())),
                notification_task: None,
            });

            debug!("Connecting to {}", address);
            let event = match peripheral.connect().await {
                Ok(()) => RadioEvent::Connected(address),
                Err(e) => {
                    warn!("Connect to {} failed: {}", address, e);
                    RadioEvent::ConnectFailed {
                        address,
                        reason: e.to_string(),
                    }
                }
            };
            shared.send_for(generation, event);
        });
    }

    fn discover_services(&mut self) {
        let Some((peripheral, generation)) = self.shared.peripheral() else {
            self.shared.events.send(RadioEvent::ServicesDiscovered(Err(
                "no connection".to_string(),
            )));
            return;
        };
        let shared = self.shared.clone();

        tokio::spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => {
                    let services = map_services(peripheral.services());
                    debug!(
                        "Discovered {} services (temperature service present: {})",
                        services.len(),
                        services.iter().any(|s| is_temperature_service(&s.uuid))
                    );
                    Ok(services)
                }
                Err(e) => Err(e.to_string()),
            };
            shared.send_for(generation, RadioEvent::ServicesDiscovered(result));
        });
    }

    fn set_characteristic_notification(
        &mut self,
        target: CharacteristicRef,
        enable: bool,
    ) -> std::result::Result<(), String> {
        let mut link = self.shared.link.write();
        let link = link.as_mut().ok_or_else(|| "no connection".to_string())?;

        if enable {
            link.forwarded.write().insert(target.characteristic);
            Self::start_notification_forwarding(link, &self.shared);
        } else {
            link.forwarded.write().remove(&target.characteristic);
        }
        Ok(())
    }

    fn write_descriptor(&mut self, target: CharacteristicRef, descriptor: Uuid, value: &[u8]) {
        let shared = self.shared.clone();
        let value = value.to_vec();

        let Some((peripheral, generation)) = self.shared.peripheral() else {
            shared.events.send(RadioEvent::DescriptorWritten {
                target,
                descriptor,
                result: Err("no connection".to_string()),
            });
            return;
        };

        tokio::spawn(async move {
            let result = match Self::find_characteristic(&peripheral, target) {
                None => Err(format!("characteristic {} not found", target.characteristic)),
                Some(characteristic) if descriptor == CLIENT_CHARACTERISTIC_CONFIG_UUID => {
                    let outcome = if value == ENABLE_NOTIFICATION_VALUE {
                        peripheral.subscribe(&characteristic).await
                    } else {
                        peripheral.unsubscribe(&characteristic).await
                    };
                    outcome.map_err(|e| e.to_string())
                }
                Some(characteristic) => match characteristic
                    .descriptors
                    .iter()
                    .find(|d| d.uuid == descriptor)
                {
                    Some(d) => peripheral
                        .write_descriptor(d, &value)
                        .await
                        .map_err(|e| e.to_string()),
                    None => Err(format!("descriptor {} not found", descriptor)),
                },
            };

            shared.send_for(
                generation,
                RadioEvent::DescriptorWritten {
                    target,
                    descriptor,
                    result,
                },
            );
        });
    }

    fn disconnect(&mut self) {
        let Some((peripheral, generation)) = self.shared.peripheral() else {
            return;
        };
        let shared = self.shared.clone();

        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Disconnect failed: {}", e);
            }

            let address = {
                let mut link = shared.link.write();
                match link.as_ref() {
                    Some(l) if l.generation == generation => link.take().map(|l| l.address.clone()),
                    _ => None,
                }
            };

            if let Some(address) = address {
                shared.send_for(generation, RadioEvent::Disconnected(address));
            }
        });
    }

    /// Release the link. No further events are reported for it.
    fn close(&mut self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);

        let Some(link) = self.shared.link.write().take() else {
            return;
        };

        debug!("Closing link to {}", link.address);
        let peripheral = link.peripheral.clone();
        drop(link);
        tokio::spawn(async move {
            if let Ok(true) = peripheral.is_connected().await {
                let _ = peripheral.disconnect().await;
            }
        });
    }
}

impl Drop for BtleplugRadio {
    fn drop(&mut self) {
        self.event_task.abort();
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.link.write().take();
    }
}
