//! Sensor manager: the single-peripheral BLE connection state machine.
//!
//! One [`SensorManager`] owns the radio driver, the scan session, the
//! connection state and the latest reading. It reacts to [`ManagerEvent`]s
//! drained from a single queue, so every handler sees a consistent state and
//! never waits on the radio. Requests go out through [`RadioDriver`];
//! outcomes, timer firings and caller commands all come back through the
//! same queue.
//!
//! ```text
//! start_scan ─► Scanner ─► advertisement ─► Connecting ─► link up ─► discover
//!                                               ▲                       │
//!                         reconnect (bounded) ──┤                 resolve + CCCD
//!                                               │                       ▼
//!                                   link lost ◄─┴──────────────────── Connected ─► readings
//! ```

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{AdapterStatus, EnableRequest, RadioEnabler};
use crate::ble::connection::{ConnectPhase, ConnectionState};
use crate::ble::radio::{
    CharacteristicRef, DeviceAddress, GattService, RadioDriver, RadioEvent, RadioEventSender,
};
use crate::ble::reconnect::ReconnectDecision;
use crate::ble::resolver::resolve_target;
use crate::ble::scanner::{matches_target, ScanFailureCode, ScanSessionId, Scanner};
use crate::ble::uuids::{CLIENT_CHARACTERISTIC_CONFIG_UUID, ENABLE_NOTIFICATION_VALUE};
use crate::config::ManagerConfig;
use crate::data::store::{spawn_persist, ReadingStore};
use crate::data::TemperatureReading;
use crate::error::{Error, Result};
use crate::listener::{MessageSink, StateChangeListener};
use crate::permissions::{missing_permissions, required_permissions, AllGranted, PermissionStatus};
use crate::protocol::decode_reading;

/// The sensor the manager is bound to once its advertisement was seen.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetDevice {
    /// Platform address used to (re)connect.
    pub address: DeviceAddress,
    /// Advertised name.
    pub display_name: String,
}

/// Read-only view of the manager, published after every handled event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManagerSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether a scan is active.
    pub scanning: bool,
    /// Reconnection attempts made since the last successful connect.
    pub attempts: u32,
    /// The bound sensor, if any.
    pub target: Option<TargetDevice>,
    /// Most recent validated reading.
    pub latest_reading: Option<TemperatureReading>,
}

/// Everything the manager's event loop reacts to.
pub enum ManagerEvent {
    /// Caller: start scanning for the sensor.
    StartScan,
    /// Caller: disconnect or stop scanning.
    Disconnect,
    /// Caller: force-release everything.
    Cleanup,
    /// Caller: replace or remove the state-change listener.
    SetListener(Option<Box<dyn StateChangeListener>>),
    /// Caller: end the session and stop the event loop.
    Shutdown,
    /// Radio driver callback.
    Radio(RadioEvent),
    /// Scan timeout fired.
    ScanTimeout(ScanSessionId),
    /// Reconnection delay elapsed.
    ReconnectDue(u64),
    /// Connection attempt timed out.
    ConnectTimeout(u64),
    /// Host finished the radio enable flow.
    EnableResult {
        /// The request being answered.
        request: EnableRequest,
        /// Whether the radio is now on.
        enabled: bool,
    },
}

impl fmt::Debug for ManagerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartScan => write!(f, "StartScan"),
            Self::Disconnect => write!(f, "Disconnect"),
            Self::Cleanup => write!(f, "Cleanup"),
            Self::SetListener(listener) => write!(f, "SetListener(present: {})", listener.is_some()),
            Self::Shutdown => write!(f, "Shutdown"),
            Self::Radio(event) => f.debug_tuple("Radio").field(event).finish(),
            Self::ScanTimeout(id) => f.debug_tuple("ScanTimeout").field(id).finish(),
            Self::ReconnectDue(token) => f.debug_tuple("ReconnectDue").field(token).finish(),
            Self::ConnectTimeout(token) => f.debug_tuple("ConnectTimeout").field(token).finish(),
            Self::EnableResult { request, enabled } => f
                .debug_struct("EnableResult")
                .field("request", request)
                .field("enabled", enabled)
                .finish(),
        }
    }
}

/// Sending half of the manager's event queue.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl EventQueue {
    /// Sender a [`RadioDriver`] uses to report its events.
    pub fn radio_sender(&self) -> RadioEventSender {
        RadioEventSender::new(self.tx.clone())
    }
}

/// Receiving half of the manager's event queue.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ManagerEvent>,
}

/// Create the event queue shared by a manager and its radio driver.
pub fn event_channel() -> (EventQueue, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventQueue { tx }, EventReceiver { rx })
}

/// Mutable state of the connection, kept in one record.
#[derive(Debug, Default)]
struct ManagerState {
    connection: ConnectionState,
    phase: Option<ConnectPhase>,
    target: Option<TargetDevice>,
    attempts: u32,
    latest: Option<TemperatureReading>,
    subscription: Option<CharacteristicRef>,
    /// Bumped whenever pending retry/timeout timers must be ignored.
    attempt_token: u64,
    pending_enable: Option<EnableRequest>,
    next_enable_id: u64,
}

/// Manages the connection to one temperature sensor.
pub struct SensorManager<R: RadioDriver> {
    radio: R,
    config: ManagerConfig,
    scanner: Scanner,
    state: ManagerState,
    listener: Option<Box<dyn StateChangeListener>>,
    sink: Option<Box<dyn MessageSink>>,
    permissions: Box<dyn PermissionStatus>,
    enabler: Option<Arc<dyn RadioEnabler>>,
    store: Option<Arc<dyn ReadingStore>>,
    queue: mpsc::UnboundedSender<ManagerEvent>,
    snapshot_tx: watch::Sender<ManagerSnapshot>,
    retry_timer: Option<JoinHandle<()>>,
    connect_timer: Option<JoinHandle<()>>,
    /// Delayed write of the latest reading; replaced by each newer reading.
    persist_task: Option<JoinHandle<()>>,
}

impl<R: RadioDriver> SensorManager<R> {
    /// Create a manager driving `radio`, posting timers to `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BleUnsupported`] if the platform has no BLE, or
    /// [`Error::InvalidParameter`] for an unusable configuration.
    pub fn new(radio: R, config: ManagerConfig, queue: &EventQueue) -> Result<Self> {
        if AdapterStatus::check(&radio) == AdapterStatus::Unsupported {
            error!("Bluetooth LE not supported on this device");
            return Err(Error::BleUnsupported);
        }
        config.validate()?;

        let (snapshot_tx, _) = watch::channel(ManagerSnapshot::default());

        Ok(Self {
            radio,
            config,
            scanner: Scanner::new(),
            state: ManagerState::default(),
            listener: None,
            sink: None,
            permissions: Box::new(AllGranted),
            enabler: None,
            store: None,
            queue: queue.tx.clone(),
            snapshot_tx,
            retry_timer: None,
            connect_timer: None,
            persist_task: None,
        })
    }

    /// Set the state-change listener.
    pub fn with_listener(mut self, listener: impl StateChangeListener + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Set the UI message sink.
    pub fn with_message_sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Set the source of granted permissions.
    pub fn with_permissions(mut self, permissions: impl PermissionStatus + 'static) -> Self {
        self.permissions = Box::new(permissions);
        self
    }

    /// Set the host flow used to turn the radio on.
    pub fn with_enabler(mut self, enabler: Arc<dyn RadioEnabler>) -> Self {
        self.enabler = Some(enabler);
        self
    }

    /// Set the persisted-reading sink.
    pub fn with_store(mut self, store: Arc<dyn ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    // === Caller operations ===

    /// Scan for the sensor and connect when found.
    ///
    /// No-op while scanning, connecting or connected.
    pub fn start_scan(&mut self) {
        self.begin_scan(true);
        self.publish();
    }

    /// Stop scanning or disconnect from the sensor. Never triggers a reconnect.
    pub fn disconnect(&mut self) {
        self.disconnect_inner();
        self.publish();
    }

    /// Release the connection handle, forget the sensor and reset the attempt counter.
    pub fn cleanup(&mut self) {
        self.cleanup_inner();
        self.publish();
    }

    /// Replace the listener; `None` removes it.
    pub fn set_listener(&mut self, listener: Option<Box<dyn StateChangeListener>>) {
        self.listener = listener;
    }

    // === Accessors ===

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.connection
    }

    /// Whether a scan is active.
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Reconnection attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.state.attempts
    }

    /// The bound sensor, if any.
    pub fn target(&self) -> Option<&TargetDevice> {
        self.state.target.as_ref()
    }

    /// Most recent validated reading.
    pub fn latest_reading(&self) -> Option<TemperatureReading> {
        self.state.latest
    }

    /// Configuration in use.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Snapshot of the observable state.
    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            state: self.state.connection,
            scanning: self.scanner.is_scanning(),
            attempts: self.state.attempts,
            target: self.state.target.clone(),
            latest_reading: self.state.latest,
        }
    }

    // === Event loop ===

    /// Handle one queued event. Returns `false` once the loop should stop.
    pub fn handle_event(&mut self, event: ManagerEvent) -> bool {
        trace!("Handling {:?}", event);

        match event {
            ManagerEvent::StartScan => self.begin_scan(true),
            ManagerEvent::Disconnect => self.disconnect_inner(),
            ManagerEvent::Cleanup => self.cleanup_inner(),
            ManagerEvent::SetListener(listener) => self.listener = listener,
            ManagerEvent::Shutdown => {
                info!("Shutting down sensor manager");
                self.disconnect_inner();
                self.listener = None;
                self.cleanup_inner();
                self.publish();
                return false;
            }
            ManagerEvent::Radio(event) => self.on_radio_event(event),
            ManagerEvent::ScanTimeout(id) => self.on_scan_timeout(id),
            ManagerEvent::ReconnectDue(token) => self.on_reconnect_due(token),
            ManagerEvent::ConnectTimeout(token) => self.on_connect_timeout(token),
            ManagerEvent::EnableResult { request, enabled } => {
                self.on_enable_result(request, enabled)
            }
        }

        self.publish();
        true
    }

    /// Drain `events` until shutdown.
    pub async fn run(mut self, mut events: EventReceiver) {
        info!("Sensor manager started");

        while let Some(event) = events.rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        debug!("Sensor manager event loop ended");
    }

    /// Run the manager on a new task and return a handle to it.
    pub fn spawn(self, events: EventReceiver) -> SensorManagerHandle
    where
        R: 'static,
    {
        self.publish();
        let handle = SensorManagerHandle {
            tx: self.queue.clone(),
            snapshot: self.snapshot_tx.subscribe(),
            _shutdown: Arc::new(ShutdownOnDrop(self.queue.clone())),
        };
        tokio::spawn(self.run(events));
        handle
    }

    // === Scanner ===

    fn begin_scan(&mut self, may_request_enable: bool) {
        if self.state.connection != ConnectionState::Disconnected || self.scanner.is_scanning() {
            debug!(
                "Scan requested while {} (scanning: {}), ignoring",
                self.state.connection,
                self.scanner.is_scanning()
            );
            return;
        }

        if self.state.pending_enable.is_some() {
            debug!("Scan requested while waiting for Bluetooth to turn on, ignoring");
            return;
        }

        let required = required_permissions(self.config.platform);
        let missing = missing_permissions(required, &self.permissions.granted());
        if !missing.is_empty() {
            self.report_error(Error::PermissionsRequired { missing });
            return;
        }

        match AdapterStatus::check(&self.radio) {
            AdapterStatus::Ready => {}
            AdapterStatus::Unsupported => {
                self.report_error(Error::BleUnsupported);
                return;
            }
            AdapterStatus::PoweredOff => {
                self.report_error(Error::BluetoothDisabled);
                if may_request_enable {
                    self.request_enable();
                }
                return;
            }
        }

        if let Err(code) = self.radio.start_scan(&self.config.target_name) {
            self.on_scan_failed(code);
            return;
        }

        let id = self.scanner.next_session_id();
        let timeout = self.schedule(self.config.scan_timeout, ManagerEvent::ScanTimeout(id));
        self.scanner.begin(id, timeout);

        info!(
            "Scanning for '{}' (timeout {:?})",
            self.config.target_name, self.config.scan_timeout
        );
        self.notify(|l| l.on_scan_started());
        self.show("Scanning for temperature sensor...", false);
    }

    /// Stop the active scan. Returns whether one was active.
    fn end_scan(&mut self) -> bool {
        if self.scanner.finish().is_none() {
            return false;
        }
        self.radio.stop_scan();
        self.notify(|l| l.on_scan_stopped());
        true
    }

    fn on_scan_failed(&mut self, code: ScanFailureCode) {
        warn!("Scan failed: {} (code {})", code, code.code());
        self.scanner.finish();
        self.notify(|l| l.on_scan_failed(code));
        self.show(&Error::ScanFailed { code }.to_string(), true);
    }

    fn on_scan_timeout(&mut self, id: ScanSessionId) {
        if self.scanner.finish_if_current(id).is_none() {
            return;
        }

        info!("Scan timed out without finding '{}'", self.config.target_name);
        self.radio.stop_scan();
        self.notify(|l| l.on_scan_stopped());
        self.report_error(Error::DeviceNotFound {
            name: self.config.target_name.clone(),
        });
    }

    fn on_advertisement(&mut self, address: DeviceAddress, name: Option<String>, rssi: Option<i16>) {
        if !self.scanner.is_scanning() {
            trace!("Advertisement from {} outside of a scan, ignoring", address);
            return;
        }

        if !matches_target(name.as_deref(), &self.config.target_name) {
            trace!("Ignoring advertisement from {} ({:?})", address, name);
            return;
        }

        info!("Found '{}' at {} (rssi: {:?})", self.config.target_name, address, rssi);

        self.end_scan();
        let display_name = name.unwrap_or_else(|| self.config.target_name.clone());
        self.show(&format!("Found {}, connecting...", display_name), false);
        self.state.target = Some(TargetDevice {
            address,
            display_name,
        });
        self.begin_attempt();
    }

    // === Adapter gate ===

    fn request_enable(&mut self) {
        let Some(enabler) = self.enabler.clone() else {
            debug!("No radio enabler configured");
            return;
        };

        self.state.next_enable_id += 1;
        let request = EnableRequest::new(self.state.next_enable_id);
        self.state.pending_enable = Some(request);

        info!("Requesting Bluetooth enable ({})", request);
        self.show("Enabling Bluetooth...", false);

        let queue = self.queue.clone();
        tokio::spawn(async move {
            let enabled = enabler.request_enable(request).await;
            let _ = queue.send(ManagerEvent::EnableResult { request, enabled });
        });
    }

    fn on_enable_result(&mut self, request: EnableRequest, enabled: bool) {
        if self.state.pending_enable != Some(request) {
            debug!("Ignoring result for stale {}", request);
            return;
        }
        self.state.pending_enable = None;

        if enabled {
            info!("Bluetooth enabled, resuming scan");
            self.begin_scan(false);
        } else {
            warn!("Bluetooth enable request declined");
            self.report_error(Error::EnableDeclined);
        }
    }

    // === Connection state machine ===

    fn on_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::Advertisement {
                address,
                name,
                rssi,
            } => self.on_advertisement(address, name, rssi),
            RadioEvent::ScanFailed(code) => {
                if self.scanner.is_scanning() {
                    self.on_scan_failed(code);
                } else {
                    debug!("Scan failure {} reported outside of a scan, ignoring", code);
                }
            }
            RadioEvent::Connected(address) => self.on_link_up(address),
            RadioEvent::ConnectFailed { address, reason } => self.on_connect_failed(address, reason),
            RadioEvent::Disconnected(address) => self.on_link_down(address),
            RadioEvent::ServicesDiscovered(result) => self.on_services_discovered(result),
            RadioEvent::DescriptorWritten {
                target,
                descriptor,
                result,
            } => self.on_descriptor_written(target, descriptor, result),
            RadioEvent::Notification {
                characteristic,
                value,
            } => self.on_notification(characteristic, &value),
            RadioEvent::AdapterPowered(powered) => self.on_adapter_powered(powered),
        }
    }

    fn begin_attempt(&mut self) {
        let Some(target) = self.state.target.clone() else {
            warn!("Connection attempt without a target device");
            self.cleanup_inner();
            return;
        };

        self.invalidate_timers();
        self.transition(ConnectionState::Connecting);
        self.state.phase = Some(ConnectPhase::Linking);

        debug!("Connecting to {}", target.address);
        self.radio.connect(&target.address);

        if let Some(timeout) = self.config.connect_timeout {
            let token = self.state.attempt_token;
            self.connect_timer = Some(self.schedule(timeout, ManagerEvent::ConnectTimeout(token)));
        }
    }

    fn is_target(&self, address: &DeviceAddress) -> bool {
        self.state
            .target
            .as_ref()
            .is_some_and(|t| t.address == *address)
    }

    fn in_phase(&self, phase: ConnectPhase) -> bool {
        self.state.connection == ConnectionState::Connecting && self.state.phase == Some(phase)
    }

    fn on_link_up(&mut self, address: DeviceAddress) {
        if !self.is_target(&address) || !self.in_phase(ConnectPhase::Linking) {
            debug!(
                "Unexpected link to {} while {} ({:?})",
                address, self.state.connection, self.state.phase
            );
            if self.state.connection == ConnectionState::Disconnected {
                self.radio.close();
            }
            return;
        }

        debug!("Link to {} up, discovering services", address);
        self.state.phase = Some(ConnectPhase::Discovering);
        self.radio.discover_services();
    }

    fn on_connect_failed(&mut self, address: DeviceAddress, reason: String) {
        if !self.is_target(&address) || !self.in_phase(ConnectPhase::Linking) {
            trace!("Ignoring connect failure for {}: {}", address, reason);
            return;
        }
        self.fail_attempt(Error::ConnectionFailed { reason });
    }

    fn on_services_discovered(&mut self, result: std::result::Result<Vec<GattService>, String>) {
        if !self.in_phase(ConnectPhase::Discovering) {
            trace!("Ignoring service discovery result while {}", self.state.connection);
            return;
        }

        let services = match result {
            Ok(services) => services,
            Err(reason) => {
                self.fail_attempt(Error::ConnectionFailed {
                    reason: format!("service discovery failed: {}", reason),
                });
                return;
            }
        };

        let target = match resolve_target(
            &services,
            &self.config.service_uuid,
            &self.config.characteristic_uuid,
        ) {
            Ok(target) => target,
            Err(e) => {
                self.fail_attempt(e);
                return;
            }
        };

        if let Err(reason) = self.radio.set_characteristic_notification(target, true) {
            self.fail_attempt(Error::SubscriptionFailed { reason });
            return;
        }

        debug!("Enabling notifications on {}", target.characteristic);
        self.state.subscription = Some(target);
        self.state.phase = Some(ConnectPhase::Subscribing);
        self.radio.write_descriptor(
            target,
            CLIENT_CHARACTERISTIC_CONFIG_UUID,
            &ENABLE_NOTIFICATION_VALUE,
        );
    }

    fn on_descriptor_written(
        &mut self,
        target: CharacteristicRef,
        descriptor: Uuid,
        result: std::result::Result<(), String>,
    ) {
        if !self.in_phase(ConnectPhase::Subscribing)
            || self.state.subscription != Some(target)
            || descriptor != CLIENT_CHARACTERISTIC_CONFIG_UUID
        {
            trace!("Ignoring descriptor write result for {}", descriptor);
            return;
        }

        if let Err(reason) = result {
            self.fail_attempt(Error::SubscriptionFailed { reason });
            return;
        }

        self.cancel_connect_timer();
        self.state.attempts = 0;
        self.transition(ConnectionState::Connected);

        let Some(device) = self.state.target.clone() else {
            return;
        };
        info!("Connected to {} ({})", device.display_name, device.address);
        self.notify(|l| l.on_device_connected(&device.address));
        self.show(&format!("Connected to {}", device.display_name), false);
    }

    fn on_link_down(&mut self, address: DeviceAddress) {
        if !self.is_target(&address) {
            trace!("Ignoring disconnect from unknown device {}", address);
            return;
        }

        match (self.state.connection, self.state.phase) {
            (ConnectionState::Connected, _) => {
                warn!("Connection to {} lost", address);
                self.release_link();
                self.transition(ConnectionState::Disconnected);
                self.show("Device disconnected", true);
                self.apply_reconnect_policy();
            }
            (ConnectionState::Disconnecting, _) => {
                info!("Disconnected from {}", address);
                self.release_link();
                self.state.attempts = 0;
                self.transition(ConnectionState::Disconnected);
                let name = self.target_name();
                self.show(&format!("Disconnected from {}", name), false);
            }
            (ConnectionState::Connecting, Some(phase)) if phase.has_link() => {
                self.fail_attempt(Error::ConnectionFailed {
                    reason: "link lost during setup".to_string(),
                });
            }
            (state, phase) => {
                trace!("Ignoring disconnect from {} while {} ({:?})", address, state, phase);
            }
        }
    }

    fn on_connect_timeout(&mut self, token: u64) {
        if token != self.state.attempt_token
            || self.state.connection != ConnectionState::Connecting
            || !self.state.phase.is_some_and(|p| p.has_link())
        {
            trace!("Ignoring stale connect timeout");
            return;
        }

        let timeout = self.config.connect_timeout.unwrap_or_default();
        self.fail_attempt(Error::ConnectionFailed {
            reason: format!("no response within {:?}", timeout),
        });
    }

    /// A connection attempt failed: tear the link down and let the policy decide.
    fn fail_attempt(&mut self, error: Error) {
        warn!("Connection attempt failed: {}", error);
        self.release_link();
        self.report_error(error);
        self.apply_reconnect_policy();
    }

    fn apply_reconnect_policy(&mut self) {
        match self.config.reconnect.evaluate(self.state.attempts) {
            ReconnectDecision::Retry { attempt, delay } => {
                self.state.attempts = attempt;
                self.invalidate_timers();
                self.transition(ConnectionState::Connecting);
                self.state.phase = Some(ConnectPhase::AwaitingRetry);

                info!(
                    "Reconnecting in {:?} (attempt {} of {})",
                    delay, attempt, self.config.reconnect.max_attempts
                );
                self.notify(|l| l.on_connection_attempt(attempt));
                self.show(
                    &format!(
                        "Connection attempt {} of {}",
                        attempt, self.config.reconnect.max_attempts
                    ),
                    false,
                );

                let token = self.state.attempt_token;
                self.retry_timer = Some(self.schedule(delay, ManagerEvent::ReconnectDue(token)));
            }
            ReconnectDecision::GiveUp { attempts } => {
                error!("Giving up after {} connection attempts", attempts);
                self.cleanup_inner();
                self.report_error(Error::MaxAttemptsReached { attempts });
            }
        }
    }

    fn on_reconnect_due(&mut self, token: u64) {
        if token != self.state.attempt_token || !self.in_phase(ConnectPhase::AwaitingRetry) {
            trace!("Ignoring stale reconnect timer");
            return;
        }
        self.retry_timer = None;
        self.begin_attempt();
    }

    fn on_adapter_powered(&mut self, powered: bool) {
        if powered {
            debug!("Adapter powered on");
            return;
        }

        let active = self.scanner.is_scanning()
            || self.state.connection != ConnectionState::Disconnected;
        if active {
            warn!("Adapter powered off while {}", self.state.connection);
            self.cleanup_inner();
            self.report_error(Error::BluetoothTurnedOff);
        }
    }

    fn disconnect_inner(&mut self) {
        if let Some(request) = self.state.pending_enable.take() {
            debug!("Dropping scan suspended on {}", request);
        }
        self.end_scan();

        match self.state.connection {
            ConnectionState::Connected => {
                info!("Disconnecting from sensor");
                if let Some(subscription) = self.state.subscription {
                    if let Err(e) = self.radio.set_characteristic_notification(subscription, false) {
                        debug!("Failed to disable notifications: {}", e);
                    }
                }
                self.transition(ConnectionState::Disconnecting);
                self.show("Disconnecting...", false);
                self.radio.disconnect();
            }
            ConnectionState::Connecting => {
                info!("Cancelling connection attempt");
                self.invalidate_timers();
                self.release_link();
                self.state.attempts = 0;
                self.transition(ConnectionState::Disconnected);
                self.show("Connection cancelled", false);
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {
                trace!("Disconnect requested while {}", self.state.connection);
            }
        }
    }

    fn cleanup_inner(&mut self) {
        debug!("Cleaning up sensor connection");
        self.end_scan();
        self.invalidate_timers();
        self.cancel_persist();
        self.radio.close();

        self.state.pending_enable = None;
        self.state.subscription = None;
        self.state.target = None;
        self.state.attempts = 0;
        if self.state.connection != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnected);
            self.show("Disconnected", false);
        }
    }

    // === Reading decoder ===

    fn on_notification(&mut self, characteristic: Uuid, value: &[u8]) {
        if self.state.connection != ConnectionState::Connected {
            trace!("Dropping notification while {}", self.state.connection);
            return;
        }

        if characteristic != self.config.characteristic_uuid {
            trace!("Ignoring notification from {}", characteristic);
            return;
        }

        match decode_reading(value, self.config.payload_format, Utc::now()) {
            Ok(reading) => {
                debug!("Temperature: {:.2}°C", reading.celsius());
                self.state.latest = Some(reading);
                self.notify(|l| l.on_temperature_update(reading.celsius()));
                self.show(&format!("Temperature: {}°C", reading.celsius()), false);

                if let (Some(store), Some(delay)) = (self.store.clone(), self.config.persist_delay) {
                    self.cancel_persist();
                    self.persist_task = Some(spawn_persist(store, reading, delay));
                }
            }
            Err(e) => {
                debug!("Rejected payload {:02X?}: {}", value, e);
                self.report_error(e);
            }
        }
    }

    // === Helpers ===

    fn transition(&mut self, new_state: ConnectionState) {
        let old_state = self.state.connection;
        if old_state == new_state {
            return;
        }

        debug!("Connection state changed: {} -> {}", old_state, new_state);
        self.state.connection = new_state;

        if new_state != ConnectionState::Connecting {
            self.state.phase = None;
        }
        if new_state == ConnectionState::Disconnected {
            self.notify(|l| l.on_device_disconnected());
        }
    }

    /// Release the low-level link and forget the subscription.
    fn release_link(&mut self) {
        self.cancel_connect_timer();
        self.state.subscription = None;
        self.radio.close();
    }

    /// Make any armed retry or connect timer a no-op.
    fn invalidate_timers(&mut self) {
        self.state.attempt_token += 1;
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.cancel_connect_timer();
    }

    fn cancel_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
    }

    fn cancel_persist(&mut self) {
        if let Some(task) = self.persist_task.take() {
            task.abort();
        }
    }

    fn schedule(&self, delay: Duration, event: ManagerEvent) -> JoinHandle<()> {
        let queue = self.queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = queue.send(event);
        })
    }

    fn target_name(&self) -> String {
        self.state
            .target
            .as_ref()
            .map(|t| t.display_name.clone())
            .unwrap_or_else(|| self.config.target_name.clone())
    }

    fn notify(&mut self, f: impl FnOnce(&mut dyn StateChangeListener)) {
        if let Some(listener) = self.listener.as_deref_mut() {
            f(listener);
        }
    }

    fn show(&mut self, message: &str, is_error: bool) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.show(message, is_error);
        }
    }

    fn report_error(&mut self, error: Error) {
        let message = error.to_string();
        let critical = error.is_critical();
        if critical {
            error!("{}", message);
        } else {
            warn!("{}", message);
        }
        self.notify(|l| l.on_error(&message, critical));
        self.show(&message, true);
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}

impl<R: RadioDriver> Drop for SensorManager<R> {
    fn drop(&mut self) {
        if self.scanner.finish().is_some() {
            self.radio.stop_scan();
        }
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        self.cancel_connect_timer();
        self.cancel_persist();
        self.radio.close();
    }
}

/// Stops the manager task once the last handle is dropped.
#[derive(Debug)]
struct ShutdownOnDrop(mpsc::UnboundedSender<ManagerEvent>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        let _ = self.0.send(ManagerEvent::Shutdown);
    }
}

/// Handle to a manager running on its own task.
///
/// Dropping every clone shuts the manager down.
#[derive(Debug, Clone)]
pub struct SensorManagerHandle {
    tx: mpsc::UnboundedSender<ManagerEvent>,
    snapshot: watch::Receiver<ManagerSnapshot>,
    _shutdown: Arc<ShutdownOnDrop>,
}

impl SensorManagerHandle {
    fn send(&self, event: ManagerEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::ManagerStopped)
    }

    /// Scan for the sensor and connect when found.
    pub fn start_scan(&self) -> Result<()> {
        self.send(ManagerEvent::StartScan)
    }

    /// Stop scanning or disconnect.
    pub fn disconnect(&self) -> Result<()> {
        self.send(ManagerEvent::Disconnect)
    }

    /// Force-release the connection and forget the sensor.
    pub fn cleanup(&self) -> Result<()> {
        self.send(ManagerEvent::Cleanup)
    }

    /// Replace the listener; `None` removes it.
    pub fn set_listener(&self, listener: Option<Box<dyn StateChangeListener>>) -> Result<()> {
        self.send(ManagerEvent::SetListener(listener))
    }

    /// Disconnect, drop the listener and stop the manager task.
    pub fn shutdown(&self) -> Result<()> {
        self.send(ManagerEvent::Shutdown)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> ManagerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// Most recent validated reading.
    pub fn latest_reading(&self) -> Option<TemperatureReading> {
        self.snapshot.borrow().latest_reading
    }

    /// Receiver notified on every snapshot change.
    pub fn subscribe(&self) -> watch::Receiver<ManagerSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the manager reaches `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManagerStopped`] if the manager goes away first.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<()> {
        let mut rx = self.snapshot.clone();
        loop {
            if rx.borrow_and_update().state == state {
                return Ok(());
            }
            rx.changed().await.map_err(|_| Error::ManagerStopped)?;
        }
    }
}
