//! Consumer-facing callbacks.
//!
//! A [`StateChangeListener`] receives structured events; a [`MessageSink`]
//! receives the same events as user-facing text. Both are called from the
//! manager's event loop and must not block.

use crate::ble::radio::DeviceAddress;
use crate::ble::scanner::ScanFailureCode;

/// Receives state changes from the sensor manager.
///
/// All methods default to no-ops so implementors only override what they need.
pub trait StateChangeListener: Send {
    /// A scan for the sensor started.
    fn on_scan_started(&mut self) {}

    /// The scan ended (device found, timeout, failure or stop).
    fn on_scan_stopped(&mut self) {}

    /// The scan could not be started or was aborted by the stack.
    fn on_scan_failed(&mut self, _code: ScanFailureCode) {}

    /// The sensor is connected and streaming.
    fn on_device_connected(&mut self, _address: &DeviceAddress) {}

    /// The link to the sensor is gone.
    fn on_device_disconnected(&mut self) {}

    /// A validated temperature arrived.
    fn on_temperature_update(&mut self, _celsius: f32) {}

    /// Reconnection attempt `attempt` was scheduled.
    fn on_connection_attempt(&mut self, _attempt: u32) {}

    /// Something went wrong. Critical errors end the session.
    fn on_error(&mut self, _message: &str, _is_critical: bool) {}
}

/// Sink for user-visible messages.
pub trait MessageSink: Send {
    /// Show `message`; `is_error` selects error styling.
    fn show(&mut self, message: &str, is_error: bool);
}

impl<F> MessageSink for F
where
    F: FnMut(&str, bool) + Send,
{
    fn show(&mut self, message: &str, is_error: bool) {
        self(message, is_error)
    }
}

/// Sink that forwards messages to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMessageSink;

impl MessageSink for TracingMessageSink {
    fn show(&mut self, message: &str, is_error: bool) {
        if is_error {
            tracing::error!("{}", message);
        } else {
            tracing::info!("{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;
    impl StateChangeListener for Silent {}

    #[test]
    fn test_default_methods_are_noops() {
        let mut listener = Silent;
        listener.on_scan_started();
        listener.on_temperature_update(36.6);
        listener.on_error("boom", true);
    }

    #[test]
    fn test_closure_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = |message: &str, is_error: bool| seen.push((message.to_string(), is_error));
            sink.show("Connected", false);
            sink.show("Device disconnected", true);
        }
        assert_eq!(
            seen,
            vec![
                ("Connected".to_string(), false),
                ("Device disconnected".to_string(), true)
            ]
        );
    }
}
