//! Connection state for the sensor link.

use std::fmt;

/// Connection state for the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not connected to the sensor.
    #[default]
    Disconnected,
    /// Currently attempting to connect.
    Connecting,
    /// Connected and subscribed to temperature notifications.
    Connected,
    /// Currently disconnecting.
    Disconnecting,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Progress of a connection attempt while in [`ConnectionState::Connecting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectPhase {
    /// Waiting for the reconnection delay to elapse.
    AwaitingRetry,
    /// Low-level connect requested.
    Linking,
    /// Service discovery requested.
    Discovering,
    /// Notification descriptor write requested.
    Subscribing,
}

impl ConnectPhase {
    /// Whether a low-level link may exist in this phase.
    pub fn has_link(&self) -> bool {
        !matches!(self, Self::AwaitingRetry)
    }
}
