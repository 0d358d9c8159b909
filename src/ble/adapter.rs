//! Adapter gate.
//!
//! Every scan or connect first checks that the platform has BLE at all and
//! that the adapter is powered. Turning the radio on is the host's job; the
//! manager only hands it an [`EnableRequest`] through a [`RadioEnabler`].

use async_trait::async_trait;
use std::fmt;

use crate::ble::radio::RadioDriver;

/// Result of checking the adapter before a radio operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    /// No BLE support on this platform.
    Unsupported,
    /// Adapter present but powered off.
    PoweredOff,
    /// Ready for scanning and connecting.
    Ready,
}

impl AdapterStatus {
    /// Check the adapter behind `radio`.
    pub fn check<R: RadioDriver + ?Sized>(radio: &R) -> Self {
        if !radio.is_supported() {
            Self::Unsupported
        } else if !radio.is_enabled() {
            Self::PoweredOff
        } else {
            Self::Ready
        }
    }
}

/// Token identifying one request to power the radio on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnableRequest {
    id: u64,
}

impl EnableRequest {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    /// Request identifier.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for EnableRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enable-request#{}", self.id)
    }
}

/// Host-provided flow that asks the user to turn Bluetooth on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioEnabler: Send + Sync {
    /// Run the platform enable flow and report whether the radio is now on.
    async fn request_enable(&self, request: EnableRequest) -> bool;
}
