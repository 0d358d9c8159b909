//! BLE scanning state.
//!
//! Tracks the single time-boxed scan for the target sensor. The session
//! owns its timeout task; ending the session for any reason aborts it, and
//! the session id lets a timer that already fired be recognised as stale.

use std::fmt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Reason a scan could not be started.
///
/// Numeric values follow the Android `ScanCallback.SCAN_FAILED_*` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanFailureCode {
    /// A scan with the same settings is already running.
    AlreadyStarted,
    /// The scan could not be registered with the stack.
    ApplicationRegistrationFailed,
    /// The adapter does not support this scan.
    FeatureUnsupported,
    /// Internal stack error.
    InternalError,
    /// Any other code.
    Unknown(i32),
}

impl ScanFailureCode {
    /// Map a raw stack code.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::AlreadyStarted,
            2 => Self::ApplicationRegistrationFailed,
            3 => Self::InternalError,
            4 => Self::FeatureUnsupported,
            other => Self::Unknown(other),
        }
    }

    /// The raw stack code.
    pub fn code(&self) -> i32 {
        match self {
            Self::AlreadyStarted => 1,
            Self::ApplicationRegistrationFailed => 2,
            Self::InternalError => 3,
            Self::FeatureUnsupported => 4,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for ScanFailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "scan already started"),
            Self::ApplicationRegistrationFailed => write!(f, "scan registration failed"),
            Self::FeatureUnsupported => write!(f, "scan feature unsupported"),
            Self::InternalError => write!(f, "internal scan error"),
            Self::Unknown(code) => write!(f, "unknown scan error {}", code),
        }
    }
}

/// Identifies one scan session; used to discard stale timeout events.
pub type ScanSessionId = u64;

/// An active scan.
#[derive(Debug)]
pub struct ScanSession {
    id: ScanSessionId,
    started_at: Instant,
    timeout_handle: Option<JoinHandle<()>>,
}

impl ScanSession {
    /// Session identifier.
    pub fn id(&self) -> ScanSessionId {
        self.id
    }

    /// How long the scan has been running.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if let Some(handle) = self.timeout_handle.take() {
            handle.abort();
        }
    }
}

/// Owns the scan session, if any.
#[derive(Debug, Default)]
pub struct Scanner {
    session: Option<ScanSession>,
    next_id: ScanSessionId,
}

impl Scanner {
    /// Create an idle scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a scan is active.
    pub fn is_scanning(&self) -> bool {
        self.session.is_some()
    }

    /// Reserve the id for the next session.
    ///
    /// The id is needed before the timeout task is spawned, which in turn is
    /// needed to [`begin`](Self::begin) the session.
    pub fn next_session_id(&mut self) -> ScanSessionId {
        self.next_id += 1;
        self.next_id
    }

    /// Record a started scan together with its armed timeout.
    pub fn begin(&mut self, id: ScanSessionId, timeout_handle: JoinHandle<()>) {
        debug!("Scan session {} started", id);
        self.session = Some(ScanSession {
            id,
            started_at: Instant::now(),
            timeout_handle: Some(timeout_handle),
        });
    }

    /// End the active session, aborting its timeout. Returns the session
    /// that ended, or `None` if nothing was scanning.
    pub fn finish(&mut self) -> Option<ScanSession> {
        let session = self.session.take()?;
        debug!(
            "Scan session {} ended after {:?}",
            session.id,
            session.elapsed()
        );
        Some(session)
    }

    /// End the session only if `id` is the active one.
    pub fn finish_if_current(&mut self, id: ScanSessionId) -> Option<ScanSession> {
        if self.session.as_ref().map(ScanSession::id) == Some(id) {
            self.finish()
        } else {
            trace!("Ignoring event for stale scan session {}", id);
            None
        }
    }
}

/// Check whether an advertised name matches the target name exactly.
pub fn matches_target(advertised: Option<&str>, target: &str) -> bool {
    advertised == Some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_code_mapping() {
        for code in 1..=4 {
            assert_eq!(ScanFailureCode::from_code(code).code(), code);
        }
        assert_eq!(ScanFailureCode::from_code(1), ScanFailureCode::AlreadyStarted);
        assert_eq!(
            ScanFailureCode::from_code(4),
            ScanFailureCode::FeatureUnsupported
        );
        assert_eq!(ScanFailureCode::from_code(42), ScanFailureCode::Unknown(42));
    }

    #[test]
    fn test_matches_target() {
        assert!(matches_target(Some("ESP32-Thermo"), "ESP32-Thermo"));
        assert!(!matches_target(Some("ESP32-Thermo-2"), "ESP32-Thermo"));
        assert!(!matches_target(Some("esp32-thermo"), "ESP32-Thermo"));
        assert!(!matches_target(None, "ESP32-Thermo"));
    }

    #[tokio::test]
    async fn test_finish_ends_session() {
        let mut scanner = Scanner::new();
        let id = scanner.next_session_id();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        scanner.begin(id, handle);
        assert!(scanner.is_scanning());

        let session = scanner.finish().expect("session was active");
        assert_eq!(session.id(), id);
        drop(session);

        assert!(!scanner.is_scanning());
        assert!(scanner.finish().is_none());
    }

    #[tokio::test]
    async fn test_stale_session_ignored() {
        let mut scanner = Scanner::new();
        let first = scanner.next_session_id();
        scanner.begin(first, tokio::spawn(async {}));
        scanner.finish();

        let second = scanner.next_session_id();
        scanner.begin(second, tokio::spawn(async {}));

        assert!(scanner.finish_if_current(first).is_none());
        assert!(scanner.is_scanning());
        assert!(scanner.finish_if_current(second).is_some());
        assert!(!scanner.is_scanning());
    }
}
