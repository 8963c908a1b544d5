//! Connectivity state tracking

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use chrono::{DateTime, Utc};

/// Sentinel for "never probed"
const NEVER: i64 = i64::MIN;

/// Reachability of the remote backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectivityState {
    /// No probe has completed yet
    Unknown = 0,
    /// The last probe succeeded
    Online = 1,
    /// The last probe failed
    Offline = 2,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Unknown => "unknown",
            ConnectivityState::Online => "online",
            ConnectivityState::Offline => "offline",
        }
    }

    /// `None` while unknown
    pub fn is_online(&self) -> Option<bool> {
        match self {
            ConnectivityState::Unknown => None,
            ConnectivityState::Online => Some(true),
            ConnectivityState::Offline => Some(false),
        }
    }
}

impl From<u8> for ConnectivityState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectivityState::Online,
            2 => ConnectivityState::Offline,
            _ => ConnectivityState::Unknown,
        }
    }
}

/// Emitted when the observed state flips
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    /// A probe succeeded after the backend had been offline
    Online,
    /// A probe failed while the backend was online (or not yet probed)
    Offline,
}

impl ConnectivityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityEvent::Online => "online",
            ConnectivityEvent::Offline => "offline",
        }
    }
}

impl fmt::Display for ConnectivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ConnectivityEvent> for ConnectivityState {
    fn from(event: ConnectivityEvent) -> Self {
        match event {
            ConnectivityEvent::Online => ConnectivityState::Online,
            ConnectivityEvent::Offline => ConnectivityState::Offline,
        }
    }
}

/// Shared connectivity status.
///
/// Written only by the watcher loop; atomic fields allow lock-free reads from
/// status indicators.
pub struct ConnectivityStatus {
    state: AtomicU8,
    last_checked_ms: AtomicI64,
    consecutive_failures: AtomicU32,
    total_reconnections: AtomicU32,
}

impl ConnectivityStatus {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectivityState::Unknown as u8),
            last_checked_ms: AtomicI64::new(NEVER),
            consecutive_failures: AtomicU32::new(0),
            total_reconnections: AtomicU32::new(0),
        }
    }

    /// Apply one probe outcome and report the transition it caused, if any.
    ///
    /// Success resets the failure streak; failure extends it. `Online` is
    /// reported only when leaving `Offline`, so the very first successful
    /// probe is silent. `Offline` is reported when leaving `Online` or
    /// `Unknown`.
    pub fn record_probe(&self, online: bool, at: DateTime<Utc>) -> Option<ConnectivityEvent> {
        let next = if online {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        };
        let previous = ConnectivityState::from(self.state.swap(next as u8, Ordering::AcqRel));
        self.last_checked_ms
            .store(at.timestamp_millis(), Ordering::Release);

        if online {
            self.consecutive_failures.store(0, Ordering::Release);
        } else {
            let _ = self.consecutive_failures.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |n| Some(n.saturating_add(1)),
            );
        }

        match (previous, next) {
            (ConnectivityState::Offline, ConnectivityState::Online) => {
                self.total_reconnections.fetch_add(1, Ordering::AcqRel);
                Some(ConnectivityEvent::Online)
            }
            (ConnectivityState::Online | ConnectivityState::Unknown, ConnectivityState::Offline) => {
                Some(ConnectivityEvent::Offline)
            }
            _ => None,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        ConnectivityState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_online(&self) -> Option<bool> {
        self.state().is_online()
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        match self.last_checked_ms.load(Ordering::Acquire) {
            NEVER => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> ConnectivityStats {
        ConnectivityStats {
            state: self.state(),
            last_checked_at: self.last_checked_at(),
            consecutive_failures: self.consecutive_failures(),
            total_reconnections: self.total_reconnections.load(Ordering::Acquire),
        }
    }
}

impl Default for ConnectivityStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Connectivity statistics
#[derive(Debug, Clone)]
pub struct ConnectivityStats {
    pub state: ConnectivityState,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_reconnections: u32,
}
