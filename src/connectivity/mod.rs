//! Connectivity watching for the remote backend.
//!
//! A background loop probes the backend, tracks an explicit
//! unknown/online/offline state and runs registered callbacks whenever the
//! backend becomes reachable again after an outage. While offline the probe
//! interval backs off step-wise up to a ceiling.

mod backoff;
mod probe;
mod state;
mod watcher;

pub use backoff::{BackoffConfig, ProbeBackoff, FAILURES_PER_STEP};
pub use probe::{HttpProbe, ReachabilityProbe};
pub use state::{ConnectivityEvent, ConnectivityState, ConnectivityStats, ConnectivityStatus};
pub use watcher::{ConnectivityWatcher, ReconnectCallback, StateNotifier, WatcherConfig};
