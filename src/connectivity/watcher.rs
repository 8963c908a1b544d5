use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::ConnectivitySettings;
use crate::metrics::ConnectivityMetrics;

use super::backoff::{BackoffConfig, ProbeBackoff};
use super::probe::ReachabilityProbe;
use super::state::{ConnectivityEvent, ConnectivityState, ConnectivityStats, ConnectivityStatus};

/// Async action run on every offline -> online transition
pub type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Synchronous observer of state flips
pub type StateNotifier = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Pause between probes while online
    pub probe_interval: Duration,
    /// Upper bound for the pause while offline
    pub max_backoff: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

impl From<&ConnectivitySettings> for WatcherConfig {
    fn from(settings: &ConnectivitySettings) -> Self {
        let backoff = BackoffConfig::from(settings);
        Self {
            probe_interval: backoff.base_interval,
            max_backoff: backoff.max_interval,
            jitter_factor: backoff.jitter_factor,
        }
    }
}

/// State shared between the handle and the background loop
struct WatcherShared {
    probe: Arc<dyn ReachabilityProbe>,
    backoff: ProbeBackoff,
    status: ConnectivityStatus,
    callbacks: RwLock<Vec<ReconnectCallback>>,
    notifier: Option<StateNotifier>,
    running: AtomicBool,
}

/// Periodically probes the backend and fires callbacks when it comes back.
///
/// The loop runs between [`start`](Self::start) and [`stop`](Self::stop):
/// probe, update state, notify on a flip, sleep for the backoff interval,
/// repeat. Probe and sleep never overlap. Callbacks run sequentially in
/// registration order and are isolated from each other: an error or panic in
/// one is logged and the next still runs.
///
/// # Example
///
/// ```rust,ignore
/// let watcher = ConnectivityWatcher::new(Arc::new(probe), WatcherConfig::default())
///     .with_notifier(|event| tracing::info!(%event, "connectivity changed"));
/// watcher.register_on_reconnect(move || {
///     let coordinator = coordinator.clone();
///     async move { coordinator.replay_pending().await.map(|_| ()).map_err(Into::into) }
/// });
/// watcher.start();
/// ```
pub struct ConnectivityWatcher {
    shared: Arc<WatcherShared>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityWatcher {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, config: WatcherConfig) -> Self {
        let backoff = ProbeBackoff::new(BackoffConfig {
            base_interval: config.probe_interval,
            max_interval: config.max_backoff,
            jitter_factor: config.jitter_factor,
        });
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(WatcherShared {
                probe,
                backoff,
                status: ConnectivityStatus::new(),
                callbacks: RwLock::new(Vec::new()),
                notifier: None,
                running: AtomicBool::new(false),
            }),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Attach the state-change notifier. Must be called before `start`.
    pub fn with_notifier<F>(mut self, notifier: F) -> Self
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.notifier = Some(Arc::new(notifier)),
            None => tracing::warn!("Notifier ignored: watcher already started"),
        }
        self
    }

    /// Register an async callback for every offline -> online transition
    pub fn register_on_reconnect<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: ReconnectCallback = Arc::new(move || callback().boxed());
        self.register_callback(callback);
    }

    /// Register an already boxed callback
    pub fn register_callback(&self, callback: ReconnectCallback) {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    pub fn callback_count(&self) -> usize {
        self.shared
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawn the watch loop. Calling it while running is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(self.shared.clone().run(shutdown_rx));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop the loop, interrupting an in-flight probe or sleep, and wait for it to exit
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return;
        };

        let _ = self.shutdown_tx.send(());
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!(error = %e, "Connectivity watcher task panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Outcome of the latest probe; `None` before the first one
    pub fn is_online(&self) -> Option<bool> {
        self.shared.status.is_online()
    }

    pub fn state(&self) -> ConnectivityState {
        self.shared.status.state()
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.shared.status.last_checked_at()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.status.consecutive_failures()
    }

    pub fn stats(&self) -> ConnectivityStats {
        self.shared.status.stats()
    }
}

impl WatcherShared {
    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            base_interval_ms = self.backoff.config().base_interval.as_millis() as u64,
            max_backoff_ms = self.backoff.config().max_interval.as_millis() as u64,
            "Connectivity watcher started"
        );

        while self.running.load(Ordering::Acquire) {
            let online = tokio::select! {
                _ = shutdown.recv() => break,
                online = AssertUnwindSafe(self.probe.probe()).catch_unwind() => {
                    online.unwrap_or_else(|_| {
                        tracing::error!("Reachability probe panicked, treating as offline");
                        false
                    })
                }
            };

            let event = self.status.record_probe(online, Utc::now());
            let failures = self.status.consecutive_failures();
            ConnectivityMetrics::record_probe(online, failures);
            ConnectivityMetrics::set_state(self.status.state());

            if let Some(event) = event {
                self.handle_transition(event, failures).await;
            }

            let interval = self.backoff.interval(failures);
            tracing::trace!(
                online = online,
                consecutive_failures = failures,
                sleep_ms = interval.as_millis() as u64,
                "Probe cycle completed"
            );

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Connectivity watcher stopped");
    }

    async fn handle_transition(&self, event: ConnectivityEvent, failures: u32) {
        match event {
            ConnectivityEvent::Online => tracing::info!("Backend reachable again"),
            ConnectivityEvent::Offline => {
                tracing::warn!(consecutive_failures = failures, "Backend unreachable, entering offline mode")
            }
        }
        ConnectivityMetrics::record_transition(event.into());

        if let Some(notifier) = &self.notifier {
            if std::panic::catch_unwind(AssertUnwindSafe(|| notifier(event))).is_err() {
                tracing::error!(event = %event, "State notifier panicked");
            }
        }

        if event == ConnectivityEvent::Online {
            self.run_callbacks().await;
        }
    }

    async fn run_callbacks(&self) {
        let callbacks: Vec<ReconnectCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, callback) in callbacks.iter().enumerate() {
            let outcome = AssertUnwindSafe(async { callback().await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => ConnectivityMetrics::record_callback(true),
                Ok(Err(e)) => {
                    ConnectivityMetrics::record_callback(false);
                    tracing::warn!(callback = index, error = %e, "Reconnect callback failed");
                }
                Err(_) => {
                    ConnectivityMetrics::record_callback(false);
                    tracing::error!(callback = index, "Reconnect callback panicked");
                }
            }
        }
    }
}

impl Drop for ConnectivityWatcher {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// Replays a fixed script of outcomes, then repeats `fallback`
    struct ScriptedProbe {
        script: Mutex<VecDeque<bool>>,
        fallback: bool,
        calls: Mutex<Vec<Instant>>,
        call_tx: mpsc::UnboundedSender<usize>,
    }

    impl ScriptedProbe {
        fn new(script: &[bool], fallback: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<usize>) {
            let (call_tx, call_rx) = mpsc::unbounded_channel();
            let probe = Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                fallback,
                calls: Mutex::new(Vec::new()),
                call_tx,
            });
            (probe, call_rx)
        }

        fn call_instants(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReachabilityProbe for ScriptedProbe {
        async fn probe(&self) -> bool {
            let count = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };
            let result = self.script.lock().unwrap().pop_front().unwrap_or(self.fallback);
            let _ = self.call_tx.send(count);
            result
        }
    }

    fn config(base_secs: u64, max_secs: u64) -> WatcherConfig {
        WatcherConfig {
            probe_interval: Duration::from_secs(base_secs),
            max_backoff: Duration::from_secs(max_secs),
            jitter_factor: 0.0,
        }
    }

    async fn wait_for_calls(rx: &mut mpsc::UnboundedReceiver<usize>, target: usize) {
        while let Some(count) = rx.recv().await {
            if count >= target {
                return;
            }
        }
    }

    fn counting_callback(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static {
        move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let (probe, _rx) = ScriptedProbe::new(&[], true);
        let watcher = ConnectivityWatcher::new(probe, WatcherConfig::default());

        assert_eq!(watcher.is_online(), None);
        assert_eq!(watcher.state(), ConnectivityState::Unknown);
        assert!(watcher.last_checked_at().is_none());
        assert!(!watcher.is_running());
        assert_eq!(watcher.callback_count(), 0);
    }

    #[tokio::test]
    async fn test_register_on_reconnect_appends() {
        let (probe, _rx) = ScriptedProbe::new(&[], true);
        let watcher = ConnectivityWatcher::new(probe, WatcherConfig::default());

        watcher.register_on_reconnect(|| async { Ok::<(), anyhow::Error>(()) });
        watcher.register_on_reconnect(|| async { Ok::<(), anyhow::Error>(()) });

        assert_eq!(watcher.callback_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_then_online_transitions() {
        let (probe, mut rx) = ScriptedProbe::new(&[true, false, false, true], true);
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();

        let watcher = ConnectivityWatcher::new(probe, config(1, 60))
            .with_notifier(move |event| events_clone.lock().unwrap().push(event.as_str()));

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        watcher.register_on_reconnect(counting_callback(first.clone()));
        watcher.register_on_reconnect(counting_callback(second.clone()));

        watcher.start();
        // The fifth probe starts only after the fourth cycle (and its callbacks) finished
        wait_for_calls(&mut rx, 5).await;
        watcher.stop().await;

        assert_eq!(*events.lock().unwrap(), vec!["offline", "online"]);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(watcher.is_online(), Some(true));
        assert_eq!(watcher.consecutive_failures(), 0);
        assert!(watcher.last_checked_at().is_some());
        assert!(!watcher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_double_every_third_failure() {
        let (probe, mut rx) = ScriptedProbe::new(&[], false);
        let watcher = ConnectivityWatcher::new(probe.clone(), config(1, 60));

        watcher.start();
        wait_for_calls(&mut rx, 5).await;
        watcher.stop().await;

        let instants = probe.call_instants();
        let sleeps: Vec<Duration> = instants
            .windows(2)
            .take(4)
            .map(|pair| pair[1] - pair[0])
            .collect();

        let expected = [1, 1, 1, 2].map(Duration::from_secs);
        for (observed, expected) in sleeps.iter().zip(expected.iter()) {
            let diff = if observed > expected { *observed - *expected } else { *expected - *observed };
            assert!(diff < Duration::from_millis(10), "observed {:?}, expected {:?}", observed, expected);
        }
        assert_eq!(watcher.consecutive_failures(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_respects_ceiling() {
        let (probe, mut rx) = ScriptedProbe::new(&[], false);
        let watcher = ConnectivityWatcher::new(probe.clone(), config(2, 3));

        watcher.start();
        wait_for_calls(&mut rx, 6).await;
        watcher.stop().await;

        let instants = probe.call_instants();
        let last_sleep = instants[5] - instants[4];
        assert!(last_sleep <= Duration::from_secs(3) + Duration::from_millis(10));
        assert!(last_sleep >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_callback_does_not_block_others() {
        let (probe, mut rx) = ScriptedProbe::new(&[false, true], true);
        let watcher = ConnectivityWatcher::new(probe, config(1, 60));

        let after = Arc::new(AtomicUsize::new(0));
        watcher.register_on_reconnect(|| async {
            Err::<(), _>(anyhow::anyhow!("replay endpoint rejected batch"))
        });
        watcher.register_on_reconnect(|| async {
            let buggy = true;
            if buggy {
                panic!("callback bug");
            }
            Ok::<(), anyhow::Error>(())
        });
        watcher.register_on_reconnect(counting_callback(after.clone()));

        watcher.start();
        wait_for_calls(&mut rx, 3).await;
        watcher.stop().await;

        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_success_fires_nothing() {
        let (probe, mut rx) = ScriptedProbe::new(&[], true);
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        let watcher = ConnectivityWatcher::new(probe, config(1, 60))
            .with_notifier(move |_| {
                notified_clone.fetch_add(1, Ordering::SeqCst);
            });
        let reconnects = Arc::new(AtomicUsize::new(0));
        watcher.register_on_reconnect(counting_callback(reconnects.clone()));

        watcher.start();
        wait_for_calls(&mut rx, 3).await;
        watcher.stop().await;

        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert_eq!(reconnects.load(Ordering::SeqCst), 0);
        assert_eq!(watcher.is_online(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_stop_interrupts_sleep() {
        let (probe, mut rx) = ScriptedProbe::new(&[], true);
        let watcher = ConnectivityWatcher::new(probe.clone(), config(3600, 3600));

        watcher.start();
        watcher.start();
        wait_for_calls(&mut rx, 1).await;

        // Loop is now parked in a one hour sleep
        tokio::time::timeout(Duration::from_secs(1), watcher.stop())
            .await
            .expect("stop should interrupt the sleep");

        assert_eq!(probe.call_instants().len(), 1);
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let (probe, _rx) = ScriptedProbe::new(&[], true);
        let watcher = ConnectivityWatcher::new(probe, WatcherConfig::default());

        watcher.stop().await;
        watcher.stop().await;
        assert!(!watcher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (probe, mut rx) = ScriptedProbe::new(&[], true);
        let watcher = ConnectivityWatcher::new(probe, config(1, 60));

        watcher.start();
        wait_for_calls(&mut rx, 1).await;
        watcher.stop().await;

        watcher.start();
        wait_for_calls(&mut rx, 2).await;
        assert!(watcher.is_running());
        watcher.stop().await;
    }
}
