//! Wiring of queue, watcher and replay into one service handle.

use std::sync::Arc;

use crate::config::Settings;
use crate::connectivity::{ConnectivityEvent, ConnectivityWatcher, HttpProbe, WatcherConfig};
use crate::error::Result;
use crate::queue::{FileQueue, QueueRecord};
use crate::replay::{HttpReplayer, RecordReplayer, ReplayCoordinator, ReplayReport};

#[derive(Clone)]
pub struct OfflineSync {
    pub settings: Arc<Settings>,
    pub queue: Arc<FileQueue>,
    pub watcher: Arc<ConnectivityWatcher>,
    pub coordinator: Option<Arc<ReplayCoordinator>>,
}

impl OfflineSync {
    /// Build from settings; replay is wired only when `replay.endpoint` is set
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let replayer = HttpReplayer::from_settings(&settings.replay)?
            .map(|r| Arc::new(r) as Arc<dyn RecordReplayer>);
        Self::build(settings, replayer)
    }

    /// Build with a caller-supplied replayer instead of the HTTP one
    pub fn with_replayer(settings: Settings, replayer: Arc<dyn RecordReplayer>) -> Result<Self> {
        Self::build(settings, Some(replayer))
    }

    fn build(settings: Settings, replayer: Option<Arc<dyn RecordReplayer>>) -> Result<Self> {
        let queue = Arc::new(FileQueue::from_settings(&settings.queue));
        let probe = Arc::new(HttpProbe::from_settings(&settings.connectivity)?);
        tracing::info!(
            queue = %queue.path().display(),
            probe = %probe.url(),
            "Offline sync components created"
        );

        let queue_path = queue.path().display().to_string();
        let watcher = ConnectivityWatcher::new(probe, WatcherConfig::from(&settings.connectivity))
            .with_notifier(move |event| match event {
                ConnectivityEvent::Offline => {
                    tracing::info!(queue = %queue_path, "Writes will be buffered until the backend returns")
                }
                ConnectivityEvent::Online => {
                    tracing::info!(queue = %queue_path, "Buffered writes eligible for replay")
                }
            });

        let coordinator = replayer.map(|replayer| {
            let coordinator = Arc::new(ReplayCoordinator::new(queue.clone(), replayer));
            watcher.register_callback(coordinator.clone().into_callback());
            coordinator
        });
        if coordinator.is_none() {
            tracing::warn!("No replay endpoint configured, buffered records will not be replayed");
        }

        Ok(Self {
            settings: Arc::new(settings),
            queue,
            watcher: Arc::new(watcher),
            coordinator,
        })
    }

    pub async fn start(&self) {
        let pending = self.queue.size().await;
        tracing::info!(pending_bytes = pending, "Starting connectivity watcher");
        self.watcher.start();
    }

    /// Buffer a write for later replay
    pub async fn enqueue(&self, record: &QueueRecord) -> Result<()> {
        self.queue.push(record).await?;
        tracing::debug!(
            online = ?self.watcher.is_online(),
            pending_bytes = self.queue.size().await,
            "Write buffered"
        );
        Ok(())
    }

    /// Stop the watcher, then make one last replay attempt if the backend is reachable.
    ///
    /// Returns `None` when no final replay ran.
    pub async fn shutdown(&self) -> Result<Option<ReplayReport>> {
        self.watcher.stop().await;

        let Some(coordinator) = &self.coordinator else {
            return Ok(None);
        };
        if self.watcher.is_online() != Some(true) {
            tracing::info!("Backend not reachable, leaving records queued");
            return Ok(None);
        }

        let report = coordinator.replay_pending().await?;
        Ok(Some(report))
    }
}
