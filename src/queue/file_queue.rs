use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::config::QueueSettings;
use crate::metrics::QueueMetrics;

use super::{DeadLetterSink, QueueConfig, QueueError, QueueRecord, QueueResult};

/// Lines kept and dropped by one compaction pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Compaction {
    kept: usize,
    dropped: usize,
}

/// Append-only JSONL queue backed by a single file.
///
/// Every file operation runs under one instance-scoped async mutex, so a drain
/// never observes a half-written line and a push never appends while a drain
/// is reading. The mutex is in-process only: two processes sharing the same
/// file are not coordinated.
///
/// # Example
///
/// ```rust,ignore
/// let queue = FileQueue::new(QueueConfig::new("/var/lib/pos/queue.jsonl"));
///
/// // Buffer a write while offline
/// queue.push(&record).await?;
///
/// // Drain everything once the backend is back
/// for record in queue.pop_all().await? {
///     replay(record).await?;
/// }
/// ```
pub struct FileQueue {
    config: QueueConfig,
    temp_path: std::path::PathBuf,
    dead_letters: DeadLetterSink,
    lock: Mutex<()>,
}

impl FileQueue {
    /// Create a queue handle. The file itself is created on the first push.
    pub fn new(config: QueueConfig) -> Self {
        let temp_path = config.path.with_extension("tmp");
        let dead_letters = DeadLetterSink::beside(&config.path);
        Self {
            config,
            temp_path,
            dead_letters,
            lock: Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::new(QueueConfig::from(settings))
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn dead_letters(&self) -> &DeadLetterSink {
        &self.dead_letters
    }

    /// Durably append `record` as one line.
    ///
    /// The line is fsynced before returning. If the file then exceeds the soft
    /// size limit it is compacted down to the most recent `gc_keep_lines`
    /// records. A record larger than the soft limit is still written in full;
    /// only records above `max_record_bytes` are rejected.
    pub async fn push(&self, record: &QueueRecord) -> QueueResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let size = line.len() as u64;
        if size > self.config.max_record_bytes {
            QueueMetrics::record_push_failed();
            return Err(QueueError::RecordTooLarge {
                size,
                limit: self.config.max_record_bytes,
            });
        }

        let _guard = self.lock.lock().await;

        if let Err(e) = self.append_line(&line).await {
            QueueMetrics::record_push_failed();
            tracing::error!(
                path = %self.config.path.display(),
                error = %e,
                "Failed to append record to queue"
            );
            return Err(e.into());
        }
        QueueMetrics::record_pushed(size);

        self.compact_if_needed().await;

        Ok(())
    }

    /// Drain every record in insertion order and delete the file.
    ///
    /// Each line is parsed on its own; an unparsable line is logged, moved to
    /// the dead-letter sink and skipped. A missing file yields an empty list.
    pub async fn pop_all(&self) -> QueueResult<Vec<QueueRecord>> {
        let _guard = self.lock.lock().await;

        let file = match File::open(&self.config.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.config.path.display(), "Queue file absent, nothing to drain");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut segments = BufReader::new(file).split(b'\n');
        let mut records = Vec::new();
        let mut corrupt = 0usize;
        let mut line_no = 0usize;

        while let Some(segment) = segments.next_segment().await? {
            line_no += 1;
            if segment.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<QueueRecord>(&segment) {
                Ok(record) => records.push(record),
                Err(e) => {
                    corrupt += 1;
                    tracing::warn!(
                        line = line_no,
                        content = %String::from_utf8_lossy(&segment),
                        error = %e,
                        "Skipping unparsable queue line"
                    );
                    if let Err(e) = self.dead_letters.append(&segment).await {
                        tracing::error!(
                            path = %self.dead_letters.path().display(),
                            error = %e,
                            "Failed to dead-letter unparsable queue line"
                        );
                    }
                }
            }
        }

        match fs::remove_file(&self.config.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        QueueMetrics::record_drained(records.len() as u64, corrupt as u64);
        tracing::info!(
            path = %self.config.path.display(),
            records = records.len(),
            corrupt = corrupt,
            "Drained queue file"
        );

        Ok(records)
    }

    /// Current file length in bytes, or 0 if the file is absent or unreadable
    pub async fn size(&self) -> u64 {
        match fs::metadata(&self.config.path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        path = %self.config.path.display(),
                        error = %e,
                        "Failed to stat queue file"
                    );
                }
                0
            }
        }
    }

    /// Put drained records back at the head of the queue.
    ///
    /// Used when a replay stops part way: the unreplayed tail goes back in
    /// front of anything pushed since the drain, so insertion order survives.
    pub async fn requeue(&self, records: &[QueueRecord]) -> QueueResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut contents = Vec::new();
        for record in records {
            serde_json::to_writer(&mut contents, record)?;
            contents.push(b'\n');
        }

        let _guard = self.lock.lock().await;

        match fs::read(&self.config.path).await {
            Ok(existing) => contents.extend_from_slice(&existing),
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.ensure_parent_dir().await?,
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.replace_contents(&contents).await {
            tracing::error!(
                path = %self.config.path.display(),
                records = records.len(),
                error = %e,
                "Failed to requeue records"
            );
            return Err(e.into());
        }

        tracing::info!(records = records.len(), "Requeued records at queue head");
        self.compact_if_needed().await;

        Ok(())
    }

    async fn ensure_parent_dir(&self) -> io::Result<()> {
        match self.config.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
            _ => Ok(()),
        }
    }

    async fn append_line(&self, line: &[u8]) -> io::Result<()> {
        self.ensure_parent_dir().await?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.config.path)
            .await?;

        // A crash can leave an unterminated last line; close it off so the
        // new record starts on a line of its own.
        if Self::has_torn_tail(&mut file).await? {
            tracing::warn!(
                path = %self.config.path.display(),
                "Queue file ends in a partial line, terminating it before append"
            );
            let mut buf = Vec::with_capacity(line.len() + 1);
            buf.push(b'\n');
            buf.extend_from_slice(line);
            file.write_all(&buf).await?;
        } else {
            file.write_all(line).await?;
        }
        file.flush().await?;
        file.sync_data().await?;

        Ok(())
    }

    async fn has_torn_tail(file: &mut File) -> io::Result<bool> {
        if file.metadata().await?.len() == 0 {
            return Ok(false);
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).await?;
        file.read_exact(&mut last).await?;
        Ok(last[0] != b'\n')
    }

    /// Must be called with the queue lock held.
    async fn compact_if_needed(&self) {
        let size = self.size().await;
        if size <= self.config.max_bytes {
            return;
        }

        match self.compact().await {
            Ok(outcome) if outcome.dropped == 0 => {
                tracing::debug!(
                    size,
                    max_bytes = self.config.max_bytes,
                    lines = outcome.kept,
                    "Queue over size limit but within line budget, nothing to compact"
                );
            }
            Ok(outcome) => {
                QueueMetrics::record_compaction(outcome.dropped as u64);
                tracing::info!(
                    size_before = size,
                    max_bytes = self.config.max_bytes,
                    kept = outcome.kept,
                    dropped = outcome.dropped,
                    "Compacted queue file"
                );
            }
            Err(e) => {
                QueueMetrics::record_compaction_failed();
                tracing::error!(
                    path = %self.config.path.display(),
                    error = %e,
                    "Queue compaction failed, queue file left intact"
                );
            }
        }
    }

    /// Keep the last `gc_keep_lines` lines. Leaves the file untouched when
    /// there is nothing to drop.
    async fn compact(&self) -> io::Result<Compaction> {
        let contents = fs::read(&self.config.path).await?;
        let lines: Vec<&[u8]> = contents
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .collect();

        let dropped = lines.len().saturating_sub(self.config.gc_keep_lines);
        if dropped == 0 {
            return Ok(Compaction {
                kept: lines.len(),
                dropped: 0,
            });
        }
        let kept = lines.get(dropped..).unwrap_or_default();

        let mut buf = Vec::with_capacity(contents.len());
        for line in kept {
            buf.extend_from_slice(line);
            buf.push(b'\n');
        }

        self.replace_contents(&buf).await?;

        Ok(Compaction {
            kept: kept.len(),
            dropped,
        })
    }

    /// Swap the queue file for `contents`.
    ///
    /// The new contents go to a sibling temp file which is fsynced and then
    /// renamed over the queue file, so the old file is replaced only once its
    /// successor is complete. The temp file never outlives this call.
    async fn replace_contents(&self, contents: &[u8]) -> io::Result<()> {
        let result = self.write_and_swap(contents).await;

        match fs::remove_file(&self.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.temp_path.display(),
                    error = %e,
                    "Failed to remove temporary queue file"
                );
            }
        }

        result
    }

    async fn write_and_swap(&self, contents: &[u8]) -> io::Result<()> {
        let mut temp = File::create(&self.temp_path).await?;
        temp.write_all(contents).await?;
        temp.flush().await?;
        temp.sync_all().await?;
        drop(temp);

        fs::rename(&self.temp_path, &self.config.path).await
    }
}
