//! Sink for queue lines that could not be parsed during a drain.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only file holding raw, unparsable queue lines.
///
/// Lines are kept verbatim so an operator can repair and re-enqueue them.
#[derive(Debug, Clone)]
pub struct DeadLetterSink {
    path: PathBuf,
}

impl DeadLetterSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Sink placed next to `queue_path`, e.g. `queue.jsonl` -> `queue.dead`
    pub fn beside(queue_path: &Path) -> Self {
        Self::new(queue_path.with_extension("dead"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one raw line
    pub async fn append(&self, line: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line);
        buf.push(b'\n');
        file.write_all(&buf).await?;
        file.flush().await?;
        file.sync_data().await?;

        Ok(())
    }

    /// Read every dead-lettered line (lossy UTF-8)
    pub async fn entries(&self) -> io::Result<Vec<String>> {
        let contents = match fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        Ok(contents
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sink_sits_beside_queue() {
        let sink = DeadLetterSink::beside(Path::new("/data/queue.jsonl"));
        assert_eq!(sink.path(), Path::new("/data/queue.dead"));
    }

    #[tokio::test]
    async fn test_append_and_read_entries() {
        let temp = TempDir::new().unwrap();
        let sink = DeadLetterSink::new(temp.path().join("queue.dead"));

        assert!(sink.entries().await.unwrap().is_empty());

        sink.append(b"{not json").await.unwrap();
        sink.append(&[0xff, 0xfe]).await.unwrap();

        let entries = sink.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], "{not json");
    }
}
