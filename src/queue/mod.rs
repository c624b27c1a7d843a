//! Durable, append-only queue of frames waiting for the uplink.
//!
//! The queue is a single text file with one JSON record per line. Every
//! append is synced to disk before it returns, so a frame acknowledged by the
//! listener survives a power cut. Draining takes a snapshot of the complete
//! lines present at that moment; clearing a drained batch removes exactly that
//! prefix and keeps anything appended after the snapshot.

use crate::error::{RelayError, Result};
use crate::frame::SensorFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// One pending line of the queue file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry(String);

impl QueueEntry {
    /// Serialize a frame to its durable record.
    pub fn from_frame(frame: &SensorFrame) -> Result<Self> {
        let line = frame
            .to_record()
            .to_line()
            .map_err(|e| RelayError::storage_error(format!("Failed to encode frame: {}", e)))?;
        Ok(Self(line))
    }

    /// Wrap an already encoded line. Newlines are not allowed inside an entry.
    pub fn from_line(line: impl Into<String>) -> Result<Self> {
        let line = line.into();
        if line.contains('\n') || line.contains('\r') {
            return Err(RelayError::storage_error("Queue entries must be a single line"));
        }
        Ok(Self(line))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the queue taken by [`DurableQueue::drain_all`].
#[derive(Debug, Clone)]
pub struct DrainedBatch {
    entries: Vec<QueueEntry>,
    end_offset: u64,
}

impl DrainedBatch {
    /// Entries in append order.
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File backed FIFO shared by the listener and the forwarding scheduler.
#[derive(Debug)]
pub struct DurableQueue {
    path: PathBuf,
    // Serializes every file operation; held across the awaits of one operation only.
    lock: Mutex<()>,
}

impl DurableQueue {
    /// Open (creating if needed) the queue file at `path`.
    ///
    /// A trailing partial line, left by a crash in the middle of an append,
    /// is cut off: that append never returned, so nothing was acknowledged.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                RelayError::storage_error(format!(
                    "Failed to create queue directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| {
                RelayError::storage_error(format!(
                    "Failed to open queue file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let queue = Self {
            path,
            lock: Mutex::new(()),
        };
        queue.repair_tail(&file).await?;
        Ok(queue)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a frame. Returns once the record is on disk.
    pub async fn append(&self, frame: &SensorFrame) -> Result<()> {
        let entry = QueueEntry::from_frame(frame)?;
        self.append_entry(&entry).await
    }

    /// Append an encoded entry. Returns once the record is on disk.
    pub async fn append_entry(&self, entry: &QueueEntry) -> Result<()> {
        let mut line = Vec::with_capacity(entry.0.len() + 1);
        line.extend_from_slice(entry.0.as_bytes());
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| RelayError::storage_error(format!("Failed to open queue: {}", e)))?;
        let start = self.repair_tail(&file).await?;

        if let Err(e) = write_synced(&mut file, &line).await {
            // Leave no partial record behind for the next append to land on.
            if let Err(undo) = rollback(&file, start).await {
                error!(path = %self.path.display(), "Failed to roll back partial append: {}", undo);
            }
            return Err(RelayError::storage_error(format!(
                "Failed to append entry: {}",
                e
            )));
        }

        debug!(bytes = line.len(), "Appended queue entry");
        Ok(())
    }

    /// Snapshot every complete entry, in append order, without removing any.
    pub async fn drain_all(&self) -> Result<DrainedBatch> {
        let _guard = self.lock.lock().await;
        let contents = self.read_contents().await?;

        let end = complete_len(&contents);

        let entries = String::from_utf8_lossy(&contents[..end])
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(|line| QueueEntry(line.to_string()))
            .collect();

        Ok(DrainedBatch {
            entries,
            end_offset: end as u64,
        })
    }

    /// Remove the entries of a drained batch, keeping later appends.
    ///
    /// Must only be called once every entry of `batch` has been delivered.
    pub async fn clear(&self, batch: &DrainedBatch) -> Result<()> {
        let _guard = self.lock.lock().await;
        let contents = self.read_contents().await?;
        let end = batch.end_offset as usize;

        if contents.len() < end {
            return Err(RelayError::storage_error(format!(
                "Queue file shrank below the drained batch ({} < {} bytes)",
                contents.len(),
                end
            )));
        }

        let remainder = &contents[end..];
        if remainder.is_empty() {
            self.truncate().await?;
        } else {
            let tmp = self.path.with_extension("tmp");
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(remainder).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &self.path).await.map_err(|e| {
                RelayError::storage_error(format!("Failed to replace queue file: {}", e))
            })?;
            debug!(kept_bytes = remainder.len(), "Kept entries appended during drain");
        }

        Ok(())
    }

    /// Drop every entry in the queue.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.truncate().await
    }

    /// Number of pending entries.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.drain_all().await?.len())
    }

    /// True when no complete entry is pending.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.drain_all().await?.is_empty())
    }

    /// Cut a trailing partial line off the queue file, returning the length kept.
    ///
    /// Callers hold the lock, or own the queue exclusively as `open` does.
    async fn repair_tail(&self, file: &fs::File) -> Result<u64> {
        let len = file.metadata().await?.len();
        if len == 0 || self.last_byte(len).await? == b'\n' {
            return Ok(len);
        }

        let contents = self.read_contents().await?;
        let keep = complete_len(&contents) as u64;
        warn!(
            path = %self.path.display(),
            discarded = len - keep,
            "Discarding torn record at end of queue file"
        );
        rollback(file, keep).await.map_err(|e| {
            RelayError::storage_error(format!("Failed to discard torn record: {}", e))
        })?;
        Ok(keep)
    }

    async fn last_byte(&self, len: u64) -> Result<u8> {
        let mut file = fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(len - 1)).await?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    async fn read_contents(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(RelayError::storage_error(format!(
                "Failed to read queue file: {}",
                e
            ))),
        }
    }

    async fn truncate(&self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(|e| RelayError::storage_error(format!("Failed to truncate queue: {}", e)))?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Length of `contents` up to and including its last newline.
fn complete_len(contents: &[u8]) -> usize {
    contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

async fn write_synced(file: &mut fs::File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_data().await
}

async fn rollback(file: &fs::File, len: u64) -> std::io::Result<()> {
    file.set_len(len).await?;
    file.sync_all().await
}
