//! Session decorator that dumps every request to a file.

use crate::entry::TableEntry;
use crate::error::ChannelResult;
use crate::session::{CounterEntry, DeviceSession};
use async_trait::async_trait;
use fabric_types::DeviceId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// One line of the request dump.
#[derive(Debug, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
enum DumpRecord<'a> {
    Write {
        device: &'a DeviceId,
        entry: &'a TableEntry,
    },
    ReadTableEntries {
        device: &'a DeviceId,
    },
    ReadCounter {
        device: &'a DeviceId,
        counter_id: u32,
        index: Option<u64>,
    },
}

/// Wraps a [`DeviceSession`] and appends each request to `path` as a JSON
/// line before forwarding it.
///
/// A dump that cannot be written is logged and otherwise ignored; the
/// request itself still goes out.
pub struct RecordingSession<S> {
    inner: S,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl<S: DeviceSession> RecordingSession<S> {
    pub fn new(inner: S, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn record(&self, record: DumpRecord<'_>) {
        if let Err(e) = self.append(&record).await {
            warn!(
                device = %self.inner.device(),
                path = %self.path.display(),
                error = %e,
                "Failed to dump request"
            );
        }
    }

    async fn append(&self, record: &DumpRecord<'_>) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        if let Some(file) = guard.as_mut() {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl<S: DeviceSession> DeviceSession for RecordingSession<S> {
    fn device(&self) -> &DeviceId {
        self.inner.device()
    }

    async fn write(&self, entry: &TableEntry) -> ChannelResult<()> {
        self.record(DumpRecord::Write {
            device: self.inner.device(),
            entry,
        })
        .await;
        self.inner.write(entry).await
    }

    async fn read_table_entries(&self) -> ChannelResult<Vec<TableEntry>> {
        self.record(DumpRecord::ReadTableEntries {
            device: self.inner.device(),
        })
        .await;
        self.inner.read_table_entries().await
    }

    async fn read_counter(
        &self,
        counter_id: u32,
        index: Option<u64>,
    ) -> ChannelResult<Vec<CounterEntry>> {
        self.record(DumpRecord::ReadCounter {
            device: self.inner.device(),
            counter_id,
            index,
        })
        .await;
        self.inner.read_counter(counter_id, index).await
    }

    async fn close(&self) -> ChannelResult<()> {
        let result = self.inner.close().await;
        // Drop the handle so the dump is complete once close returns.
        self.file.lock().await.take();
        result
    }
}
