//! Per-worker shard directory ownership.
//!
//! The shard directory is mutated only by this worker: chunk receives write
//! into it, the compress cycle reads and then clears it. The in-flight
//! write gauge is the one piece of shared mutable state inside the
//! process; compress drains it before touching the directory so a chunk
//! write can never race compression.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use protocol::chunk_file_name;
use tokio::sync::Notify;
use tracing::debug;

pub struct ShardState {
    shard_dir: PathBuf,
    inflight_writes: AtomicUsize,
    drained: Notify,
}

impl ShardState {
    pub fn new(shard_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&shard_dir)?;
        Ok(Self {
            shard_dir,
            inflight_writes: AtomicUsize::new(0),
            drained: Notify::new(),
        })
    }

    pub fn shard_dir(&self) -> &Path {
        &self.shard_dir
    }

    /// Persists one chunk as `{shard}/{base}_{sequence}`. A duplicate
    /// sequence overwrites the previous body, last-write-wins. The gauge
    /// is raised for the duration of the write, including the failure
    /// path.
    pub async fn write_chunk(
        &self,
        original_filename: &str,
        sequence: u64,
        body: &[u8],
    ) -> std::io::Result<PathBuf> {
        let path = self
            .shard_dir
            .join(chunk_file_name(original_filename, sequence));
        self.inflight_writes.fetch_add(1, Ordering::AcqRel);
        let result = tokio::fs::write(&path, body).await;
        if self.inflight_writes.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
        result?;
        debug!(path = %path.display(), "persisted chunk");
        Ok(path)
    }

    /// Join barrier: resolves once no chunk write is in progress. Writes
    /// that start afterwards are the caller's concern.
    pub async fn drain_writes(&self) {
        loop {
            let notified = self.drained.notified();
            if self.inflight_writes.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Deletes every file and subdirectory in the shard directory,
    /// keeping the directory itself.
    pub fn clear(&self) -> std::io::Result<()> {
        for entry in std::fs::read_dir(&self.shard_dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}
