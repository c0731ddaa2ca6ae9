//! The two-phase compress cycle:
//! `AwaitingDrain -> Pass1 -> DictSync -> Pass2 -> Cleanup`.
//!
//! Pass 1 emits the candidate dictionary side file; DictSync trades it for
//! the global snapshot; pass 2 rewrites candidate ids to confirmed global
//! ids. A failure anywhere before cleanup leaves the shard directory
//! untouched, so the whole cycle can be re-attempted. DictSync is never
//! retried automatically: re-running it only re-confirms existing ids.

use std::path::PathBuf;

use codec::{Codec, CodecError};
use protocol::{DictionaryUpload, UPLOAD_PATH};
use thiserror::Error;
use tracing::info;

use crate::shard::ShardState;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("failed reading candidate dictionary '{path}': {source}")]
    CandidateRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("candidate dictionary '{path}' is not valid JSON: {source}")]
    CandidateParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("dictionary service request failed: {0}")]
    DictionaryTransport(#[from] reqwest::Error),
    #[error("dictionary service rejected upload with status {0}")]
    DictionaryStatus(u16),
    #[error("failed persisting global snapshot '{path}': {source}")]
    SnapshotWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed clearing shard directory: {0}")]
    Cleanup(std::io::Error),
    #[error("codec task was cancelled")]
    TaskCancelled,
}

pub struct CompressContext {
    codec: Codec,
    candidate_path: PathBuf,
    snapshot_path: PathBuf,
    dictionary_base_url: String,
    client: reqwest::Client,
}

impl CompressContext {
    pub fn new(
        codec: Codec,
        candidate_path: PathBuf,
        snapshot_path: PathBuf,
        dictionary_base_url: String,
    ) -> Self {
        Self {
            codec,
            candidate_path,
            snapshot_path,
            dictionary_base_url: dictionary_base_url
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub async fn run_cycle(&self, shard: &ShardState) -> Result<(), CompressError> {
        // AwaitingDrain: no chunk write may race the codec's directory scan.
        shard.drain_writes().await;

        let codec = self.codec.clone();
        let shard_dir = shard.shard_dir().to_path_buf();
        run_blocking(move || codec.compress_pass1(&shard_dir)).await??;

        self.sync_dictionary().await?;

        let codec = self.codec.clone();
        let shard_dir = shard.shard_dir().to_path_buf();
        run_blocking(move || codec.compress_pass2(&shard_dir)).await??;

        shard.clear().map_err(CompressError::Cleanup)?;
        info!(archive = %self.codec.archive_path().display(), "compress cycle complete");
        Ok(())
    }

    /// DictSync: candidate side file -> `/upload` -> snapshot side file.
    async fn sync_dictionary(&self) -> Result<(), CompressError> {
        let raw = tokio::fs::read(&self.candidate_path).await.map_err(|source| {
            CompressError::CandidateRead {
                path: self.candidate_path.display().to_string(),
                source,
            }
        })?;
        // Parse before uploading so a corrupt side file fails locally
        // instead of as a dictionary service rejection.
        let upload: DictionaryUpload =
            serde_json::from_slice(&raw).map_err(|source| CompressError::CandidateParse {
                path: self.candidate_path.display().to_string(),
                source,
            })?;

        let response = self
            .client
            .post(format!("{}{UPLOAD_PATH}", self.dictionary_base_url))
            .header("content-type", "application/json")
            .json(&upload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CompressError::DictionaryStatus(response.status().as_u16()));
        }
        let snapshot = response.bytes().await?;
        tokio::fs::write(&self.snapshot_path, &snapshot)
            .await
            .map_err(|source| CompressError::SnapshotWrite {
                path: self.snapshot_path.display().to_string(),
                source,
            })
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, CompressError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|_| CompressError::TaskCancelled)
}

impl CompressError {
    /// Everything in the cycle is a server-side failure.
    pub fn status(&self) -> u16 {
        500
    }
}
