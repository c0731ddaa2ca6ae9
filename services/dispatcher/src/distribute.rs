//! Chunk distribution: split the source file while streaming completed
//! chunks to workers round-robin, bounded by a counting semaphore, then
//! barrier on every send before triggering each worker's compress phase.

use std::path::Path;
use std::sync::Arc;

use protocol::{COMPRESS_PATH, HEADER_FILENAME, HEADER_SEQUENCE, RECEIVE_CHUNK_PATH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::split::{RoundRobin, Splitter};
use crate::{DeliveryReport, DispatchError};

pub const DEFAULT_CHUNK_SIZE: usize = 200;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 100;

pub struct Distributor {
    client: reqwest::Client,
    workers: Vec<String>,
    chunk_size: usize,
    max_in_flight: usize,
}

impl Distributor {
    pub fn new(workers: Vec<String>, chunk_size: usize, max_in_flight: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            workers,
            chunk_size,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Splits `source` into chunks and delivers them. Every completed
    /// chunk is submitted as its own bounded task; the final partial
    /// chunk goes out synchronously after the read loop; then the join
    /// barrier collects every send before compress triggers fire.
    pub async fn distribute_file(&self, source: &Path) -> Result<DeliveryReport, DispatchError> {
        if self.workers.is_empty() {
            return Err(DispatchError::NoWorkers);
        }
        let source_name = source.to_string_lossy().into_owned();
        let file = tokio::fs::File::open(source)
            .await
            .map_err(|e| DispatchError::SourceIo {
                path: source_name.clone(),
                source: e,
            })?;

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut splitter = Splitter::new(self.chunk_size);
        let mut round_robin = RoundRobin::new(self.workers.len());
        let mut sends: Vec<JoinHandle<bool>> = Vec::new();

        let mut lines = BufReader::new(file).lines();
        loop {
            let line = lines.next_line().await.map_err(|e| DispatchError::SourceIo {
                path: source_name.clone(),
                source: e,
            })?;
            let Some(line) = line else { break };
            if let Some(chunk) = splitter.push(line) {
                let worker = self.workers[round_robin.next_index()].clone();
                // acquire_owned only fails on a closed semaphore, and
                // this one is never closed.
                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                let client = self.client.clone();
                let filename = source_name.clone();
                sends.push(tokio::spawn(async move {
                    let ok =
                        send_chunk(&client, &worker, chunk.sequence, &filename, chunk.payload)
                            .await;
                    drop(permit);
                    ok
                }));
            }
        }

        let mut report = DeliveryReport::default();
        // The final partial chunk is sent synchronously, outside the
        // bounded phase.
        if let Some(chunk) = splitter.finish() {
            let worker = &self.workers[round_robin.next_index()];
            report.observe(
                send_chunk(
                    &self.client,
                    worker,
                    chunk.sequence,
                    &source_name,
                    chunk.payload,
                )
                .await,
            );
        }

        for handle in sends {
            match handle.await {
                Ok(ok) => report.observe(ok),
                Err(_) => report.observe(false),
            }
        }
        info!(
            delivered = report.delivered,
            failed = report.failed,
            "chunk distribution complete"
        );
        Ok(report)
    }

    /// One compress trigger per worker, concurrent and unordered; a
    /// failed trigger is logged and does not block the others.
    pub async fn trigger_compress(&self) -> DeliveryReport {
        let mut triggers = Vec::new();
        for worker in &self.workers {
            let client = self.client.clone();
            let url = format!("{worker}{COMPRESS_PATH}");
            let worker = worker.clone();
            triggers.push(tokio::spawn(async move {
                match client.get(&url).send().await {
                    Ok(response) if response.status().is_success() => true,
                    Ok(response) => {
                        warn!(worker = %worker, status = response.status().as_u16(), "compress trigger rejected");
                        false
                    }
                    Err(err) => {
                        warn!(worker = %worker, "compress trigger failed: {err}");
                        false
                    }
                }
            }));
        }
        let mut report = DeliveryReport::default();
        for handle in triggers {
            match handle.await {
                Ok(ok) => report.observe(ok),
                Err(_) => report.observe(false),
            }
        }
        report
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }
}

async fn send_chunk(
    client: &reqwest::Client,
    worker: &str,
    sequence: u64,
    original_filename: &str,
    payload: String,
) -> bool {
    let url = format!("{worker}{RECEIVE_CHUNK_PATH}");
    let result = client
        .post(&url)
        .header(HEADER_SEQUENCE, sequence.to_string())
        .header(HEADER_FILENAME, original_filename)
        .body(payload)
        .send()
        .await;
    match result {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            warn!(
                worker,
                sequence,
                status = response.status().as_u16(),
                "chunk rejected"
            );
            false
        }
        Err(err) => {
            warn!(worker, sequence, "chunk send failed: {err}");
            false
        }
    }
}
