//! Search fan-out: the query goes to every worker at once and each
//! successful response body is appended to a shared results file. The
//! file is append-mode and mutex-guarded so concurrent legs never
//! interleave partial writes; ordering across workers is whatever the
//! network produced.

use std::path::Path;
use std::sync::Arc;

use protocol::SEARCH_PATH;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{DeliveryReport, DispatchError};

pub async fn search_all(
    client: &reqwest::Client,
    workers: &[String],
    query: &str,
    output_path: &Path,
) -> Result<DeliveryReport, DispatchError> {
    if workers.is_empty() {
        return Err(DispatchError::NoWorkers);
    }
    let output = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_path)
        .await
        .map_err(|e| DispatchError::OutputIo {
            path: output_path.display().to_string(),
            source: e,
        })?;
    let output = Arc::new(Mutex::new(output));

    let mut legs = Vec::new();
    for worker in workers {
        let client = client.clone();
        let url = format!("{worker}{SEARCH_PATH}");
        let worker = worker.clone();
        let query = query.to_string();
        let output = Arc::clone(&output);
        legs.push(tokio::spawn(async move {
            let body = match client.post(&url).body(query).send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(body) => body,
                    Err(err) => {
                        warn!(worker = %worker, "search body read failed: {err}");
                        return false;
                    }
                },
                Ok(response) => {
                    warn!(worker = %worker, status = response.status().as_u16(), "search rejected");
                    return false;
                }
                Err(err) => {
                    warn!(worker = %worker, "search request failed: {err}");
                    return false;
                }
            };
            let mut file = output.lock().await;
            if let Err(err) = file.write_all(body.as_bytes()).await {
                warn!(worker = %worker, "search result write failed: {err}");
                return false;
            }
            if let Err(err) = file.write_all(b"\n").await {
                warn!(worker = %worker, "search result write failed: {err}");
                return false;
            }
            if let Err(err) = file.flush().await {
                warn!(worker = %worker, "search result flush failed: {err}");
                return false;
            }
            true
        }));
    }

    let mut report = DeliveryReport::default();
    for handle in legs {
        match handle.await {
            Ok(ok) => report.observe(ok),
            Err(_) => report.observe(false),
        }
    }
    info!(
        delivered = report.delivered,
        failed = report.failed,
        output = %output_path.display(),
        "search fan-out complete"
    );
    Ok(report)
}
