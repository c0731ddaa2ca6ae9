//! Decompress fan-out and sequence-ordered reassembly.
//!
//! Each worker returns a zip bundle of reconstructed chunk files. Bundles
//! are unpacked into worker-labeled directories (entries that would
//! escape the directory are rejected), then the combined tree is scanned
//! for `{base}_{number}` files which are concatenated per base in
//! ascending number order. Correctness rests on every sequence number
//! existing exactly once across workers; no completeness check is made.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use protocol::{DECOMPRESS_PATH, parse_chunk_file_name, sanitize_path_component};
use tracing::{info, warn};

use crate::{DeliveryReport, DispatchError};

pub async fn decompress_all(
    client: &reqwest::Client,
    workers: &[String],
    work_dir: &Path,
    out_dir: &Path,
) -> Result<(DeliveryReport, Vec<String>), DispatchError> {
    if workers.is_empty() {
        return Err(DispatchError::NoWorkers);
    }
    std::fs::create_dir_all(work_dir).map_err(|e| DispatchError::OutputIo {
        path: work_dir.display().to_string(),
        source: e,
    })?;

    let mut legs = Vec::new();
    for worker in workers {
        let client = client.clone();
        let url = format!("{worker}{DECOMPRESS_PATH}");
        let worker = worker.clone();
        let work_dir = work_dir.to_path_buf();
        legs.push(tokio::spawn(async move {
            let response = match client.get(&url).send().await {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    warn!(worker = %worker, status = response.status().as_u16(), "decompress rejected");
                    return false;
                }
                Err(err) => {
                    warn!(worker = %worker, "decompress request failed: {err}");
                    return false;
                }
            };
            let label = response
                .headers()
                .get("content-disposition")
                .and_then(|value| value.to_str().ok())
                .and_then(parse_attachment_label)
                .unwrap_or_else(|| format!("output_from_{}", sanitize_path_component(&worker)));
            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(worker = %worker, "decompress body read failed: {err}");
                    return false;
                }
            };
            let target = work_dir.join(sanitize_path_component(&label));
            let unpacked = tokio::task::spawn_blocking(move || {
                unpack_bundle(&bytes, &target)
            })
            .await;
            match unpacked {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    warn!(worker = %worker, "bundle unpack failed: {err}");
                    false
                }
                Err(_) => false,
            }
        }));
    }

    let mut report = DeliveryReport::default();
    for handle in legs {
        match handle.await {
            Ok(ok) => report.observe(ok),
            Err(_) => report.observe(false),
        }
    }

    let bases = reassemble_tree(work_dir, out_dir)?;
    info!(
        delivered = report.delivered,
        failed = report.failed,
        files = bases.len(),
        "decompress reassembly complete"
    );
    Ok((report, bases))
}

/// Extracts the `filename="<label>.zip"` hint from a Content-Disposition
/// value, minus the `.zip` suffix.
pub fn parse_attachment_label(disposition: &str) -> Option<String> {
    let (_, suffix) = disposition.split_once("filename=\"")?;
    let (name, _) = suffix.split_once('"')?;
    let label = name.strip_suffix(".zip").unwrap_or(name);
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

/// Unpacks a zip bundle under `target`, rejecting any entry whose
/// resolved path would land outside it.
pub fn unpack_bundle(bytes: &[u8], target: &Path) -> Result<(), String> {
    std::fs::create_dir_all(target)
        .map_err(|e| format!("failed creating '{}': {e}", target.display()))?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| format!("unreadable zip bundle: {e}"))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| format!("unreadable zip entry {index}: {e}"))?;
        // Traversal guard: entries naming absolute or parent paths are
        // dropped, not errors, so one hostile entry cannot hide the rest.
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = entry.name(), "rejecting zip entry escaping unpack dir");
            continue;
        };
        let dest = target.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&dest)
                .map_err(|e| format!("failed creating '{}': {e}", dest.display()))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed creating '{}': {e}", parent.display()))?;
        }
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| format!("failed reading zip entry '{}': {e}", entry.name()))?;
        std::fs::write(&dest, contents)
            .map_err(|e| format!("failed writing '{}': {e}", dest.display()))?;
    }
    Ok(())
}

/// Groups `{base}_{number}` files under `scan_root` by base, sorts each
/// group by number ascending, and concatenates the group into
/// `{out_dir}/{base}`. Returns the bases written, sorted.
pub fn reassemble_tree(scan_root: &Path, out_dir: &Path) -> Result<Vec<String>, DispatchError> {
    let mut groups: BTreeMap<String, Vec<(u64, PathBuf)>> = BTreeMap::new();
    collect_chunk_files(scan_root, &mut groups).map_err(|e| DispatchError::OutputIo {
        path: scan_root.display().to_string(),
        source: e,
    })?;

    std::fs::create_dir_all(out_dir).map_err(|e| DispatchError::OutputIo {
        path: out_dir.display().to_string(),
        source: e,
    })?;

    let mut bases = Vec::new();
    for (base, mut parts) in groups {
        parts.sort_by_key(|(number, _)| *number);
        let out_path = out_dir.join(&base);
        let mut out = std::fs::File::create(&out_path).map_err(|e| DispatchError::OutputIo {
            path: out_path.display().to_string(),
            source: e,
        })?;
        for (_, path) in parts {
            let contents = std::fs::read(&path).map_err(|e| DispatchError::OutputIo {
                path: path.display().to_string(),
                source: e,
            })?;
            out.write_all(&contents).map_err(|e| DispatchError::OutputIo {
                path: out_path.display().to_string(),
                source: e,
            })?;
        }
        bases.push(base);
    }
    Ok(bases)
}

fn collect_chunk_files(
    dir: &Path,
    groups: &mut BTreeMap<String, Vec<(u64, PathBuf)>>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_chunk_files(&path, groups)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if let Some((base, number)) = parse_chunk_file_name(name) {
            groups
                .entry(base.to_string())
                .or_default()
                .push((number, path.clone()));
        }
    }
    Ok(())
}
