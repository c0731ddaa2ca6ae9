//! Invocation wrapper for the external line-template codec binary.
//!
//! The codec owns the archive format; this crate only shells out to its
//! subcommands and maps nonzero exits onto errors carrying the codec's
//! stderr diagnostics. All invocations block; callers on an async runtime
//! run them on the blocking pool.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to launch codec '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("codec {subcommand} failed{}", render_diagnostic(.diagnostic))]
    Failed {
        subcommand: &'static str,
        diagnostic: String,
    },
}

fn render_diagnostic(diagnostic: &str) -> String {
    if diagnostic.is_empty() {
        String::new()
    } else {
        format!(": {diagnostic}")
    }
}

impl CodecError {
    /// The codec's own stderr text, when the failure produced any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::Launch { .. } => None,
            Self::Failed { diagnostic, .. } => {
                if diagnostic.is_empty() {
                    None
                } else {
                    Some(diagnostic)
                }
            }
        }
    }
}

/// Handle to the codec binary plus the archive it operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    program: PathBuf,
    archive_path: PathBuf,
    work_dir: Option<PathBuf>,
}

impl Codec {
    pub fn new(program: impl Into<PathBuf>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            archive_path: archive_path.into(),
            work_dir: None,
        }
    }

    /// Pins the codec subprocess's working directory. The codec reads and
    /// writes its dictionary side files relative to its working directory,
    /// so callers that keep those side files anywhere but their own cwd
    /// must set this to the same directory.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Pass 1: scan the shard directory into an archive skeleton and emit
    /// the candidate dictionary side file.
    pub fn compress_pass1(&self, shard_dir: &Path) -> Result<(), CodecError> {
        self.run_status("compress-pass1", &[&self.archive_path, shard_dir])
    }

    /// Pass 2: rewrite the skeleton's candidate ids using the global
    /// snapshot side file, finalizing the archive.
    pub fn compress_pass2(&self, shard_dir: &Path) -> Result<(), CodecError> {
        self.run_status("compress-pass2", &[&self.archive_path, shard_dir])
    }

    /// Reconstructs per-chunk files from the archive into `out_dir`.
    pub fn decompress(&self, out_dir: &Path) -> Result<(), CodecError> {
        self.run_status("decompress", &[&self.archive_path, out_dir])
    }

    /// Runs the codec's search stage and returns its raw stdout. Each match
    /// line is prefixed `<label>: ` by the codec; see
    /// [`strip_source_labels`].
    pub fn search(&self, query: &str) -> Result<String, CodecError> {
        let mut command = Command::new(&self.program);
        command.arg("search").arg(&self.archive_path).arg(query);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|source| CodecError::Launch {
            program: self.program.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(CodecError::Failed {
                subcommand: "search",
                diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn run_status(&self, subcommand: &'static str, args: &[&Path]) -> Result<(), CodecError> {
        debug!(codec = %self.program.display(), subcommand, "invoking codec");
        let mut command = Command::new(&self.program);
        command.arg(subcommand).args(args);
        if let Some(dir) = &self.work_dir {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|source| CodecError::Launch {
            program: self.program.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(CodecError::Failed {
                subcommand,
                diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Strips the codec's `<label>: ` provenance prefix from every search line,
/// keeping only matched content. Lines without the separator carry no match
/// and are dropped, so workers return content with no per-node labels.
pub fn strip_source_labels(raw: &str) -> String {
    let cleaned: Vec<&str> = raw
        .lines()
        .filter_map(|line| line.split_once(": ").map(|(_, rest)| rest))
        .collect();
    cleaned.join("\n")
}
