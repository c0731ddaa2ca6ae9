pub mod distribute;
pub mod reassemble;
pub mod search;
pub mod settings;
pub mod split;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed reading source file '{path}': {source}")]
    SourceIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed reading settings file '{path}': {source}")]
    SettingsIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("settings file '{path}' is not a JSON object of worker urls: {source}")]
    SettingsParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no worker endpoints configured")]
    NoWorkers,
    #[error("output io error at '{path}': {source}")]
    OutputIo {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one fan-out phase. Failed legs never abort siblings; they
/// are counted so the operator can see partial coverage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DeliveryReport {
    pub fn observe(&mut self, ok: bool) {
        if ok {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}
