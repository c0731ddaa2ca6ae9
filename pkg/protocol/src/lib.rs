use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// HTTP contract
// ---------------------------------------------------------------------------

/// Header carrying the dispatcher-assigned global chunk sequence number.
pub const HEADER_SEQUENCE: &str = "x-sequence";
/// Header carrying the source file name a chunk was split from.
pub const HEADER_FILENAME: &str = "x-filename";

pub const RECEIVE_CHUNK_PATH: &str = "/receive-chunk";
pub const COMPRESS_PATH: &str = "/compress";
pub const DECOMPRESS_PATH: &str = "/decompress";
pub const SEARCH_PATH: &str = "/search";
pub const UPLOAD_PATH: &str = "/upload";
pub const GLOBAL_DICTIONARY_PATH: &str = "/getGlobalDictionary";

// ---------------------------------------------------------------------------
// Dictionary wire types
// ---------------------------------------------------------------------------

/// Candidate dictionary produced by codec pass 1 on one worker's shard and
/// uploaded to the dictionary service for global reconciliation. Lists may
/// contain duplicates and previously-seen values; the service deduplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryUpload {
    #[serde(default)]
    pub templates: Vec<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
}

impl DictionaryUpload {
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty() && self.variables.is_empty() && self.files.is_empty()
    }
}

/// The full `{category: {value: id}}` snapshot returned by every upload and
/// by the read-only snapshot endpoint. Always total, never a delta: a worker
/// that observes a value another worker uploaded earlier resolves it to the
/// same global id from this map.
pub type GlobalDictionary = BTreeMap<String, BTreeMap<String, i64>>;

pub const CATEGORY_TEMPLATES: &str = "templates";
pub const CATEGORY_VARIABLES: &str = "variables";
pub const CATEGORY_FILES: &str = "files";

// ---------------------------------------------------------------------------
// Chunk file naming
// ---------------------------------------------------------------------------

/// Renders the shard-directory file name for a chunk:
/// `{sanitized base}_{sequence}`.
pub fn chunk_file_name(original_filename: &str, sequence: u64) -> String {
    format!("{}_{}", sanitize_path_component(original_filename), sequence)
}

/// Splits a reconstructed chunk file name back into `(base, sequence)`.
/// The sequence is the suffix after the last underscore; names without a
/// numeric suffix are not chunk files and yield `None`.
pub fn parse_chunk_file_name(name: &str) -> Option<(&str, u64)> {
    let (base, seq) = name.rsplit_once('_')?;
    if base.is_empty() {
        return None;
    }
    seq.parse::<u64>().ok().map(|seq| (base, seq))
}

/// Maps an arbitrary string onto a single safe path component. Anything
/// outside `[A-Za-z0-9_-]` becomes `_`, so a header value can never name a
/// path outside the shard directory.
pub fn sanitize_path_component(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|ch| match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => ch,
            _ => '_',
        })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_file_name_round_trips_through_parse() {
        let name = chunk_file_name("app.log", 42);
        assert_eq!(name, "app_log_42");
        assert_eq!(parse_chunk_file_name(&name), Some(("app_log", 42)));
    }

    #[test]
    fn parse_chunk_file_name_rejects_non_chunk_names() {
        assert_eq!(parse_chunk_file_name("no-underscore"), None);
        assert_eq!(parse_chunk_file_name("base_notanumber"), None);
        assert_eq!(parse_chunk_file_name("_7"), None);
    }

    #[test]
    fn parse_chunk_file_name_uses_last_underscore() {
        assert_eq!(parse_chunk_file_name("a_b_3"), Some(("a_b", 3)));
    }

    #[test]
    fn sanitize_path_component_neutralizes_separators() {
        assert_eq!(sanitize_path_component("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_path_component(""), "_");
        assert_eq!(sanitize_path_component("app-2024_01.log"), "app-2024_01_log");
    }

    #[test]
    fn dictionary_upload_deserializes_with_missing_lists() {
        let upload: DictionaryUpload =
            serde_json::from_str(r#"{"templates":["ERROR %s"]}"#).expect("payload should parse");
        assert_eq!(upload.templates, vec!["ERROR %s".to_string()]);
        assert!(upload.variables.is_empty());
        assert!(upload.files.is_empty());
        assert!(!upload.is_empty());
    }
}
