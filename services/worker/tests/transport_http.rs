#![cfg(unix)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use codec::Codec;
use worker::compress::CompressContext;
use worker::shard::ShardState;
use worker::transport::{WorkerRuntime, serve_on};

fn temp_data_dir(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "worker-http-{tag}-{}-{}",
        std::process::id(),
        nanos
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn write_stub_codec(dir: &Path, script_body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("stub-codec");
    std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n"))
        .expect("stub codec should be writable");
    let mut perms = std::fs::metadata(&path)
        .expect("stub codec metadata")
        .permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("stub codec should be executable");
    path
}

async fn spawn_worker(data_dir: &Path, codec_program: &Path, dictionary_url: &str) -> SocketAddr {
    let shard = ShardState::new(data_dir.join("chunks")).expect("shard dir should be creatable");
    let compress = CompressContext::new(
        Codec::new(codec_program, data_dir.join("archive.mylp")).with_work_dir(data_dir),
        data_dir.join("variables.json"),
        data_dir.join("dictionaries.json"),
        dictionary_url.to_string(),
    );
    let runtime = Arc::new(WorkerRuntime::new(
        shard,
        compress,
        data_dir.join("output"),
        "output_from_test".to_string(),
    ));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port should bind");
    let addr = listener.local_addr().expect("bound listener has an address");
    tokio::spawn(async move {
        let _ = serve_on(runtime, listener).await;
    });
    addr
}

async fn spawn_dictionary() -> SocketAddr {
    let store = Arc::new(
        dictstore::DictionaryStore::open_in_memory().expect("dictionary store should open"),
    );
    let state = dictionary::transport::AppState::new(
        store,
        std::env::temp_dir().join(format!(
            "worker-http-dict-snapshot-{}-{}.json",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock should be monotonic")
                .as_nanos()
        )),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port should bind");
    let addr = listener.local_addr().expect("bound listener has an address");
    tokio::spawn(async move {
        let _ = dictionary::transport::serve_on(state, listener).await;
    });
    addr
}

#[tokio::test]
async fn serves_on_an_all_interfaces_bind() {
    let data_dir = temp_data_dir("bind");
    let shard = ShardState::new(data_dir.join("chunks")).expect("shard dir should be creatable");
    let compress = CompressContext::new(
        Codec::new("/nonexistent", data_dir.join("archive.mylp")),
        data_dir.join("variables.json"),
        data_dir.join("dictionaries.json"),
        "http://unused".to_string(),
    );
    let runtime = Arc::new(WorkerRuntime::new(
        shard,
        compress,
        data_dir.join("output"),
        "output_from_test".to_string(),
    ));
    // The deployed worker listens on all interfaces so a remote
    // dispatcher can reach it.
    let listener = tokio::net::TcpListener::bind("0.0.0.0:0")
        .await
        .expect("all-interfaces bind should succeed");
    let port = listener
        .local_addr()
        .expect("bound listener has an address")
        .port();
    tokio::spawn(async move {
        let _ = serve_on(runtime, listener).await;
    });

    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .expect("health should reach the worker");
    assert_eq!(response.status(), 200);
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn receive_chunk_persists_body_under_sequence_name() {
    let data_dir = temp_data_dir("receive");
    let addr = spawn_worker(&data_dir, Path::new("/nonexistent"), "http://unused").await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/receive-chunk"))
        .header("X-Sequence", "5")
        .header("X-Filename", "app.log")
        .body("line-a\nline-b")
        .send()
        .await
        .expect("receive should reach the worker");
    assert_eq!(response.status(), 200);

    let chunk = data_dir.join("chunks/app_log_5");
    assert_eq!(
        std::fs::read_to_string(&chunk).expect("chunk file should exist"),
        "line-a\nline-b"
    );
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn receive_chunk_without_required_headers_mutates_nothing() {
    let data_dir = temp_data_dir("receive-reject");
    let addr = spawn_worker(&data_dir, Path::new("/nonexistent"), "http://unused").await;
    let client = reqwest::Client::new();

    let missing_filename = client
        .post(format!("http://{addr}/receive-chunk"))
        .header("X-Sequence", "1")
        .body("data")
        .send()
        .await
        .expect("request should reach the worker");
    assert_eq!(missing_filename.status(), 400);

    let blank_sequence = client
        .post(format!("http://{addr}/receive-chunk"))
        .header("X-Sequence", "  ")
        .header("X-Filename", "app.log")
        .body("data")
        .send()
        .await
        .expect("request should reach the worker");
    assert_eq!(blank_sequence.status(), 400);

    let non_numeric = client
        .post(format!("http://{addr}/receive-chunk"))
        .header("X-Sequence", "seven")
        .header("X-Filename", "app.log")
        .body("data")
        .send()
        .await
        .expect("request should reach the worker");
    assert_eq!(non_numeric.status(), 400);

    let entries: Vec<_> = std::fs::read_dir(data_dir.join("chunks"))
        .expect("shard dir should exist")
        .collect();
    assert!(entries.is_empty(), "rejected receives must not write files");
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn search_strips_source_labels_from_codec_output() {
    let data_dir = temp_data_dir("search");
    let program = write_stub_codec(
        &data_dir,
        r#"echo "shard1: ERROR disk full"
echo "shard1: ERROR cpu pegged""#,
    );
    let addr = spawn_worker(&data_dir, &program, "http://unused").await;

    let body = reqwest::Client::new()
        .post(format!("http://{addr}/search"))
        .body("ERROR")
        .send()
        .await
        .expect("search should reach the worker")
        .text()
        .await
        .expect("search response should have a body");
    assert_eq!(body, "ERROR disk full\nERROR cpu pegged");
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn search_codec_failure_surfaces_diagnostic() {
    let data_dir = temp_data_dir("search-fail");
    let program = write_stub_codec(&data_dir, "echo 'archive missing' >&2; exit 2");
    let addr = spawn_worker(&data_dir, &program, "http://unused").await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/search"))
        .body("ERROR")
        .send()
        .await
        .expect("search should reach the worker");
    assert_eq!(response.status(), 500);
    let body = response.text().await.expect("error body should read");
    assert!(body.contains("archive missing"));
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn decompress_streams_zip_bundle_and_removes_reconstruction_dir() {
    let data_dir = temp_data_dir("decompress");
    let program = write_stub_codec(
        &data_dir,
        r#"case "$1" in
decompress)
  mkdir -p "$3"
  printf 'alpha' > "$3/app_0"
  printf 'beta' > "$3/app_2"
  ;;
*) exit 7 ;;
esac"#,
    );
    let addr = spawn_worker(&data_dir, &program, "http://unused").await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/decompress"))
        .send()
        .await
        .expect("decompress should reach the worker");
    assert_eq!(response.status(), 200);
    let disposition = response
        .headers()
        .get("content-disposition")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    assert_eq!(
        disposition,
        "attachment; filename=\"output_from_test.zip\""
    );

    let bytes = response.bytes().await.expect("bundle body should read");
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec()))
        .expect("bundle should be a readable zip");
    assert_eq!(archive.len(), 2);
    let mut body = String::new();
    std::io::Read::read_to_string(
        &mut archive.by_name("app_2").expect("entry should open"),
        &mut body,
    )
    .expect("entry should read");
    assert_eq!(body, "beta");

    assert!(
        !data_dir.join("output").exists(),
        "reconstruction dir must be deleted after bundling"
    );
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn compress_cycle_syncs_dictionary_and_clears_shard() {
    let data_dir = temp_data_dir("compress");
    let dictionary_addr = spawn_dictionary().await;
    let snapshot = data_dir.join("dictionaries.json");
    // Pass 1 emits the candidate side file relative to the codec's
    // working directory; pass 2 requires the snapshot side file DictSync
    // persisted in between, at the same relative location.
    let program = write_stub_codec(
        &data_dir,
        r#"case "$1" in
compress-pass1)
  printf '{"templates":["ERROR %%s"],"variables":["17"],"files":["app.log"]}' > variables.json
  ;;
compress-pass2)
  test -f dictionaries.json || exit 9
  ;;
*) exit 7 ;;
esac"#,
    );
    let addr = spawn_worker(&data_dir, &program, &format!("http://{dictionary_addr}")).await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/receive-chunk"))
        .header("X-Sequence", "0")
        .header("X-Filename", "app.log")
        .body("ERROR 17")
        .send()
        .await
        .expect("receive should reach the worker");

    let response = client
        .get(format!("http://{addr}/compress"))
        .send()
        .await
        .expect("compress should reach the worker");
    assert_eq!(response.status(), 200);

    let snapshot_raw =
        std::fs::read_to_string(&snapshot).expect("snapshot side file should be persisted");
    let snapshot_map: protocol::GlobalDictionary =
        serde_json::from_str(&snapshot_raw).expect("snapshot side file should parse");
    assert!(snapshot_map["templates"].contains_key("ERROR %s"));
    assert!(snapshot_map["variables"].contains_key("17"));
    assert!(snapshot_map["files"].contains_key("app.log"));

    let leftover: Vec<_> = std::fs::read_dir(data_dir.join("chunks"))
        .expect("shard dir should remain")
        .collect();
    assert!(leftover.is_empty(), "cleanup must clear the shard directory");
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn compress_cycle_on_empty_shard_succeeds_repeatedly() {
    let data_dir = temp_data_dir("compress-empty");
    let dictionary_addr = spawn_dictionary().await;
    let program = write_stub_codec(
        &data_dir,
        r#"case "$1" in
compress-pass1)
  printf '{"templates":[],"variables":[],"files":[]}' > variables.json
  ;;
compress-pass2) ;;
*) exit 7 ;;
esac"#,
    );
    let addr = spawn_worker(&data_dir, &program, &format!("http://{dictionary_addr}")).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .get(format!("http://{addr}/compress"))
            .send()
            .await
            .expect("compress should reach the worker");
        assert_eq!(response.status(), 200);
    }

    // No spurious dictionary entries from the empty cycles.
    let snapshot: protocol::GlobalDictionary = client
        .get(format!("http://{dictionary_addr}/getGlobalDictionary"))
        .send()
        .await
        .expect("snapshot read should reach the dictionary")
        .json()
        .await
        .expect("snapshot should parse");
    assert!(snapshot["templates"].is_empty());
    assert!(snapshot["variables"].is_empty());
    assert!(snapshot["files"].is_empty());
    std::fs::remove_dir_all(&data_dir).ok();
}

#[tokio::test]
async fn compress_cycle_failure_leaves_shard_intact() {
    let data_dir = temp_data_dir("compress-fail");
    let program = write_stub_codec(&data_dir, "echo 'pass1 exploded' >&2; exit 1");
    let addr = spawn_worker(&data_dir, &program, "http://unused").await;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{addr}/receive-chunk"))
        .header("X-Sequence", "0")
        .header("X-Filename", "app.log")
        .body("payload")
        .send()
        .await
        .expect("receive should reach the worker");

    let response = client
        .get(format!("http://{addr}/compress"))
        .send()
        .await
        .expect("compress should reach the worker");
    assert_eq!(response.status(), 500);

    let leftover: Vec<_> = std::fs::read_dir(data_dir.join("chunks"))
        .expect("shard dir should remain")
        .collect();
    assert_eq!(leftover.len(), 1, "failed cycle must not clear the shard");
    std::fs::remove_dir_all(&data_dir).ok();
}
