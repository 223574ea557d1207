//! State left behind by a previous run: cache index, partial files.

use ingester_core::ingest::{BufferRequest, RemoteFileRequest};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::{socket_skip_return, start_mock_server_or_skip};
use crate::support::{fast_settings, leftover_partials, open_ingestor};

#[tokio::test]
async fn p0_cache_entries_persist_after_reopen() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/persist.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 body".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let request = RemoteFileRequest::new(format!("{}/persist.pdf", mock_server.uri()));

    let first_path = {
        let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
        let record = ingestor.ingest_remote(&request).await.expect("first run");
        ingestor.close().await;
        record.absolute_path
    };

    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
    let record = ingestor.ingest_remote(&request).await.expect("second run");

    assert_eq!(record.absolute_path, first_path);
    assert_eq!(record.name, "persist");
    assert_eq!(record.extension, "pdf");
    assert_eq!(ingestor.coordinator().stats().attempts(), 0);
}

#[tokio::test]
async fn p0_partial_files_are_swept_on_open() {
    let temp_dir = TempDir::new().expect("temp dir");
    let staging = temp_dir.path().join("cache").join(".tmp");
    std::fs::create_dir_all(&staging).expect("mkdir");
    for i in 0..3 {
        std::fs::write(staging.join(format!("0123abcd-999-{i}.part")), b"half").expect("write");
    }

    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    assert!(leftover_partials(temp_dir.path()).is_empty());
    // The cache still works after the sweep.
    ingestor
        .ingest_buffer(&BufferRequest::new(b"after sweep".to_vec()))
        .await
        .expect("ingest");
}

#[tokio::test]
async fn p0_buffer_entry_reused_after_reopen() {
    let temp_dir = TempDir::new().expect("temp dir");
    let request = BufferRequest::new(b"durable".to_vec()).with_name("durable");

    let first = {
        let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
        let record = ingestor.ingest_buffer(&request).await.expect("first");
        ingestor.close().await;
        record
    };
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
    let second = ingestor.ingest_buffer(&request).await.expect("second");

    assert_eq!(first.absolute_path, second.absolute_path);
    assert_eq!(ingestor.cache().stats().writes(), 0);
    assert_eq!(ingestor.cache().stats().hits(), 1);
}
