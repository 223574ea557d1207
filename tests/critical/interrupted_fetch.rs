//! Dropping an in-flight fetch releases its slot and removes its partial file.

use std::time::Duration;

use ingester_core::ingest::RemoteFileRequest;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::{
    should_skip_socket_bound_test, socket_skip_return, start_mock_server_or_skip,
};
use crate::support::{Misbehavior, RawServer, fast_settings, leftover_partials, open_ingestor};

#[tokio::test]
async fn p0_aborted_fetch_leaves_no_partial_and_frees_slot() {
    if should_skip_socket_bound_test() {
        return socket_skip_return();
    }
    let server = RawServer::start(Misbehavior::StallAfter {
        declared: 1024,
        sent: 10,
    })
    .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, emitter) = open_ingestor(temp_dir.path(), fast_settings(1)).await;

    let aborted = tokio::time::timeout(
        Duration::from_millis(300),
        ingestor.ingest_remote(&RemoteFileRequest::new(server.url("/hang.bin"))),
    )
    .await;

    assert!(aborted.is_err(), "fetch should still be waiting on the stalled body");
    assert_eq!(ingestor.coordinator().in_flight(), 0);
    assert!(leftover_partials(temp_dir.path()).is_empty());
    assert!(emitter.records().is_empty());

    // The single slot is free again.
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/next.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"next".to_vec()))
        .mount(&mock_server)
        .await;
    let record = tokio::time::timeout(
        Duration::from_secs(5),
        ingestor.ingest_remote(&RemoteFileRequest::new(format!("{}/next.txt", mock_server.uri()))),
    )
    .await
    .expect("slot was not released")
    .expect("ingest");
    assert_eq!(record.size_bytes, 4);
}
