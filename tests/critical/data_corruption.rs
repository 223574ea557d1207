//! Corrupt index databases and cache entries whose backing file changed.

use ingester_core::Database;
use ingester_core::db::DbError;
use ingester_core::ingest::RemoteFileRequest;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::support::socket_guard::{socket_skip_return, start_mock_server_or_skip};
use crate::support::{fast_settings, open_ingestor};

#[tokio::test]
async fn p0_corrupted_database_open_fails() {
    let temp_dir = TempDir::new().expect("temp dir");
    let db_path = temp_dir.path().join("index.sqlite");
    std::fs::write(&db_path, b"not a valid sqlite file\x00\x00\x00").expect("write");

    let result = Database::new(&db_path).await;

    let err = result.expect_err("opening corrupted DB should fail");
    assert!(
        matches!(&err, DbError::Connection(_) | DbError::Migration(_)),
        "expected DbError::Connection or DbError::Migration, got {err:?}"
    );
}

#[tokio::test]
async fn p0_valid_database_wal_enabled() {
    let temp_dir = TempDir::new().expect("temp dir");
    let db = Database::new(&temp_dir.path().join("good.sqlite"))
        .await
        .expect("create valid db");
    assert!(db.is_wal_enabled().await.expect("pragma journal_mode"));
}

#[tokio::test]
async fn p0_deleted_cache_file_is_refetched() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/asset.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"asset body".to_vec()))
        .expect(2)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
    let request = RemoteFileRequest::new(format!("{}/asset.bin", mock_server.uri()));

    let first = ingestor.ingest_remote(&request).await.expect("first");
    std::fs::remove_file(&first.absolute_path).expect("delete cached file");
    let second = ingestor.ingest_remote(&request).await.expect("refetch");

    assert_eq!(first.absolute_path, second.absolute_path);
    assert_eq!(std::fs::read(&second.absolute_path).unwrap(), b"asset body");
    assert_eq!(ingestor.cache().stats().evictions(), 1);
    assert_eq!(ingestor.coordinator().stats().attempts(), 2);
}

#[tokio::test]
async fn p0_truncated_cache_file_is_refetched() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return socket_skip_return();
    };
    Mock::given(method("GET"))
        .and(path("/asset.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"full asset body".to_vec()))
        .expect(2)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
    let request = RemoteFileRequest::new(format!("{}/asset.bin", mock_server.uri()));

    let first = ingestor.ingest_remote(&request).await.expect("first");
    std::fs::write(&first.absolute_path, b"full").expect("truncate");
    let second = ingestor.ingest_remote(&request).await.expect("refetch");

    assert_eq!(std::fs::read(&second.absolute_path).unwrap(), b"full asset body");
    assert_eq!(second.size_bytes, 15);
}
