//! Integration tests for remote ingestion.
//!
//! These tests drive `Ingestor::ingest_remote` against wiremock servers and
//! raw TCP servers that stall or never answer.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ingester_core::digest::content_digest;
use ingester_core::download::{DownloadError, FailureReason};
use ingester_core::ingest::{IngestError, ItemOutcome, PROGRAMMATIC_SOURCE, RemoteFileRequest};
use tempfile::TempDir;
use wiremock::matchers::{basic_auth, header, method, path};
use wiremock::{Mock, Request, Respond, ResponseTemplate};

mod support;
use support::socket_guard::{should_skip_socket_bound_test, socket_skip_return, start_mock_server_or_skip};
use support::{Misbehavior, RawServer, fast_settings, leftover_partials, open_ingestor};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

/// Fails with 503 for the first `failures` requests, then serves `body`.
struct FlakyResponder {
    failures: usize,
    seen: Arc<AtomicUsize>,
    body: &'static [u8],
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.seen.fetch_add(1, Ordering::SeqCst) < self.failures {
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.body)
        }
    }
}

fn download_error(error: IngestError) -> DownloadError {
    match error {
        IngestError::Download(error) => error,
        other => panic!("expected a download error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_full_flow_produces_record() {
    let mock_server = require_mock_server!();
    let content = b"This is the complete file content for testing.\nLine 2.";
    Mock::given(method("GET"))
        .and(path("/docs/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let url = format!("{}/docs/report.pdf", mock_server.uri());
    let record = ingestor
        .ingest_remote(&RemoteFileRequest::new(&url).with_parent("node-7"))
        .await
        .expect("ingest");

    assert_eq!(record.name, "report");
    assert_eq!(record.extension, "pdf");
    assert_eq!(record.size_bytes, content.len() as u64);
    assert_eq!(record.hash, content_digest(content));
    assert_eq!(record.url.as_deref(), Some(url.as_str()));
    assert_eq!(record.parent_node_id.as_deref(), Some("node-7"));
    assert_eq!(record.source_instance_name, PROGRAMMATIC_SOURCE);
    assert!(record.absolute_path.starts_with(ingestor.cache().root()));
    assert_eq!(std::fs::read(&record.absolute_path).unwrap(), content);
    assert_eq!(emitter.records(), vec![record]);
    assert!(leftover_partials(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_second_ingest_is_a_cache_hit_without_network() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png bytes".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
    let request = RemoteFileRequest::new(format!("{}/logo.png", mock_server.uri()));

    let first = ingestor.ingest_remote(&request).await.expect("first");
    let second = ingestor.ingest_remote(&request).await.expect("second");

    assert_eq!(first.absolute_path, second.absolute_path);
    assert_ne!(first.id, second.id);
    assert_eq!(ingestor.coordinator().stats().attempts(), 1);
    assert_eq!(ingestor.cache().stats().hits(), 1);
    assert_eq!(emitter.records().len(), 2);
}

#[tokio::test]
async fn test_fragment_does_not_change_cache_key() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/a.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let plain = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/a.txt", mock_server.uri())))
        .await
        .expect("plain");
    let anchored = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/a.txt#top", mock_server.uri())))
        .await
        .expect("anchored");

    assert_eq!(plain.absolute_path, anchored.absolute_path);
}

#[tokio::test]
async fn test_concurrent_ingests_of_one_url_fetch_once() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/big.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![7u8; 64 * 1024])
                .set_delay(Duration::from_millis(150)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, emitter) = open_ingestor(temp_dir.path(), fast_settings(8)).await;
    let request = RemoteFileRequest::new(format!("{}/big.bin", mock_server.uri()));

    let results =
        futures_util::future::join_all((0..8).map(|_| ingestor.ingest_remote(&request))).await;

    let paths: Vec<_> = results
        .into_iter()
        .map(|result| result.expect("ingest").absolute_path)
        .collect();
    assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(ingestor.coordinator().stats().attempts(), 1);
    assert_eq!(ingestor.cache().stats().writes(), 1);
    assert_eq!(emitter.records().len(), 8);
}

#[tokio::test]
async fn test_404_fails_without_retry() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let error = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/missing.pdf", mock_server.uri())))
        .await
        .expect_err("404 must fail");

    assert_eq!(error.reason(), "http_status");
    let error = download_error(error);
    assert_eq!(error.status(), Some(404));
    assert!(emitter.records().is_empty());
    assert!(leftover_partials(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_503_retries_until_exhausted() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let error = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/busy", mock_server.uri())))
        .await
        .expect_err("503 forever must fail");

    let error = download_error(error);
    assert_eq!(error.reason(), FailureReason::RetriesExhausted);
    assert_eq!(error.status(), Some(503));
    assert_eq!(ingestor.coordinator().stats().retried(), 2);
}

#[tokio::test]
async fn test_concurrent_ingests_of_a_busy_url_share_one_retry_sequence() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/always-busy"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, emitter) = open_ingestor(temp_dir.path(), fast_settings(8)).await;
    let request = RemoteFileRequest::new(format!("{}/always-busy", mock_server.uri()));

    let results =
        futures_util::future::join_all((0..4).map(|_| ingestor.ingest_remote(&request))).await;

    for result in results {
        let error = result.expect_err("every caller sees the failure");
        assert_eq!(error.reason(), "retries_exhausted");
        assert!(error.to_string().contains("HTTP 503"), "{error}");
    }
    assert_eq!(ingestor.coordinator().stats().attempts(), 3);
    assert!(emitter.records().is_empty());
    assert!(leftover_partials(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_concurrent_ingests_of_a_missing_url_hit_the_server_once() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/gone.pdf"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(50)))
        .expect(2)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(8)).await;
    let request = RemoteFileRequest::new(format!("{}/gone.pdf", mock_server.uri()));

    let results =
        futures_util::future::join_all((0..4).map(|_| ingestor.ingest_remote(&request))).await;

    assert!(results.iter().all(|result| matches!(result, Err(error) if error.reason() == "http_status")));
    assert_eq!(ingestor.coordinator().stats().attempts(), 1);

    // Once nobody waits on the URL any more, a new call fetches again.
    let error = ingestor.ingest_remote(&request).await.expect_err("still missing");
    assert_eq!(download_error(error).status(), Some(404));
    assert_eq!(ingestor.coordinator().stats().attempts(), 2);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let mock_server = require_mock_server!();
    let seen = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/flaky.txt"))
        .respond_with(FlakyResponder {
            failures: 2,
            seen: Arc::clone(&seen),
            body: b"finally",
        })
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let record = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/flaky.txt", mock_server.uri())))
        .await
        .expect("third attempt succeeds");

    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read(&record.absolute_path).unwrap(), b"finally");
}

#[tokio::test]
async fn test_connection_timeout_exhausts_after_three_attempts() {
    if should_skip_socket_bound_test() {
        return socket_skip_return();
    }
    let server = RawServer::start(Misbehavior::Silent).await;
    let temp_dir = TempDir::new().expect("temp dir");
    let mut settings = fast_settings(4);
    settings.connection_timeout = Duration::from_millis(200);
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), settings).await;

    let error = ingestor
        .ingest_remote(&RemoteFileRequest::new(server.url("/never")))
        .await
        .expect_err("silent server must time out");

    match download_error(error) {
        DownloadError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, DownloadError::ConnectionTimeout { .. }));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(ingestor.coordinator().stats().attempts(), 3);
    assert_eq!(server.connections(), 3);
}

#[tokio::test]
async fn test_stalled_body_is_retried_then_reported() {
    if should_skip_socket_bound_test() {
        return socket_skip_return();
    }
    let server = RawServer::start(Misbehavior::StallAfter {
        declared: 4096,
        sent: 100,
    })
    .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let mut settings = fast_settings(4);
    settings.stall_timeout = Duration::from_millis(200);
    let (ingestor, emitter) = open_ingestor(temp_dir.path(), settings).await;

    let error = ingestor
        .ingest_remote(&RemoteFileRequest::new(server.url("/slow.bin")))
        .await
        .expect_err("stalled body must fail");

    match download_error(error) {
        DownloadError::RetriesExhausted { attempts, last, .. } => {
            assert_eq!(attempts, 3);
            assert!(matches!(
                *last,
                DownloadError::StallTimeout {
                    received_bytes: 100,
                    ..
                }
            ));
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
    assert_eq!(server.connections(), 3);
    assert!(emitter.records().is_empty());
    assert!(
        leftover_partials(temp_dir.path()).is_empty(),
        "partial files must be removed"
    );
}

#[tokio::test]
async fn test_concurrency_ceiling_is_never_exceeded() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"payload".to_vec())
                .set_delay(Duration::from_millis(50)),
        )
        .expect(10)
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(2)).await;
    let requests: Vec<_> = (0..10)
        .map(|i| RemoteFileRequest::new(format!("{}/file-{i}.txt", mock_server.uri())))
        .collect();

    let report = ingestor.ingest_remote_batch(&requests).await;

    assert!(report.is_success());
    assert_eq!(report.emitted(), 10);
    let peak = ingestor.coordinator().peak_in_flight();
    assert!(peak <= 2, "peak in-flight was {peak}");
    assert!(peak >= 1);
    assert_eq!(ingestor.coordinator().in_flight(), 0);
}

#[tokio::test]
async fn test_batch_isolates_failures_and_keeps_order() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/ok-1.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"1".to_vec()))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.txt"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok-2.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"2".to_vec()))
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;
    let urls: Vec<_> = ["/ok-1.txt", "/gone.txt", "/ok-2.txt"]
        .iter()
        .map(|p| format!("{}{p}", mock_server.uri()))
        .collect();
    let requests: Vec<_> = urls
        .iter()
        .map(|url| RemoteFileRequest::new(url.as_str()))
        .collect();

    let report = ingestor.ingest_remote_batch(&requests).await;

    assert_eq!(report.emitted(), 2);
    assert_eq!(report.failed(), 1);
    let targets: Vec<_> = report.items().iter().map(|item| item.target.clone()).collect();
    assert_eq!(targets, urls);
    match &report.items()[1].outcome {
        ItemOutcome::Failed { reason, message } => {
            assert_eq!(*reason, "http_status");
            assert!(message.contains("410"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsafe_characters_get_distinct_suffixes() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"jpeg-ish".to_vec()))
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let colon = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/a:file.jpg", mock_server.uri())))
        .await
        .expect("colon");
    let star = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/a*file.jpg", mock_server.uri())))
        .await
        .expect("star");

    assert!(colon.name.starts_with("a-file-"), "got {}", colon.name);
    assert!(star.name.starts_with("a-file-"), "got {}", star.name);
    assert_ne!(colon.name, star.name);
    assert_eq!(colon.extension, "jpg");
    assert_eq!(star.extension, "jpg");
}

#[tokio::test]
async fn test_name_from_content_disposition_and_magic_bytes() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/files/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Disposition", r#"attachment; filename="paper.pdf""#)
                .set_body_bytes(b"%PDF-1.7".to_vec()),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/avatar"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR".to_vec()),
        )
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let paper = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/files/", mock_server.uri())))
        .await
        .expect("paper");
    let avatar = ingestor
        .ingest_remote(&RemoteFileRequest::new(format!("{}/avatar", mock_server.uri())))
        .await
        .expect("avatar");

    assert_eq!((paper.name.as_str(), paper.extension.as_str()), ("paper", "pdf"));
    assert_eq!((avatar.name.as_str(), avatar.extension.as_str()), ("avatar", "png"));
}

#[tokio::test]
async fn test_explicit_name_and_extension_win() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/download.php"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let record = ingestor
        .ingest_remote(
            &RemoteFileRequest::new(format!("{}/download.php", mock_server.uri()))
                .with_name("dataset")
                .with_ext("csv"),
        )
        .await
        .expect("ingest");

    assert_eq!(record.name, "dataset");
    assert_eq!(record.extension, "csv");
    assert!(record.absolute_path.ends_with("dataset.csv"));
}

#[tokio::test]
async fn test_auth_and_headers_reach_every_attempt() {
    let mock_server = require_mock_server!();
    let seen = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/private.txt"))
        .and(basic_auth("alice", "s3cret"))
        .and(header("x-api-key", "k-123"))
        .respond_with(FlakyResponder {
            failures: 1,
            seen: Arc::clone(&seen),
            body: b"secret stuff",
        })
        .mount(&mock_server)
        .await;
    let temp_dir = TempDir::new().expect("temp dir");
    let (ingestor, _emitter) = open_ingestor(temp_dir.path(), fast_settings(4)).await;

    let record = ingestor
        .ingest_remote(
            &RemoteFileRequest::new(format!("{}/private.txt", mock_server.uri()))
                .with_auth("alice", Some("s3cret".to_string()))
                .with_header("X-Api-Key", "k-123"),
        )
        .await
        .expect("authorized ingest");

    // Both the failing and the succeeding attempt matched the credentials.
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read(&record.absolute_path).unwrap(), b"secret stuff");
}
