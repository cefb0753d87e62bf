use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rangedl::downloader::monitor::PauseGate;
use rangedl::downloader::sink::{self, SharedSink, WriterAt};
use rangedl::downloader::worker::{probe_url, Worker};
use rangedl::error::DownloadError;
use rangedl::types::types::{Range, RangeCursor, WorkerState};

/// Generates deterministic test data: each byte = (offset % 251) as u8.
fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn open_sink(path: &Path) -> Box<dyn WriterAt> {
    Box::new(
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(path)
            .unwrap(),
    )
}

fn make_worker(
    url: &str,
    range: Range,
    sink: Option<SharedSink>,
    cache_size: usize,
    ranged: bool,
) -> Worker {
    Worker::new(
        0,
        url.to_string(),
        Client::new(),
        Arc::new(RangeCursor::new(range)),
        sink,
        cache_size,
        ranged,
    )
}

// ---------------------------------------------------------------
// probe_url
// ---------------------------------------------------------------

#[tokio::test]
async fn test_probe_reports_length_and_ranges() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Accept-Ranges", "bytes")
                .set_body_bytes(vec![0u8; 4096]),
        )
        .mount(&server)
        .await;

    let client = Client::new();
    let probe = probe_url(&client, &server.uri()).await.unwrap();

    assert_eq!(probe.content_length, 4096);
    assert_eq!(probe.accept_ranges, Some("bytes".to_string()));
    assert!(probe.final_url.starts_with(&server.uri()));
}

#[tokio::test]
async fn test_probe_missing_length() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let client = Client::new();
    let probe = probe_url(&client, &server.uri()).await.unwrap();

    // An absent or zero Content-Length means the stream is not ranged.
    assert!(probe.content_length <= 0);
}

#[tokio::test]
async fn test_probe_remote_error() {
    let server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = Client::new();
    let result = probe_url(&client, &server.uri()).await;

    match result.unwrap_err() {
        DownloadError::Remote(status) => assert_eq!(status.as_u16(), 404),
        other => panic!("expected Remote, got {:?}", other),
    }
}

#[tokio::test]
async fn test_probe_network_error() {
    let client = Client::new();
    // Point to a port that nothing is listening on
    let result = probe_url(&client, "http://127.0.0.1:1").await;

    assert!(matches!(result.unwrap_err(), DownloadError::Network(_)));
}

// ---------------------------------------------------------------
// Worker
// ---------------------------------------------------------------

#[tokio::test]
async fn test_worker_writes_range_at_offset() {
    let server = MockServer::start().await;
    let body = generate_test_data(1024);

    Mock::given(method("GET"))
        .and(header("Range", "bytes=100-199"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body[100..200].to_vec()))
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let out = temp_dir.path().join("out.bin");
    let worker = make_worker(
        &server.uri(),
        Range::new(100, 199),
        Some(sink::shared(open_sink(&out))),
        64 * 1024,
        true,
    );
    let cursor = worker.cursor();
    let state = worker.state();

    worker.run().await.unwrap();

    assert!(cursor.is_done());
    assert_eq!(cursor.downloaded(), 100);
    assert_eq!(*state.read().unwrap(), WorkerState::Done);

    let content = std::fs::read(&out).unwrap();
    assert_eq!(content.len(), 200);
    assert_eq!(&content[100..200], &body[100..200]);
}

#[tokio::test]
async fn test_worker_resumes_from_cursor() {
    let server = MockServer::start().await;
    let body = generate_test_data(100);

    // Only the remainder is requested; the response lands at offset 50.
    Mock::given(method("GET"))
        .and(header("Range", "bytes=50-99"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body[50..].to_vec()))
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let out = temp_dir.path().join("out.bin");
    std::fs::write(&out, &body[..50]).unwrap();

    let range = Range {
        begin: 0,
        end: 99,
        downloaded: 50,
    };
    let worker = make_worker(
        &server.uri(),
        range,
        Some(sink::shared(open_sink(&out))),
        64 * 1024,
        true,
    );
    let cursor = worker.cursor();

    worker.run().await.unwrap();

    assert_eq!(cursor.downloaded(), 100);
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test]
async fn test_worker_sends_referer() {
    let server = MockServer::start().await;
    let body = generate_test_data(256);

    // The mock only matches when the Referer header arrives; without it
    // the request falls through to wiremock's 404 and the run fails.
    Mock::given(method("GET"))
        .and(header("Referer", "https://example.com/page"))
        .and(header("Range", "bytes=0-255"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
        .mount(&server)
        .await;

    let mut worker = make_worker(&server.uri(), Range::new(0, 255), None, 1024, true);
    worker.set_referer("https://example.com/page".to_string());
    let cursor = worker.cursor();

    worker.run().await.unwrap();

    assert_eq!(cursor.downloaded(), 256);
}

#[tokio::test]
async fn test_worker_skips_completed_range() {
    let server = MockServer::start().await;

    // A range finished in a previous run must not issue any request.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206))
        .expect(0)
        .mount(&server)
        .await;

    let range = Range {
        begin: 0,
        end: 99,
        downloaded: 100,
    };
    let worker = make_worker(&server.uri(), range, None, 1024, true);
    let state = worker.state();

    worker.run().await.unwrap();

    assert_eq!(*state.read().unwrap(), WorkerState::Done);
}

#[tokio::test]
async fn test_worker_ranged_rejects_200() {
    let server = MockServer::start().await;

    // A 200 answer to a ranged request means the server ignored the Range
    // header; committing its body would corrupt the sink.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(generate_test_data(1024)))
        .mount(&server)
        .await;

    let worker = make_worker(&server.uri(), Range::new(0, 511), None, 1024, true);
    let state = worker.state();

    let result = worker.run().await;

    match result.unwrap_err() {
        DownloadError::Remote(status) => assert_eq!(status.as_u16(), 200),
        other => panic!("expected Remote, got {:?}", other),
    }
    assert_eq!(*state.read().unwrap(), WorkerState::Failed);
}

#[tokio::test]
async fn test_worker_remote_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let worker = make_worker(&server.uri(), Range::new(0, 99), None, 1024, true);

    let result = worker.run().await;
    match result.unwrap_err() {
        DownloadError::Remote(status) => assert_eq!(status.as_u16(), 404),
        other => panic!("expected Remote, got {:?}", other),
    }
}

#[tokio::test]
async fn test_worker_cancelled_before_start() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(vec![0u8; 1024])
                .set_delay(std::time::Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let mut worker = make_worker(&server.uri(), Range::new(0, 1023), None, 1024, true);
    let cancel = CancellationToken::new();
    worker.set_cancel_token(cancel.clone());
    let state = worker.state();

    cancel.cancel();
    let result = worker.run().await;

    assert!(matches!(result.unwrap_err(), DownloadError::Cancelled));
    assert_eq!(*state.read().unwrap(), WorkerState::Cancelled);
}

#[tokio::test]
async fn test_worker_counts_without_sink() {
    let server = MockServer::start().await;
    let body = generate_test_data(2048);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
        .mount(&server)
        .await;

    // Test mode: no sink, bytes are counted and dropped.
    let worker = make_worker(&server.uri(), Range::new(0, 2047), None, 512, true);
    let cursor = worker.cursor();

    worker.run().await.unwrap();

    assert_eq!(cursor.downloaded(), 2048);
}

#[tokio::test]
async fn test_worker_short_read_preserves_committed_cursor() {
    let server = MockServer::start().await;

    // The server closes the body after 100 of the 300 requested bytes.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0xAAu8; 100]))
        .mount(&server)
        .await;

    let worker = make_worker(&server.uri(), Range::new(0, 299), None, 64, true);
    let cursor = worker.cursor();
    let state = worker.state();

    let result = worker.run().await;

    assert!(matches!(result.unwrap_err(), DownloadError::Network(_)));
    // Everything received before EOF was committed; a retry resumes there.
    assert_eq!(cursor.downloaded(), 100);
    assert_eq!(*state.read().unwrap(), WorkerState::Failed);
}

#[tokio::test]
async fn test_worker_non_ranged_streams_to_eof() {
    let server = MockServer::start().await;
    let body = generate_test_data(3000);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let temp_dir = tempfile::tempdir().unwrap();
    let out = temp_dir.path().join("out.bin");
    let worker = make_worker(
        &server.uri(),
        Range::new(0, -1),
        Some(sink::shared(open_sink(&out))),
        1024,
        false,
    );
    let cursor = worker.cursor();

    worker.run().await.unwrap();

    assert_eq!(cursor.downloaded(), 3000);
    assert_eq!(std::fs::read(&out).unwrap(), body);
}

#[tokio::test]
async fn test_worker_parks_while_paused() {
    let server = MockServer::start().await;
    let body = generate_test_data(4096);

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(body))
        .mount(&server)
        .await;

    let mut worker = make_worker(&server.uri(), Range::new(0, 4095), None, 1024, true);
    let gate = Arc::new(PauseGate::new());
    gate.pause();
    worker.set_pause_gate(Arc::clone(&gate));
    let cursor = worker.cursor();
    let state = worker.state();

    let handle = tokio::spawn(worker.run());

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(cursor.downloaded(), 0, "paused worker must not fetch");
    assert_eq!(*state.read().unwrap(), WorkerState::Paused);

    gate.resume();
    handle.await.unwrap().unwrap();
    assert_eq!(cursor.downloaded(), 4096);
}
