//! Integration tests for the download manager
//!
//! Files are served by wiremock and written into a temp directory. One test
//! speaks raw HTTP over a tokio listener to stream a chunked body.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use sumi_harvest::crawler::{Link, StopHandle};
use sumi_harvest::download::{DownloadManager, DownloadSettings};
use sumi_harvest::storage::{share, with_store, SharedStore, SqliteStore};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(max_retries: u32) -> DownloadSettings {
    DownloadSettings {
        max_retries,
        retry_delay: Duration::from_millis(10),
        max_file_size: 1024 * 1024,
        concurrency: 3,
    }
}

fn manager(settings: DownloadSettings, dir: &Path) -> (DownloadManager, SharedStore) {
    let store = share(SqliteStore::open_in_memory().unwrap());
    let manager = DownloadManager::new(reqwest::Client::new(), settings, dir, store.clone());
    (manager, store)
}

fn link_to(server: &MockServer, file: &str) -> Link {
    Link::from_raw(&format!("{}/files/{}", server.uri(), file), file)
}

async fn serve(server: &MockServer, route: &str, body: &[u8], hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(hits)
        .mount(server)
        .await;
}

/// Regular files in `dir`, ignoring a missing directory
fn files_in(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_successful_download_is_stored_and_recorded() {
    let server = MockServer::start().await;
    let body = b"%PDF-1.4 annual report".to_vec();

    Mock::given(method("GET"))
        .and(path("/files/annual.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .insert_header("content-type", "application/pdf"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (manager, store) = manager(settings(2), dir.path());
    let link = link_to(&server, "annual.pdf");

    let outcome = manager.download_one("reports", link.clone()).await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.retry_count, 0);
    assert_eq!(outcome.bytes, body.len() as u64);

    let path = outcome.path.expect("path");
    assert_eq!(path, dir.path().join("reports_annual.pdf"));
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert_eq!(
        outcome.checksum.as_deref(),
        Some(hex::encode(Sha256::digest(&body)).as_str())
    );
    assert_eq!(files_in(dir.path()), vec!["reports_annual.pdf"]);

    let recorded = with_store(&store, |s| s.is_already_downloaded(&link.url)).unwrap();
    assert!(recorded);
}

#[tokio::test]
async fn test_server_errors_are_retried_then_recorded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/broken.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (manager, store) = manager(settings(2), dir.path());
    let link = link_to(&server, "broken.pdf");

    let outcome = manager.download_one("reports", link.clone()).await;

    assert!(!outcome.success);
    assert_eq!(outcome.retry_count, 2);
    assert!(outcome.error.unwrap().contains("500"));
    assert!(outcome.path.is_none());
    assert!(files_in(dir.path()).is_empty());

    let recorded = with_store(&store, |s| s.is_already_downloaded(&link.url)).unwrap();
    assert!(!recorded);
}

#[tokio::test]
async fn test_oversized_file_leaves_nothing_on_disk() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/huge.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut limits = settings(0);
    limits.max_file_size = 1024;
    let (manager, _store) = manager(limits, dir.path());

    let outcome = manager
        .download_one("reports", link_to(&server, "huge.pdf"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.retry_count, 0);
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_unrecorded_file_with_same_name_gets_suffix() {
    let server = MockServer::start().await;
    serve(&server, "/files/kept.pdf", b"%PDF new content", 1).await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("reports_kept.pdf"), b"%PDF already here").unwrap();
    let (manager, _store) = manager(settings(2), dir.path());

    let outcome = manager
        .download_one("reports", link_to(&server, "kept.pdf"))
        .await;

    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.path, Some(dir.path().join("reports_kept_1.pdf")));
    assert!(outcome.checksum.is_some());
    assert_eq!(
        std::fs::read(dir.path().join("reports_kept.pdf")).unwrap(),
        b"%PDF already here"
    );
    assert_eq!(
        std::fs::read(dir.path().join("reports_kept_1.pdf")).unwrap(),
        b"%PDF new content"
    );
}

#[tokio::test]
async fn test_identical_file_on_disk_is_adopted() {
    let server = MockServer::start().await;
    serve(&server, "/files/same.pdf", b"%PDF same bytes", 1).await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("reports_same.pdf"), b"%PDF same bytes").unwrap();
    let (manager, _store) = manager(settings(0), dir.path());

    let outcome = manager
        .download_one("reports", link_to(&server, "same.pdf"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.path, Some(dir.path().join("reports_same.pdf")));
    assert_eq!(files_in(dir.path()), vec!["reports_same.pdf"]);
}

#[tokio::test]
async fn test_recorded_file_is_reused_without_fetching() {
    let server = MockServer::start().await;
    serve(&server, "/files/kept.pdf", b"%PDF kept", 1).await;

    let dir = TempDir::new().unwrap();
    let (manager, store) = manager(settings(0), dir.path());
    let link = link_to(&server, "kept.pdf");

    let first = manager.download_one("reports", link.clone()).await;
    let second = manager.download_one("reports", link.clone()).await;

    assert!(first.success && second.success);
    assert_eq!(second.path, first.path);
    assert_eq!(second.bytes, 9);
    assert_eq!(second.checksum, first.checksum);
    assert_eq!(files_in(dir.path()), vec!["reports_kept.pdf"]);

    let record = with_store(&store, |s| s.download_record(&link.url))
        .unwrap()
        .unwrap();
    assert!(record.success);
    assert_eq!(record.filename, "reports_kept.pdf");
}

#[tokio::test]
async fn test_same_filename_from_different_urls_keeps_both() {
    let server = MockServer::start().await;
    serve(&server, "/2023/report.pdf", b"%PDF report for 2023", 1).await;
    serve(&server, "/2024/report.pdf", b"%PDF report for 2024", 1).await;

    let dir = TempDir::new().unwrap();
    let mut serial = settings(0);
    serial.concurrency = 1;
    let (manager, store) = manager(serial, dir.path());

    let links: Vec<Link> = ["2023", "2024"]
        .iter()
        .map(|year| {
            Link::from_raw(&format!("{}/{}/report.pdf", server.uri(), year), "Report")
        })
        .collect();

    let summary = manager.download_all("reports", links.clone()).await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(
        files_in(dir.path()),
        vec!["reports_report.pdf", "reports_report_1.pdf"]
    );
    assert_eq!(
        std::fs::read(dir.path().join("reports_report.pdf")).unwrap(),
        b"%PDF report for 2023"
    );
    assert_eq!(
        std::fs::read(dir.path().join("reports_report_1.pdf")).unwrap(),
        b"%PDF report for 2024"
    );

    for link in &links {
        assert!(with_store(&store, |s| s.is_already_downloaded(&link.url)).unwrap());
    }
}

#[tokio::test]
async fn test_body_failing_verification_is_discarded() {
    let server = MockServer::start().await;
    serve(&server, "/files/missing.pdf", b"<html>Not found</html>", 2).await;

    let dir = TempDir::new().unwrap();
    let (manager, _store) = manager(settings(1), dir.path());

    let outcome = manager
        .download_one("reports", link_to(&server, "missing.pdf"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.retry_count, 1);
    assert!(outcome.error.unwrap().contains("verification"));
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn test_chunked_body_over_limit_is_abandoned_mid_stream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // No Content-Length, so only the running byte count can catch the size
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: application/pdf\r\n\
                    Transfer-Encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = vec![b'x'; 512];
        for _ in 0..8 {
            let mut frame = format!("{:x}\r\n", chunk.len()).into_bytes();
            frame.extend_from_slice(&chunk);
            frame.extend_from_slice(b"\r\n");
            if socket.write_all(&frame).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
    });

    let dir = TempDir::new().unwrap();
    let mut limits = settings(0);
    limits.max_file_size = 1024;
    let (manager, store) = manager(limits, dir.path());
    let link = Link::from_raw(&format!("http://{}/files/stream.pdf", addr), "Stream");

    let outcome = manager.download_one("reports", link.clone()).await;
    let _ = server.await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("too large"));
    assert!(files_in(dir.path()).is_empty());

    let record = with_store(&store, |s| s.download_record(&link.url))
        .unwrap()
        .unwrap();
    assert!(!record.success);
}

#[tokio::test]
async fn test_download_all_keeps_input_order() {
    let server = MockServer::start().await;

    for name in ["a.pdf", "b.pdf", "d.pdf", "e.pdf"] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{}", name)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("%PDF body of {}", name))
                    .set_delay(Duration::from_millis(20)),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/files/c.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (manager, _store) = manager(settings(0), dir.path());
    let links: Vec<Link> = ["a.pdf", "b.pdf", "c.pdf", "d.pdf", "e.pdf"]
        .iter()
        .map(|f| link_to(&server, f))
        .collect();

    let summary = manager.download_all("reports", links.clone()).await;

    assert_eq!(summary.attempted, 5);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 0);

    let order: Vec<_> = summary.outcomes.iter().map(|o| o.link.url.clone()).collect();
    let expected: Vec<_> = links.iter().map(|l| l.url.clone()).collect();
    assert_eq!(order, expected);
    assert!(!summary.outcomes[2].success);

    assert_eq!(
        files_in(dir.path()),
        vec![
            "reports_a.pdf",
            "reports_b.pdf",
            "reports_d.pdf",
            "reports_e.pdf"
        ]
    );
}

#[tokio::test]
async fn test_stop_request_skips_unscheduled_downloads() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let stop = StopHandle::new();
    stop.stop();
    let (manager, _store) = manager(settings(0), dir.path());
    let manager = manager.with_stop_handle(stop);

    let links = vec![link_to(&server, "a.pdf"), link_to(&server, "b.pdf")];
    let summary = manager.download_all("reports", links).await;

    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.skipped, 2);
    assert!(summary.outcomes.is_empty());
}
