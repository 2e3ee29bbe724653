//! Integration tests for full harvest cycles
//!
//! These tests use wiremock to serve listing pages and files, and run the
//! coordinator end-to-end against a real SQLite database in a temp dir.

use std::path::Path;
use std::time::{Duration, SystemTime};
use sumi_harvest::config::{parse_config, Config};
use sumi_harvest::crawler::Coordinator;
use sumi_harvest::output::{format_cycle_report, write_cycle_report};
use sumi_harvest::storage::{share, SessionStatus, SqliteStore};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with one unthrottled site per entry
fn create_test_config(dir: &Path, sites: &[(&str, String)]) -> Config {
    let mut toml = format!(
        r#"
[scraping]
user-agent = "TestBot/1.0"
max-retries = 1
retry-delay-seconds = 0.0
concurrent-downloads = 2

[output]
database-path = "{}"
download-dir = "{}"
"#,
        dir.join("harvest.db").display(),
        dir.join("downloads").display()
    );

    for (name, url) in sites {
        toml.push_str(&format!(
            r#"
[[site]]
name = "{}"
url = "{}"
file-types = ["pdf"]

[site.filters]
exclude = ["draft"]

[site.rate-limit]
requests-per-minute = 600
delay-between-requests = 0.0
"#,
            name, url
        ));
    }

    parse_config(&toml).expect("test config should be valid")
}

fn coordinator(config: Config) -> Coordinator {
    let store = SqliteStore::new(Path::new(&config.output.database_path)).unwrap();
    Coordinator::new(config, share(store)).unwrap()
}

async fn mount_listing(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    r#"<html><head><title>Reports</title></head><body>
                    <a href="/files/annual.pdf">Annual report</a>
                    <a href="/files/budget.pdf">Budget</a>
                    <a href="/files/plan.pdf">Draft plan</a>
                    <a href="/files/notes.docx">Meeting notes</a>
                    </body></html>"#,
                )
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;

    for name in ["annual.pdf", "budget.pdf"] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{}", name)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!("%PDF {}", name))
                    .insert_header("content-type", "application/pdf"),
            )
            .expect(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_cycle_downloads_then_skips_on_rerun() {
    let server = MockServer::start().await;
    mount_listing(&server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        &[("reports", format!("{}/reports", server.uri()))],
    );
    let db_path = config.output.database_path.clone();
    let coordinator = coordinator(config);

    // First cycle downloads the two surviving PDFs
    let first = coordinator.run_cycle(None).await;
    assert_eq!(first.sites_processed, 1);
    assert_eq!(first.sites_succeeded, 1);
    assert_eq!(first.links_found, 3);
    assert_eq!(first.links_surviving, 2);
    assert_eq!(first.downloads_attempted, 2);
    assert_eq!(first.downloads_succeeded, 2);
    assert_eq!(first.reasons().count(sumi_harvest::filter::RejectReason::Exclude), 1);

    let downloads = dir.path().join("downloads");
    assert!(downloads.join("reports_annual.pdf").exists());
    assert!(downloads.join("reports_budget.pdf").exists());
    assert!(!downloads.join("reports_plan.pdf").exists());

    // Second cycle finds the same links but downloads nothing new
    let second = coordinator.run_cycle(None).await;
    assert_eq!(second.links_found, 3);
    assert_eq!(second.links_surviving, 0);
    assert_eq!(second.downloads_attempted, 0);
    assert_eq!(
        second
            .reasons()
            .count(sumi_harvest::filter::RejectReason::AlreadyDownloaded),
        2
    );

    let store = SqliteStore::new(Path::new(&db_path)).unwrap();
    assert_eq!(store.download_counts().unwrap(), (2, 0));

    let sessions = store.recent_sessions(10).unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions
        .iter()
        .all(|s| s.status == SessionStatus::Succeeded && s.completed_at.is_some()));

    let report_path = dir.path().join("reports").join("cycle.md");
    write_cycle_report(&first, &report_path).unwrap();
    let report = std::fs::read_to_string(&report_path).unwrap();
    assert!(report.contains("| reports | ok | static |"));
}

#[tokio::test]
async fn test_failing_site_does_not_stop_cycle() {
    let server = MockServer::start().await;
    mount_listing(&server).await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        &[
            ("broken", format!("{}/broken", server.uri())),
            ("reports", format!("{}/reports", server.uri())),
        ],
    );
    let db_path = config.output.database_path.clone();
    let coordinator = coordinator(config);

    let stats = coordinator.run_cycle(None).await;

    assert_eq!(stats.sites_processed, 2);
    assert_eq!(stats.sites_succeeded, 1);
    assert_eq!(stats.downloads_succeeded, 2);

    let broken = &stats.sites[0];
    assert_eq!(broken.site_name, "broken");
    assert!(!broken.success);
    assert_eq!(broken.links_found, 0);
    assert!(!broken.errors.is_empty());

    let store = SqliteStore::new(Path::new(&db_path)).unwrap();
    let errors = store.error_counts_by_kind().unwrap();
    assert!(errors.iter().any(|e| e.kind == "scraping_error" && e.count == 1));

    let report = format_cycle_report(&stats);
    assert!(report.contains("| broken | failed |"));
    assert!(report.contains("### broken"));
}

#[tokio::test]
async fn test_site_selection_and_stop() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        &[("reports", format!("{}/reports", server.uri()))],
    );
    let coordinator = coordinator(config);

    let unknown = vec!["elsewhere".to_string()];
    let stats = coordinator.run_cycle(Some(&unknown)).await;
    assert!(stats.nothing_processed());

    coordinator.stop_handle().stop();
    let stats = coordinator.run_cycle(None).await;
    assert!(stats.nothing_processed());
    assert_eq!(stats.downloads_attempted, 0);
}

#[tokio::test]
async fn test_startup_sweeps_stale_partial_downloads() {
    let dir = TempDir::new().unwrap();
    let downloads = dir.path().join("downloads");
    std::fs::create_dir_all(&downloads).unwrap();

    let stale = downloads.join(".sumi-999999999-0.part");
    let kept = downloads.join("reports_annual.pdf");
    for file in [&stale, &kept] {
        std::fs::write(file, b"%PDF partial").unwrap();
        std::fs::File::options()
            .write(true)
            .open(file)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3 * 60 * 60))
            .unwrap();
    }

    let config = create_test_config(
        dir.path(),
        &[("reports", "https://example.com/".to_string())],
    );
    let _coordinator = coordinator(config);

    assert!(!stale.exists());
    assert!(kept.exists());
}

#[tokio::test]
async fn test_history_and_error_window_after_cycle() {
    let server = MockServer::start().await;
    mount_listing(&server).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(
        dir.path(),
        &[("reports", format!("{}/reports", server.uri()))],
    );
    let db_path = config.output.database_path.clone();
    let coordinator = coordinator(config);
    coordinator.run_cycle(None).await;

    let store = SqliteStore::new(Path::new(&db_path)).unwrap();
    let history = store.download_history(Some("reports"), 10).unwrap();
    let mut names: Vec<_> = history.iter().map(|e| e.record.filename.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["reports_annual.pdf", "reports_budget.pdf"]);
    assert!(store.download_history(Some("elsewhere"), 10).unwrap().is_empty());
    assert_eq!(store.error_stats(None, 24).unwrap().total, 0);
}
