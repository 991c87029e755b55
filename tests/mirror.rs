use serde_json::json;
use std::path::Path;
use std::time::Duration;
use waybacksync::{fallback_file_name, mirror_domain, ArchiveError, MirrorConfig, PathStyle};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server_uri: &str, dest: &Path) -> MirrorConfig {
    MirrorConfig {
        domain: "x.test".to_string(),
        destination: dest.to_path_buf(),
        delay: Duration::ZERO,
        cdx_endpoint: format!("{}/cdx", server_uri),
        web_endpoint: format!("{}/web", server_uri),
        path_style: PathStyle::Posix,
        ..MirrorConfig::default()
    }
}

async fn mount_index(server: &MockServer, rows: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/cdx"))
        .and(query_param("url", "x.test"))
        .and(query_param("matchType", "host"))
        .and(query_param("output", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_content(server: &MockServer, timestamp: &str, url: &str, body: &'static [u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/web/{}id_/{}", timestamp, url)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn root_capture_lands_in_index_html_and_index_is_cached() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    let rows = json!([["timestamp", "original"], ["20200101000000", "http://x.test/"]]);
    mount_index(&server, rows.clone()).await;
    mount_content(&server, "20200101000000", "http://x.test/", b"<html>home</html>").await;

    let summary = mirror_domain(&config_for(&server.uri(), dest.path()))
        .await
        .unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.saved, 1);
    let saved = dest.path().join("20200101000000").join("index.html");
    assert_eq!(std::fs::read(saved).unwrap(), b"<html>home</html>");

    // The cache holds the raw answer, header row included.
    let cached: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dest.path().join("snapshots.json")).unwrap())
            .unwrap();
    assert_eq!(cached, rows);
}

#[tokio::test]
async fn http_error_fails_the_record_but_not_the_run() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    mount_index(
        &server,
        json!([
            ["timestamp", "original"],
            ["20200101000000", "http://x.test/missing.html"],
            ["20200102000000", "http://x.test/present.html"],
        ]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/web/20200101000000id_/http://x.test/missing.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_content(&server, "20200102000000", "http://x.test/present.html", b"here").await;

    let summary = mirror_domain(&config_for(&server.uri(), dest.path()))
        .await
        .unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.saved, 1);
    assert!(!dest
        .path()
        .join("20200101000000")
        .join("missing.html")
        .exists());
    assert!(dest
        .path()
        .join("20200102000000")
        .join("present.html")
        .is_file());
}

#[tokio::test]
async fn latest_only_fetches_just_the_newest_capture() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    mount_index(
        &server,
        json!([
            ["timestamp", "original"],
            ["20200101000000", "http://x.test/a"],
            ["20200102000000", "http://x.test/a"],
        ]),
    )
    .await;
    mount_content(&server, "20200102000000", "http://x.test/a", b"v2").await;

    let config = MirrorConfig {
        latest_only: true,
        ..config_for(&server.uri(), dest.path())
    };
    let summary = mirror_domain(&config).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.saved, 1);
    assert!(!dest.path().join("20200101000000").exists());
    assert_eq!(
        std::fs::read(dest.path().join("20200102000000").join("a")).unwrap(),
        b"v2"
    );
}

#[tokio::test]
async fn empty_body_is_skipped() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    mount_index(
        &server,
        json!([["timestamp", "original"], ["20200101000000", "http://x.test/empty.txt"]]),
    )
    .await;
    mount_content(&server, "20200101000000", "http://x.test/empty.txt", b"").await;

    let summary = mirror_domain(&config_for(&server.uri(), dest.path()))
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert!(!dest
        .path()
        .join("20200101000000")
        .join("empty.txt")
        .exists());
}

#[tokio::test]
async fn rejected_index_is_fatal_and_not_cached() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/cdx"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = mirror_domain(&config_for(&server.uri(), dest.path()))
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::IndexRejected { status: 503 }));
    assert!(!dest.path().join("snapshots.json").exists());
}

#[tokio::test]
async fn rerun_skips_everything_already_saved_without_network() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    let long_url = format!("http://x.test/{}/style.css", "d".repeat(300));
    mount_index(
        &server,
        json!([
            ["timestamp", "original"],
            ["20200101000000", "http://x.test/"],
            ["20200101000000", long_url],
        ]),
    )
    .await;
    mount_content(&server, "20200101000000", "http://x.test/", b"home").await;
    Mock::given(method("GET"))
        .and(path(format!("/web/20200101000000id_/{}", long_url)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"body{}".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let first = mirror_domain(&config_for(&server.uri(), dest.path()))
        .await
        .unwrap();
    assert_eq!(first.saved, 1);
    assert_eq!(first.saved_fallback, 1);
    let fallback = dest
        .path()
        .join("20200101000000")
        .join(fallback_file_name(&long_url));
    assert_eq!(std::fs::read(&fallback).unwrap(), b"body{}");

    // Second run: nothing listens on these endpoints and strict mode is on,
    // so any request would abort the run.
    let offline = MirrorConfig {
        cdx_endpoint: "http://127.0.0.1:9/cdx".to_string(),
        web_endpoint: "http://127.0.0.1:9/web".to_string(),
        ..config_for(&server.uri(), dest.path())
    };
    let second = mirror_domain(&offline).await.unwrap();
    assert_eq!(second.total, 2);
    assert_eq!(second.skipped, 2);
}

#[tokio::test]
async fn no_snapshots_is_a_normal_completion() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    mount_index(&server, json!([["timestamp", "original"]])).await;

    let summary = mirror_domain(&config_for(&server.uri(), dest.path()))
        .await
        .unwrap();

    assert_eq!(summary.total, 0);
}

#[tokio::test]
async fn double_slash_urls_stay_inside_the_destination() {
    let server = MockServer::start().await;
    let dest = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    // `outside` is absolute, so this URL's path starts with `//`.
    let url = format!("http://x.test/{}/escape.html", outside.path().display());
    mount_index(
        &server,
        json!([["timestamp", "original"], ["20200101000000", url.clone()]]),
    )
    .await;
    mount_content(&server, "20200101000000", &url, b"contained").await;

    let summary = mirror_domain(&config_for(&server.uri(), dest.path()))
        .await
        .unwrap();

    assert_eq!(summary.saved, 1);
    assert!(!outside.path().join("escape.html").exists());
    let relative = outside.path().strip_prefix("/").unwrap();
    let saved = dest
        .path()
        .join("20200101000000")
        .join(relative)
        .join("escape.html");
    assert_eq!(std::fs::read(saved).unwrap(), b"contained");
}
