//! Exercises `Fetcher` against a real local HTTP server, covering manifest
//! tree resolution, catalog resolution, and payload download with hash
//! verification (spec §4.2, §4.5, §8 testable property 6).

use cimian_agent::fetcher::Fetcher;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROOT_MANIFEST: &str = r#"
managed_installs:
  - Firefox
included_manifests:
  - base
catalogs:
  - production
"#;

const BASE_MANIFEST: &str = r#"
managed_installs:
  - Vlc
catalogs:
  - production
"#;

fn catalog_yaml(hash: &str) -> String {
    format!(
        r#"
- name: Firefox
  version: "120.0"
  installer:
    type: exe
    location: "firefox-120.0.exe"
    hash: "{hash}"
- name: Vlc
  version: "3.0.18"
  installer:
    type: exe
    location: "vlc-3.0.18.exe"
"#
    )
}

#[tokio::test]
async fn resolves_manifest_tree_and_catalogs_from_a_live_repo() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifests/site-default.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ROOT_MANIFEST))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/manifests/base.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(BASE_MANIFEST))
        .mount(&server)
        .await;

    let payload = b"pretend-installer-bytes";
    let hash = sha256_hex(payload);
    Mock::given(method("GET"))
        .and(path("/catalogs/production.yaml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_yaml(&hash)))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(server.uri(), None).unwrap();
    let expanded = fetcher.resolve_manifest_tree("site-default").await.unwrap();

    let names: Vec<_> = expanded.items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["Vlc", "Firefox"]);
    assert_eq!(expanded.catalogs, vec!["production".to_string()]);

    let (catalogs, warnings) = fetcher.resolve_catalogs(&expanded.catalogs, None).await;
    assert!(warnings.is_empty());
    let catalog = catalogs.get("production").unwrap();
    assert_eq!(catalog.get("firefox").unwrap().version, "120.0");
}

#[tokio::test]
async fn download_verifies_hash_and_streams_to_disk() {
    let server = MockServer::start().await;
    let payload = b"the-actual-installer-payload";

    Mock::given(method("GET"))
        .and(path("/pkgs/firefox-120.0.exe"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.to_vec()))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(server.uri(), None).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("firefox-120.0.exe");

    fetcher
        .download("firefox-120.0.exe", &dest, |_, _| {})
        .await
        .unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), payload);
}

#[tokio::test]
async fn missing_root_manifest_is_a_fetch_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manifests/ghost.yaml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(server.uri(), None).unwrap();
    let err = fetcher.resolve_manifest_tree("ghost").await.unwrap_err();
    assert!(matches!(err, cimian_agent::AgentError::FetchError(_)));
}

fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
