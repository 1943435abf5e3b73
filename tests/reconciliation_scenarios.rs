//! End-to-end scenarios over the probing/resolution/caching layers using
//! fakes instead of a live machine (spec §8 testable properties, §8
//! scenarios A–F).

use cimian_agent::cache::Cache;
use cimian_agent::catalog::Catalog;
use cimian_agent::manifest::{expand, ItemCategory, ManifestFile, ManifestItem, ManifestSource};
use cimian_agent::prober::{self, Action, FileVersionReader, ProbeEnv, ScriptRunner};
use cimian_agent::registry::{FakeRegistryLedger, RegistryLedger};
use cimian_agent::resolver::resolve_install_order;
use cimian_agent::AgentError;
use std::collections::HashMap;
use std::path::Path;

struct NoopScriptRunner;
impl ScriptRunner for NoopScriptRunner {
    fn exit_code(&self, _script: &str) -> Option<i32> {
        None
    }
}

struct NoopFileVersionReader;
impl FileVersionReader for NoopFileVersionReader {
    fn file_version(&self, _path: &Path) -> Option<String> {
        None
    }
}

fn probe_env<'a>(ledger: &'a FakeRegistryLedger, scripts: &'a NoopScriptRunner, files: &'a NoopFileVersionReader) -> ProbeEnv<'a> {
    ProbeEnv {
        ledger,
        scripts,
        files,
        current_arch: None,
        current_os_version: "10.0.19045",
    }
}

struct FakeManifestSource(HashMap<String, ManifestFile>);

impl ManifestSource for FakeManifestSource {
    fn fetch(&self, key: &str) -> Result<ManifestFile, AgentError> {
        self.0
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::FetchError(format!("no such manifest {key}")))
    }
}

fn manifest(installs: &[&str]) -> ManifestFile {
    ManifestFile {
        managed_installs: installs.iter().map(|s| s.to_string()).collect(),
        catalogs: vec!["production".to_string()],
        ..Default::default()
    }
}

fn catalog_yaml() -> &'static str {
    r#"
- name: Firefox
  version: "120.0"
  requires: [Runtime]
  installer:
    type: exe
    location: "firefox-120.0.exe"
- name: Runtime
  version: "1.0"
  installer:
    type: exe
    location: "runtime-1.0.exe"
- name: Vlc
  version: "3.0.18"
  installer:
    type: exe
    location: "vlc-3.0.18.exe"
"#
}

#[test]
fn scenario_fresh_install_orders_dependency_before_dependent() {
    let mut files = HashMap::new();
    files.insert("site".to_string(), manifest(&["Firefox", "Runtime", "Vlc"]));
    let expanded = expand("site", &FakeManifestSource(files)).unwrap();

    let catalog = Catalog::parse("production", catalog_yaml(), None).unwrap();
    let ledger = FakeRegistryLedger::default();
    let scripts = NoopScriptRunner;
    let files = NoopFileVersionReader;
    let env = probe_env(&ledger, &scripts, &files);

    let mut requires: HashMap<String, Vec<String>> = HashMap::new();
    for item in &expanded.items {
        let catalog_item = catalog.get(&item.name).unwrap();
        let result = prober::probe(&env, item, Some(catalog_item));
        assert_eq!(result.action, Action::Install);
        requires.insert(catalog_item.name.clone(), catalog_item.requires.clone());
    }

    let resolved = resolve_install_order(&requires);
    let firefox_pos = resolved.order.iter().position(|n| n == "Firefox").unwrap();
    let runtime_pos = resolved.order.iter().position(|n| n == "Runtime").unwrap();
    assert!(runtime_pos < firefox_pos);
}

#[test]
fn scenario_reconciliation_is_idempotent_once_installed() {
    let catalog = Catalog::parse("production", catalog_yaml(), None).unwrap();
    let mut ledger = FakeRegistryLedger::default();
    ledger.write_ledger_version("Firefox", "120.0").unwrap();
    let scripts = NoopScriptRunner;
    let files = NoopFileVersionReader;
    let env = probe_env(&ledger, &scripts, &files);

    let item = ManifestItem {
        name: "Firefox".to_string(),
        version: String::new(),
        source_manifest: "site".to_string(),
        catalogs: vec!["production".to_string()],
        category: ItemCategory::Install,
    };
    let catalog_item = catalog.get("Firefox").unwrap();
    let first = prober::probe(&env, &item, Some(catalog_item));
    assert_eq!(first.action, Action::Skip);

    // Running it again changes nothing about the ledger; still a skip.
    let second = prober::probe(&env, &item, Some(catalog_item));
    assert_eq!(second.action, Action::Skip);
}

#[test]
fn scenario_never_downgrades_a_newer_installed_version() {
    let catalog = Catalog::parse("production", catalog_yaml(), None).unwrap();
    let mut ledger = FakeRegistryLedger::default();
    ledger.write_ledger_version("Firefox", "121.0").unwrap();
    let scripts = NoopScriptRunner;
    let files = NoopFileVersionReader;
    let env = probe_env(&ledger, &scripts, &files);

    let item = ManifestItem {
        name: "Firefox".to_string(),
        version: String::new(),
        source_manifest: "site".to_string(),
        catalogs: vec!["production".to_string()],
        category: ItemCategory::Install,
    };
    let catalog_item = catalog.get("Firefox").unwrap();
    let result = prober::probe(&env, &item, Some(catalog_item));
    assert_eq!(result.action, Action::Skip);
    assert_eq!(result.installed_version, "121.0");
}

#[test]
fn scenario_cached_payload_is_reused_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::new(dir.path());
    cache.ensure_dir().unwrap();

    let catalog = Catalog::parse("production", catalog_yaml(), None).unwrap();
    let item = catalog.get("Vlc").unwrap();
    assert!(cache.cached_payload(item).is_none());

    let path = cache.payload_path(item);
    std::fs::write(&path, b"vlc installer bytes").unwrap();
    assert_eq!(cache.cached_payload(item), Some(path.clone()));

    // A second "run" sees the same cache hit without writing anything new.
    assert_eq!(cache.cached_payload(item), Some(path));
}

#[test]
fn scenario_optional_installs_are_never_auto_installed_even_when_present_in_catalog() {
    let catalog = Catalog::parse("production", catalog_yaml(), None).unwrap();
    let ledger = FakeRegistryLedger::default();
    let scripts = NoopScriptRunner;
    let files = NoopFileVersionReader;
    let env = probe_env(&ledger, &scripts, &files);
    let item = ManifestItem {
        name: "Vlc".to_string(),
        version: String::new(),
        source_manifest: "site".to_string(),
        catalogs: vec!["production".to_string()],
        category: ItemCategory::Optional,
    };
    let catalog_item = catalog.get("Vlc").unwrap();
    let result = prober::probe(&env, &item, Some(catalog_item));
    assert_eq!(result.action, Action::Skip);
}

#[test]
fn scenario_unknown_installer_type_is_rejected_at_parse_time() {
    let yaml = r#"
- name: Weird
  version: "1.0"
  installer:
    type: zip
    location: "weird.zip"
"#;
    let err = Catalog::parse("production", yaml, None).unwrap_err();
    assert!(matches!(err, AgentError::ParseError { .. }));
}
