//! Local download cache (spec §4.5, §6 cache_path).
//!
//! Installers are cached by `<name>-<version><ext>` under `cache_path` so a
//! re-run that already has a verified payload skips the download entirely.

use crate::catalog::CatalogItem;
use crate::hashing::verify_file;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Cache { root: root.into() }
    }

    fn extension_for(location: &str) -> &str {
        Path::new(location).extension().and_then(|e| e.to_str()).unwrap_or("bin")
    }

    pub fn payload_path(&self, item: &CatalogItem) -> PathBuf {
        let ext = Self::extension_for(item.installer.location());
        self.root.join(format!("{}-{}.{}", item.name, item.version, ext))
    }

    /// Returns the cached path only if it exists and, when the catalog
    /// declares a hash, still verifies against it. A stale or corrupt
    /// cache entry is treated as a miss, never as an error (spec §4.5: a
    /// failed verification triggers a fresh download, not an abort).
    pub fn cached_payload(&self, item: &CatalogItem) -> Option<PathBuf> {
        let path = self.payload_path(item);
        if !path.is_file() {
            return None;
        }
        match item.installer.hash() {
            Some(hash) if !verify_file(&path, hash) => None,
            _ => Some(path),
        }
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }

    /// Deletes every cached payload that no recent session logged as a
    /// successful install (spec §4.7 step 11): a single run's candidate set
    /// is the wrong keep-list, since a package this run skipped because it's
    /// already current never enters that set, but its verified payload is
    /// still exactly what a future reinstall would need. Instead this walks
    /// `events.jsonl` across every session directory under `logs_dir` and
    /// keeps only payloads matching a logged `install_succeeded` name/version
    /// pair.
    pub fn garbage_collect(&self, logs_dir: &Path) -> std::io::Result<Vec<String>> {
        let mut removed = Vec::new();
        if !self.root.is_dir() {
            return Ok(removed);
        }
        let keep_stems = installed_stems(logs_dir);
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy().to_string();
            let stem = Path::new(&file_name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            if !keep_stems.contains(&stem) {
                std::fs::remove_file(entry.path())?;
                removed.push(file_name);
            }
        }
        Ok(removed)
    }
}

/// Every `<name>-<version>` pair (matching `payload_path`'s naming) that some
/// session's `events.jsonl` recorded as a successful install, newest session
/// first stopping at none — every session is scanned since a package that
/// last installed months ago is still a legitimate keep.
fn installed_stems(logs_dir: &Path) -> HashSet<String> {
    let mut stems = HashSet::new();
    for session_dir in crate::session::recent_session_dirs(logs_dir) {
        let Ok(contents) = std::fs::read_to_string(session_dir.join("events.jsonl")) else {
            continue;
        };
        for line in contents.lines() {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            if value.get("event").and_then(|v| v.as_str()) != Some("install_succeeded") {
                continue;
            }
            let (Some(name), Some(version)) = (
                value.get("name").and_then(|v| v.as_str()),
                value.get("version").and_then(|v| v.as_str()),
            ) else {
                continue;
            };
            stems.insert(format!("{name}-{version}"));
        }
    }
    stems
}
