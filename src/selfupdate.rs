//! Self-update state machine (spec §3 Lifecycle, §6 flag files).
//!
//! The agent updates itself the same way it updates anything else: it is
//! just another `Catalog.Item`, conventionally named by `client_identifier`
//! in the default catalog. What's special is sequencing — swapping out the
//! running binary can't happen mid-reconciliation, so a pending self-update
//! is recorded as a flag file and applied as the very last step of a run,
//! after every other item has already settled.

use crate::catalog::CatalogItem;
use crate::version::{compare, Comparison};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfUpdateState {
    Idle,
    Pending,
    Applying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfUpdateFlag {
    pub state: SelfUpdateState,
    pub target_version: String,
}

pub struct SelfUpdate {
    flag_path: PathBuf,
}

impl SelfUpdate {
    pub fn new(flag_path: impl Into<PathBuf>) -> Self {
        SelfUpdate {
            flag_path: flag_path.into(),
        }
    }

    pub fn read_flag(&self) -> Option<SelfUpdateFlag> {
        let raw = std::fs::read_to_string(&self.flag_path).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn write_flag(&self, flag: &SelfUpdateFlag) -> std::io::Result<()> {
        if let Some(parent) = self.flag_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.flag_path, serde_json::to_string(flag).expect("flag serializes"))
    }

    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.flag_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Compares the running binary's version against the catalog entry for
    /// the agent's own package, marking a pending self-update if the
    /// catalog is ahead. Never downgrades (spec §8 testable property 3
    /// applies here too).
    pub fn check(&self, own_name: &str, catalog_item: Option<&CatalogItem>, running_version: &str) -> std::io::Result<bool> {
        let Some(item) = catalog_item else {
            return Ok(false);
        };
        if item.name != own_name {
            return Ok(false);
        }
        if compare(running_version, &item.version) != Comparison::LocalOlder {
            return Ok(false);
        }
        self.write_flag(&SelfUpdateFlag {
            state: SelfUpdateState::Pending,
            target_version: item.version.clone(),
        })?;
        Ok(true)
    }

    /// Marks the flag as being applied. The orchestrator calls this
    /// immediately before replacing the running executable, so a crash
    /// mid-swap leaves a recoverable `Applying` state rather than silently
    /// reverting to `Idle`.
    pub fn begin_apply(&self) -> std::io::Result<()> {
        if let Some(flag) = self.read_flag() {
            self.write_flag(&SelfUpdateFlag {
                state: SelfUpdateState::Applying,
                ..flag
            })?;
        }
        Ok(())
    }

    /// Swaps `new_binary` into place at `current_exe`, keeping the old
    /// binary alongside as `<name>.old` so a failed launch can be diagnosed
    /// rather than silently lost.
    pub fn apply(&self, current_exe: &Path, new_binary: &Path) -> std::io::Result<()> {
        let backup = current_exe.with_extension("old");
        std::fs::rename(current_exe, &backup)?;
        match std::fs::copy(new_binary, current_exe) {
            Ok(_) => {
                self.clear()?;
                Ok(())
            }
            Err(e) => {
                // Best-effort rollback so a failed swap doesn't leave the
                // machine without a working agent.
                let _ = std::fs::rename(&backup, current_exe);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InstallerSpec;

    fn item(name: &str, version: &str) -> CatalogItem {
        CatalogItem {
            name: name.to_string(),
            display_name: None,
            version: version.to_string(),
            supported_arch: vec![],
            min_os_version: String::new(),
            max_os_version: String::new(),
            installer: InstallerSpec::Exe {
                location: "cimian.exe".to_string(),
                hash: None,
                arguments: vec![],
                success_codes: vec![],
            },
            uninstaller: vec![],
            check: None,
            installs: vec![],
            requires: vec![],
            update_for: vec![],
            blocking_applications: vec![],
            on_demand: false,
            unattended_install: true,
            uninstallable: false,
        }
    }

    #[test]
    fn newer_catalog_version_marks_pending() {
        let dir = tempfile::tempdir().unwrap();
        let su = SelfUpdate::new(dir.path().join("flag.json"));
        let marked = su.check("cimian", Some(&item("cimian", "2026.2.1")), "2026.1.0").unwrap();
        assert!(marked);
        assert_eq!(su.read_flag().unwrap().state, SelfUpdateState::Pending);
    }

    #[test]
    fn never_downgrades_itself() {
        let dir = tempfile::tempdir().unwrap();
        let su = SelfUpdate::new(dir.path().join("flag.json"));
        let marked = su.check("cimian", Some(&item("cimian", "2026.1.0")), "2026.2.0").unwrap();
        assert!(!marked);
        assert!(su.read_flag().is_none());
    }

    #[test]
    fn apply_swaps_binary_and_clears_flag() {
        let dir = tempfile::tempdir().unwrap();
        let su = SelfUpdate::new(dir.path().join("flag.json"));
        su.check("cimian", Some(&item("cimian", "2026.2.0")), "2026.1.0").unwrap();

        let current = dir.path().join("cimian.exe");
        std::fs::write(&current, b"old").unwrap();
        let new_binary = dir.path().join("staged.exe");
        std::fs::write(&new_binary, b"new").unwrap();

        su.apply(&current, &new_binary).unwrap();
        assert_eq!(std::fs::read(&current).unwrap(), b"new");
        assert_eq!(std::fs::read(current.with_extension("old")).unwrap(), b"old");
        assert!(su.read_flag().is_none());
    }
}
