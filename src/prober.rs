//! Installed-state probing (spec §4.3): for each manifest item, decides
//! whether the machine needs an install, an update, an uninstall, or
//! nothing at all.
//!
//! The evaluation order is fixed: `on_demand`, then `check.script`, then
//! `check.file`, then `check.registry.version`, and only then the version
//! -compare fallback. First matching rule wins. Rules 2–4 share one shape
//! with rule 1's uninstall case: each produces a verdict of "currently
//! satisfied" (present/current) from the install side, which is inverted
//! for an uninstall intent exactly the way rule 2's PowerShell exit code is
//! (spec §4.3: "inverted for uninstall").

use crate::catalog::{Arch, CatalogItem, CheckSpec};
use crate::hashing::verify_file;
use crate::manifest::{ItemCategory, ManifestItem};
use crate::registry::{installed_version, RegistryLedger};
use crate::version::Comparison;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Update,
    Uninstall,
    Skip,
}

/// Spec §4.3's `CheckResult.status`. Only meaningful when `action ==
/// Action::Skip` — every other action is implicitly `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Installed,
    Pending,
    Warning,
    Removed,
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub name: String,
    pub action: Action,
    pub status: ProbeStatus,
    pub installed_version: String,
    pub catalog_version: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    InstallOrUpdate,
    Uninstall,
}

/// Runs arbitrary PowerShell and reports whether it exited zero. Isolated
/// behind a trait the same way `RegistryLedger`/`ProcessSnapshot` are, so
/// `check.script` evaluation is testable without actually shelling out.
pub trait ScriptRunner {
    fn exit_code(&self, script: &str) -> Option<i32>;
}

/// Reads the version string embedded in a file on disk (a DLL/EXE's
/// `FileVersion` resource). Isolated behind a trait for the same reason.
pub trait FileVersionReader {
    fn file_version(&self, path: &Path) -> Option<String>;
}

pub struct PowerShellScriptRunner;

impl ScriptRunner for PowerShellScriptRunner {
    fn exit_code(&self, script: &str) -> Option<i32> {
        let path = std::env::temp_dir().join(format!("cimian-check-{}-{:x}.ps1", std::process::id(), fnv1a(script)));
        std::fs::write(&path, script).ok()?;
        let status = Command::new("powershell.exe")
            .arg("-NoProfile")
            .arg("-ExecutionPolicy")
            .arg("Bypass")
            .arg("-File")
            .arg(&path)
            .status();
        let _ = std::fs::remove_file(&path);
        status.ok().and_then(|s| s.code())
    }
}

/// `check.file`'s embedded-version read (spec §4.3.1), shelled out to
/// PowerShell's own `VersionInfo.FileVersion` rather than a raw
/// `GetFileVersionInfoW` binding — the same subprocess idiom `hooks.rs` and
/// `dispatcher.rs`'s `Ps1` installer kind already use for PowerShell.
pub struct PowerShellFileVersionReader;

impl FileVersionReader for PowerShellFileVersionReader {
    fn file_version(&self, path: &Path) -> Option<String> {
        let output = Command::new("powershell.exe")
            .arg("-NoProfile")
            .arg("-Command")
            .arg(format!("(Get-Item -LiteralPath '{}').VersionInfo.FileVersion", path.display()))
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!version.is_empty()).then_some(version)
    }
}

use std::process::Command;

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Everything the prober needs besides the item/catalog-item pair
/// themselves: the injectable OS surfaces plus the current machine's
/// architecture/OS version, bundled once per run instead of threaded as
/// four separate positional arguments.
pub struct ProbeEnv<'a> {
    pub ledger: &'a dyn RegistryLedger,
    pub scripts: &'a dyn ScriptRunner,
    pub files: &'a dyn FileVersionReader,
    pub current_arch: Option<Arch>,
    pub current_os_version: &'a str,
}

fn result(item: &ManifestItem, action: Action, status: ProbeStatus, installed: String, catalog_version: String, reason: &'static str) -> ProbeResult {
    ProbeResult {
        name: item.name.clone(),
        action,
        status,
        installed_version: installed,
        catalog_version,
        reason,
    }
}

/// Probes one manifest item against its resolved catalog entry.
/// `catalog_item` is `None` when the name could not be resolved in any
/// catalog on the item's search order — treated as "skip with a warning",
/// never a hard error.
pub fn probe(env: &ProbeEnv, item: &ManifestItem, catalog_item: Option<&CatalogItem>) -> ProbeResult {
    let Some(catalog_item) = catalog_item else {
        return result(item, Action::Skip, ProbeStatus::Warning, String::new(), String::new(), "not found in any catalog on search order");
    };

    let intent = if item.category == ItemCategory::Uninstall {
        Intent::Uninstall
    } else {
        Intent::InstallOrUpdate
    };

    // Rule 1: on_demand short-circuits everything else, including the
    // arch/OS gate (spec §4.3: "Before rules 2–5...").
    if catalog_item.on_demand {
        return match intent {
            Intent::Uninstall => result(
                item,
                Action::Skip,
                ProbeStatus::Warning,
                String::new(),
                catalog_item.version.clone(),
                "on-demand items cannot be uninstalled",
            ),
            Intent::InstallOrUpdate => result(
                item,
                Action::Install,
                ProbeStatus::Pending,
                String::new(),
                catalog_item.version.clone(),
                "on-demand item is always eligible for execution on request",
            ),
        };
    }

    if !catalog_item.arch_eligible(env.current_arch) {
        return result(item, Action::Skip, ProbeStatus::Warning, String::new(), catalog_item.version.clone(), "ineligible for current architecture");
    }
    if !catalog_item.os_eligible(env.current_os_version) {
        return result(item, Action::Skip, ProbeStatus::Warning, String::new(), catalog_item.version.clone(), "ineligible for current OS version");
    }

    if let Some(check) = &catalog_item.check {
        if let Some(outcome) = evaluate_check(env, check, catalog_item) {
            return apply_check_outcome(item, catalog_item, intent, outcome);
        }
    }

    fallback(env, item, catalog_item, intent)
}

/// What rules 2–4 compute from the install side: whether the check
/// currently reports the item present/current, plus whatever "installed
/// version" they could read along the way (empty when the check kind has
/// no natural version string, e.g. `check.script`).
struct CheckOutcome {
    satisfied: bool,
    installed_version: String,
    reason: &'static str,
}

fn evaluate_check(env: &ProbeEnv, check: &CheckSpec, catalog_item: &CatalogItem) -> Option<CheckOutcome> {
    if let Some(script) = &check.script {
        let not_installed = env.scripts.exit_code(script) == Some(0);
        return Some(CheckOutcome {
            satisfied: !not_installed,
            installed_version: String::new(),
            reason: "check.script result",
        });
    }

    if !check.file.is_empty() {
        for entry in &check.file {
            let path = Path::new(&entry.path);
            if !path.is_file() {
                return Some(CheckOutcome {
                    satisfied: false,
                    installed_version: String::new(),
                    reason: "check.file entry missing",
                });
            }
            if let Some(hash) = &entry.hash {
                if !verify_file(path, hash) {
                    return Some(CheckOutcome {
                        satisfied: false,
                        installed_version: String::new(),
                        reason: "check.file hash mismatch",
                    });
                }
            }
            if let Some(wanted) = &entry.version {
                let actual = env.files.file_version(path).unwrap_or_default();
                if actual.is_empty() || crate::version::compare(&actual, wanted) == Comparison::LocalOlder {
                    return Some(CheckOutcome {
                        satisfied: false,
                        installed_version: actual,
                        reason: "check.file embedded version older than required",
                    });
                }
            }
        }
        return Some(CheckOutcome {
            satisfied: true,
            installed_version: String::new(),
            reason: "check.file entries all present and current",
        });
    }

    if let Some(registry_check) = &check.registry {
        let installed = installed_version(env.ledger, &registry_check.name, catalog_item.display(), product_code(catalog_item));
        if installed.is_empty() {
            return Some(CheckOutcome {
                satisfied: false,
                installed_version: installed,
                reason: "check.registry.version: no installed version found",
            });
        }
        let satisfied = crate::version::compare(&installed, &registry_check.version) != Comparison::LocalOlder;
        return Some(CheckOutcome {
            satisfied,
            installed_version: installed,
            reason: "check.registry.version comparison",
        });
    }

    None
}

fn apply_check_outcome(item: &ManifestItem, catalog_item: &CatalogItem, intent: Intent, outcome: CheckOutcome) -> ProbeResult {
    match intent {
        Intent::InstallOrUpdate => {
            if outcome.satisfied {
                result(item, Action::Skip, ProbeStatus::Installed, outcome.installed_version, catalog_item.version.clone(), outcome.reason)
            } else {
                let action = if outcome.installed_version.is_empty() { Action::Install } else { Action::Update };
                result(item, action, ProbeStatus::Pending, outcome.installed_version, catalog_item.version.clone(), outcome.reason)
            }
        }
        Intent::Uninstall => {
            if !outcome.satisfied {
                result(item, Action::Skip, ProbeStatus::Removed, outcome.installed_version, catalog_item.version.clone(), "not installed, nothing to remove")
            } else if !catalog_item.uninstallable {
                result(item, Action::Skip, ProbeStatus::Warning, outcome.installed_version, catalog_item.version.clone(), "catalog item is not marked uninstallable")
            } else {
                result(item, Action::Uninstall, ProbeStatus::Pending, outcome.installed_version, catalog_item.version.clone(), outcome.reason)
            }
        }
    }
}

/// Rule 5: the plain version-compare fallback, used only when the item has
/// no `check` block at all.
fn fallback(env: &ProbeEnv, item: &ManifestItem, catalog_item: &CatalogItem, intent: Intent) -> ProbeResult {
    let installed = installed_version(env.ledger, &item.name, catalog_item.display(), product_code(catalog_item));

    match intent {
        Intent::Uninstall => {
            if installed.is_empty() {
                return result(item, Action::Skip, ProbeStatus::Removed, installed, catalog_item.version.clone(), "not installed, nothing to remove");
            }
            if !catalog_item.uninstallable {
                return result(item, Action::Skip, ProbeStatus::Warning, installed, catalog_item.version.clone(), "catalog item is not marked uninstallable");
            }
            result(item, Action::Uninstall, ProbeStatus::Pending, installed, catalog_item.version.clone(), "managed_uninstalls entry currently present")
        }
        Intent::InstallOrUpdate => {
            if installed.is_empty() {
                if item.category == ItemCategory::Optional {
                    return result(item, Action::Skip, ProbeStatus::Installed, installed, catalog_item.version.clone(), "optional_installs entries never auto-install");
                }
                return result(item, Action::Install, ProbeStatus::Pending, installed, catalog_item.version.clone(), "not currently installed");
            }
            match crate::version::compare(&installed, &catalog_item.version) {
                Comparison::LocalOlder => result(item, Action::Update, ProbeStatus::Pending, installed, catalog_item.version.clone(), "installed version older than catalog"),
                Comparison::Equal => result(item, Action::Skip, ProbeStatus::Installed, installed, catalog_item.version.clone(), "installed version already current"),
                Comparison::LocalNewer => result(item, Action::Skip, ProbeStatus::Warning, installed, catalog_item.version.clone(), "installed version is newer than catalog"),
            }
        }
    }
}

/// `update_for` (spec §9 Open Question, resolved as an advisory promotion):
/// when `updater_name` names an item that is currently installed, its
/// presence in a catalog promotes it into the update set even if it was
/// never named by any manifest directly.
pub fn update_for_applies(ledger: &dyn RegistryLedger, updater_target_name: &str) -> bool {
    !installed_version(ledger, updater_target_name, updater_target_name, None).is_empty()
}

fn product_code(item: &CatalogItem) -> Option<&str> {
    for entry in &item.uninstaller {
        if let crate::catalog::UninstallEntry::Msi { product_code: Some(code), .. } = entry {
            return Some(code.as_str());
        }
    }
    if let crate::catalog::InstallerSpec::Msi { product_code: Some(code), .. } = &item.installer {
        return Some(code.as_str());
    }
    None
}
