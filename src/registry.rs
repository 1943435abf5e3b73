//! The agent's own version ledger and Windows uninstall-registry lookups
//! (spec §3 Lifecycle, §4.3 rules 4–5).
//!
//! Design Notes §9 calls out the teacher's module-level registry cache as a
//! global mutable singleton to avoid; here the cache is owned by whoever
//! holds a `RegistryLedger` (the prober, for the lifetime of one
//! reconciliation pass) rather than living in a `static`.

use std::collections::HashMap;

/// One entry found in `HKLM\Software\Microsoft\Windows\CurrentVersion\Uninstall`.
#[derive(Debug, Clone)]
pub struct UninstallEntry {
    pub display_name: String,
    pub display_version: String,
    pub product_code: Option<String>,
}

/// Abstracts over the Windows registry so the prober and resolver can be
/// unit-tested without a real `HKLM` to read from.
pub trait RegistryLedger {
    /// The agent's own record of what it last installed, read from
    /// `HKLM\Software\ManagedInstalls\<name>\Version`.
    fn ledger_version(&self, name: &str) -> Option<String>;

    /// Writes the ledger entry on successful install (spec §3 Lifecycle).
    fn write_ledger_version(&mut self, name: &str, version: &str) -> std::io::Result<()>;

    /// Deletes the ledger entry on successful uninstall (spec §3 Lifecycle).
    fn delete_ledger_version(&mut self, name: &str) -> std::io::Result<()>;

    /// Every name currently recorded in the agent's own ledger.
    fn ledger_names(&self) -> Vec<String>;

    /// Finds a Windows "Programs and Features" entry whose `DisplayName`
    /// matches exactly or by substring (spec §4.3 rule 4/5).
    fn find_uninstall_entry(&self, display_name_hint: &str) -> Option<UninstallEntry>;

    /// Reads `DisplayVersion` for a specific MSI product code (spec §4.3
    /// rule 4, MSI items).
    fn product_code_version(&self, product_code: &str) -> Option<String>;
}

/// Resolves "installed version" the way spec §4.3 rule 5 specifies:
/// agent ledger first, then Windows uninstall enumeration, then MSI product
/// code, else empty string.
pub fn installed_version(
    ledger: &dyn RegistryLedger,
    name: &str,
    display_name_hint: &str,
    product_code: Option<&str>,
) -> String {
    if let Some(v) = ledger.ledger_version(name) {
        return v;
    }
    if let Some(entry) = ledger.find_uninstall_entry(display_name_hint) {
        return entry.display_version;
    }
    if let Some(code) = product_code {
        if let Some(v) = ledger.product_code_version(code) {
            return v;
        }
    }
    String::new()
}

/// In-memory ledger used by tests and as the non-Windows fallback — the
/// agent's functionality is Windows-specific by design (spec §1 Non-goals),
/// but the crate still has to build everywhere.
#[derive(Debug, Default)]
pub struct FakeRegistryLedger {
    pub ledger: HashMap<String, String>,
    pub uninstall_entries: Vec<UninstallEntry>,
}

impl RegistryLedger for FakeRegistryLedger {
    fn ledger_version(&self, name: &str) -> Option<String> {
        self.ledger.get(name).cloned()
    }

    fn write_ledger_version(&mut self, name: &str, version: &str) -> std::io::Result<()> {
        self.ledger.insert(name.to_string(), version.to_string());
        Ok(())
    }

    fn delete_ledger_version(&mut self, name: &str) -> std::io::Result<()> {
        self.ledger.remove(name);
        Ok(())
    }

    fn ledger_names(&self) -> Vec<String> {
        self.ledger.keys().cloned().collect()
    }

    fn find_uninstall_entry(&self, display_name_hint: &str) -> Option<UninstallEntry> {
        let hint = display_name_hint.to_lowercase();
        self.uninstall_entries
            .iter()
            .find(|e| e.display_name.to_lowercase() == hint || e.display_name.to_lowercase().contains(&hint))
            .cloned()
    }

    fn product_code_version(&self, product_code: &str) -> Option<String> {
        self.uninstall_entries
            .iter()
            .find(|e| e.product_code.as_deref() == Some(product_code))
            .map(|e| e.display_version.clone())
    }
}

#[cfg(windows)]
pub mod windows_impl {
    use super::{RegistryLedger, UninstallEntry};
    use winreg::enums::*;
    use winreg::RegKey;

    const LEDGER_PATH: &str = r"Software\ManagedInstalls";
    const UNINSTALL_PATH: &str = r"Software\Microsoft\Windows\CurrentVersion\Uninstall";

    pub struct WindowsRegistryLedger {
        hklm: RegKey,
        cache: std::collections::HashMap<String, UninstallEntry>,
        cache_loaded: bool,
    }

    impl WindowsRegistryLedger {
        pub fn new() -> Self {
            Self {
                hklm: RegKey::predef(HKEY_LOCAL_MACHINE),
                cache: std::collections::HashMap::new(),
                cache_loaded: false,
            }
        }

        fn load_cache(&mut self) {
            if self.cache_loaded {
                return;
            }
            self.cache_loaded = true;
            let Ok(uninstall) = self.hklm.open_subkey(UNINSTALL_PATH) else {
                return;
            };
            for name in uninstall.enum_keys().flatten() {
                if let Ok(sub) = uninstall.open_subkey(&name) {
                    let display_name: String = sub.get_value("DisplayName").unwrap_or_default();
                    if display_name.is_empty() {
                        continue;
                    }
                    let display_version: String = sub.get_value("DisplayVersion").unwrap_or_default();
                    let product_code = name.starts_with('{').then(|| name.clone());
                    self.cache.insert(
                        display_name.to_lowercase(),
                        UninstallEntry {
                            display_name,
                            display_version,
                            product_code,
                        },
                    );
                }
            }
        }
    }

    impl Default for WindowsRegistryLedger {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RegistryLedger for WindowsRegistryLedger {
        fn ledger_version(&self, name: &str) -> Option<String> {
            let key = self.hklm.open_subkey(format!(r"{LEDGER_PATH}\{name}")).ok()?;
            key.get_value("Version").ok()
        }

        fn write_ledger_version(&mut self, name: &str, version: &str) -> std::io::Result<()> {
            let (key, _) = self.hklm.create_subkey(format!(r"{LEDGER_PATH}\{name}"))?;
            key.set_value("Version", &version)
        }

        fn delete_ledger_version(&mut self, name: &str) -> std::io::Result<()> {
            match self.hklm.delete_subkey_all(format!(r"{LEDGER_PATH}\{name}")) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            }
        }

        fn ledger_names(&self) -> Vec<String> {
            let Ok(key) = self.hklm.open_subkey(LEDGER_PATH) else {
                return Vec::new();
            };
            key.enum_keys().flatten().collect()
        }

        fn find_uninstall_entry(&self, display_name_hint: &str) -> Option<UninstallEntry> {
            let hint = display_name_hint.to_lowercase();
            if let Some(exact) = self.cache.get(&hint) {
                return Some(exact.clone());
            }
            self.cache
                .iter()
                .find(|(name, _)| name.contains(&hint))
                .map(|(_, v)| v.clone())
        }

        fn product_code_version(&self, product_code: &str) -> Option<String> {
            self.cache
                .values()
                .find(|e| e.product_code.as_deref() == Some(product_code))
                .map(|e| e.display_version.clone())
        }
    }

    impl WindowsRegistryLedger {
        pub fn with_cache_loaded() -> Self {
            let mut ledger = Self::new();
            ledger.load_cache();
            ledger
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_through_ledger_then_uninstall_then_product_code() {
        let mut ledger = FakeRegistryLedger::default();
        assert_eq!(installed_version(&ledger, "Firefox", "Mozilla Firefox", None), "");

        ledger.uninstall_entries.push(UninstallEntry {
            display_name: "Mozilla Firefox".to_string(),
            display_version: "118.0".to_string(),
            product_code: Some("{ABC}".to_string()),
        });
        assert_eq!(
            installed_version(&ledger, "Firefox", "Mozilla Firefox", None),
            "118.0"
        );

        ledger.write_ledger_version("Firefox", "120.0").unwrap();
        assert_eq!(
            installed_version(&ledger, "Firefox", "Mozilla Firefox", None),
            "120.0"
        );

        ledger.delete_ledger_version("Firefox").unwrap();
        assert_eq!(
            installed_version(&ledger, "Firefox", "Mozilla Firefox", None),
            "118.0"
        );
    }
}
