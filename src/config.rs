//! Agent configuration (spec §4.1, `SPEC_FULL.md` §10.3).
//!
//! A single YAML file, `Config.yaml`, loaded once per run. Every
//! unrecognized key is a hard parse error (`deny_unknown_fields`) so a
//! typo'd field name fails loudly at startup instead of silently being
//! ignored in production.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BasicAuthConfig {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub software_repo_url: String,
    pub client_identifier: String,
    #[serde(default = "default_catalog")]
    pub default_catalog: String,
    #[serde(default)]
    pub default_arch: Option<String>,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub catalogs_path: Option<PathBuf>,
    #[serde(default)]
    pub manifests_path: Option<PathBuf>,
    #[serde(default)]
    pub logs_path: Option<PathBuf>,
    #[serde(default)]
    pub reports_path: Option<PathBuf>,
    #[serde(default)]
    pub basic_auth: Option<BasicAuthConfig>,
    #[serde(default)]
    pub local_only_manifest: Option<String>,
    #[serde(default)]
    pub no_preflight: bool,
    #[serde(default)]
    pub skip_self_service: bool,
    #[serde(default)]
    pub log_level: u8,
}

fn default_catalog() -> String {
    "production".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Config = serde_yaml::from_str(&raw).map_err(|e| {
            AgentError::ConfigError(format!("failed to parse {}: {e}", path.display()))
        })?;
        if config.software_repo_url.trim().is_empty() {
            return Err(AgentError::ConfigError("software_repo_url must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Resolves the basic-auth credential pair, per `SPEC_FULL.md` §10.3:
    /// `CIMIAN_REPO_PASSWORD` wins over a configured password, which wins
    /// over an interactive prompt.
    pub fn resolve_basic_auth(&self) -> Option<(String, String)> {
        let auth = self.basic_auth.as_ref()?;
        if let Ok(env_password) = std::env::var("CIMIAN_REPO_PASSWORD") {
            return Some((auth.username.clone(), env_password));
        }
        if let Some(password) = &auth.password {
            return Some((auth.username.clone(), password.clone()));
        }
        let password = rpassword::prompt_password(format!("Password for {}: ", auth.username)).ok()?;
        Some((auth.username.clone(), password))
    }

    pub fn cache_path(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(crate::paths::cache_path)
    }

    pub fn catalogs_path(&self) -> PathBuf {
        self.catalogs_path.clone().unwrap_or_else(crate::paths::catalogs_path)
    }

    pub fn manifests_path(&self) -> PathBuf {
        self.manifests_path.clone().unwrap_or_else(crate::paths::manifests_path)
    }

    pub fn logs_path(&self) -> PathBuf {
        self.logs_path.clone().unwrap_or_else(crate::paths::logs_path)
    }

    pub fn reports_path(&self) -> PathBuf {
        self.reports_path.clone().unwrap_or_else(crate::paths::reports_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.yaml");
        std::fs::write(
            &path,
            "software_repo_url: https://example.com\nclient_identifier: site-default\ntotally_made_up_field: true\n",
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn requires_non_empty_repo_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.yaml");
        std::fs::write(&path, "software_repo_url: \"\"\nclient_identifier: site-default\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn defaults_catalog_to_production() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.yaml");
        std::fs::write(
            &path,
            "software_repo_url: https://example.com\nclient_identifier: site-default\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_catalog, "production");
    }

    #[test]
    fn env_password_overrides_configured_password() {
        std::env::set_var("CIMIAN_REPO_PASSWORD", "from-env");
        let config = Config {
            software_repo_url: "https://example.com".to_string(),
            client_identifier: "site".to_string(),
            default_catalog: "production".to_string(),
            default_arch: None,
            cache_path: None,
            catalogs_path: None,
            manifests_path: None,
            logs_path: None,
            reports_path: None,
            basic_auth: Some(BasicAuthConfig {
                username: "svc".to_string(),
                password: Some("from-config".to_string()),
            }),
            local_only_manifest: None,
            no_preflight: false,
            skip_self_service: false,
            log_level: 0,
        };
        let (user, pass) = config.resolve_basic_auth().unwrap();
        assert_eq!(user, "svc");
        assert_eq!(pass, "from-env");
        std::env::remove_var("CIMIAN_REPO_PASSWORD");
    }
}
