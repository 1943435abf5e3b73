//! `RunContext` (Design Notes §9): CLI flags and config are folded into one
//! immutable value, constructed once at startup, then threaded by
//! reference through every later stage instead of re-reading either one.

use crate::catalog::Arch;
use crate::cli::Cli;
use crate::config::Config;
use std::path::PathBuf;

pub struct RunContext {
    pub run_type: &'static str,
    pub manifest_override: Option<String>,
    pub local_only_manifest: Option<String>,
    pub no_preflight: bool,
    /// Suppresses bootstrap mode's optional-install promotion for this run
    /// (spec §4.1: `--manifest` "skips self-service").
    pub skip_self_service: bool,
    pub item_filter: Vec<String>,
    pub log_level: u8,
    pub config: Config,
    pub arch: Option<Arch>,
    pub os_version: String,
}

impl RunContext {
    pub fn build(cli: Cli, config: Config, os_version: String) -> Self {
        let log_level = cli.verbose.max(config.log_level);
        // `--manifest` points at a one-off server-side path outside the
        // machine's normal assignment, so the usual human-facing veto/
        // self-service hooks don't apply to it (spec §4.1).
        let no_preflight = cli.no_preflight || config.no_preflight || cli.manifest.is_some();
        let skip_self_service = config.skip_self_service || cli.manifest.is_some();
        let local_only_manifest = cli.local_only_manifest.clone().or_else(|| config.local_only_manifest.clone());
        let arch = config
            .default_arch
            .as_deref()
            .and_then(|a| match a.to_lowercase().as_str() {
                "x64" => Some(Arch::X64),
                "x86" => Some(Arch::X86),
                "arm64" => Some(Arch::Arm64),
                _ => None,
            })
            .or_else(Arch::current);

        RunContext {
            run_type: cli.run_type(),
            manifest_override: cli.manifest,
            local_only_manifest,
            no_preflight,
            skip_self_service,
            item_filter: cli.item,
            log_level,
            config,
            arch,
            os_version,
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.config.cache_path()
    }

    pub fn logs_path(&self) -> PathBuf {
        self.config.logs_path()
    }

    pub fn reports_path(&self) -> PathBuf {
        self.config.reports_path()
    }

    /// When non-empty, only these names participate in probing/dispatch
    /// this run (spec §4.1 `--item`).
    pub fn item_allowed(&self, name: &str) -> bool {
        self.item_filter.is_empty() || self.item_filter.iter().any(|n| n.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn base_config() -> Config {
        Config {
            software_repo_url: "https://example.com".to_string(),
            client_identifier: "site".to_string(),
            default_catalog: "production".to_string(),
            default_arch: None,
            cache_path: None,
            catalogs_path: None,
            manifests_path: None,
            logs_path: None,
            reports_path: None,
            basic_auth: None,
            local_only_manifest: None,
            no_preflight: false,
            skip_self_service: false,
            log_level: 0,
        }
    }

    #[test]
    fn cli_verbosity_wins_over_config_log_level() {
        let cli = Cli::parse_from(["cimian", "-vv"]);
        let ctx = RunContext::build(cli, base_config(), "10.0.19045".to_string());
        assert_eq!(ctx.log_level, 2);
    }

    #[test]
    fn empty_item_filter_allows_everything() {
        let cli = Cli::parse_from(["cimian"]);
        let ctx = RunContext::build(cli, base_config(), "10.0.19045".to_string());
        assert!(ctx.item_allowed("anything"));
    }

    #[test]
    fn non_empty_item_filter_restricts_by_name_case_insensitively() {
        let cli = Cli::parse_from(["cimian", "--item", "Firefox"]);
        let ctx = RunContext::build(cli, base_config(), "10.0.19045".to_string());
        assert!(ctx.item_allowed("firefox"));
        assert!(!ctx.item_allowed("Vlc"));
    }
}
