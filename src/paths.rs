//! Default filesystem locations (spec §6).
//!
//! Every path is overridable via an environment variable so the integration
//! tests (and contributors on non-Windows machines) can point the agent at a
//! scratch directory instead of `C:\ProgramData\...`. Production runs never
//! set these variables and get the documented Windows defaults.

use std::path::PathBuf;

fn programdata() -> PathBuf {
    std::env::var_os("CIMIAN_PROGRAMDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData\ManagedInstalls"))
}

pub fn config_path() -> PathBuf {
    std::env::var_os("CIMIAN_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| programdata().join("Config.yaml"))
}

pub fn cache_path() -> PathBuf {
    programdata().join("Cache")
}

pub fn catalogs_path() -> PathBuf {
    programdata().join("catalogs")
}

pub fn manifests_path() -> PathBuf {
    programdata().join("manifests")
}

pub fn logs_path() -> PathBuf {
    programdata().join("logs")
}

pub fn reports_path() -> PathBuf {
    programdata().join("reports")
}

pub fn bootstrap_flag_path() -> PathBuf {
    programdata().join(".cimian.bootstrap")
}

pub fn selfupdate_flag_path() -> PathBuf {
    programdata().join(".cimian.selfupdate")
}

pub fn preflight_script_path() -> PathBuf {
    std::env::var_os("CIMIAN_PROGRAMFILES")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files\Cimian"))
        .join("preflight.ps1")
}

pub fn postflight_script_path() -> PathBuf {
    std::env::var_os("CIMIAN_PROGRAMFILES")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Program Files\Cimian"))
        .join("postflight.ps1")
}

pub fn single_instance_lock_path() -> PathBuf {
    programdata().join(".cimian.lock")
}
