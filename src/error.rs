//! Error taxonomy (spec §7).
//!
//! Components return `Result<T, AgentError>` so call sites can match on a
//! specific failure mode instead of inspecting message strings. `main`
//! flattens whatever reaches it into one of the exit codes in §6.

use thiserror::Error;

/// A structured classification for a failed install/update attempt,
/// recorded on events and rolled up into `items.json` (§4.6, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    PermissionDenied,
    InstallerFailure,
    Timeout,
    NetworkFailure,
    DependencyMissing,
    RegistryError,
    FileNotFound,
    UnknownError,
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorType::PermissionDenied => "permission_denied",
            ErrorType::InstallerFailure => "installer_failure",
            ErrorType::Timeout => "timeout",
            ErrorType::NetworkFailure => "network_failure",
            ErrorType::DependencyMissing => "dependency_missing",
            ErrorType::RegistryError => "registry_error",
            ErrorType::FileNotFound => "file_not_found",
            ErrorType::UnknownError => "unknown_error",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("fetch error: {0}")]
    FetchError(String),

    #[error("parse error in {file}: {reason}")]
    ParseError { file: String, reason: String },

    #[error("resolve error: {0}")]
    ResolveError(String),

    #[error("probe error for {package}: {reason}")]
    ProbeError { package: String, reason: String },

    #[error("install error for {package}: {reason}")]
    InstallError {
        package: String,
        reason: String,
        error_type: ErrorType,
    },

    #[error("blocked by running applications: {0:?}")]
    BlockingAppsError(Vec<String>),

    #[error("self-update error: {0}")]
    SelfUpdateError(String),

    #[error("internal invariant violated: {0}")]
    InternalError(String),

    #[error("another agent instance is already running")]
    ErrAlreadyRunning,

    #[error("administrator privileges are required")]
    ErrNotElevated,

    #[error("preflight hook refused the run (exit code {0})")]
    PreflightRefused(i32),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Maps this error onto the process exit codes of spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::ConfigError(_) => 5,
            AgentError::ErrNotElevated => 2,
            AgentError::ErrAlreadyRunning => 3,
            AgentError::PreflightRefused(_) => 4,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
