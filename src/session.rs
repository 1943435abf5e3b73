//! Session event stream (spec §4.6): one JSON object per line, appended to
//! `<logs_path>/<session_id>/events.jsonl`, distinct from the free-text
//! `tracing` log the operator reads (see `SPEC_FULL.md` §10.1). Machine
//! consumable, so every event carries a stable `event` tag and
//! `serde_json::to_string` rather than any hand-formatted string.
//!
//! Each invocation gets its own directory, named by the run's start time, so
//! `reporter::regenerate` can walk `logs_path` and treat every subdirectory
//! holding an `events.jsonl` as one session — the same shape `captain_log.rs`
//! gives `PatternCache::recent_sessions`, just one file per session instead
//! of one `VecDeque` entry.

use crate::error::ErrorType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        timestamp: DateTime<Utc>,
        run_type: String,
    },
    ItemProbed {
        timestamp: DateTime<Utc>,
        name: String,
        action: String,
        installed_version: String,
        catalog_version: String,
    },
    InstallAttempted {
        timestamp: DateTime<Utc>,
        name: String,
        version: String,
        attempt: u32,
    },
    InstallSucceeded {
        timestamp: DateTime<Utc>,
        name: String,
        version: String,
    },
    InstallFailed {
        timestamp: DateTime<Utc>,
        name: String,
        version: String,
        error_type: ErrorType,
        reason: String,
    },
    UninstallSucceeded {
        timestamp: DateTime<Utc>,
        name: String,
    },
    UninstallFailed {
        timestamp: DateTime<Utc>,
        name: String,
        error_type: ErrorType,
        reason: String,
    },
    /// An item was skipped for a reason worth surfacing to an operator —
    /// ineligible architecture/OS, a blocking application, an on-demand
    /// item that can't be uninstalled — without it being a failure (spec
    /// §7 `ItemStatus::Warning`).
    ItemWarning {
        timestamp: DateTime<Utc>,
        name: String,
        reason: String,
    },
    Warning {
        timestamp: DateTime<Utc>,
        message: String,
    },
    RunFinished {
        timestamp: DateTime<Utc>,
        exit_code: i32,
        installed_count: usize,
        updated_count: usize,
        uninstalled_count: usize,
        failed_count: usize,
    },
}

/// Environment facts recorded once per session header, per spec §4.6
/// `session.json`'s `environment{}` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub hostname: String,
    pub user: String,
    pub process_id: u32,
    pub log_version: String,
}

impl Environment {
    pub fn current() -> Self {
        Environment {
            hostname: std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string()),
            user: std::env::var("USERNAME").unwrap_or_else(|_| "unknown".to_string()),
            process_id: std::process::id(),
            log_version: crate::version().to_string(),
        }
    }
}

/// `session.json`'s summary block (spec §4.6). Built once at the end of a
/// run from the same counts the caller already threads through
/// `Event::RunFinished`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_actions: usize,
    pub installs: usize,
    pub updates: usize,
    pub removals: usize,
    pub successes: usize,
    pub failures: usize,
    pub duration_seconds: f64,
    pub packages_handled: Vec<String>,
    pub environment: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHeader {
    pub session_id: String,
    pub run_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub summary: SessionSummary,
}

/// Formats a `DateTime<Utc>` the way session directory names are keyed:
/// `YYYY-MM-DD-HHMMSS`, sortable lexicographically by start time.
pub fn session_id_for(started_at: DateTime<Utc>) -> String {
    started_at.format("%Y-%m-%d-%H%M%S").to_string()
}

/// Appends events to one run's `events.jsonl` and, at the end of the run,
/// writes the `session.json` header. Every `record` call opens, appends, and
/// closes the file rather than holding it open across the whole run — Design
/// Notes §9 prefers this to a long-lived file handle so a concurrently
/// running `--show-status` invocation always sees a consistent, fully
/// flushed file.
pub struct SessionLog {
    session_id: String,
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(logs_dir: impl AsRef<Path>) -> Self {
        let session_id = session_id_for(Utc::now());
        SessionLog {
            dir: logs_dir.as_ref().join(&session_id),
            session_id,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Test-only escape hatch for constructing sessions with a specific
    /// directory/id pair, so tests in other modules can simulate multiple
    /// distinct sessions without depending on wall-clock second resolution.
    #[cfg(test)]
    pub(crate) fn at(dir: PathBuf, session_id: String) -> Self {
        SessionLog { dir, session_id }
    }

    /// The per-run session directory (`<logs_path>/<session_id>`).
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    pub fn record(&self, event: &Event) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(self.events_path())?;
        let line = serde_json::to_string(event).expect("Event always serializes");
        writeln!(file, "{line}")
    }

    /// Writes `session.json` once the run has produced its final outcome.
    pub fn finish(&self, run_type: &str, started_at: DateTime<Utc>, status: &str, summary: SessionSummary) -> std::io::Result<()> {
        let header = SessionHeader {
            session_id: self.session_id.clone(),
            run_type: run_type.to_string(),
            started_at,
            finished_at: Utc::now(),
            status: status.to_string(),
            summary,
        };
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(&header).expect("SessionHeader always serializes");
        std::fs::write(self.dir.join("session.json"), json)
    }
}

/// A guess at why a package keeps failing, surfaced alongside a failed
/// install outcome and rolled up into `items.json` (spec §4.6 "install-loop"
/// diagnosis, `SPEC_FULL.md` §10.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuspectedCause {
    FlakyNetwork,
    InstallerCrashLoop,
    BlockedByRunningProcess,
    InsufficientPrivileges,
    CatalogVersionChurn,
    Unknown,
}

impl SuspectedCause {
    /// Short operator-facing text for `items.json.recommendation`.
    pub fn recommendation(self) -> &'static str {
        match self {
            SuspectedCause::FlakyNetwork => "Check repository reachability and retry outside peak hours.",
            SuspectedCause::InstallerCrashLoop => "Inspect the installer's exit code and captured output; the package itself may be broken.",
            SuspectedCause::BlockedByRunningProcess => "Close the blocking application or schedule the install for a maintenance window.",
            SuspectedCause::InsufficientPrivileges => "Confirm the agent is running with administrator privileges.",
            SuspectedCause::CatalogVersionChurn => "Catalog version keeps changing between runs; confirm the publisher isn't republishing the same package repeatedly.",
            SuspectedCause::Unknown => "Review the session event log for this package manually.",
        }
    }
}

const SUSPECTED_CAUSE_LOOKBACK: usize = 5;

fn classify(error_type: ErrorType) -> SuspectedCause {
    match error_type {
        ErrorType::NetworkFailure | ErrorType::Timeout => SuspectedCause::FlakyNetwork,
        ErrorType::InstallerFailure => SuspectedCause::InstallerCrashLoop,
        ErrorType::DependencyMissing => SuspectedCause::BlockedByRunningProcess,
        ErrorType::PermissionDenied => SuspectedCause::InsufficientPrivileges,
        ErrorType::RegistryError => SuspectedCause::CatalogVersionChurn,
        ErrorType::FileNotFound | ErrorType::UnknownError => SuspectedCause::Unknown,
    }
}

/// Majority-votes `SuspectedCause` from a package's most recent
/// `install_failed` events, newest first, across every session directory
/// under `logs_dir` (directory names sort lexicographically by start time,
/// so a plain reverse-sorted walk visits the newest session first). Ties
/// and empty history both resolve to `Unknown` rather than guessing.
pub fn suspected_cause(logs_dir: &Path, package: &str) -> SuspectedCause {
    let mut causes: Vec<SuspectedCause> = Vec::new();
    'sessions: for session_dir in recent_session_dirs(logs_dir) {
        let Ok(contents) = std::fs::read_to_string(session_dir.join("events.jsonl")) else {
            continue;
        };
        for line in contents.lines().rev() {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            if value.get("event").and_then(|v| v.as_str()) != Some("install_failed") {
                continue;
            }
            if value.get("name").and_then(|v| v.as_str()) != Some(package) {
                continue;
            }
            if let Some(error_type) = value
                .get("error_type")
                .and_then(|v| serde_json::from_value::<ErrorType>(v.clone()).ok())
            {
                causes.push(classify(error_type));
            }
            if causes.len() >= SUSPECTED_CAUSE_LOOKBACK {
                break 'sessions;
            }
        }
    }

    if causes.is_empty() {
        return SuspectedCause::Unknown;
    }

    let mut counts: std::collections::HashMap<SuspectedCause, usize> = std::collections::HashMap::new();
    for cause in &causes {
        *counts.entry(*cause).or_insert(0) += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    let mut winners = counts.iter().filter(|(_, count)| **count == top).map(|(cause, _)| *cause);
    match (winners.next(), winners.next()) {
        (Some(cause), None) => cause,
        _ => SuspectedCause::Unknown,
    }
}

/// Every subdirectory of `logs_dir` holding an `events.jsonl`, newest first.
pub fn recent_session_dirs(logs_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(logs_dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.join("events.jsonl").exists())
        .collect();
    dirs.sort();
    dirs.reverse();
    dirs
}
