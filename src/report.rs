//! Per-run outcome tally (spec §4.6, §6).
//!
//! `Report` is an in-memory scratchpad the orchestrator fills in while
//! dispatching one run's actions; at the end of the run its counts feed
//! `session.json`'s summary block and its items feed `reporter::regenerate`
//! (by way of the session event log). It is not itself written to disk —
//! the three files under `reports_path` (`sessions.json`, `events.json`,
//! `items.json`) are the durable, rebuildable artifact (see `reporter.rs`).

use crate::error::ErrorType;
use crate::session::SuspectedCause;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub name: String,
    pub action: String,
    pub installed_version: String,
    pub catalog_version: String,
    pub success: bool,
    pub error_type: Option<ErrorType>,
    pub reason: Option<String>,
    /// Only ever set on a failed install/update (spec §4.6 "install-loop" diagnosis).
    pub suspected_cause: Option<SuspectedCause>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub run_type: String,
    pub log_version: String,
    pub exit_code: i32,
    pub items: Vec<ItemOutcome>,
    pub warnings: Vec<String>,
}

impl Report {
    pub fn installed_count(&self) -> usize {
        self.items.iter().filter(|i| i.success && i.action == "install").count()
    }

    pub fn updated_count(&self) -> usize {
        self.items.iter().filter(|i| i.success && i.action == "update").count()
    }

    pub fn uninstalled_count(&self) -> usize {
        self.items.iter().filter(|i| i.success && i.action == "uninstall").count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.iter().filter(|i| !i.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        Report {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            run_type: "auto".to_string(),
            log_version: "0.1.0".to_string(),
            exit_code: 0,
            items: vec![
                ItemOutcome {
                    name: "Firefox".to_string(),
                    action: "install".to_string(),
                    installed_version: String::new(),
                    catalog_version: "120.0".to_string(),
                    success: true,
                    error_type: None,
                    reason: None,
                    suspected_cause: None,
                },
                ItemOutcome {
                    name: "Broken".to_string(),
                    action: "install".to_string(),
                    installed_version: String::new(),
                    catalog_version: "1.0".to_string(),
                    success: false,
                    error_type: Some(ErrorType::InstallerFailure),
                    reason: Some("exit code 1".to_string()),
                    suspected_cause: Some(SuspectedCause::InstallerCrashLoop),
                },
            ],
            warnings: vec![],
        }
    }

    #[test]
    fn counts_split_by_action_and_success() {
        let report = sample();
        assert_eq!(report.installed_count(), 1);
        assert_eq!(report.failed_count(), 1);
    }
}
