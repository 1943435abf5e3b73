//! Report exporter (spec §4.6, `--report`): reads every session directory
//! under `logs_path` and rebuilds the three aggregated tables downstream
//! monitoring consumes — `sessions.json`, `events.json`, `items.json` —
//! atomically, the same write-to-tmp-then-rename discipline `ipc.rs` and
//! `report.rs` use for their own published files.
//!
//! This generalizes `captain_log.rs`'s `PatternCache`: where the teacher
//! keeps a rolling `VecDeque<SessionData>` in one process-local cache file
//! and derives `ProjectHealth`/`find_recurring_errors` from it, this agent's
//! sessions already live on disk as one directory per run, so the exporter
//! rebuilds its rollups by rereading them fresh every time rather than
//! maintaining a long-lived cache — matching testable property #8 ("`--report`
//! rebuilds deterministically from session logs").

use crate::session::SuspectedCause;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Recent attempts considered for install-loop detection, and the window
/// they must fall within (spec §8 testable property #9: "3 recent (<=7
/// days) install/update attempts show <50% success rate").
const LOOP_DETECTION_WINDOW: usize = 3;
const LOOP_DETECTION_LOOKBACK_DAYS: i64 = 7;
const EVENTS_WINDOW_HOURS: i64 = 48;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub run_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub installs: usize,
    pub updates: usize,
    pub removals: usize,
    pub successes: usize,
    pub failures: usize,
    pub failed_packages: Vec<String>,
}

/// One `events.jsonl` line, tagged with the session it came from so
/// `events.json` readers can trace an event back to its `session.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Installed,
    PendingInstall,
    Failed,
    Warning,
    InstallLoop,
    NotInstalled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCounts {
    pub install: usize,
    pub update: usize,
    pub removal: usize,
    pub failure: usize,
    pub warning: usize,
    pub total_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_name: String,
    pub current_status: ItemStatus,
    pub last_action_at: Option<DateTime<Utc>>,
    pub counts: ItemCounts,
    pub recent_attempts: Vec<Attempt>,
    pub install_loop_detected: bool,
    pub suspected_cause: Option<SuspectedCause>,
    pub recommendation: Option<String>,
}

/// Reads `<session_dir>/events.jsonl` into `EventRecord`s, tagging each line
/// with the session it came from and extracting its `timestamp` field for
/// sorting — a parse failure on one line is skipped rather than aborting the
/// whole session (a partially-written line from an interrupted run should
/// not make the rest of that session's history unreadable).
fn read_session_events(session_id: &str, session_dir: &Path) -> Vec<EventRecord> {
    let Ok(contents) = std::fs::read_to_string(session_dir.join("events.jsonl")) else {
        return Vec::new();
    };
    contents
        .lines()
        .filter_map(|line| {
            let value: Value = serde_json::from_str(line).ok()?;
            let timestamp = value.get("timestamp")?.as_str()?;
            let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc);
            Some(EventRecord {
                session_id: session_id.to_string(),
                timestamp,
                raw: value,
            })
        })
        .collect()
}

fn session_record(session_id: &str, events: &[EventRecord]) -> SessionRecord {
    let started_at = events
        .iter()
        .find(|e| e.raw.get("event").and_then(|v| v.as_str()) == Some("run_started"))
        .map(|e| e.timestamp)
        .unwrap_or_else(|| events.first().map(|e| e.timestamp).unwrap_or_else(Utc::now));

    let finished = events
        .iter()
        .find(|e| e.raw.get("event").and_then(|v| v.as_str()) == Some("run_finished"));

    let run_type = events
        .iter()
        .find(|e| e.raw.get("event").and_then(|v| v.as_str()) == Some("run_started"))
        .and_then(|e| e.raw.get("run_type").and_then(|v| v.as_str()))
        .unwrap_or("unknown")
        .to_string();

    let installs = events
        .iter()
        .filter(|e| e.raw.get("event").and_then(|v| v.as_str()) == Some("install_succeeded"))
        .count();
    let removals = events
        .iter()
        .filter(|e| e.raw.get("event").and_then(|v| v.as_str()) == Some("uninstall_succeeded"))
        .count();
    let failed_packages: Vec<String> = events
        .iter()
        .filter(|e| {
            matches!(
                e.raw.get("event").and_then(|v| v.as_str()),
                Some("install_failed") | Some("uninstall_failed")
            )
        })
        .filter_map(|e| e.raw.get("name").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    let failures = failed_packages.len();

    let status = match finished {
        Some(_) if failures > 0 => "completed_with_failures",
        Some(_) => "completed",
        None => "interrupted",
    };

    SessionRecord {
        session_id: session_id.to_string(),
        run_type,
        started_at,
        finished_at: finished.map(|e| e.timestamp),
        status: status.to_string(),
        installs,
        updates: 0,
        removals,
        successes: installs + removals,
        failures,
        failed_packages,
    }
}

/// For every package named by an `install_*`/`uninstall_*` event across all
/// sessions, builds its `items.json` rollup, including install-loop
/// detection per spec §8 testable property #9 and `SPEC_FULL.md` §10.7's
/// `suspected_cause` enumeration.
fn item_records(all_events: &[EventRecord], logs_dir: &Path) -> Vec<ItemRecord> {
    let mut by_name: HashMap<String, Vec<&EventRecord>> = HashMap::new();
    for event in all_events {
        let kind = event.raw.get("event").and_then(|v| v.as_str()).unwrap_or("");
        if !matches!(
            kind,
            "install_attempted" | "install_succeeded" | "install_failed" | "uninstall_succeeded" | "uninstall_failed" | "item_warning"
        ) {
            continue;
        }
        let Some(name) = event.raw.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        by_name.entry(name.to_string()).or_default().push(event);
    }

    let now = Utc::now();
    let mut items: Vec<ItemRecord> = Vec::new();
    for (name, mut events) in by_name {
        events.sort_by_key(|e| e.timestamp);

        let mut counts = ItemCounts::default();
        let mut sessions_seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut last_action_at = None;
        let mut last_warning_at: Option<DateTime<Utc>> = None;

        for event in &events {
            sessions_seen.insert(event.session_id.as_str());
            let kind = event.raw.get("event").and_then(|v| v.as_str()).unwrap_or("");
            if kind == "item_warning" {
                last_warning_at = Some(event.timestamp);
                counts.warning += 1;
                continue;
            }
            let (action, success) = match kind {
                "install_succeeded" => {
                    counts.install += 1;
                    ("install", true)
                }
                "install_failed" => {
                    counts.failure += 1;
                    ("install", false)
                }
                "uninstall_succeeded" => {
                    counts.removal += 1;
                    ("uninstall", true)
                }
                "uninstall_failed" => {
                    counts.failure += 1;
                    ("uninstall", false)
                }
                _ => continue,
            };
            last_action_at = Some(event.timestamp);
            attempts.push(Attempt {
                session_id: event.session_id.clone(),
                timestamp: event.timestamp,
                action: action.to_string(),
                success,
            });
        }
        counts.total_sessions = sessions_seen.len();
        last_action_at = match (last_action_at, last_warning_at) {
            (Some(a), Some(w)) => Some(a.max(w)),
            (Some(a), None) => Some(a),
            (None, w) => w,
        };

        let recent_attempts: Vec<Attempt> = attempts.iter().rev().take(10).cloned().collect();

        let window_cutoff = now - Duration::days(LOOP_DETECTION_LOOKBACK_DAYS);
        let windowed: Vec<&Attempt> = attempts
            .iter()
            .rev()
            .filter(|a| a.timestamp >= window_cutoff)
            .take(LOOP_DETECTION_WINDOW)
            .collect();
        let install_loop_detected = windowed.len() >= LOOP_DETECTION_WINDOW
            && (windowed.iter().filter(|a| a.success).count() as f64) / (windowed.len() as f64) < 0.5;

        let suspected_cause = if install_loop_detected {
            Some(crate::session::suspected_cause(logs_dir, &name))
        } else {
            None
        };
        let recommendation = suspected_cause.map(|c| c.recommendation().to_string());

        // A warning that postdates the last real attempt (or that has no
        // attempt at all, e.g. an arch-ineligible or blocked-app skip) wins
        // current_status — it's the freshest thing known about the item.
        let warning_is_current = match (last_warning_at, attempts.last()) {
            (Some(w), Some(a)) => w > a.timestamp,
            (Some(_), None) => true,
            (None, _) => false,
        };

        let current_status = if install_loop_detected {
            ItemStatus::InstallLoop
        } else if warning_is_current {
            ItemStatus::Warning
        } else {
            match attempts.last() {
                Some(a) if !a.success => ItemStatus::Failed,
                Some(a) if a.action == "uninstall" && a.success => ItemStatus::NotInstalled,
                Some(a) if a.success => ItemStatus::Installed,
                _ => ItemStatus::PendingInstall,
            }
        };

        items.push(ItemRecord {
            item_name: name,
            current_status,
            last_action_at,
            counts,
            recent_attempts,
            install_loop_detected,
            suspected_cause,
            recommendation,
        });
    }

    items.sort_by(|a, b| a.item_name.cmp(&b.item_name));
    items
}

fn write_atomic(dir: &Path, name: &str, value: &impl Serialize) -> Result<(), crate::AgentError> {
    std::fs::create_dir_all(dir)?;
    let json = serde_json::to_string_pretty(value)?;
    let dest = dir.join(name);
    let tmp = dest.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &dest)?;
    Ok(())
}

/// Rebuilds `sessions.json`, `events.json`, and `items.json` under
/// `reports_dir` from every session directory under `logs_dir`. Reruns are
/// idempotent (modulo event timestamps already on disk, per testable
/// property #8) since the exporter reads from scratch every time rather
/// than updating in place.
pub fn regenerate(logs_dir: &Path, reports_dir: &Path) -> Result<(usize, usize), crate::AgentError> {
    let session_dirs = crate::session::recent_session_dirs(logs_dir);

    let mut sessions: Vec<SessionRecord> = Vec::new();
    let mut all_events: Vec<EventRecord> = Vec::new();
    for dir in &session_dirs {
        let Some(session_id) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let events = read_session_events(session_id, dir);
        sessions.push(session_record(session_id, &events));
        all_events.extend(events);
    }
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    let events_cutoff = Utc::now() - Duration::hours(EVENTS_WINDOW_HOURS);
    let mut recent_events: Vec<EventRecord> = all_events.iter().filter(|e| e.timestamp >= events_cutoff).cloned().collect();
    recent_events.sort_by_key(|e| e.timestamp);

    let items = item_records(&all_events, logs_dir);

    write_atomic(reports_dir, "sessions.json", &sessions)?;
    write_atomic(reports_dir, "events.json", &recent_events)?;
    write_atomic(reports_dir, "items.json", &items)?;

    Ok((sessions.len(), items.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::session::{Event, SessionLog};

    fn log_with(dir: &Path, package: &str, outcomes: &[bool]) {
        let log = SessionLog::new(dir);
        log.record(&Event::RunStarted {
            timestamp: Utc::now(),
            run_type: "auto".to_string(),
        })
        .unwrap();
        for success in outcomes {
            if *success {
                log.record(&Event::InstallSucceeded {
                    timestamp: Utc::now(),
                    name: package.to_string(),
                    version: "1.0".to_string(),
                })
                .unwrap();
            } else {
                log.record(&Event::InstallFailed {
                    timestamp: Utc::now(),
                    name: package.to_string(),
                    version: "1.0".to_string(),
                    error_type: ErrorType::InstallerFailure,
                    reason: "exit code 1".to_string(),
                })
                .unwrap();
            }
        }
        log.record(&Event::RunFinished {
            timestamp: Utc::now(),
            exit_code: if outcomes.iter().all(|s| *s) { 0 } else { 1 },
            installed_count: outcomes.iter().filter(|s| **s).count(),
            updated_count: 0,
            uninstalled_count: 0,
            failed_count: outcomes.iter().filter(|s| !**s).count(),
        })
        .unwrap();
        // Sessions are keyed by wall-clock second; sleeping isn't an option
        // in tests, so callers that need distinct sessions create their own
        // directories directly (see `detects_install_loop_across_sessions`).
    }

    #[test]
    fn regenerate_writes_all_three_tables() {
        let logs = tempfile::tempdir().unwrap();
        let reports = tempfile::tempdir().unwrap();
        log_with(logs.path(), "Firefox", &[true]);

        let (session_count, item_count) = regenerate(logs.path(), reports.path()).unwrap();
        assert_eq!(session_count, 1);
        assert_eq!(item_count, 1);
        assert!(reports.path().join("sessions.json").exists());
        assert!(reports.path().join("events.json").exists());
        assert!(reports.path().join("items.json").exists());
    }

    #[test]
    fn detects_install_loop_across_sessions() {
        let logs = tempfile::tempdir().unwrap();
        let reports = tempfile::tempdir().unwrap();

        for (i, success) in [false, false, false].into_iter().enumerate() {
            let session_dir = logs.path().join(format!("2026-01-0{}-000000", i + 1));
            std::fs::create_dir_all(&session_dir).unwrap();
            let log = SessionLog::at(session_dir, format!("session-{i}"));
            log.record(&Event::InstallFailed {
                timestamp: Utc::now(),
                name: "Broken".to_string(),
                version: "1.0".to_string(),
                error_type: ErrorType::InstallerFailure,
                reason: "exit code 1".to_string(),
            })
            .unwrap();
            let _ = success;
        }

        regenerate(logs.path(), reports.path()).unwrap();
        let raw = std::fs::read_to_string(reports.path().join("items.json")).unwrap();
        let items: Vec<ItemRecord> = serde_json::from_str(&raw).unwrap();
        let broken = items.iter().find(|i| i.item_name == "Broken").unwrap();
        assert!(broken.install_loop_detected);
        assert_eq!(broken.current_status, ItemStatus::InstallLoop);
        assert!(broken.suspected_cause.is_some());
    }

    #[test]
    fn item_warning_event_produces_warning_status() {
        let logs = tempfile::tempdir().unwrap();
        let reports = tempfile::tempdir().unwrap();
        let log = SessionLog::new(logs.path());
        log.record(&Event::ItemWarning {
            timestamp: Utc::now(),
            name: "Vlc".to_string(),
            reason: "ineligible for current architecture".to_string(),
        })
        .unwrap();

        regenerate(logs.path(), reports.path()).unwrap();
        let raw = std::fs::read_to_string(reports.path().join("items.json")).unwrap();
        let items: Vec<ItemRecord> = serde_json::from_str(&raw).unwrap();
        let vlc = items.iter().find(|i| i.item_name == "Vlc").unwrap();
        assert_eq!(vlc.current_status, ItemStatus::Warning);
        assert_eq!(vlc.counts.warning, 1);
    }

    #[test]
    fn no_loop_when_most_attempts_succeed() {
        let logs = tempfile::tempdir().unwrap();
        let reports = tempfile::tempdir().unwrap();
        log_with(logs.path(), "Firefox", &[true, true, true]);

        regenerate(logs.path(), reports.path()).unwrap();
        let raw = std::fs::read_to_string(reports.path().join("items.json")).unwrap();
        let items: Vec<ItemRecord> = serde_json::from_str(&raw).unwrap();
        let firefox = items.iter().find(|i| i.item_name == "Firefox").unwrap();
        assert!(!firefox.install_loop_detected);
    }
}
