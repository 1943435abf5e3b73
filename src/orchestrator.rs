//! Top-level reconciliation loop (spec §4, §5, §8 scenarios A–F).
//!
//! This is the one place that knows the full sequence: lock, elevation
//! check, preflight, fetch, probe, resolve, dispatch (uninstalls, then
//! installs, then updates), report, postflight, unlock. Every individual
//! step lives in its own module and is independently tested; this module's
//! job is ordering them correctly and turning per-item failures into a
//! single coherent exit code.

use crate::cache::Cache;
use crate::catalog::{Catalog, CatalogItem};
use crate::context::RunContext;
use crate::dispatcher;
use crate::error::AgentError;
use crate::fetcher::Fetcher;
use crate::hooks;
use crate::idle::{self, IdleTime};
use crate::ipc::{Phase, StatusMessage, StatusPublisher};
use crate::manifest::{ExpandedManifest, ItemCategory, ManifestFile, ManifestItem};
use crate::paths;
use crate::prober::{self, Action, FileVersionReader, ProbeEnv, ProbeStatus, ScriptRunner};
use crate::processes::ProcessSnapshot;
use crate::registry::RegistryLedger;
use crate::report::{ItemOutcome, Report};
use crate::reporter;
use crate::resolver;
use crate::selfupdate::SelfUpdate;
use crate::session::{Environment, Event, SessionLog, SessionSummary};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[cfg(windows)]
fn registry_ledger() -> Box<dyn RegistryLedger> {
    Box::new(crate::registry::windows_impl::WindowsRegistryLedger::with_cache_loaded())
}

#[cfg(not(windows))]
fn registry_ledger() -> Box<dyn RegistryLedger> {
    Box::new(crate::registry::FakeRegistryLedger::default())
}

#[cfg(windows)]
fn process_snapshot() -> Box<dyn ProcessSnapshot> {
    Box::new(crate::processes::windows_impl::WindowsProcessSnapshot::new())
}

#[cfg(not(windows))]
fn process_snapshot() -> Box<dyn ProcessSnapshot> {
    Box::new(crate::processes::FakeProcessSnapshot::default())
}

#[cfg(windows)]
fn idle_time() -> Box<dyn IdleTime> {
    Box::new(crate::idle::windows_impl::WindowsIdleTime::new())
}

#[cfg(not(windows))]
fn idle_time() -> Box<dyn IdleTime> {
    Box::new(crate::idle::FakeIdleTime(None))
}

fn script_runner() -> Box<dyn ScriptRunner> {
    Box::new(crate::prober::PowerShellScriptRunner)
}

fn file_version_reader() -> Box<dyn FileVersionReader> {
    Box::new(crate::prober::PowerShellFileVersionReader)
}

/// Runs one full reconciliation pass. Returns the process exit code
/// (spec §6) — callers (`main`) should exit with exactly this value.
pub async fn run(ctx: RunContext) -> i32 {
    match run_inner(&ctx).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "run aborted");
            e.exit_code()
        }
    }
}

async fn run_inner(ctx: &RunContext) -> Result<i32, AgentError> {
    let _lock = crate::single_instance::SingleInstance::acquire(&paths::single_instance_lock_path())?;

    let snapshot = process_snapshot();
    if !snapshot.is_elevated() {
        return Err(AgentError::ErrNotElevated);
    }

    if ctx.run_type == "auto" && idle::auto_run_should_suppress(idle_time().as_ref()) {
        tracing::info!("suppressing auto run: interactive user was active too recently");
        return Ok(0);
    }

    if !ctx.no_preflight {
        hooks::run_preflight(&paths::preflight_script_path())?;
    }

    let session = SessionLog::new(ctx.logs_path());
    session.record(&Event::RunStarted {
        timestamp: Utc::now(),
        run_type: ctx.run_type.to_string(),
    })?;

    let status = StatusPublisher::bind().await;
    status.publish(&StatusMessage {
        updated_at: Utc::now(),
        phase: Phase::Fetching,
        current_item: None,
        items_done: 0,
        items_total: 0,
        pid: std::process::id(),
    });

    // Spec §5 cancellation: an OS interrupt must let the current installer
    // finish and stop starting new work rather than killing anything
    // mid-flight, so this only ever gets observed between items.
    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancelled.store(true, Ordering::SeqCst);
            }
        });
    }

    let expanded = load_manifest_tree(ctx).await?;
    for warning in &expanded.warnings {
        session.record(&Event::Warning {
            timestamp: Utc::now(),
            message: warning.clone(),
        })?;
    }

    let fetcher = build_fetcher(ctx)?;
    let (catalogs, catalog_warnings) = fetcher.resolve_catalogs(&expanded.catalogs, ctx.arch).await;
    for warning in &catalog_warnings {
        session.record(&Event::Warning {
            timestamp: Utc::now(),
            message: warning.clone(),
        })?;
    }

    let mut ledger = registry_ledger();
    let bootstrap_active = crate::bootstrap::is_set(&paths::bootstrap_flag_path());
    // Spec §4.5: a blocking application only forces a skip on a
    // non-interactive run (a scheduled `--auto` pass, or bootstrap mode
    // pushing optional installs through unattended); a manual `--installonly`
    // or `--checkonly` invocation is interactive.
    let interactive = ctx.run_type != "auto" && !bootstrap_active;

    let scripts = script_runner();
    let files = file_version_reader();
    let probe_env = ProbeEnv {
        ledger: ledger.as_ref(),
        scripts: scripts.as_ref(),
        files: files.as_ref(),
        current_arch: ctx.arch,
        current_os_version: &ctx.os_version,
    };

    status.publish(&StatusMessage {
        updated_at: Utc::now(),
        phase: Phase::Probing,
        current_item: None,
        items_done: 0,
        items_total: expanded.items.len(),
        pid: std::process::id(),
    });

    let mut outcomes: Vec<ItemOutcome> = Vec::new();
    let mut to_install: Vec<(ManifestItem, CatalogItem, Action)> = Vec::new();
    let mut to_uninstall: Vec<(ManifestItem, CatalogItem)> = Vec::new();

    for item in &expanded.items {
        if !ctx.item_allowed(&item.name) {
            continue;
        }
        let catalog_item = resolve_from_catalogs(&catalogs, &item.catalogs, &ctx.config.default_catalog, &item.name);
        let effective_category = if bootstrap_active && !ctx.skip_self_service && item.category == ItemCategory::Optional {
            ItemCategory::Install
        } else {
            item.category
        };
        let mut item = item.clone();
        item.category = effective_category;

        let result = prober::probe(&probe_env, &item, catalog_item);
        session.record(&Event::ItemProbed {
            timestamp: Utc::now(),
            name: result.name.clone(),
            action: format!("{:?}", result.action).to_lowercase(),
            installed_version: result.installed_version.clone(),
            catalog_version: result.catalog_version.clone(),
        })?;
        if result.status == ProbeStatus::Warning {
            session.record(&Event::ItemWarning {
                timestamp: Utc::now(),
                name: result.name.clone(),
                reason: result.reason.to_string(),
            })?;
        }

        match result.action {
            Action::Install if ctx.run_type == "installonly" => {
                // Spec §4.1: --installonly skips new-install discovery —
                // only items already pending an update/uninstall proceed.
                outcomes.push(ItemOutcome {
                    name: result.name,
                    action: "skip".to_string(),
                    installed_version: result.installed_version,
                    catalog_version: result.catalog_version,
                    success: true,
                    error_type: None,
                    reason: Some("new-install discovery skipped for --installonly".to_string()),
                    suspected_cause: None,
                });
            }
            Action::Install | Action::Update => {
                if let Some(catalog_item) = catalog_item {
                    to_install.push((item, catalog_item.clone(), result.action));
                }
            }
            Action::Uninstall => {
                if let Some(catalog_item) = catalog_item {
                    to_uninstall.push((item, catalog_item.clone()));
                }
            }
            Action::Skip => {
                outcomes.push(ItemOutcome {
                    name: result.name,
                    action: "skip".to_string(),
                    installed_version: result.installed_version,
                    catalog_version: result.catalog_version,
                    success: true,
                    error_type: None,
                    reason: Some(result.reason.to_string()),
                    suspected_cause: None,
                });
            }
        }
    }

    let mut already_considered: std::collections::HashSet<String> = to_install
        .iter()
        .map(|(_, ci, _)| ci.name.to_lowercase())
        .chain(to_uninstall.iter().map(|(_, ci)| ci.name.to_lowercase()))
        .collect();
    for outcome in &outcomes {
        already_considered.insert(outcome.name.to_lowercase());
    }
    for catalog in catalogs.values() {
        for catalog_item in catalog.iter() {
            if already_considered.contains(&catalog_item.name.to_lowercase()) {
                continue;
            }
            if catalog_item.update_for.is_empty() {
                continue;
            }
            if !catalog_item.update_for.iter().any(|target| prober::update_for_applies(ledger.as_ref(), target)) {
                continue;
            }
            already_considered.insert(catalog_item.name.to_lowercase());
            let synthetic = ManifestItem {
                name: catalog_item.name.clone(),
                version: String::new(),
                source_manifest: "update_for".to_string(),
                catalogs: vec![catalog.name.clone()],
                category: ItemCategory::Update,
            };
            let result = prober::probe(&probe_env, &synthetic, Some(catalog_item));
            if result.action == Action::Update {
                to_install.push((synthetic, catalog_item.clone(), Action::Update));
            }
        }
    }

    if ctx.run_type == "checkonly" {
        let started_at = Utc::now();
        for (_, catalog_item, action) in &to_install {
            let action_label = format!("{action:?}").to_lowercase();
            outcomes.push(ItemOutcome {
                name: catalog_item.name.clone(),
                action: action_label.clone(),
                installed_version: String::new(),
                catalog_version: catalog_item.version.clone(),
                success: true,
                error_type: None,
                reason: Some(format!("would {action_label} (checkonly)")),
                suspected_cause: None,
            });
        }
        for (_, catalog_item) in &to_uninstall {
            outcomes.push(ItemOutcome {
                name: catalog_item.name.clone(),
                action: "uninstall".to_string(),
                installed_version: String::new(),
                catalog_version: catalog_item.version.clone(),
                success: true,
                error_type: None,
                reason: Some("would uninstall (checkonly)".to_string()),
                suspected_cause: None,
            });
        }
        return finish(ctx, &session, &status, started_at, outcomes, 0).await;
    }

    let candidates: HashMap<String, Vec<String>> = to_install
        .iter()
        .map(|(_, catalog_item, _)| (catalog_item.name.clone(), catalog_item.requires.clone()))
        .collect();
    let resolved = resolver::resolve_install_order(&candidates);
    for dropped in &resolved.dropped_cycle {
        session.record(&Event::Warning {
            timestamp: Utc::now(),
            message: format!("'{dropped}' dropped from this run: requires-graph cycle"),
        })?;
    }

    let by_name: HashMap<String, (ManifestItem, CatalogItem, Action)> =
        to_install.into_iter().map(|(mi, ci, action)| (ci.name.clone(), (mi, ci, action))).collect();

    let cache = Cache::new(ctx.cache_path());
    cache.ensure_dir()?;

    let started_at = Utc::now();

    let total_dispatch = to_uninstall.len() + resolved.order.len();
    status.publish(&StatusMessage {
        updated_at: Utc::now(),
        phase: Phase::Installing,
        current_item: None,
        items_done: 0,
        items_total: total_dispatch,
        pid: std::process::id(),
    });
    let mut progress: (usize, usize) = (0, total_dispatch);

    // Spec §5: uninstalls, then installs, then updates — each phase
    // internally respecting the `requires` topological order.
    dispatch_uninstall_phase(
        &to_uninstall,
        snapshot.as_ref(),
        interactive,
        ledger.as_mut(),
        &session,
        &status,
        &cancelled,
        &mut progress,
        &mut outcomes,
    )
    .await?;

    let install_names: Vec<String> = resolved
        .order
        .iter()
        .filter(|name| matches!(by_name.get(*name), Some((_, _, Action::Install))))
        .cloned()
        .collect();
    let update_names: Vec<String> = resolved
        .order
        .iter()
        .filter(|name| matches!(by_name.get(*name), Some((_, _, Action::Update))))
        .cloned()
        .collect();

    dispatch_install_phase(
        &install_names,
        &by_name,
        &fetcher,
        &cache,
        snapshot.as_ref(),
        interactive,
        ledger.as_mut(),
        &session,
        &status,
        &cancelled,
        &ctx.logs_path(),
        &mut progress,
        &mut outcomes,
    )
    .await?;
    dispatch_install_phase(
        &update_names,
        &by_name,
        &fetcher,
        &cache,
        snapshot.as_ref(),
        interactive,
        ledger.as_mut(),
        &session,
        &status,
        &cancelled,
        &ctx.logs_path(),
        &mut progress,
        &mut outcomes,
    )
    .await?;

    let _ = cache.garbage_collect(&ctx.logs_path());

    if let Some(own_item) = catalogs
        .get(&ctx.config.default_catalog)
        .and_then(|c| c.get(&ctx.config.client_identifier))
    {
        let self_update = SelfUpdate::new(paths::selfupdate_flag_path());
        self_update.check(&ctx.config.client_identifier, Some(own_item), crate::version())?;
    }

    if cancelled.load(Ordering::SeqCst) {
        return finish_interrupted(ctx, &session, &status, started_at, outcomes).await;
    }

    let exit_code = if outcomes.iter().any(|o| !o.success) { 1 } else { 0 };
    finish(ctx, &session, &status, started_at, outcomes, exit_code).await
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_uninstall_phase(
    items: &[(ManifestItem, CatalogItem)],
    snapshot: &dyn ProcessSnapshot,
    interactive: bool,
    ledger: &mut dyn RegistryLedger,
    session: &SessionLog,
    status: &StatusPublisher,
    cancelled: &AtomicBool,
    progress: &mut (usize, usize),
    outcomes: &mut Vec<ItemOutcome>,
) -> Result<(), AgentError> {
    for (_, catalog_item) in items {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        status.detail(catalog_item.name.clone());

        match dispatcher::uninstall(catalog_item, snapshot, interactive) {
            Ok(outcome) if outcome.success => {
                if let Err(e) = ledger.delete_ledger_version(&catalog_item.name) {
                    tracing::warn!(name = %catalog_item.name, error = %e, "failed to clear installed-version ledger entry");
                }
                session.record(&Event::UninstallSucceeded {
                    timestamp: Utc::now(),
                    name: catalog_item.name.clone(),
                })?;
                outcomes.push(ItemOutcome {
                    name: catalog_item.name.clone(),
                    action: "uninstall".to_string(),
                    installed_version: String::new(),
                    catalog_version: catalog_item.version.clone(),
                    success: true,
                    error_type: None,
                    reason: None,
                    suspected_cause: None,
                });
            }
            Ok(outcome) => {
                let reason = format!("uninstaller exited {}", outcome.exit_code);
                session.record(&Event::UninstallFailed {
                    timestamp: Utc::now(),
                    name: catalog_item.name.clone(),
                    error_type: crate::error::ErrorType::InstallerFailure,
                    reason: reason.clone(),
                })?;
                outcomes.push(ItemOutcome {
                    name: catalog_item.name.clone(),
                    action: "uninstall".to_string(),
                    installed_version: String::new(),
                    catalog_version: catalog_item.version.clone(),
                    success: false,
                    error_type: Some(crate::error::ErrorType::InstallerFailure),
                    reason: Some(reason),
                    suspected_cause: None,
                });
            }
            Err(AgentError::BlockingAppsError(blocked)) => {
                // Spec §7: a blocked uninstall is a warning, not a failure.
                let reason = format!("blocked by running applications: {blocked:?}");
                session.record(&Event::ItemWarning {
                    timestamp: Utc::now(),
                    name: catalog_item.name.clone(),
                    reason: reason.clone(),
                })?;
                outcomes.push(ItemOutcome {
                    name: catalog_item.name.clone(),
                    action: "skip".to_string(),
                    installed_version: String::new(),
                    catalog_version: catalog_item.version.clone(),
                    success: true,
                    error_type: None,
                    reason: Some(reason),
                    suspected_cause: None,
                });
            }
            Err(e) => {
                session.record(&Event::UninstallFailed {
                    timestamp: Utc::now(),
                    name: catalog_item.name.clone(),
                    error_type: crate::error::ErrorType::UnknownError,
                    reason: e.to_string(),
                })?;
                outcomes.push(ItemOutcome {
                    name: catalog_item.name.clone(),
                    action: "uninstall".to_string(),
                    installed_version: String::new(),
                    catalog_version: catalog_item.version.clone(),
                    success: false,
                    error_type: Some(crate::error::ErrorType::UnknownError),
                    reason: Some(e.to_string()),
                    suspected_cause: None,
                });
            }
        }

        progress.0 += 1;
        status.percent((progress.0 as f64 / progress.1.max(1) as f64) * 100.0);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_install_phase(
    names: &[String],
    by_name: &HashMap<String, (ManifestItem, CatalogItem, Action)>,
    fetcher: &Fetcher,
    cache: &Cache,
    snapshot: &dyn ProcessSnapshot,
    interactive: bool,
    ledger: &mut dyn RegistryLedger,
    session: &SessionLog,
    status: &StatusPublisher,
    cancelled: &AtomicBool,
    logs_dir: &Path,
    progress: &mut (usize, usize),
    outcomes: &mut Vec<ItemOutcome>,
) -> Result<(), AgentError> {
    for name in names {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let Some((_, catalog_item, action)) = by_name.get(name) else {
            continue;
        };
        status.detail(catalog_item.name.clone());
        session.record(&Event::InstallAttempted {
            timestamp: Utc::now(),
            name: catalog_item.name.clone(),
            version: catalog_item.version.clone(),
            attempt: 1,
        })?;

        let action_label = format!("{action:?}").to_lowercase();
        match install_one(fetcher, cache, catalog_item, snapshot, interactive).await {
            Ok(()) => {
                if let Err(e) = ledger.write_ledger_version(&catalog_item.name, &catalog_item.version) {
                    tracing::warn!(name = %catalog_item.name, error = %e, "failed to update installed-version ledger");
                }
                session.record(&Event::InstallSucceeded {
                    timestamp: Utc::now(),
                    name: catalog_item.name.clone(),
                    version: catalog_item.version.clone(),
                })?;
                outcomes.push(ItemOutcome {
                    name: catalog_item.name.clone(),
                    action: action_label,
                    installed_version: catalog_item.version.clone(),
                    catalog_version: catalog_item.version.clone(),
                    success: true,
                    error_type: None,
                    reason: None,
                    suspected_cause: None,
                });
            }
            Err(AgentError::BlockingAppsError(blocked)) => {
                // Spec §7: a blocked install is a warning, not a failure.
                let reason = format!("blocked by running applications: {blocked:?}");
                session.record(&Event::ItemWarning {
                    timestamp: Utc::now(),
                    name: catalog_item.name.clone(),
                    reason: reason.clone(),
                })?;
                outcomes.push(ItemOutcome {
                    name: catalog_item.name.clone(),
                    action: action_label,
                    installed_version: String::new(),
                    catalog_version: catalog_item.version.clone(),
                    success: true,
                    error_type: None,
                    reason: Some(reason),
                    suspected_cause: None,
                });
            }
            Err(e) => {
                let error_type = match &e {
                    AgentError::InstallError { error_type, .. } => *error_type,
                    AgentError::FetchError(_) => crate::error::ErrorType::NetworkFailure,
                    _ => crate::error::ErrorType::UnknownError,
                };
                session.record(&Event::InstallFailed {
                    timestamp: Utc::now(),
                    name: catalog_item.name.clone(),
                    version: catalog_item.version.clone(),
                    error_type,
                    reason: e.to_string(),
                })?;
                outcomes.push(ItemOutcome {
                    name: catalog_item.name.clone(),
                    action: action_label,
                    installed_version: String::new(),
                    catalog_version: catalog_item.version.clone(),
                    success: false,
                    error_type: Some(error_type),
                    reason: Some(e.to_string()),
                    suspected_cause: Some(crate::session::suspected_cause(logs_dir, &catalog_item.name)),
                });
            }
        }

        progress.0 += 1;
        status.percent((progress.0 as f64 / progress.1.max(1) as f64) * 100.0);
    }
    Ok(())
}

async fn install_one(
    fetcher: &Fetcher,
    cache: &Cache,
    catalog_item: &CatalogItem,
    snapshot: &dyn ProcessSnapshot,
    interactive: bool,
) -> Result<(), AgentError> {
    let payload = match cache.cached_payload(catalog_item) {
        Some(path) => path,
        None => {
            let dest = cache.payload_path(catalog_item);
            fetcher
                .download(catalog_item.installer.location(), &dest, |_, _| {})
                .await?;
            dest
        }
    };
    let outcome = dispatcher::install(catalog_item, &payload, snapshot, interactive)?;
    if !outcome.success {
        return Err(AgentError::InstallError {
            package: catalog_item.name.clone(),
            reason: format!("installer exited with code {}", outcome.exit_code),
            error_type: crate::error::ErrorType::InstallerFailure,
        });
    }
    Ok(())
}

async fn finish(
    ctx: &RunContext,
    session: &SessionLog,
    status: &StatusPublisher,
    started_at: chrono::DateTime<Utc>,
    outcomes: Vec<ItemOutcome>,
    exit_code: i32,
) -> Result<i32, AgentError> {
    let finished_at = Utc::now();
    let report = Report {
        started_at,
        finished_at,
        run_type: ctx.run_type.to_string(),
        log_version: crate::version().to_string(),
        exit_code,
        warnings: Vec::new(),
        items: outcomes,
    };

    session.record(&Event::RunFinished {
        timestamp: finished_at,
        exit_code,
        installed_count: report.installed_count(),
        updated_count: report.updated_count(),
        uninstalled_count: report.uninstalled_count(),
        failed_count: report.failed_count(),
    })?;

    let status_label = if exit_code == 0 { "completed" } else { "completed_with_failures" };
    session.finish(
        ctx.run_type,
        started_at,
        status_label,
        SessionSummary {
            total_actions: report.items.len(),
            installs: report.installed_count(),
            updates: report.updated_count(),
            removals: report.uninstalled_count(),
            successes: report.items.iter().filter(|i| i.success).count(),
            failures: report.failed_count(),
            duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
            packages_handled: report.items.iter().map(|i| i.name.clone()).collect(),
            environment: Environment::current(),
        },
    )?;

    reporter::regenerate(&ctx.logs_path(), &ctx.reports_path())?;

    status.publish(&StatusMessage {
        updated_at: finished_at,
        phase: Phase::Finished,
        current_item: None,
        items_done: report.items.len(),
        items_total: report.items.len(),
        pid: std::process::id(),
    });
    status.quit();

    if !ctx.no_preflight {
        let _ = hooks::run_postflight(&paths::postflight_script_path());
    }

    Ok(exit_code)
}

/// Spec §5 cancellation: close the session as `interrupted` and exit 1,
/// skipping the postflight hook — the run didn't complete, so there's
/// nothing for postflight to finalize.
async fn finish_interrupted(
    ctx: &RunContext,
    session: &SessionLog,
    status: &StatusPublisher,
    started_at: chrono::DateTime<Utc>,
    outcomes: Vec<ItemOutcome>,
) -> Result<i32, AgentError> {
    let finished_at = Utc::now();
    let report = Report {
        started_at,
        finished_at,
        run_type: ctx.run_type.to_string(),
        log_version: crate::version().to_string(),
        exit_code: 1,
        warnings: Vec::new(),
        items: outcomes,
    };

    session.record(&Event::RunFinished {
        timestamp: finished_at,
        exit_code: 1,
        installed_count: report.installed_count(),
        updated_count: report.updated_count(),
        uninstalled_count: report.uninstalled_count(),
        failed_count: report.failed_count(),
    })?;

    session.finish(
        ctx.run_type,
        started_at,
        "interrupted",
        SessionSummary {
            total_actions: report.items.len(),
            installs: report.installed_count(),
            updates: report.updated_count(),
            removals: report.uninstalled_count(),
            successes: report.items.iter().filter(|i| i.success).count(),
            failures: report.failed_count(),
            duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
            packages_handled: report.items.iter().map(|i| i.name.clone()).collect(),
            environment: Environment::current(),
        },
    )?;

    reporter::regenerate(&ctx.logs_path(), &ctx.reports_path())?;
    status.quit();

    Ok(1)
}

async fn load_manifest_tree(ctx: &RunContext) -> Result<ExpandedManifest, AgentError> {
    if let Some(path) = &ctx.manifest_override {
        let raw = std::fs::read_to_string(path)?;
        let file = ManifestFile::parse("local", &raw)?;
        struct Single(ManifestFile);
        impl crate::manifest::ManifestSource for Single {
            fn fetch(&self, _key: &str) -> Result<ManifestFile, AgentError> {
                Ok(self.0.clone())
            }
        }
        return crate::manifest::expand("local", &Single(file));
    }
    let fetcher = build_fetcher(ctx)?;
    let root_key = ctx
        .local_only_manifest
        .clone()
        .unwrap_or_else(|| ctx.config.client_identifier.clone());
    fetcher.resolve_manifest_tree(&root_key).await
}

fn build_fetcher(ctx: &RunContext) -> Result<Fetcher, AgentError> {
    Fetcher::new(ctx.config.software_repo_url.clone(), ctx.config.resolve_basic_auth())
}

fn resolve_from_catalogs<'a>(
    catalogs: &'a HashMap<String, Catalog>,
    item_catalogs: &[String],
    default_catalog: &str,
    name: &str,
) -> Option<&'a CatalogItem> {
    let search_order: Vec<String> = if item_catalogs.is_empty() {
        vec![default_catalog.to_string()]
    } else {
        item_catalogs.to_vec()
    };
    for catalog_name in &search_order {
        if let Some(catalog) = catalogs.get(catalog_name) {
            if let Some(item) = catalog.get(name) {
                return Some(item);
            }
        }
    }
    None
}
