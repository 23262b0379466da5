//! Run orchestration.
//!
//! Wires one profile end to end: connect both endpoints, enumerate both
//! sides, establish path correspondence, reconcile, execute the plan, and
//! record the outcome in the history store. Connectivity and enumeration
//! failures abort the profile's run before any transfer is attempted — a
//! partial file set must never be reconciled against, since absent files
//! would be misclassified and spuriously deleted.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use std::collections::HashSet;

use crate::client::{self, RepositoryClient};
use crate::config::SyncConfig;
use crate::executor::{render_description, ChangelistDisposition, TransferExecutor};
use crate::history::HistoryStore;
use crate::logger;
use crate::profile::Profile;
use crate::reconcile::{reconcile, Operation};
use crate::report::RunSummary;
use crate::translate::PathTranslator;

/// Run all profiles (or the named one). Per-profile failures are reported
/// and do not stop the remaining profiles; returns an error if any profile
/// failed.
pub fn run(config: &SyncConfig, profile_name: Option<&str>) -> Result<()> {
    let profiles: Vec<&Profile> = match profile_name {
        Some(name) => {
            let profile = config
                .find_profile(name)
                .with_context(|| format!("no profile named '{name}' in config"))?;
            vec![profile]
        }
        None => config.profiles.iter().collect(),
    };

    if profiles.is_empty() {
        anyhow::bail!("no profiles configured");
    }

    let mut failed = 0usize;
    for profile in profiles {
        println!(
            "{}",
            format!("Syncing profile '{}'...", profile.name).cyan().bold()
        );
        match run_profile(config, profile) {
            Ok(summary) => {
                summary.print();
                if summary.total_failed() > 0 {
                    failed += 1;
                }
            }
            Err(e) => {
                log::error!("profile '{}' failed: {e:#}", profile.name);
                println!("{}", format!("Profile '{}' failed: {e:#}", profile.name).red());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} profile(s) had failures");
    }
    Ok(())
}

/// Connect both endpoints with the configured backend and run the profile.
pub fn run_profile(config: &SyncConfig, profile: &Profile) -> Result<RunSummary> {
    let options = config.client_options();
    let source = client::connect(&profile.source, config.backend, &options)
        .with_context(|| format!("failed to connect to source for profile '{}'", profile.name))?;
    let target = client::connect(&profile.target, config.backend, &options)
        .with_context(|| format!("failed to connect to target for profile '{}'", profile.name))?;
    let history = HistoryStore::new(&config.history_dir()?)?;

    run_with_clients(
        profile,
        source.as_ref(),
        target.as_ref(),
        &history,
        config.parallelism,
    )
}

/// Run one profile against already-connected clients. Split out so tests
/// can inject backends directly.
pub fn run_with_clients(
    profile: &Profile,
    source: &dyn RepositoryClient,
    target: &dyn RepositoryClient,
    history: &HistoryStore,
    parallelism: usize,
) -> Result<RunSummary> {
    let sync_time = Utc::now();

    let source_files = source
        .enumerate(&profile.filter_patterns)
        .context("failed to enumerate source files")?;
    log::info!(
        "profile '{}': {} source files match",
        profile.name,
        source_files.len()
    );

    // Workspace lookups degrade silently; the translator falls back tier by
    // tier down to identity.
    let source_ws = source.workspace_info().ok();
    let target_ws = target.workspace_info().ok();
    if source_ws.is_none() || target_ws.is_none() {
        log::warn!(
            "profile '{}': workspace metadata unavailable, relying on explicit mappings only",
            profile.name
        );
    }
    let translator = PathTranslator::build(profile, source_ws.as_ref(), target_ws.as_ref());

    // Enumerate the target under its own addressing by translating the
    // filter patterns.
    let target_patterns: Vec<String> = profile
        .filter_patterns
        .iter()
        .map(|p| translator.translate(p).path)
        .collect();
    let target_files = target
        .enumerate(&target_patterns)
        .context("failed to enumerate target files")?;
    log::info!(
        "profile '{}': {} target files match",
        profile.name,
        target_files.len()
    );

    let mut plan = reconcile(
        &source_files,
        &target_files,
        &translator,
        &profile.filter_patterns,
    );

    for entry in &plan.entries {
        if entry.used_fallback {
            log::warn!(
                "no path mapping for {}; using the path unchanged",
                entry.source_depot_path
            );
        }
    }

    // Resume: if the latest run was interrupted (never stamped with a
    // changelist), files it already transferred successfully are skipped.
    if let Some(latest) = history.latest_sync(profile)? {
        if latest.is_unfinished() {
            let done: HashSet<(String, u32)> = latest
                .transfers
                .iter()
                .filter(|t| t.success && t.operation != Operation::Skip)
                .map(|t| (t.source_depot_path.clone(), t.source_revision))
                .collect();
            for entry in &mut plan.entries {
                let key = (entry.source_depot_path.clone(), entry.source_revision);
                if done.contains(&key) {
                    log::info!(
                        "{}#{} already transferred in interrupted run, skipping",
                        entry.source_depot_path,
                        entry.source_revision
                    );
                    entry.operation = Operation::Skip;
                }
            }
        }
    }

    let description = render_description(profile, sync_time);
    let executor = TransferExecutor::new(source, target, parallelism);
    let outcome = executor.execute(&plan, &description, profile.auto_submit)?;

    // History is best-effort audit/resume state: a write failure never rolls
    // back repository-side operations.
    if let Err(e) = history.log_batch(profile, sync_time, outcome.records.clone()) {
        log::error!("failed to persist sync history: {e:#}");
    }
    match outcome.disposition {
        ChangelistDisposition::Submitted(number) | ChangelistDisposition::LeftPending(number) => {
            match history.update_changelist_number(profile, number) {
                Ok(true) => {}
                Ok(false) => log::warn!("no unfinished sync run to stamp with changelist {number}"),
                Err(e) => log::error!("failed to stamp changelist number: {e:#}"),
            }
        }
        ChangelistDisposition::DiscardedEmpty | ChangelistDisposition::NotCreated => {}
    }

    let summary = RunSummary::new(&profile.name, &outcome.records, outcome.disposition);
    let _ = logger::log_to_file(&format!(
        "profile '{}': {} adds, {} edits, {} deletes, {} skipped, {} failed",
        profile.name,
        summary.adds.attempted,
        summary.edits.attempted,
        summary.deletes.attempted,
        summary.skipped,
        summary.total_failed()
    ));

    Ok(summary)
}
