//! Transfer execution.
//!
//! Applies a reconciled plan against the target repository: fetches content
//! from the source, copies bytes between workspace roots, opens target files
//! for the appropriate action in a pending changelist, and settles the
//! changelist at the end of the run (submit, discard-if-empty, or leave
//! pending). One file's failure never aborts the batch; it is recorded on
//! that file's transfer record and execution continues.
//!
//! Plan entries are fanned out over a bounded pool of worker threads; the
//! pool size is the hard cap on concurrent repository calls. Each path
//! appears in the plan at most once, so per-path operations are naturally
//! serialized. Changelist settlement happens strictly after all workers
//! join.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::client::RepositoryClient;
use crate::history::TransferRecord;
use crate::profile::Profile;
use crate::reconcile::{Operation, PlanEntry, SyncPlan};

/// Default changelist description when the profile has no template.
const DEFAULT_DESCRIPTION: &str =
    "Sync {profile_name}: {source_server}/{source_workspace} -> {target_server}/{target_workspace} at {now}";

/// Terminal state of a run's pending changelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangelistDisposition {
    /// Submitted with this number.
    Submitted(u64),
    /// Left pending (submit declined or failed) with this number.
    LeftPending(u64),
    /// Created but ended up with no opened files, so it was deleted.
    DiscardedEmpty,
    /// Nothing to do; no changelist was ever created.
    NotCreated,
}

/// Everything a run produced: the changelist (0 when none was created),
/// one transfer record per plan entry in plan order, and the final
/// changelist disposition.
#[derive(Debug)]
pub struct RunOutcome {
    pub changelist: u64,
    pub records: Vec<TransferRecord>,
    pub disposition: ChangelistDisposition,
}

/// Render a changelist description from the profile's template (or the
/// default), substituting the known keywords literally. Unknown keywords
/// are left untouched.
pub fn render_description(profile: &Profile, now: DateTime<Utc>) -> String {
    let template = profile.description.as_deref().unwrap_or(DEFAULT_DESCRIPTION);
    template
        .replace("{source_server}", &profile.source.address)
        .replace("{source_workspace}", &profile.source.workspace)
        .replace("{target_server}", &profile.target.address)
        .replace("{target_workspace}", &profile.target.workspace)
        .replace("{profile_name}", &profile.name)
        .replace("{now}", &now.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

/// Hex hash of transferred content. Cheap equality evidence for the audit
/// trail, not a cryptographic digest.
pub fn content_hash(bytes: &[u8]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Applies one plan against a source/target client pair.
pub struct TransferExecutor<'a> {
    source: &'a dyn RepositoryClient,
    target: &'a dyn RepositoryClient,
    parallelism: usize,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(
        source: &'a dyn RepositoryClient,
        target: &'a dyn RepositoryClient,
        parallelism: usize,
    ) -> Self {
        Self {
            source,
            target,
            parallelism: parallelism.max(1),
        }
    }

    /// Execute the whole plan: create the changelist (when any entry needs
    /// one), apply every entry, then settle the changelist.
    pub fn execute(
        &self,
        plan: &SyncPlan,
        description: &str,
        auto_submit: bool,
    ) -> Result<RunOutcome> {
        let actionable = plan
            .entries
            .iter()
            .filter(|e| e.operation != Operation::Skip)
            .count();

        if actionable == 0 {
            // Nothing to open; skips still get records for the audit trail.
            let records = plan.entries.iter().map(skip_record).collect();
            return Ok(RunOutcome {
                changelist: 0,
                records,
                disposition: ChangelistDisposition::NotCreated,
            });
        }

        let changelist = self
            .target
            .create_changelist(description)
            .context("failed to create pending changelist on target")?;
        log::info!("created pending changelist {changelist}");

        let records = self.apply_all(&plan.entries, changelist);

        let opened = records
            .iter()
            .filter(|r| r.success && r.operation != Operation::Skip)
            .count();

        let disposition = if opened == 0 {
            match self.target.discard(changelist) {
                Ok(()) => {
                    log::info!("discarded empty changelist {changelist}");
                    ChangelistDisposition::DiscardedEmpty
                }
                Err(e) => {
                    log::warn!("failed to discard empty changelist {changelist}: {e:#}");
                    ChangelistDisposition::LeftPending(changelist)
                }
            }
        } else if auto_submit {
            match self.target.submit(changelist) {
                Ok(()) => {
                    log::info!("submitted changelist {changelist} ({opened} files)");
                    ChangelistDisposition::Submitted(changelist)
                }
                Err(e) => {
                    // Never discard a non-empty changelist on submit failure.
                    log::error!("failed to submit changelist {changelist}: {e:#}");
                    ChangelistDisposition::LeftPending(changelist)
                }
            }
        } else {
            log::info!("leaving changelist {changelist} pending ({opened} files)");
            ChangelistDisposition::LeftPending(changelist)
        };

        Ok(RunOutcome {
            changelist,
            records,
            disposition,
        })
    }

    /// Fan the entries out over the worker pool, preserving plan order in
    /// the returned records.
    fn apply_all(&self, entries: &[PlanEntry], changelist: u64) -> Vec<TransferRecord> {
        let workers = self.parallelism.min(entries.len()).max(1);
        let cursor = AtomicUsize::new(0);
        let results: Mutex<Vec<Option<TransferRecord>>> = Mutex::new(vec![None; entries.len()]);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    if index >= entries.len() {
                        break;
                    }
                    let record = self.apply_entry(&entries[index], changelist);
                    results.lock().unwrap()[index] = Some(record);
                });
            }
        });

        results
            .into_inner()
            .unwrap()
            .into_iter()
            .zip(entries)
            .map(|(record, entry)| {
                record.unwrap_or_else(|| failure_record(entry, "worker produced no record"))
            })
            .collect()
    }

    /// Apply one entry, converting any client error into a failed record.
    fn apply_entry(&self, entry: &PlanEntry, changelist: u64) -> TransferRecord {
        if entry.operation == Operation::Skip {
            return skip_record(entry);
        }

        match self.try_apply(entry, changelist) {
            Ok(record) => record,
            Err(e) => {
                log::warn!(
                    "{} of {} failed: {e:#}",
                    entry.operation.as_str(),
                    entry.source_depot_path
                );
                failure_record(entry, &format!("{e:#}"))
            }
        }
    }

    fn try_apply(&self, entry: &PlanEntry, changelist: u64) -> Result<TransferRecord> {
        let mut record = base_record(entry);

        match entry.operation {
            Operation::Add => {
                self.source
                    .sync_file(&entry.source_depot_path)
                    .context("failed to sync source file")?;
                record.source_local_path =
                    self.source.resolve_local_path(&entry.source_depot_path).ok();

                let content = self.source.fetch_content(&entry.source_depot_path)?;
                record.content_hash = Some(content_hash(&content));

                let target_local = self.target.resolve_local_path(&entry.target_depot_path)?;
                write_local_copy(&target_local, &content)?;
                record.target_local_path = Some(target_local.clone());

                self.target.open_for_add(&target_local, changelist)?;
            }
            Operation::Edit => {
                // Sync the target's copy first so the edit diffs against the
                // correct base revision.
                self.target
                    .sync_file(&entry.target_depot_path)
                    .context("failed to sync target file before edit")?;
                record.source_local_path =
                    self.source.resolve_local_path(&entry.source_depot_path).ok();

                let content = self.source.fetch_content(&entry.source_depot_path)?;
                record.content_hash = Some(content_hash(&content));

                let target_local = self.target.resolve_local_path(&entry.target_depot_path)?;
                record.target_local_path = Some(target_local.clone());

                self.target.open_for_edit(&target_local, changelist)?;
                write_local_copy(&target_local, &content)?;
            }
            Operation::Delete => {
                // The backend needs the file present locally to delete it.
                self.target
                    .sync_file(&entry.target_depot_path)
                    .context("failed to sync target file before delete")?;

                let target_local = self.target.resolve_local_path(&entry.target_depot_path)?;
                record.target_local_path = Some(target_local.clone());

                self.target.open_for_delete(&target_local, changelist)?;
            }
            Operation::Skip => unreachable!("skips are handled by the caller"),
        }

        record.success = true;
        Ok(record)
    }
}

/// Write bytes to a workspace path, creating parent directories and
/// clearing a stale read-only copy if one is in the way.
fn write_local_copy(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    if path.exists() {
        let mut perms = fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)
            .with_context(|| format!("failed to make {} writable", path.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn base_record(entry: &PlanEntry) -> TransferRecord {
    TransferRecord {
        source_depot_path: entry.source_depot_path.clone(),
        source_local_path: None,
        target_depot_path: entry.target_depot_path.clone(),
        target_local_path: None,
        source_action: entry.source_action,
        source_revision: entry.source_revision,
        target_revision: entry.target_revision,
        operation: entry.operation,
        content_hash: None,
        success: false,
        error_message: None,
    }
}

fn failure_record(entry: &PlanEntry, message: &str) -> TransferRecord {
    let mut record = base_record(entry);
    record.error_message = Some(message.to_string());
    record
}

fn skip_record(entry: &PlanEntry) -> TransferRecord {
    let mut record = base_record(entry);
    record.operation = Operation::Skip;
    record.success = true;
    record
}
