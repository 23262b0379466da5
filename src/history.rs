//! Sync history persistence.
//!
//! A durable, queryable ledger of attempted and completed transfers, keyed
//! by profile identity and partitioned into one JSON file per calendar day
//! of the sync time. The ledger is what makes interrupted runs resumable: a
//! fresh run skips source-path@revision pairs already logged successful, and
//! an unfinished run (changelist number 0) is the append target for
//! continuation.
//!
//! Persistence is read-modify-write of the whole day file. Concurrent
//! writers are not supported; single writer per process is assumed.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::FileAction;
use crate::profile::Profile;
use crate::reconcile::Operation;

const FILE_PREFIX: &str = "sync-history-";
const FILE_SUFFIX: &str = ".json";

/// Outcome of executing one operation against the target repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub source_depot_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_local_path: Option<PathBuf>,

    pub target_depot_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_local_path: Option<PathBuf>,

    pub source_action: FileAction,

    pub source_revision: u32,

    pub target_revision: u32,

    pub operation: Operation,

    /// Hex hash of the transferred content, when content moved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// One reconcile-and-transfer run. A changelist number of 0 means the run
/// has not been stamped yet and is the append target for continuation; once
/// non-zero it is never reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub sync_time: DateTime<Utc>,
    pub changelist_number: u64,
    pub transfers: Vec<TransferRecord>,
}

impl SyncRun {
    pub fn is_unfinished(&self) -> bool {
        self.changelist_number == 0
    }
}

/// All runs recorded for one profile on one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileHistory {
    pub profile_id: String,
    pub profile: Profile,
    pub syncs: Vec<SyncRun>,
}

/// Day-partitioned history store rooted at one directory.
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create history directory: {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// File for one calendar day; names sort chronologically.
    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d")))
    }

    /// All persisted days, oldest first.
    fn list_days(&self) -> Result<Vec<NaiveDate>> {
        let mut days = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read history directory: {}", self.dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(date_part) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|s| s.strip_suffix(FILE_SUFFIX))
            {
                if let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
                    days.push(date);
                }
            }
        }
        days.sort();
        Ok(days)
    }

    fn load_day(&self, date: NaiveDate) -> Result<Vec<ProfileHistory>> {
        let path = self.day_file(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read history file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse history file: {}", path.display()))
    }

    fn save_day(&self, date: NaiveDate, histories: &[ProfileHistory]) -> Result<()> {
        let path = self.day_file(date);
        let content =
            serde_json::to_string_pretty(histories).context("failed to serialize history")?;
        fs::write(&path, content)
            .with_context(|| format!("failed to write history file: {}", path.display()))?;
        Ok(())
    }

    /// Append one record to the profile's unfinished run on the sync time's
    /// day, creating the run (and the profile's day entry) as needed.
    pub fn log_transfer(
        &self,
        profile: &Profile,
        sync_time: DateTime<Utc>,
        record: TransferRecord,
    ) -> Result<()> {
        self.log_batch(profile, sync_time, vec![record])
    }

    /// Append N records in one persisted write. Observably equivalent to N
    /// sequential `log_transfer` calls.
    pub fn log_batch(
        &self,
        profile: &Profile,
        sync_time: DateTime<Utc>,
        records: Vec<TransferRecord>,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let date = sync_time.date_naive();
        let profile_id = profile.identity();
        let mut histories = self.load_day(date)?;

        let history = match histories.iter_mut().find(|h| h.profile_id == profile_id) {
            Some(h) => h,
            None => {
                histories.push(ProfileHistory {
                    profile_id: profile_id.clone(),
                    profile: profile.clone(),
                    syncs: Vec::new(),
                });
                histories.last_mut().expect("just pushed")
            }
        };

        match history.syncs.iter_mut().rev().find(|s| s.is_unfinished()) {
            Some(run) => run.transfers.extend(records),
            None => history.syncs.push(SyncRun {
                sync_time,
                changelist_number: 0,
                transfers: records,
            }),
        }

        self.save_day(date, &histories)
    }

    /// Stamp the profile's latest unfinished run with a changelist number,
    /// marking it finished. Returns `Ok(false)` when no run is unfinished.
    pub fn update_changelist_number(&self, profile: &Profile, number: u64) -> Result<bool> {
        anyhow::ensure!(number != 0, "changelist number 0 is reserved for unfinished runs");
        let profile_id = profile.identity();

        // Latest day first; within a day the last unfinished run wins.
        for date in self.list_days()?.into_iter().rev() {
            let mut histories = self.load_day(date)?;
            let Some(history) = histories.iter_mut().find(|h| h.profile_id == profile_id) else {
                continue;
            };
            if let Some(run) = history.syncs.iter_mut().rev().find(|s| s.is_unfinished()) {
                run.changelist_number = number;
                self.save_day(date, &histories)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// All per-profile day histories matching the predicate, oldest day
    /// first.
    pub fn query_histories<F>(&self, predicate: F) -> Result<Vec<ProfileHistory>>
    where
        F: Fn(&ProfileHistory) -> bool,
    {
        let mut result = Vec::new();
        for date in self.list_days()? {
            for history in self.load_day(date)? {
                if predicate(&history) {
                    result.push(history);
                }
            }
        }
        Ok(result)
    }

    /// All transfer records across all days matching the predicate.
    pub fn query_transfers<F>(&self, predicate: F) -> Result<Vec<TransferRecord>>
    where
        F: Fn(&TransferRecord) -> bool,
    {
        let mut result = Vec::new();
        for date in self.list_days()? {
            for history in self.load_day(date)? {
                for run in history.syncs {
                    for transfer in run.transfers {
                        if predicate(&transfer) {
                            result.push(transfer);
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    /// All sync runs across all days matching the predicate, paired with
    /// their profile identity.
    pub fn query_syncs<F>(&self, predicate: F) -> Result<Vec<(String, SyncRun)>>
    where
        F: Fn(&SyncRun) -> bool,
    {
        let mut result = Vec::new();
        for date in self.list_days()? {
            for history in self.load_day(date)? {
                for run in history.syncs {
                    if predicate(&run) {
                        result.push((history.profile_id.clone(), run));
                    }
                }
            }
        }
        Ok(result)
    }

    /// Most recent run for the profile across all days, by sync time.
    pub fn latest_sync(&self, profile: &Profile) -> Result<Option<SyncRun>> {
        let profile_id = profile.identity();
        let runs = self.query_syncs(|_| true)?;
        Ok(runs
            .into_iter()
            .filter(|(id, _)| *id == profile_id)
            .map(|(_, run)| run)
            .max_by_key(|run| run.sync_time))
    }

    /// Whether this exact source path and revision has already been
    /// transferred successfully for this profile. The resume check.
    pub fn has_successful_transfer(
        &self,
        profile: &Profile,
        source_depot_path: &str,
        source_revision: u32,
    ) -> Result<bool> {
        let profile_id = profile.identity();
        for date in self.list_days()? {
            for history in self.load_day(date)? {
                if history.profile_id != profile_id {
                    continue;
                }
                for run in &history.syncs {
                    for transfer in &run.transfers {
                        if transfer.success
                            && transfer.operation != Operation::Skip
                            && transfer.source_depot_path == source_depot_path
                            && transfer.source_revision == source_revision
                        {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Connection;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn profile(name: &str) -> Profile {
        Profile {
            name: name.to_string(),
            source: Connection {
                address: "src".to_string(),
                user: "u".to_string(),
                workspace: "ws-src".to_string(),
            },
            target: Connection {
                address: "dst".to_string(),
                user: "u".to_string(),
                workspace: "ws-dst".to_string(),
            },
            filter_patterns: vec!["//depot/...".to_string()],
            schedule: None,
            auto_submit: false,
            description: None,
            path_mappings: None,
        }
    }

    fn record(path: &str, revision: u32, success: bool) -> TransferRecord {
        TransferRecord {
            source_depot_path: path.to_string(),
            source_local_path: None,
            target_depot_path: path.replace("//d/", "//p/"),
            target_local_path: None,
            source_action: FileAction::Edit,
            source_revision: revision,
            target_revision: revision.saturating_sub(1),
            operation: Operation::Edit,
            content_hash: Some("abc123".to_string()),
            success,
            error_message: if success {
                None
            } else {
                Some("boom".to_string())
            },
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn log_transfer_creates_day_file_named_by_sync_date() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let p = profile("mirror");

        store
            .log_transfer(&p, at(2026, 3, 14), record("//d/a.cs", 1, true))
            .unwrap();

        assert!(temp.path().join("sync-history-2026-03-14.json").exists());
    }

    #[test]
    fn appends_to_unfinished_run() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let p = profile("mirror");
        let time = at(2026, 3, 14);

        store.log_transfer(&p, time, record("//d/a.cs", 1, true)).unwrap();
        store.log_transfer(&p, time, record("//d/b.cs", 2, true)).unwrap();

        let runs = store.query_syncs(|_| true).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].1.transfers.len(), 2);
        assert!(runs[0].1.is_unfinished());
    }

    #[test]
    fn stamping_finishes_run_and_next_log_starts_fresh() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let p = profile("mirror");
        let time = at(2026, 3, 14);

        store.log_transfer(&p, time, record("//d/a.cs", 1, true)).unwrap();
        assert!(store.update_changelist_number(&p, 42).unwrap());

        store.log_transfer(&p, time, record("//d/b.cs", 1, true)).unwrap();

        let runs = store.query_syncs(|_| true).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].1.changelist_number, 42);
        assert!(runs[1].1.is_unfinished());
    }

    #[test]
    fn update_without_unfinished_run_reports_false() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        assert!(!store.update_changelist_number(&profile("mirror"), 7).unwrap());
    }

    #[test]
    fn zero_changelist_number_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        assert!(store.update_changelist_number(&profile("mirror"), 0).is_err());
    }

    #[test]
    fn profiles_are_isolated_by_identity() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let a = profile("a");
        let b = profile("b");
        let time = at(2026, 3, 14);

        store.log_transfer(&a, time, record("//d/a.cs", 1, true)).unwrap();
        store.log_transfer(&b, time, record("//d/b.cs", 1, true)).unwrap();
        assert!(store.update_changelist_number(&a, 9).unwrap());

        let latest_a = store.latest_sync(&a).unwrap().unwrap();
        assert_eq!(latest_a.changelist_number, 9);
        let latest_b = store.latest_sync(&b).unwrap().unwrap();
        assert!(latest_b.is_unfinished());
    }

    #[test]
    fn partition_follows_sync_time_not_wall_clock() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let p = profile("mirror");

        store.log_transfer(&p, at(2026, 3, 14), record("//d/a.cs", 1, true)).unwrap();
        store.update_changelist_number(&p, 5).unwrap();
        store.log_transfer(&p, at(2026, 3, 15), record("//d/b.cs", 1, true)).unwrap();

        assert!(temp.path().join("sync-history-2026-03-14.json").exists());
        assert!(temp.path().join("sync-history-2026-03-15.json").exists());

        let latest = store.latest_sync(&p).unwrap().unwrap();
        assert_eq!(latest.sync_time, at(2026, 3, 15));
    }

    #[test]
    fn query_transfers_flattens_and_filters() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let p = profile("mirror");
        let time = at(2026, 3, 14);

        store.log_transfer(&p, time, record("//d/a.cs", 1, true)).unwrap();
        store.log_transfer(&p, time, record("//d/b.cs", 1, false)).unwrap();

        let failed = store.query_transfers(|t| !t.success).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source_depot_path, "//d/b.cs");
    }

    #[test]
    fn resume_check_matches_path_and_revision() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let p = profile("mirror");
        let time = at(2026, 3, 14);

        store.log_transfer(&p, time, record("//d/a.cs", 3, true)).unwrap();
        store.log_transfer(&p, time, record("//d/b.cs", 1, false)).unwrap();

        assert!(store.has_successful_transfer(&p, "//d/a.cs", 3).unwrap());
        // Different revision of the same path was not transferred.
        assert!(!store.has_successful_transfer(&p, "//d/a.cs", 4).unwrap());
        // Failed transfers do not count.
        assert!(!store.has_successful_transfer(&p, "//d/b.cs", 1).unwrap());
    }

    #[test]
    fn history_round_trips_losslessly() {
        let temp = TempDir::new().unwrap();
        let store = HistoryStore::new(temp.path()).unwrap();
        let p = profile("mirror");
        let time = at(2026, 3, 14);

        let original = record("//d/a.cs", 2, false);
        store.log_transfer(&p, time, original.clone()).unwrap();

        let loaded = store.query_transfers(|_| true).unwrap();
        assert_eq!(loaded, vec![original]);
    }
}
