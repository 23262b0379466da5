//! History store behavior that spans files and runs.

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use depot_sync::client::FileAction;
use depot_sync::history::{HistoryStore, TransferRecord};
use depot_sync::profile::{Connection, Profile};
use depot_sync::reconcile::Operation;

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
        filter_patterns: vec!["//d/...".to_string()],
        schedule: None,
        auto_submit: true,
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
        content_hash: Some("cafe".to_string()),
        success,
        error_message: if success {
            None
        } else {
            Some("boom".to_string())
        },
    }
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

#[test]
fn batch_logging_is_equivalent_to_individual_logging() {
    let p = profile("mirror");
    let time = at(2026, 3, 14, 9);
    let records = vec![
        record("//d/a.cs", 1, true),
        record("//d/b.cs", 2, false),
        record("//d/c.cs", 3, true),
    ];

    let batched_dir = TempDir::new().unwrap();
    let batched = HistoryStore::new(batched_dir.path()).unwrap();
    batched.log_batch(&p, time, records.clone()).unwrap();

    let individual_dir = TempDir::new().unwrap();
    let individual = HistoryStore::new(individual_dir.path()).unwrap();
    for r in &records {
        individual.log_transfer(&p, time, r.clone()).unwrap();
    }

    let from_batched = batched.query_transfers(|_| true).unwrap();
    let from_individual = individual.query_transfers(|_| true).unwrap();
    assert_eq!(from_batched, records);
    assert_eq!(from_batched, from_individual);

    // Both end up with one run holding all three records, not three runs.
    let runs = batched.query_syncs(|_| true).unwrap();
    assert_eq!(runs.len(), 1);
    let runs = individual.query_syncs(|_| true).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].1.transfers.len(), 3);
}

#[test]
fn runs_on_different_days_land_in_different_files() {
    let temp = TempDir::new().unwrap();
    let store = HistoryStore::new(temp.path()).unwrap();
    let p = profile("mirror");

    store
        .log_transfer(&p, at(2026, 3, 14, 23), record("//d/a.cs", 1, true))
        .unwrap();
    store.update_changelist_number(&p, 10).unwrap();
    store
        .log_transfer(&p, at(2026, 3, 15, 1), record("//d/b.cs", 1, true))
        .unwrap();

    assert!(temp.path().join("sync-history-2026-03-14.json").exists());
    assert!(temp.path().join("sync-history-2026-03-15.json").exists());

    // Queries span both files.
    let all = store.query_transfers(|_| true).unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn stamping_reaches_an_unfinished_run_on_an_earlier_day() {
    let temp = TempDir::new().unwrap();
    let store = HistoryStore::new(temp.path()).unwrap();
    let p = profile("mirror");

    // A run that started just before midnight and was stamped after it
    // still lives in its sync-date file.
    store
        .log_transfer(&p, at(2026, 3, 14, 23), record("//d/a.cs", 1, true))
        .unwrap();
    assert!(store.update_changelist_number(&p, 77).unwrap());

    let latest = store.latest_sync(&p).unwrap().unwrap();
    assert_eq!(latest.changelist_number, 77);
    assert!(!temp.path().join("sync-history-2026-03-15.json").exists());
}

#[test]
fn day_file_names_sort_chronologically() {
    let temp = TempDir::new().unwrap();
    let store = HistoryStore::new(temp.path()).unwrap();
    let p = profile("mirror");

    for (day, hour) in [(9, 8), (10, 8), (11, 8)] {
        store
            .log_transfer(&p, at(2026, 3, day, hour), record("//d/a.cs", day, true))
            .unwrap();
        store.update_changelist_number(&p, u64::from(day)).unwrap();
    }

    let mut names: Vec<String> = std::fs::read_dir(temp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "sync-history-2026-03-09.json",
            "sync-history-2026-03-10.json",
            "sync-history-2026-03-11.json",
        ]
    );

    // latest_sync follows sync time, which here matches file order.
    let latest = store.latest_sync(&p).unwrap().unwrap();
    assert_eq!(latest.sync_time, at(2026, 3, 11, 8));
}

#[test]
fn two_profiles_share_a_day_file_without_mixing_runs() {
    let temp = TempDir::new().unwrap();
    let store = HistoryStore::new(temp.path()).unwrap();
    let a = profile("alpha");
    let b = profile("beta");
    let time = at(2026, 3, 14, 9);

    store.log_transfer(&a, time, record("//d/a.cs", 1, true)).unwrap();
    store.log_transfer(&b, time, record("//d/b.cs", 1, true)).unwrap();

    let histories = store.query_histories(|_| true).unwrap();
    assert_eq!(histories.len(), 2);
    let alpha = histories.iter().find(|h| h.profile.name == "alpha").unwrap();
    assert_eq!(alpha.syncs.len(), 1);
    assert_eq!(alpha.syncs[0].transfers[0].source_depot_path, "//d/a.cs");

    // Stamping alpha leaves beta's run untouched.
    assert!(store.update_changelist_number(&a, 5).unwrap());
    assert!(store.latest_sync(&b).unwrap().unwrap().is_unfinished());
}

#[test]
fn resume_check_sees_transfers_from_earlier_days() {
    let temp = TempDir::new().unwrap();
    let store = HistoryStore::new(temp.path()).unwrap();
    let p = profile("mirror");

    store
        .log_transfer(&p, at(2026, 3, 14, 9), record("//d/a.cs", 3, true))
        .unwrap();
    store.update_changelist_number(&p, 12).unwrap();

    assert!(store.has_successful_transfer(&p, "//d/a.cs", 3).unwrap());
    assert!(!store.has_successful_transfer(&p, "//d/a.cs", 4).unwrap());
}
