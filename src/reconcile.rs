//! File-set reconciliation.
//!
//! Given the source's and target's filtered enumerations, with path
//! correspondence established by the translator, computes the minimal
//! operation per path needed to converge the target to the source.
//! Re-running against an already-converged target yields an empty plan.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::client::{FileAction, FileRecord};
use crate::filter;
use crate::translate::PathTranslator;

/// Operation assigned to one path during a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Edit,
    Delete,
    /// Already transferred in an interrupted run; carried for audit only.
    Skip,
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Add => "add",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
            Operation::Skip => "skip",
        }
    }
}

/// One planned transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub operation: Operation,
    /// Source-side depot path (translated back for target-only deletes).
    pub source_depot_path: String,
    /// Target-side depot path.
    pub target_depot_path: String,
    pub source_action: FileAction,
    /// 0 when the file no longer exists on the source.
    pub source_revision: u32,
    /// 0 when the file does not exist on the target.
    pub target_revision: u32,
    /// True when the path correspondence came from the identity fallback.
    pub used_fallback: bool,
}

/// Ordered operation set for one run: source enumeration order first, then
/// target-only deletes in target enumeration order.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub entries: Vec<PlanEntry>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.entries
            .iter()
            .filter(|e| e.operation == operation)
            .count()
    }
}

/// Compute the operation set converging `target_files` to `source_files`.
///
/// `patterns` are the profile's source-side filter patterns; a target file
/// whose translated-back path falls outside them is never considered for
/// deletion, even if the source no longer has it.
pub fn reconcile(
    source_files: &[FileRecord],
    target_files: &[FileRecord],
    translator: &PathTranslator,
    patterns: &[String],
) -> SyncPlan {
    let target_map: HashMap<&str, &FileRecord> = target_files
        .iter()
        .map(|f| (f.depot_path.as_str(), f))
        .collect();
    let mut consumed: HashSet<String> = HashSet::new();
    let mut plan = SyncPlan::default();

    for source in source_files {
        let translated = translator.translate(&source.depot_path);

        if let Some(target) = target_map.get(translated.path.as_str()) {
            consumed.insert(translated.path.clone());

            // Removal takes precedence over any add/edit classification.
            if source.head_action.is_delete() {
                plan.entries.push(PlanEntry {
                    operation: Operation::Delete,
                    source_depot_path: source.depot_path.clone(),
                    target_depot_path: translated.path,
                    source_action: source.head_action,
                    source_revision: source.revision,
                    target_revision: target.revision,
                    used_fallback: translated.fallback,
                });
                continue;
            }

            if source.revision > target.revision {
                plan.entries.push(PlanEntry {
                    operation: Operation::Edit,
                    source_depot_path: source.depot_path.clone(),
                    target_depot_path: translated.path,
                    source_action: source.head_action,
                    source_revision: source.revision,
                    target_revision: target.revision,
                    used_fallback: translated.fallback,
                });
            }
            // Equal or older source revision: converged, no entry.
            continue;
        }

        // Deleted on source and absent on target is the converged case.
        if source.head_action.is_delete() {
            continue;
        }

        plan.entries.push(PlanEntry {
            operation: Operation::Add,
            source_depot_path: source.depot_path.clone(),
            target_depot_path: translated.path,
            source_action: source.head_action,
            source_revision: source.revision,
            target_revision: 0,
            used_fallback: translated.fallback,
        });
    }

    // Stale target files: present on target, gone from source.
    for target in target_files {
        if consumed.contains(&target.depot_path) {
            continue;
        }
        let back = translator.translate_back(&target.depot_path);

        // Out-of-scope target files never participate in deletion.
        if !filter::matches_any(patterns, &back.path) {
            log::debug!(
                "target file {} is outside the filter patterns, leaving in place",
                target.depot_path
            );
            continue;
        }

        plan.entries.push(PlanEntry {
            operation: Operation::Delete,
            source_depot_path: back.path,
            target_depot_path: target.depot_path.clone(),
            source_action: FileAction::Delete,
            source_revision: 0,
            target_revision: target.revision,
            used_fallback: back.fallback,
        });
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Connection, Profile};
    use std::collections::BTreeMap;

    fn record(path: &str, revision: u32, action: FileAction) -> FileRecord {
        FileRecord {
            depot_path: path.to_string(),
            local_path: None,
            revision,
            head_action: action,
        }
    }

    fn translator(mappings: &[(&str, &str)]) -> PathTranslator {
        let profile = Profile {
            name: "test".to_string(),
            source: Connection {
                address: "a".to_string(),
                user: "u".to_string(),
                workspace: "w1".to_string(),
            },
            target: Connection {
                address: "b".to_string(),
                user: "u".to_string(),
                workspace: "w2".to_string(),
            },
            filter_patterns: vec!["//d/...".to_string()],
            schedule: None,
            auto_submit: false,
            description: None,
            path_mappings: if mappings.is_empty() {
                None
            } else {
                Some(
                    mappings
                        .iter()
                        .map(|(a, b)| (a.to_string(), b.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                )
            },
        };
        PathTranslator::from_explicit(&profile)
    }

    fn patterns() -> Vec<String> {
        vec!["//d/...".to_string()]
    }

    #[test]
    fn empty_sets_yield_empty_plan() {
        let plan = reconcile(&[], &[], &translator(&[]), &patterns());
        assert!(plan.is_empty());
    }

    #[test]
    fn scenario_a_all_adds_into_empty_target() {
        let source = vec![
            record("//d/a.cs", 2, FileAction::Add),
            record("//d/b.txt", 1, FileAction::Add),
        ];
        let plan = reconcile(&source, &[], &translator(&[]), &patterns());

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.entries[0].operation, Operation::Add);
        assert_eq!(plan.entries[0].source_depot_path, "//d/a.cs");
        assert_eq!(plan.entries[1].operation, Operation::Add);
        assert_eq!(plan.entries[1].source_depot_path, "//d/b.txt");
    }

    #[test]
    fn scenario_b_newer_source_revision_is_edit() {
        let tr = translator(&[("//d/", "//p/")]);
        let source = vec![record("//d/a.cs", 3, FileAction::Edit)];
        let target = vec![record("//p/a.cs", 2, FileAction::Edit)];
        let plan = reconcile(&source, &target, &tr, &patterns());

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].operation, Operation::Edit);
        assert_eq!(plan.entries[0].target_depot_path, "//p/a.cs");
        assert_eq!(plan.entries[0].source_revision, 3);
        assert_eq!(plan.entries[0].target_revision, 2);
    }

    #[test]
    fn scenario_c_stale_target_file_is_deleted() {
        let tr = translator(&[("//d/", "//p/")]);
        let target = vec![record("//p/c.bin", 4, FileAction::Add)];
        let plan = reconcile(&[], &target, &tr, &patterns());

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].operation, Operation::Delete);
        assert_eq!(plan.entries[0].target_depot_path, "//p/c.bin");
        // Bookkeeping carries the translated-back source path.
        assert_eq!(plan.entries[0].source_depot_path, "//d/c.bin");
        assert_eq!(plan.entries[0].source_revision, 0);
    }

    #[test]
    fn converged_files_produce_no_entries() {
        let source = vec![record("//d/a.cs", 2, FileAction::Edit)];
        let target = vec![record("//d/a.cs", 2, FileAction::Edit)];
        let plan = reconcile(&source, &target, &translator(&[]), &patterns());
        assert!(plan.is_empty());
    }

    #[test]
    fn older_source_revision_produces_no_entry() {
        let source = vec![record("//d/a.cs", 1, FileAction::Edit)];
        let target = vec![record("//d/a.cs", 2, FileAction::Edit)];
        let plan = reconcile(&source, &target, &translator(&[]), &patterns());
        assert!(plan.is_empty());
    }

    #[test]
    fn delete_precedence_over_edit_and_no_double_count() {
        // Head action delete on source while target still has the file:
        // exactly one Delete, not an Edit, and not counted again by the
        // stale-target pass.
        let source = vec![record("//d/a.cs", 5, FileAction::Delete)];
        let target = vec![record("//d/a.cs", 3, FileAction::Edit)];
        let plan = reconcile(&source, &target, &translator(&[]), &patterns());

        assert_eq!(plan.len(), 1);
        assert_eq!(plan.entries[0].operation, Operation::Delete);
    }

    #[test]
    fn source_deleted_and_target_absent_is_converged() {
        let source = vec![record("//d/a.cs", 5, FileAction::MoveDelete)];
        let plan = reconcile(&source, &[], &translator(&[]), &patterns());
        assert!(plan.is_empty());
    }

    #[test]
    fn minimality_no_add_and_delete_for_same_path() {
        let tr = translator(&[("//d/", "//p/")]);
        let source = vec![
            record("//d/a.cs", 1, FileAction::Add),
            record("//d/b.cs", 2, FileAction::Edit),
        ];
        let target = vec![
            record("//p/b.cs", 1, FileAction::Add),
            record("//p/stale.cs", 1, FileAction::Add),
        ];
        let plan = reconcile(&source, &target, &tr, &patterns());

        let mut seen = std::collections::HashSet::new();
        for entry in &plan.entries {
            assert!(
                seen.insert(entry.target_depot_path.clone()),
                "path {} appears twice",
                entry.target_depot_path
            );
        }
        assert_eq!(plan.count(Operation::Add), 1);
        assert_eq!(plan.count(Operation::Edit), 1);
        assert_eq!(plan.count(Operation::Delete), 1);
    }

    #[test]
    fn out_of_scope_target_files_are_never_deleted() {
        let tr = translator(&[("//d/", "//p/")]);
        // Translates back to //other/x.cs, outside //d/...
        let target = vec![record("//other/x.cs", 1, FileAction::Add)];
        let plan = reconcile(&[], &target, &tr, &patterns());
        assert!(plan.is_empty());
    }

    #[test]
    fn deterministic_ordering_source_then_target() {
        let tr = translator(&[("//d/", "//p/")]);
        let source = vec![
            record("//d/1.cs", 1, FileAction::Add),
            record("//d/2.cs", 1, FileAction::Add),
        ];
        let target = vec![
            record("//p/stale_b.cs", 1, FileAction::Add),
            record("//p/stale_a.cs", 1, FileAction::Add),
        ];
        let plan = reconcile(&source, &target, &tr, &patterns());
        let paths: Vec<_> = plan
            .entries
            .iter()
            .map(|e| e.target_depot_path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["//p/1.cs", "//p/2.cs", "//p/stale_b.cs", "//p/stale_a.cs"]
        );
    }

    #[test]
    fn fallback_flag_propagates_to_entries() {
        let source = vec![record("//d/a.cs", 1, FileAction::Add)];
        let plan = reconcile(&source, &[], &translator(&[]), &patterns());
        assert!(plan.entries[0].used_fallback);

        let tr = translator(&[("//d/", "//p/")]);
        let plan = reconcile(&source, &[], &tr, &patterns());
        assert!(!plan.entries[0].used_fallback);
    }
}
