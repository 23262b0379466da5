//! Human-facing run summaries and history rendering.

use colored::Colorize;

use crate::executor::ChangelistDisposition;
use crate::history::{SyncRun, TransferRecord};
use crate::reconcile::Operation;

/// Per-operation attempted/succeeded/failed counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Aggregated outcome of one profile run.
#[derive(Debug)]
pub struct RunSummary {
    pub profile_name: String,
    pub adds: OpCounts,
    pub edits: OpCounts,
    pub deletes: OpCounts,
    pub skipped: usize,
    pub disposition: ChangelistDisposition,
}

impl RunSummary {
    pub fn new(
        profile_name: &str,
        records: &[TransferRecord],
        disposition: ChangelistDisposition,
    ) -> Self {
        let mut summary = Self {
            profile_name: profile_name.to_string(),
            adds: OpCounts::default(),
            edits: OpCounts::default(),
            deletes: OpCounts::default(),
            skipped: 0,
            disposition,
        };
        for record in records {
            let counts = match record.operation {
                Operation::Add => &mut summary.adds,
                Operation::Edit => &mut summary.edits,
                Operation::Delete => &mut summary.deletes,
                Operation::Skip => {
                    summary.skipped += 1;
                    continue;
                }
            };
            counts.attempted += 1;
            if record.success {
                counts.succeeded += 1;
            } else {
                counts.failed += 1;
            }
        }
        summary
    }

    pub fn total_failed(&self) -> usize {
        self.adds.failed + self.edits.failed + self.deletes.failed
    }

    /// Print the summary block to stdout.
    pub fn print(&self) {
        println!(
            "\n{}",
            format!("=== Sync Summary: {} ===", self.profile_name)
                .bold()
                .cyan()
        );
        print_counts("Add", &self.adds);
        print_counts("Edit", &self.edits);
        print_counts("Delete", &self.deletes);
        if self.skipped > 0 {
            println!(
                "  {:6} {} (already transferred in an earlier run)",
                "Skip".dimmed(),
                self.skipped
            );
        }

        let disposition = match self.disposition {
            ChangelistDisposition::Submitted(n) => format!("changelist {n} submitted").green(),
            ChangelistDisposition::LeftPending(n) => {
                format!("changelist {n} left pending").yellow()
            }
            ChangelistDisposition::DiscardedEmpty => "empty changelist discarded".dimmed(),
            ChangelistDisposition::NotCreated => "nothing to transfer".dimmed(),
        };
        println!("  {}: {}", "Changelist".bold(), disposition);
    }
}

fn print_counts(label: &str, counts: &OpCounts) {
    if counts.attempted == 0 {
        return;
    }
    let failures = if counts.failed > 0 {
        format!(", {} failed", counts.failed).red().to_string()
    } else {
        String::new()
    };
    println!(
        "  {:6} {} attempted, {} succeeded{}",
        label.cyan(),
        counts.attempted,
        counts.succeeded,
        failures
    );
}

/// Render persisted sync runs for `query-history`.
pub fn print_sync_runs(runs: &[(String, SyncRun)], limit: usize) {
    if runs.is_empty() {
        println!("{}", "No sync history found.".yellow());
        return;
    }

    for (profile_id, run) in runs.iter().take(limit) {
        let changelist = if run.is_unfinished() {
            "unfinished".yellow().to_string()
        } else {
            format!("changelist {}", run.changelist_number)
                .green()
                .to_string()
        };
        println!(
            "{} {} [{}] {} transfers",
            run.sync_time
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
                .bold(),
            changelist,
            profile_id.dimmed(),
            run.transfers.len()
        );
        for transfer in &run.transfers {
            print_transfer(transfer);
        }
    }

    if runs.len() > limit {
        println!("{}", format!("... and {} more runs", runs.len() - limit).dimmed());
    }
}

fn print_transfer(transfer: &TransferRecord) {
    let op = match transfer.operation {
        Operation::Add => "ADD ".green(),
        Operation::Edit => "EDIT".cyan(),
        Operation::Delete => "DEL ".red(),
        Operation::Skip => "SKIP".dimmed(),
    };
    let status = if transfer.success {
        "ok".green().to_string()
    } else {
        format!(
            "failed: {}",
            transfer.error_message.as_deref().unwrap_or("unknown error")
        )
        .red()
        .to_string()
    };
    println!(
        "    {} {}#{} -> {} ({})",
        op,
        transfer.source_depot_path,
        transfer.source_revision,
        transfer.target_depot_path,
        status
    );
}
