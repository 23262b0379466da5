//! # depot-sync
//!
//! One-way reconciliation and transfer of files between two independent
//! versioned-file depots. A sync profile names a source and a target
//! connection plus the filter patterns selecting which files participate;
//! each run enumerates both sides, translates depot paths between the two
//! workspaces' views, computes the minimal add/edit/delete set to converge
//! the target to the source, and applies it against a pending changelist
//! that is then submitted, left pending, or discarded if empty.
//!
//! ## Key properties
//!
//! - **Idempotent**: re-running against an already-converged target yields
//!   an empty plan.
//! - **Resumable**: every transfer is recorded in a day-partitioned history
//!   ledger; a run interrupted mid-flight is recognized on the next run and
//!   already-transferred files are skipped.
//! - **Failure-isolated**: one file's failure is recorded on its transfer
//!   record and never aborts the batch.
//! - **Backend-agnostic**: the pipeline is written once against the
//!   [`client::RepositoryClient`] trait, with an external command-line
//!   binding and an in-process directory-tree binding chosen by
//!   configuration.

/// Platform directory management and TOML configuration loading.
pub mod config;

/// Sync profile model: connections, filter patterns, options, and the
/// stable profile identity hash used to key history.
pub mod profile;

/// Depot wildcard pattern matching (`...` and `*`).
pub mod filter;

/// Repository client trait and its two concrete backends, plus the text
/// parsers for the command-line backend's output.
pub mod client;

/// Depot path translation between differently-rooted workspaces: explicit
/// mappings, view-diff discovery, stream heuristic, identity fallback.
pub mod translate;

/// File-set reconciliation: computes the minimal operation per path needed
/// to converge the target enumeration to the source enumeration.
pub mod reconcile;

/// Transfer execution: applies a plan against the target with bounded
/// parallelism and manages the pending changelist lifecycle.
pub mod executor;

/// Day-partitioned JSON history ledger enabling resume and audit.
pub mod history;

/// Human-facing run summaries and history rendering.
pub mod report;

/// Console and file logging setup.
pub mod logger;

/// End-to-end orchestration of one profile run.
pub mod sync;
