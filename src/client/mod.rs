//! Repository client abstraction layer.
//!
//! Provides a unified interface over the two concrete depot backends: an
//! in-process directory-tree depot ([`local::LocalClient`]) and an external
//! command-line client ([`cli::CliClient`]). The reconciler, translator and
//! executor are written once against [`RepositoryClient`] and never know
//! which backend they are driving.

pub mod cli;
pub mod local;
pub mod parser;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::profile::Connection;

pub use cli::CliClient;
pub use local::LocalClient;

/// Head action recorded for a depot file's latest revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Add,
    Edit,
    Delete,
    #[serde(rename = "move/add")]
    MoveAdd,
    #[serde(rename = "move/delete")]
    MoveDelete,
    Integrate,
    Unknown,
}

impl FileAction {
    /// True when the action removed the file at head.
    pub fn is_delete(&self) -> bool {
        matches!(self, FileAction::Delete | FileAction::MoveDelete)
    }

    pub fn as_str(&self) -> &str {
        match self {
            FileAction::Add => "add",
            FileAction::Edit => "edit",
            FileAction::Delete => "delete",
            FileAction::MoveAdd => "move/add",
            FileAction::MoveDelete => "move/delete",
            FileAction::Integrate => "integrate",
            FileAction::Unknown => "unknown",
        }
    }
}

/// One file as enumerated from a depot against the filter patterns.
///
/// Ephemeral: rebuilt on every run. Files whose head action is a delete are
/// filtered out by the backends before reaching the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Depot-rooted path, e.g. `//depot/main/src/Foo.cs`.
    pub depot_path: String,

    /// Local workspace path, when the backend can resolve it cheaply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// Head revision number.
    pub revision: u32,

    /// Action that produced the head revision.
    pub head_action: FileAction,
}

/// One line of a workspace view: depot prefix mapped to client prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMapping {
    pub depot_prefix: String,
    pub client_prefix: String,
}

/// Workspace metadata used for path translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// Local filesystem root of the workspace.
    pub root: PathBuf,

    /// View mappings, most specific entries first is not guaranteed.
    pub view: Vec<ViewMapping>,

    /// Stream the workspace is bound to, when stream-based.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

/// Primitive operations against one depot endpoint.
///
/// Every method is a blocking I/O boundary. Implementations must be safe to
/// call from the executor's worker threads.
pub trait RepositoryClient: Send + Sync {
    /// List files matching the patterns. Deleted-at-head files are excluded.
    fn enumerate(&self, patterns: &[String]) -> Result<Vec<FileRecord>>;

    /// Fetch head content of a depot file.
    fn fetch_content(&self, depot_path: &str) -> Result<Vec<u8>>;

    /// Map a depot path to its local workspace path without touching disk.
    fn resolve_local_path(&self, depot_path: &str) -> Result<PathBuf>;

    /// Sync the file's head content into the local workspace copy.
    fn sync_file(&self, depot_path: &str) -> Result<()>;

    /// Open a local file for add in the given pending changelist.
    fn open_for_add(&self, local_path: &Path, changelist: u64) -> Result<()>;

    /// Open a local file for edit in the given pending changelist. If the
    /// file is already opened in a different changelist the backend reopens
    /// it into this one instead of failing.
    fn open_for_edit(&self, local_path: &Path, changelist: u64) -> Result<()>;

    /// Open a local file for delete in the given pending changelist.
    fn open_for_delete(&self, local_path: &Path, changelist: u64) -> Result<()>;

    /// Create a new pending changelist and return its number.
    fn create_changelist(&self, description: &str) -> Result<u64>;

    /// Submit a pending changelist.
    fn submit(&self, changelist: u64) -> Result<()>;

    /// Delete a pending changelist (must be empty or revertable).
    fn discard(&self, changelist: u64) -> Result<()>;

    /// Fetch the workspace root, view mappings and stream binding.
    fn workspace_info(&self) -> Result<WorkspaceInfo>;
}

/// Which concrete backend to connect with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// External command-line client (`p4`-style).
    Cli,
    /// In-process directory-tree depot.
    Local,
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Cli
    }
}

/// Backend-independent connection options.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Executable for the CLI backend.
    pub command: String,
    /// Per-call subprocess timeout in seconds for the CLI backend.
    pub timeout_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            command: "p4".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Connect to one endpoint with the configured backend.
pub fn connect(
    connection: &Connection,
    backend: Backend,
    options: &ClientOptions,
) -> Result<Box<dyn RepositoryClient>> {
    match backend {
        Backend::Cli => Ok(Box::new(CliClient::connect(connection, options)?)),
        Backend::Local => Ok(Box::new(LocalClient::connect(connection)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_action_delete_classification() {
        assert!(FileAction::Delete.is_delete());
        assert!(FileAction::MoveDelete.is_delete());
        assert!(!FileAction::Add.is_delete());
        assert!(!FileAction::Edit.is_delete());
        assert!(!FileAction::Integrate.is_delete());
    }

    #[test]
    fn backend_parses_from_config_strings() {
        let cli: Backend = serde_json::from_str(r#""cli""#).unwrap();
        assert_eq!(cli, Backend::Cli);
        let local: Backend = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(local, Backend::Local);
    }

    #[test]
    fn file_record_serde_round_trip() {
        let record = FileRecord {
            depot_path: "//depot/main/a.cs".to_string(),
            local_path: Some(PathBuf::from("/ws/src/main/a.cs")),
            revision: 3,
            head_action: FileAction::Edit,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: FileRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
