//! In-process depot backend over a directory tree.
//!
//! This is the native binding: a depot lives entirely inside one directory,
//! with file content under `files/`, per-workspace roots under
//! `workspaces/`, and revision/changelist bookkeeping in `meta.json`.
//! Integration tests drive the full pipeline against this backend.
//!
//! Layout for a depot rooted at `D`:
//!
//! ```text
//! D/meta.json                    revisions, head actions, pending changelists
//! D/files/depot/main/a.cs        head content of //depot/main/a.cs
//! D/workspaces/<client>/...      local workspace roots
//! D/clients/<client>.json        optional view/stream spec for a workspace
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{FileAction, FileRecord, RepositoryClient, ViewMapping, WorkspaceInfo};
use crate::filter;
use crate::profile::Connection;

/// Action a pending changelist holds a file open for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OpenAction {
    Add,
    Edit,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileMeta {
    revision: u32,
    head_action: FileAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingChangelist {
    description: String,
    #[serde(default)]
    opens: BTreeMap<String, OpenAction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DepotMeta {
    #[serde(default)]
    files: BTreeMap<String, FileMeta>,
    #[serde(default)]
    next_changelist: u64,
    #[serde(default)]
    changelists: BTreeMap<u64, PendingChangelist>,
}

/// Optional per-workspace spec, mirroring what a client form would carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ClientSpec {
    #[serde(default)]
    view: Vec<ViewMapping>,
    #[serde(default)]
    stream: Option<String>,
}

/// Repository client over a directory-tree depot.
pub struct LocalClient {
    depot_dir: PathBuf,
    workspace: String,
    // Serializes meta.json read-modify-write across worker threads.
    meta_lock: Mutex<()>,
}

impl LocalClient {
    /// Connect to (and if necessary initialize) the depot directory named by
    /// the connection address.
    pub fn connect(connection: &Connection) -> Result<Self> {
        let depot_dir = PathBuf::from(&connection.address);
        fs::create_dir_all(depot_dir.join("files"))
            .with_context(|| format!("cannot open depot at '{}'", depot_dir.display()))?;
        fs::create_dir_all(depot_dir.join("workspaces").join(&connection.workspace))?;

        let client = Self {
            depot_dir,
            workspace: connection.workspace.clone(),
            meta_lock: Mutex::new(()),
        };
        // Materialize meta.json so a bad address fails here, not mid-run.
        {
            let _guard = client.meta_lock.lock().unwrap();
            let meta = client.load_meta()?;
            client.store_meta(&meta)?;
        }
        Ok(client)
    }

    /// Write a view/stream spec for a workspace of this depot. Used by setup
    /// code and tests; workspaces without a spec get the identity view.
    pub fn write_client_spec(
        depot_dir: &Path,
        workspace: &str,
        view: Vec<ViewMapping>,
        stream: Option<String>,
    ) -> Result<()> {
        let dir = depot_dir.join("clients");
        fs::create_dir_all(&dir)?;
        let spec = ClientSpec { view, stream };
        let path = dir.join(format!("{workspace}.json"));
        fs::write(&path, serde_json::to_string_pretty(&spec)?)
            .with_context(|| format!("failed to write client spec {}", path.display()))?;
        Ok(())
    }

    fn meta_path(&self) -> PathBuf {
        self.depot_dir.join("meta.json")
    }

    fn load_meta(&self) -> Result<DepotMeta> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok(DepotMeta::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    fn store_meta(&self, meta: &DepotMeta) -> Result<()> {
        let path = self.meta_path();
        fs::write(&path, serde_json::to_string_pretty(meta)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn workspace_root(&self) -> PathBuf {
        self.depot_dir.join("workspaces").join(&self.workspace)
    }

    fn load_spec(&self) -> ClientSpec {
        let path = self
            .depot_dir
            .join("clients")
            .join(format!("{}.json", self.workspace));
        fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or(ClientSpec {
                // Identity view: the whole depot mirrored under the root.
                view: vec![ViewMapping {
                    depot_prefix: "//".to_string(),
                    client_prefix: String::new(),
                }],
                stream: None,
            })
    }

    /// Content path for a depot file, e.g. `//depot/a.cs` -> `files/depot/a.cs`.
    fn content_path(&self, depot_path: &str) -> Result<PathBuf> {
        let rel = depot_path
            .strip_prefix("//")
            .ok_or_else(|| anyhow!("not a depot path: {depot_path}"))?;
        Ok(self.depot_dir.join("files").join(rel))
    }

    /// Map a local workspace path back to its depot path via the view.
    fn depot_path_for_local(&self, local_path: &Path) -> Result<String> {
        let root = self.workspace_root();
        let rel = local_path
            .strip_prefix(&root)
            .with_context(|| {
                format!(
                    "'{}' is outside workspace root '{}'",
                    local_path.display(),
                    root.display()
                )
            })?
            .to_string_lossy()
            .replace('\\', "/");

        let mut view = self.load_spec().view;
        view.sort_by_key(|m| std::cmp::Reverse(m.client_prefix.len()));
        for mapping in &view {
            if let Some(rest) = rel.strip_prefix(&mapping.client_prefix) {
                return Ok(format!("{}{}", mapping.depot_prefix, rest));
            }
        }
        Err(anyhow!("no view mapping covers '{rel}'"))
    }

    fn resolve_local(&self, depot_path: &str) -> Result<PathBuf> {
        let mut view = self.load_spec().view;
        view.sort_by_key(|m| std::cmp::Reverse(m.depot_prefix.len()));
        for mapping in &view {
            if let Some(rest) = depot_path.strip_prefix(&mapping.depot_prefix) {
                let rel = format!("{}{}", mapping.client_prefix, rest);
                return Ok(self.workspace_root().join(rel));
            }
        }
        Err(anyhow!("no view mapping covers '{depot_path}'"))
    }

    /// Record an open in the changelist, moving it there if it is already
    /// open in a different pending changelist.
    fn record_open(&self, local_path: &Path, changelist: u64, action: OpenAction) -> Result<()> {
        let depot_path = self.depot_path_for_local(local_path)?;
        let _guard = self.meta_lock.lock().unwrap();
        let mut meta = self.load_meta()?;

        if !meta.changelists.contains_key(&changelist) {
            return Err(anyhow!("changelist {changelist} does not exist"));
        }
        for (number, pending) in meta.changelists.iter_mut() {
            if *number != changelist {
                pending.opens.remove(&depot_path);
            }
        }
        meta.changelists
            .get_mut(&changelist)
            .expect("checked above")
            .opens
            .insert(depot_path, action);
        self.store_meta(&meta)
    }
}

impl RepositoryClient for LocalClient {
    fn enumerate(&self, patterns: &[String]) -> Result<Vec<FileRecord>> {
        let _guard = self.meta_lock.lock().unwrap();
        let meta = self.load_meta()?;
        let mut records = Vec::new();
        for (depot_path, file) in &meta.files {
            if file.head_action.is_delete() {
                continue;
            }
            if !filter::matches_any(patterns, depot_path) {
                continue;
            }
            records.push(FileRecord {
                depot_path: depot_path.clone(),
                local_path: self.resolve_local(depot_path).ok(),
                revision: file.revision,
                head_action: file.head_action,
            });
        }
        Ok(records)
    }

    fn fetch_content(&self, depot_path: &str) -> Result<Vec<u8>> {
        {
            let _guard = self.meta_lock.lock().unwrap();
            let meta = self.load_meta()?;
            match meta.files.get(depot_path) {
                Some(file) if !file.head_action.is_delete() => {}
                _ => return Err(anyhow!("{depot_path} does not exist at head")),
            }
        }
        let path = self.content_path(depot_path)?;
        fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn resolve_local_path(&self, depot_path: &str) -> Result<PathBuf> {
        self.resolve_local(depot_path)
    }

    fn sync_file(&self, depot_path: &str) -> Result<()> {
        let content = self.fetch_content(depot_path)?;
        let local = self.resolve_local(depot_path)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        if local.exists() {
            let mut perms = fs::metadata(&local)?.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(&local, perms)?;
        }
        fs::write(&local, content)
            .with_context(|| format!("failed to write {}", local.display()))?;
        Ok(())
    }

    fn open_for_add(&self, local_path: &Path, changelist: u64) -> Result<()> {
        if !local_path.exists() {
            return Err(anyhow!(
                "cannot open '{}' for add: file missing locally",
                local_path.display()
            ));
        }
        self.record_open(local_path, changelist, OpenAction::Add)
    }

    fn open_for_edit(&self, local_path: &Path, changelist: u64) -> Result<()> {
        self.record_open(local_path, changelist, OpenAction::Edit)
    }

    fn open_for_delete(&self, local_path: &Path, changelist: u64) -> Result<()> {
        self.record_open(local_path, changelist, OpenAction::Delete)
    }

    fn create_changelist(&self, description: &str) -> Result<u64> {
        let _guard = self.meta_lock.lock().unwrap();
        let mut meta = self.load_meta()?;
        if meta.next_changelist == 0 {
            meta.next_changelist = 1;
        }
        let number = meta.next_changelist;
        meta.next_changelist += 1;
        meta.changelists.insert(
            number,
            PendingChangelist {
                description: description.to_string(),
                opens: BTreeMap::new(),
            },
        );
        self.store_meta(&meta)?;
        Ok(number)
    }

    fn submit(&self, changelist: u64) -> Result<()> {
        let _guard = self.meta_lock.lock().unwrap();
        let mut meta = self.load_meta()?;
        let pending = meta
            .changelists
            .get(&changelist)
            .cloned()
            .ok_or_else(|| anyhow!("changelist {changelist} does not exist"))?;
        if pending.opens.is_empty() {
            return Err(anyhow!("no files to submit in changelist {changelist}"));
        }

        for (depot_path, action) in &pending.opens {
            let content_path = self.content_path(depot_path)?;
            let previous = meta.files.get(depot_path).cloned();
            let next_revision = previous.as_ref().map(|f| f.revision + 1).unwrap_or(1);

            match action {
                OpenAction::Add | OpenAction::Edit => {
                    let local = self.resolve_local(depot_path)?;
                    let content = fs::read(&local).with_context(|| {
                        format!("opened file missing locally: {}", local.display())
                    })?;
                    if let Some(parent) = content_path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    fs::write(&content_path, content)?;
                    let head_action = match action {
                        OpenAction::Add => FileAction::Add,
                        _ => FileAction::Edit,
                    };
                    meta.files.insert(
                        depot_path.clone(),
                        FileMeta {
                            revision: next_revision,
                            head_action,
                        },
                    );
                }
                OpenAction::Delete => {
                    if content_path.exists() {
                        fs::remove_file(&content_path)?;
                    }
                    meta.files.insert(
                        depot_path.clone(),
                        FileMeta {
                            revision: next_revision,
                            head_action: FileAction::Delete,
                        },
                    );
                }
            }
        }

        meta.changelists.remove(&changelist);
        self.store_meta(&meta)
    }

    fn discard(&self, changelist: u64) -> Result<()> {
        let _guard = self.meta_lock.lock().unwrap();
        let mut meta = self.load_meta()?;
        meta.changelists
            .remove(&changelist)
            .ok_or_else(|| anyhow!("changelist {changelist} does not exist"))?;
        self.store_meta(&meta)
    }

    fn workspace_info(&self) -> Result<WorkspaceInfo> {
        let spec = self.load_spec();
        Ok(WorkspaceInfo {
            root: self.workspace_root(),
            view: spec.view,
            stream: spec.stream,
        })
    }
}
