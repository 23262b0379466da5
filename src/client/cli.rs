//! Depot backend shelling out to an external command-line client.
//!
//! Every operation runs the configured executable (default `p4`) with the
//! connection's `-p/-u/-c` globals and parses its textual output through
//! [`super::parser`]. Subprocess calls are bounded by the configured timeout;
//! an expired call is killed and surfaces as an ordinary error.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::parser;
use super::{ClientOptions, FileRecord, RepositoryClient, ViewMapping, WorkspaceInfo};
use crate::profile::Connection;

/// How often to poll a running subprocess for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Repository client backed by an external command-line binary.
pub struct CliClient {
    command: String,
    address: String,
    user: String,
    workspace: String,
    timeout: Duration,
}

impl CliClient {
    /// Connect to the endpoint and verify it is reachable.
    pub fn connect(connection: &Connection, options: &ClientOptions) -> Result<Self> {
        let client = Self {
            command: options.command.clone(),
            address: connection.address.clone(),
            user: connection.user.clone(),
            workspace: connection.workspace.clone(),
            timeout: Duration::from_secs(options.timeout_secs),
        };

        client.run(&["info"]).with_context(|| {
            format!(
                "cannot reach server '{}' as user '{}'",
                client.address, client.user
            )
        })?;

        Ok(client)
    }

    /// Run a subcommand and return stdout as UTF-8 text.
    fn run(&self, args: &[&str]) -> Result<String> {
        let bytes = self.run_bytes(args, None)?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    /// Run a subcommand with form input on stdin, returning stdout text.
    fn run_with_input(&self, args: &[&str], input: &str) -> Result<String> {
        let bytes = self.run_bytes(args, Some(input))?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }

    /// Run a subcommand and return raw stdout bytes, enforcing the timeout.
    fn run_bytes(&self, args: &[&str], input: Option<&str>) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(["-p", &self.address, "-u", &self.user, "-c", &self.workspace])
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to run '{} {}'", self.command, args.join(" ")))?;

        if let Some(text) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(text.as_bytes())
                    .context("failed to write form to stdin")?;
            }
        }

        // Drain pipes on threads so a chatty child never blocks on a full
        // pipe while we poll for completion.
        let stdout_pipe = child.stdout.take();
        let stdout_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });
        let stderr_pipe = child.stderr.take();
        let stderr_thread = std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf);
            }
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait().context("failed to poll subprocess")? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "'{} {}' timed out after {}s",
                    self.command,
                    args.join(" "),
                    self.timeout.as_secs()
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        if !status.success() {
            return Err(anyhow!(
                "'{} {}' failed: {}",
                self.command,
                args.join(" "),
                String::from_utf8_lossy(&stderr).trim()
            ));
        }

        Ok(stdout)
    }
}

impl RepositoryClient for CliClient {
    fn enumerate(&self, patterns: &[String]) -> Result<Vec<FileRecord>> {
        // `-e` drops deleted-at-head revisions server-side; the parser drops
        // them again in case the flag is unsupported.
        let mut args = vec!["files", "-e"];
        args.extend(patterns.iter().map(String::as_str));
        let output = self.run(&args)?;
        parser::parse_files_output(&output)
    }

    fn fetch_content(&self, depot_path: &str) -> Result<Vec<u8>> {
        self.run_bytes(&["print", "-q", depot_path], None)
            .with_context(|| format!("failed to fetch content of {depot_path}"))
    }

    fn resolve_local_path(&self, depot_path: &str) -> Result<PathBuf> {
        let output = self.run(&["-ztag", "fstat", "-T", "clientFile", depot_path])?;
        let blocks = parser::parse_tagged_blocks(&output);
        blocks
            .first()
            .and_then(|b| b.get("clientFile"))
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("no clientFile reported for {depot_path}"))
    }

    fn sync_file(&self, depot_path: &str) -> Result<()> {
        self.run(&["sync", "-f", depot_path])
            .with_context(|| format!("failed to sync {depot_path}"))?;
        Ok(())
    }

    fn open_for_add(&self, local_path: &Path, changelist: u64) -> Result<()> {
        let cl = changelist.to_string();
        let local = local_path.to_string_lossy();
        self.run(&["add", "-c", &cl, &local])?;
        Ok(())
    }

    fn open_for_edit(&self, local_path: &Path, changelist: u64) -> Result<()> {
        let cl = changelist.to_string();
        let local = local_path.to_string_lossy();
        match self.run(&["edit", "-c", &cl, &local]) {
            Ok(_) => Ok(()),
            // Already opened in another pending changelist: move it here.
            Err(e) if e.to_string().contains("already opened") => {
                self.run(&["reopen", "-c", &cl, &local])?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn open_for_delete(&self, local_path: &Path, changelist: u64) -> Result<()> {
        let cl = changelist.to_string();
        let local = local_path.to_string_lossy();
        self.run(&["delete", "-c", &cl, &local])?;
        Ok(())
    }

    fn create_changelist(&self, description: &str) -> Result<u64> {
        let mut form = String::new();
        form.push_str("Change:\tnew\n");
        form.push_str(&format!("Client:\t{}\n", self.workspace));
        form.push_str(&format!("User:\t{}\n", self.user));
        form.push_str("Status:\tnew\n");
        form.push_str("Description:\n");
        for line in description.lines() {
            form.push_str(&format!("\t{line}\n"));
        }

        let output = self.run_with_input(&["change", "-i"], &form)?;
        parser::parse_change_created(&output)
    }

    fn submit(&self, changelist: u64) -> Result<()> {
        let cl = changelist.to_string();
        let output = self.run(&["submit", "-c", &cl])?;
        parser::parse_change_submitted(&output)
            .with_context(|| format!("changelist {changelist} was not acknowledged as submitted"))?;
        Ok(())
    }

    fn discard(&self, changelist: u64) -> Result<()> {
        let cl = changelist.to_string();
        self.run(&["change", "-d", &cl])
            .with_context(|| format!("failed to delete pending changelist {changelist}"))?;
        Ok(())
    }

    fn workspace_info(&self) -> Result<WorkspaceInfo> {
        let output = self.run(&["client", "-o"])?;
        let form = parser::parse_spec_form(&output)?;

        let root = form
            .fields
            .get("Root")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("client spec for '{}' has no Root", self.workspace))?;

        let stream = form.fields.get("Stream").cloned().filter(|s| !s.is_empty());

        let client_marker = format!("//{}/", self.workspace);
        let mut view = Vec::new();
        for (depot, client) in &form.view_lines {
            // Exclusion and overlay lines do not define prefix mappings.
            if depot.starts_with('-') || depot.starts_with('+') {
                continue;
            }
            let depot_prefix = parser::strip_view_wildcard(depot).to_string();
            let client_side = parser::strip_view_wildcard(client);
            let client_prefix = client_side
                .strip_prefix(&client_marker)
                .unwrap_or(client_side)
                .to_string();
            view.push(ViewMapping {
                depot_prefix,
                client_prefix,
            });
        }

        Ok(WorkspaceInfo { root, view, stream })
    }
}
