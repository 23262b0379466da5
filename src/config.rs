//! Configuration loading and platform directory management.
//!
//! The TOML config file carries the backend selection, global tuning knobs
//! and the list of sync profiles. Paths default to the platform config
//! directory (XDG on Linux, Application Support on macOS, AppData on
//! Windows) under `depot-sync/`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::{Backend, ClientOptions};
use crate::profile::Profile;

/// Cross-platform directory layout for depot-sync's own files.
pub struct ConfigManager;

impl ConfigManager {
    /// Main configuration directory.
    pub fn config_dir() -> Result<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
                return Ok(PathBuf::from(xdg_config).join("depot-sync"));
            }
            let home = dirs::home_dir().context("failed to get home directory")?;
            Ok(home.join(".config").join("depot-sync"))
        }

        #[cfg(not(target_os = "linux"))]
        {
            let base = dirs::config_dir().context("failed to get config directory")?;
            Ok(base.join("depot-sync"))
        }
    }

    /// Default config file path (config.toml).
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Default directory for the day-partitioned history files.
    pub fn history_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("history"))
    }

    /// Log file path.
    pub fn log_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("depot-sync.log"))
    }

    /// Ensure the configuration directory exists.
    pub fn ensure_config_dir() -> Result<PathBuf> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config directory: {}", dir.display()))?;
        Ok(dir)
    }
}

fn default_command() -> String {
    "p4".to_string()
}

fn default_parallelism() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    60
}

/// Top-level configuration: backend selection, tuning, and profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Which repository client binding to use.
    #[serde(default)]
    pub backend: Backend,

    /// Executable for the CLI backend.
    #[serde(default = "default_command")]
    pub command: String,

    /// Concurrent file operations per run; the hard cap on parallel
    /// repository calls.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Per-call subprocess timeout for the CLI backend.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Where day-partitioned history files live; platform default if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_dir: Option<PathBuf>,

    #[serde(default, rename = "profiles")]
    pub profiles: Vec<Profile>,
}

impl SyncConfig {
    /// Load from an explicit path, or the platform default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => ConfigManager::config_file_path()?,
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: SyncConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Full validation: per-profile checks plus cross-profile uniqueness.
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            anyhow::bail!("parallelism must be at least 1");
        }
        let mut names = HashSet::new();
        for profile in &self.profiles {
            profile.validate()?;
            if !names.insert(profile.name.as_str()) {
                anyhow::bail!("duplicate profile name '{}'", profile.name);
            }
        }
        Ok(())
    }

    pub fn find_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Resolved history directory.
    pub fn history_dir(&self) -> Result<PathBuf> {
        match &self.history_dir {
            Some(dir) => Ok(dir.clone()),
            None => ConfigManager::history_dir(),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            command: self.command.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Commented sample configuration written by `init`.
pub const SAMPLE_CONFIG: &str = r#"# depot-sync configuration

# Repository client binding: "cli" shells out to the command below,
# "local" uses an in-process directory-tree depot (address = depot dir).
backend = "cli"
command = "p4"

# Concurrent file operations per run.
parallelism = 4

# Per-call timeout for the CLI backend, in seconds.
timeout_secs = 60

# Where daily history files are stored. Defaults to the platform config dir.
# history_dir = "/var/lib/depot-sync/history"

[[profiles]]
name = "example-mirror"
filter_patterns = ["//depot/main/..."]
auto_submit = false
# schedule = "0 */2 * * *"
# description = "Mirror {profile_name} from {source_server} at {now}"

[profiles.source]
address = "ssl:source-server:1666"
user = "syncbot"
workspace = "syncbot-source"

[profiles.target]
address = "ssl:target-server:1666"
user = "syncbot"
workspace = "syncbot-target"

# Explicit path mappings always win over automatic discovery.
# [profiles.path_mappings]
# "//depot/main/" = "//mirror/main/"
"#;

/// Write the sample config, refusing to clobber an existing file unless
/// forced.
pub fn write_sample_config(path: Option<&Path>, force: bool) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            ConfigManager::ensure_config_dir()?;
            ConfigManager::config_file_path()?
        }
    };
    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, SAMPLE_CONFIG)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;
    Ok(path)
}
