//! Sync profile model.
//!
//! A profile pairs a source and a target repository connection with the
//! filter patterns and options governing one reconciliation pipeline. It is
//! read-only for the duration of a run; its identity for history lookups is
//! a stable hash of its full serialized content, so editing a profile starts
//! a fresh history lineage.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One repository endpoint: server address, user, and workspace (client) name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Server address, e.g. `ssl:build-server:1666`. For the local backend
    /// this is a filesystem path to the depot directory.
    pub address: String,

    /// User to authenticate as.
    pub user: String,

    /// Workspace (client) name mapping depot paths to a local root.
    pub workspace: String,
}

/// Configuration for a single one-way sync pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique, non-empty profile name.
    pub name: String,

    /// Repository to read from.
    pub source: Connection,

    /// Repository to converge toward the source.
    pub target: Connection,

    /// Depot wildcard patterns selecting the files that participate.
    pub filter_patterns: Vec<String>,

    /// Optional cron expression; scheduling itself is handled by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    /// Submit the changelist automatically when the run succeeds.
    #[serde(default)]
    pub auto_submit: bool,

    /// Changelist description template. Supports `{source_server}`,
    /// `{source_workspace}`, `{target_server}`, `{target_workspace}`,
    /// `{profile_name}` and `{now}` keywords.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Explicit source-prefix to target-prefix path mappings. These always
    /// win over automatic discovery. BTreeMap keeps serialization canonical
    /// so the identity hash is stable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_mappings: Option<BTreeMap<String, String>>,
}

impl Profile {
    /// Stable identity hash over the profile's canonical JSON serialization.
    ///
    /// Used as the primary key for history lookups; any edit to the profile
    /// changes its identity.
    pub fn identity(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        // Serialization of Profile cannot fail: all fields are plain data.
        let json = serde_json::to_string(self).unwrap_or_default();
        json.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Validate the profile's own fields (uniqueness across profiles is
    /// checked at the config level).
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("profile name cannot be empty");
        }
        if self.filter_patterns.is_empty() {
            anyhow::bail!("profile '{}' has no filter patterns", self.name);
        }
        for pattern in &self.filter_patterns {
            if !pattern.starts_with("//") {
                anyhow::bail!(
                    "profile '{}': filter pattern '{}' must be depot-rooted (start with //)",
                    self.name,
                    pattern
                );
            }
        }
        if let Some(mappings) = &self.path_mappings {
            for (from, to) in mappings {
                if !from.starts_with("//") || !to.starts_with("//") {
                    anyhow::bail!(
                        "profile '{}': path mapping '{}' -> '{}' must be depot-rooted",
                        self.name,
                        from,
                        to
                    );
                }
            }
        }
        if let Some(schedule) = &self.schedule {
            if schedule.trim().is_empty() {
                anyhow::bail!("profile '{}': schedule cannot be blank", self.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> Profile {
        Profile {
            name: "mirror".to_string(),
            source: Connection {
                address: "ssl:src:1666".to_string(),
                user: "syncbot".to_string(),
                workspace: "syncbot-src".to_string(),
            },
            target: Connection {
                address: "ssl:dst:1666".to_string(),
                user: "syncbot".to_string(),
                workspace: "syncbot-dst".to_string(),
            },
            filter_patterns: vec!["//depot/main/...".to_string()],
            schedule: None,
            auto_submit: false,
            description: None,
            path_mappings: None,
        }
    }

    #[test]
    fn identity_is_stable_for_equal_profiles() {
        let a = sample_profile();
        let b = sample_profile();
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn identity_changes_when_profile_changes() {
        let a = sample_profile();
        let mut b = sample_profile();
        b.filter_patterns.push("//depot/extra/...".to_string());
        assert_ne!(a.identity(), b.identity());

        let mut c = sample_profile();
        c.auto_submit = true;
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn validate_rejects_empty_name() {
        let mut p = sample_profile();
        p.name = "  ".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_missing_patterns() {
        let mut p = sample_profile();
        p.filter_patterns.clear();
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_pattern() {
        let mut p = sample_profile();
        p.filter_patterns = vec!["depot/main/...".to_string()];
        assert!(p.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_mapping() {
        let mut p = sample_profile();
        let mut mappings = BTreeMap::new();
        mappings.insert("//depot/main/".to_string(), "mirror/main/".to_string());
        p.path_mappings = Some(mappings);
        assert!(p.validate().is_err());
    }

    #[test]
    fn profile_round_trips_through_json() {
        let mut p = sample_profile();
        let mut mappings = BTreeMap::new();
        mappings.insert("//depot/main/".to_string(), "//mirror/main/".to_string());
        p.path_mappings = Some(mappings);
        p.description = Some("Mirror {profile_name}".to_string());

        let json = serde_json::to_string(&p).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
        assert_eq!(p.identity(), back.identity());
    }
}
