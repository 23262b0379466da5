//! Depot path translation between workspaces.
//!
//! Maps a depot path valid under the source workspace's view to the
//! corresponding path under the target workspace's view, so the same
//! relative file can be located on both sides even when depot names, stream
//! names or root prefixes differ.
//!
//! Mapping tiers, in precedence order:
//! 1. explicit profile mappings (longest prefix wins),
//! 2. mappings discovered by diffing the two views' root-relative client
//!    paths (narrower prefix preferred),
//! 3. a coarse stream-to-stream mapping when both workspaces are bound to
//!    streams under the same top-level depot,
//! 4. identity fallback, flagged so callers can log reduced confidence.
//!
//! Translation never fails; workspace lookup errors upstream simply leave a
//! tier empty.

use std::collections::BTreeMap;

use crate::client::WorkspaceInfo;
use crate::profile::Profile;

/// Result of translating one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated {
    pub path: String,
    /// True when no mapping applied and the path passed through unchanged.
    pub fallback: bool,
}

/// Prefix-substitution table built once per run.
#[derive(Debug, Default)]
pub struct PathTranslator {
    /// Explicit profile mappings, longest source prefix first.
    explicit: Vec<(String, String)>,
    /// View-diff discoveries, longest source prefix first.
    discovered: Vec<(String, String)>,
    /// Coarse stream-base mapping, tried last.
    stream: Option<(String, String)>,
}

impl PathTranslator {
    /// Assemble the mapping table for a profile. Workspace infos are
    /// optional: a failed lookup degrades to the remaining tiers.
    pub fn build(
        profile: &Profile,
        source_ws: Option<&WorkspaceInfo>,
        target_ws: Option<&WorkspaceInfo>,
    ) -> Self {
        let mut explicit: Vec<(String, String)> = profile
            .path_mappings
            .iter()
            .flatten()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        explicit.sort_by_key(|(from, _)| std::cmp::Reverse(from.len()));

        let mut discovered_map: BTreeMap<String, String> = BTreeMap::new();
        if let (Some(source), Some(target)) = (source_ws, target_ws) {
            for sm in &source.view {
                for tm in &target.view {
                    // The same root-relative client path on both sides means
                    // the depot prefixes address the same subtree.
                    if sm.client_prefix == tm.client_prefix {
                        discovered_map
                            .entry(sm.depot_prefix.clone())
                            .or_insert_with(|| tm.depot_prefix.clone());
                    }
                }
            }
        }
        let mut discovered: Vec<(String, String)> = discovered_map.into_iter().collect();
        discovered.sort_by_key(|(from, _)| std::cmp::Reverse(from.len()));
        for (from, to) in &discovered {
            log::debug!("discovered path mapping {from} -> {to}");
        }

        let stream = match (
            source_ws.and_then(|w| w.stream.as_deref()),
            target_ws.and_then(|w| w.stream.as_deref()),
        ) {
            (Some(source_stream), Some(target_stream))
                if top_depot(source_stream) == top_depot(target_stream)
                    && source_stream != target_stream =>
            {
                log::debug!("using stream mapping {source_stream} -> {target_stream}");
                Some((
                    format!("{source_stream}/"),
                    format!("{target_stream}/"),
                ))
            }
            _ => None,
        };

        Self {
            explicit,
            discovered,
            stream,
        }
    }

    /// Translator with only explicit mappings; used when no workspace
    /// metadata is available at all.
    pub fn from_explicit(profile: &Profile) -> Self {
        Self::build(profile, None, None)
    }

    /// Translate a source-side depot path into target-side terms.
    pub fn translate(&self, path: &str) -> Translated {
        for (from, to) in &self.explicit {
            if let Some(rest) = path.strip_prefix(from.as_str()) {
                return Translated {
                    path: format!("{to}{rest}"),
                    fallback: false,
                };
            }
        }
        for (from, to) in &self.discovered {
            if let Some(rest) = path.strip_prefix(from.as_str()) {
                return Translated {
                    path: format!("{to}{rest}"),
                    fallback: false,
                };
            }
        }
        if let Some((from, to)) = &self.stream {
            if let Some(rest) = path.strip_prefix(from.as_str()) {
                return Translated {
                    path: format!("{to}{rest}"),
                    fallback: false,
                };
            }
        }
        Translated {
            path: path.to_string(),
            fallback: true,
        }
    }

    /// Translate a target-side depot path back into source-side terms,
    /// using the longest matching target prefix. Inverts `translate` for
    /// any path a mapping produced.
    pub fn translate_back(&self, path: &str) -> Translated {
        let mut reversed: Vec<(&str, &str)> = Vec::new();
        for (from, to) in &self.explicit {
            reversed.push((to.as_str(), from.as_str()));
        }
        for (from, to) in &self.discovered {
            reversed.push((to.as_str(), from.as_str()));
        }
        if let Some((from, to)) = &self.stream {
            reversed.push((to.as_str(), from.as_str()));
        }
        reversed.sort_by_key(|(to, _)| std::cmp::Reverse(to.len()));

        for (to, from) in reversed {
            if let Some(rest) = path.strip_prefix(to) {
                return Translated {
                    path: format!("{from}{rest}"),
                    fallback: false,
                };
            }
        }
        Translated {
            path: path.to_string(),
            fallback: true,
        }
    }
}

/// First path component of a depot-rooted path: `//streams/main` -> `streams`.
fn top_depot(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
}
