//! Parsers for the external command-line client's textual output.
//!
//! The CLI backend is the only consumer. Output formats are line-oriented
//! and fragile by nature, so every shape the backend depends on is parsed
//! here and pinned by unit tests against literal input, keeping
//! backend-specific quirks out of the reconciler.

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;

use super::{FileAction, FileRecord};

/// Parse a head action token, e.g. `edit` or `move/add`.
pub fn parse_action(token: &str) -> FileAction {
    match token {
        "add" => FileAction::Add,
        "edit" => FileAction::Edit,
        "delete" => FileAction::Delete,
        "move/add" => FileAction::MoveAdd,
        "move/delete" => FileAction::MoveDelete,
        "integrate" | "branch" => FileAction::Integrate,
        _ => FileAction::Unknown,
    }
}

/// Parse one `files` output line of the shape:
///
/// ```text
/// //depot/main/src/Foo.cs#3 - edit change 42 (text)
/// ```
pub fn parse_files_line(line: &str) -> Result<FileRecord> {
    let (path_part, rest) = line
        .split_once(" - ")
        .ok_or_else(|| anyhow!("malformed files line (no ' - '): {line}"))?;

    let (depot_path, revision) = path_part
        .rsplit_once('#')
        .ok_or_else(|| anyhow!("malformed files line (no '#rev'): {line}"))?;

    let revision: u32 = revision
        .trim()
        .parse()
        .with_context(|| format!("bad revision in files line: {line}"))?;

    let action_token = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| anyhow!("malformed files line (no action): {line}"))?;

    Ok(FileRecord {
        depot_path: depot_path.trim().to_string(),
        local_path: None,
        revision,
        head_action: parse_action(action_token),
    })
}

/// Parse full `files` output, dropping blank lines and deleted-at-head
/// records per the enumeration contract.
pub fn parse_files_output(output: &str) -> Result<Vec<FileRecord>> {
    let mut records = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = parse_files_line(line)?;
        if record.head_action.is_delete() {
            continue;
        }
        records.push(record);
    }
    Ok(records)
}

/// Parse tagged (`-ztag`) output: blocks of `... key value` lines separated
/// by blank lines. Used for file-status queries.
pub fn parse_tagged_blocks(output: &str) -> Vec<BTreeMap<String, String>> {
    let mut blocks = Vec::new();
    let mut current: BTreeMap<String, String> = BTreeMap::new();

    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("... ") {
            match rest.split_once(' ') {
                Some((key, value)) => {
                    current.insert(key.to_string(), value.to_string());
                }
                None => {
                    current.insert(rest.to_string(), String::new());
                }
            }
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// A parsed client/workspace spec form: `Key: value` lines, where `View:`
/// is followed by indented mapping lines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecForm {
    pub fields: BTreeMap<String, String>,
    pub view_lines: Vec<(String, String)>,
}

/// Parse a spec form as printed by `client -o`.
pub fn parse_spec_form(output: &str) -> Result<SpecForm> {
    let mut form = SpecForm::default();
    let mut in_view = false;

    for line in output.lines() {
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with('\t') || line.starts_with("    ") {
            if in_view {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let (depot, client) = split_view_line(trimmed)
                    .ok_or_else(|| anyhow!("malformed view line: {trimmed}"))?;
                form.view_lines.push((depot, client));
            }
            continue;
        }

        in_view = false;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            if key == "View" {
                in_view = true;
            }
            form.fields.insert(key, value);
        }
    }
    Ok(form)
}

/// Split a view line into its depot and client halves, honoring quoting for
/// paths with spaces.
fn split_view_line(line: &str) -> Option<(String, String)> {
    if line.starts_with('"') {
        let end = line[1..].find('"')? + 1;
        let depot = line[1..end].to_string();
        let rest = line[end + 1..].trim();
        let client = rest.trim_matches('"').to_string();
        if client.is_empty() {
            return None;
        }
        return Some((depot, client));
    }
    let (depot, client) = line.split_once(char::is_whitespace)?;
    let client = client.trim().trim_matches('"');
    if client.is_empty() {
        return None;
    }
    Some((depot.to_string(), client.to_string()))
}

/// Strip the trailing recursive wildcard from a view-mapping half, leaving a
/// plain prefix.
pub fn strip_view_wildcard(path: &str) -> &str {
    path.strip_suffix("...").unwrap_or(path)
}

/// Parse the acknowledgement printed when a pending changelist is created:
/// `Change 1234 created.`
pub fn parse_change_created(output: &str) -> Result<u64> {
    for line in output.lines() {
        let mut words = line.split_whitespace();
        if words.next() == Some("Change") {
            if let Some(number) = words.next() {
                if words.next().map(|w| w.starts_with("created")) == Some(true) {
                    return number
                        .parse()
                        .with_context(|| format!("bad changelist number in: {line}"));
                }
            }
        }
    }
    Err(anyhow!("no 'Change N created' acknowledgement in output"))
}

/// Parse the acknowledgement printed on submit: `Change 1234 submitted.`
/// Submits can be renumbered (`Change 1234 renamed change 1240 and submitted.`),
/// in which case the final number is returned.
pub fn parse_change_submitted(output: &str) -> Result<u64> {
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("Change ") {
            continue;
        }
        if line.ends_with("submitted.") {
            let mut number = None;
            for word in line.split_whitespace() {
                if let Ok(n) = word.trim_end_matches('.').parse::<u64>() {
                    number = Some(n);
                }
            }
            if let Some(n) = number {
                return Ok(n);
            }
        }
    }
    Err(anyhow!("no submit acknowledgement in output"))
}
