//! Dependentree export
//!
//! Flattens a [`ProcessTree`] into the parent-referencing list consumed by
//! the dependentree visualization: one entry per node, `_name` holding the
//! node identifier and `_deps` holding its parent's identifier.

use crate::core::models::ROOT_IDENTIFIER;
use crate::core::process_tree::ProcessTree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Process id the widget reports when nothing is selected
pub const NONE_SELECTED: i64 = -1;

/// One entry of the dependentree format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentreeEntry {
    #[serde(rename = "_name")]
    pub name: String,
    #[serde(rename = "_deps", default)]
    pub deps: Vec<String>,
    #[serde(rename = "ProcessName", default, skip_serializing_if = "Option::is_none")]
    pub process_name: Option<String>,
    #[serde(rename = "ProcessId", default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<i64>,
    #[serde(
        rename = "ProcessCreationTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub process_creation_time: Option<DateTime<Utc>>,
}

impl DependentreeEntry {
    pub fn root() -> Self {
        Self {
            name: ROOT_IDENTIFIER.to_string(),
            deps: Vec::new(),
            process_name: None,
            process_id: None,
            process_creation_time: None,
        }
    }
}

/// Project every node of the tree, in creation order, root first.
pub fn to_dependentree(tree: &ProcessTree) -> Vec<DependentreeEntry> {
    tree.nodes()
        .map(|node| match node.data() {
            None => DependentreeEntry::root(),
            Some(process) => DependentreeEntry {
                name: process.identifier(),
                deps: vec![process.parent_identifier()],
                process_name: Some(process.target().filename.clone()),
                process_id: Some(process.target_process_id()),
                process_creation_time: Some(process.target().creation_time),
            },
        })
        .collect()
}

/// Restrict an export to a creation-time window.
///
/// Keeps entries without a creation time (the root), entries created inside
/// `[start, end]`, and entries created before `start` that still have
/// children in `entries`, so in-window processes keep their ancestors.
/// The result is ordered by creation time, timeless entries first.
pub fn filter_by_time_window(
    entries: &[DependentreeEntry],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<DependentreeEntry> {
    let has_children: HashSet<&str> = entries
        .iter()
        .flat_map(|entry| entry.deps.iter().map(String::as_str))
        .collect();

    let mut kept: Vec<DependentreeEntry> = entries
        .iter()
        .filter(|entry| {
            let Some(created) = entry.process_creation_time else {
                return true;
            };
            let after_start = start.map_or(true, |start| created >= start);
            let before_end = end.map_or(true, |end| created <= end);
            let is_ancestor = !after_start && has_children.contains(entry.name.as_str());
            (after_start && before_end) || is_ancestor
        })
        .cloned()
        .collect();

    // Option orders None first
    kept.sort_by_key(|entry| entry.process_creation_time);
    kept
}

/// Process id of the entry named `name`
pub fn process_id_for(entries: &[DependentreeEntry], name: &str) -> Option<i64> {
    entries
        .iter()
        .find(|entry| entry.name == name)
        .and_then(|entry| entry.process_id)
}

/// Process selected in the visualization; `-1` on the wire means none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct SelectedProcess(Option<i64>);

impl SelectedProcess {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn process_id(&self) -> Option<i64> {
        self.0
    }

    pub fn is_selected(&self) -> bool {
        self.0.is_some()
    }

    /// First entry whose process id matches the selection
    pub fn find<'a>(&self, entries: &'a [DependentreeEntry]) -> Option<&'a DependentreeEntry> {
        let pid = self.0?;
        entries.iter().find(|entry| entry.process_id == Some(pid))
    }
}

impl From<i64> for SelectedProcess {
    fn from(value: i64) -> Self {
        if value == NONE_SELECTED {
            Self(None)
        } else {
            Self(Some(value))
        }
    }
}

impl From<SelectedProcess> for i64 {
    fn from(value: SelectedProcess) -> Self {
        value.0.unwrap_or(NONE_SELECTED)
    }
}
