//! Process tree store
//!
//! Rebuilds the ancestry tree from process-creation events. Every event
//! names the target process, its direct parent (acting process) and its
//! grandparent (parent process). Ancestors that have not been observed yet
//! are inserted as placeholders so the hierarchy stays connected, and are
//! upgraded in place once their own creation event arrives.
//!
//! Nodes live in an arena (`Vec<TreeNode>`) indexed by [`NodeId`], with a
//! hash index from identifier to slot. Nodes of a merged event are never
//! removed, so a `NodeId` stays valid for the lifetime of the tree; only the
//! nodes of an event that failed halfway are rolled back.
//!
//! Example tree structure:
//! ```text
//! <root>
//! ├── MsSense.exe (3436)
//! │   └── SenseIR.exe (2224)
//! │       └── powershell.exe (5416)
//! │           ├── conhost.exe (4440)
//! │           └── csc.exe (728)
//! │               └── cvtres.exe (5000)
//! ```

use crate::core::export::{to_dependentree, DependentreeEntry};
use crate::core::models::{ProcessRecord, ROOT_IDENTIFIER};
use crate::error::{ProcessTreeError, ProcessTreeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Arena slot of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

const ROOT_NODE: NodeId = NodeId(0);

/// Undo record for one write made while merging an event
#[derive(Debug)]
enum Change {
    Inserted(NodeId),
    Modified {
        node: NodeId,
        tag: String,
        data: Option<ProcessRecord>,
        parent: NodeId,
    },
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    identifier: String,
    tag: String,
    data: Option<ProcessRecord>,
    parent: Option<NodeId>,
    // NodeIds grow monotonically, so this is creation order
    children: BTreeSet<NodeId>,
}

impl TreeNode {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The process record; `None` only for the root
    pub fn data(&self) -> Option<&ProcessRecord> {
        self.data.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// What a single [`ProcessTree::insert_or_update`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new node was created
    Inserted,
    /// Tag and payload were replaced, position unchanged
    Updated,
    /// Tag and payload were replaced and the node moved
    Reparented { from: String, to: String },
    /// The record carried no ancestry and the node already existed
    Ignored,
}

/// How [`ProcessTree::build_tree`] reacts to a record that fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPolicy {
    /// Stop at the first failing record and return its error
    #[default]
    Abort,
    /// Log the failure, count it, keep going
    Skip,
}

/// Counters collected while building a tree from a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub records: usize,
    pub skipped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub reparented: usize,
    pub ignored: usize,
}

impl BuildReport {
    fn record_outcomes(&mut self, outcomes: &[MergeOutcome]) {
        for outcome in outcomes {
            match outcome {
                MergeOutcome::Inserted => self.inserted += 1,
                MergeOutcome::Updated => self.updated += 1,
                MergeOutcome::Reparented { .. } => self.reparented += 1,
                MergeOutcome::Ignored => self.ignored += 1,
            }
        }
    }

    /// Records that made it into the tree
    pub fn processed(&self) -> usize {
        self.records - self.skipped
    }
}

/// In-memory process ancestry tree keyed by process identifier.
///
/// Not meant for concurrent mutation; callers sharing a tree across threads
/// must serialize access themselves.
#[derive(Debug, Clone)]
pub struct ProcessTree {
    nodes: Vec<TreeNode>,
    index: HashMap<String, NodeId>,
    policy: BuildPolicy,
}

impl Default for ProcessTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTree {
    /// An empty tree holding only the root
    pub fn new() -> Self {
        let root = TreeNode {
            identifier: ROOT_IDENTIFIER.to_string(),
            tag: ROOT_IDENTIFIER.to_string(),
            data: None,
            parent: None,
            children: BTreeSet::new(),
        };
        let mut index = HashMap::new();
        index.insert(ROOT_IDENTIFIER.to_string(), ROOT_NODE);

        Self {
            nodes: vec![root],
            index,
            policy: BuildPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: BuildPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> BuildPolicy {
        self.policy
    }

    /// Build a tree from raw event mappings, aborting on the first bad record
    pub fn from_records<I>(records: I) -> ProcessTreeResult<Self>
    where
        I: IntoIterator,
        I::Item: Borrow<Value>,
    {
        let mut tree = Self::new();
        tree.build_tree(records)?;
        Ok(tree)
    }

    /// Validate and insert every record in the order given.
    ///
    /// Records are expected in ascending creation-time order. On failure the
    /// configured [`BuildPolicy`] decides whether the batch stops or the
    /// record is skipped.
    pub fn build_tree<I>(&mut self, records: I) -> ProcessTreeResult<BuildReport>
    where
        I: IntoIterator,
        I::Item: Borrow<Value>,
    {
        let mut report = BuildReport::default();

        for (index, raw) in records.into_iter().enumerate() {
            report.records += 1;

            let result = ProcessRecord::try_from(raw.borrow())
                .and_then(|record| self.insert_process(record));

            match result {
                Ok(outcomes) => report.record_outcomes(&outcomes),
                Err(err) if self.policy == BuildPolicy::Skip && err.is_recoverable() => {
                    warn!(record = index, error = %err, "skipping record");
                    report.skipped += 1;
                }
                Err(err) => return Err(err.at_record(index)),
            }
        }

        info!(
            records = report.records,
            skipped = report.skipped,
            nodes = self.len(),
            reparented = report.reparented,
            "process tree built"
        );
        Ok(report)
    }

    /// Merge one event, creating its grandparent and acting process first.
    ///
    /// The grandparent goes in with unknown ancestry, the acting process is
    /// parented by the grandparent, then the record itself is merged. Each
    /// node's parent therefore exists by the time the node is inserted.
    /// Ancestors whose id is the missing sentinel are not inserted; the
    /// descendant hangs off the root instead.
    ///
    /// The three merges apply as one unit: if any of them fails, the ones
    /// already applied are undone before the error is returned.
    pub fn insert_process(
        &mut self,
        record: ProcessRecord,
    ) -> ProcessTreeResult<Vec<MergeOutcome>> {
        let mut journal = Vec::new();
        match self.merge_event(record, &mut journal) {
            Ok(outcomes) => Ok(outcomes),
            Err(err) => {
                self.rollback(journal);
                Err(err)
            }
        }
    }

    fn merge_event(
        &mut self,
        record: ProcessRecord,
        journal: &mut Vec<Change>,
    ) -> ProcessTreeResult<Vec<MergeOutcome>> {
        let mut outcomes = Vec::with_capacity(3);

        if !record.parent().is_missing() {
            outcomes.push(self.merge(record.grandparent_record(), journal)?);
        }
        if !record.acting().is_missing() {
            outcomes.push(self.merge(record.acting_record(), journal)?);
        }
        outcomes.push(self.merge(record, journal)?);

        Ok(outcomes)
    }

    /// Insert a record, or merge it into the node with the same identifier.
    ///
    /// A record without known ancestry never overwrites an existing node.
    /// Otherwise tag and payload are replaced and, if the parent changed,
    /// the node moves. The new parent must exist and must not be the node
    /// or one of its descendants; a rejected merge changes nothing.
    pub fn insert_or_update(&mut self, record: ProcessRecord) -> ProcessTreeResult<MergeOutcome> {
        self.merge(record, &mut Vec::new())
    }

    fn merge(
        &mut self,
        record: ProcessRecord,
        journal: &mut Vec<Change>,
    ) -> ProcessTreeResult<MergeOutcome> {
        let identifier = record.identifier();
        let parent_identifier = record.parent_identifier();

        let Some(node_id) = self.index.get(&identifier).copied() else {
            let parent = self.resolve_parent(&identifier, &parent_identifier)?;
            let node_id = NodeId(self.nodes.len());
            self.nodes.push(TreeNode {
                identifier: identifier.clone(),
                tag: record.tag(),
                data: Some(record),
                parent: Some(parent),
                children: BTreeSet::new(),
            });
            self.nodes[parent.0].children.insert(node_id);
            self.index.insert(identifier.clone(), node_id);
            journal.push(Change::Inserted(node_id));

            debug!(node = %identifier, parent = %parent_identifier, "inserted");
            return Ok(MergeOutcome::Inserted);
        };

        if !record.has_known_ancestry() {
            return Ok(MergeOutcome::Ignored);
        }

        let existing_parent = self.nodes[node_id.0]
            .data
            .as_ref()
            .map(ProcessRecord::parent_identifier);

        if existing_parent.as_deref() == Some(parent_identifier.as_str()) {
            journal.push(self.snapshot(node_id));
            self.replace_payload(node_id, record);
            return Ok(MergeOutcome::Updated);
        }

        let new_parent = self.resolve_parent(&identifier, &parent_identifier)?;
        if let Err(err) = self.ensure_acyclic(node_id, new_parent) {
            warn!(
                node = %identifier,
                parent = %parent_identifier,
                "reparent rejected, would create a cycle"
            );
            return Err(err);
        }

        journal.push(self.snapshot(node_id));
        let from = self.move_node(node_id, new_parent);
        self.replace_payload(node_id, record);

        debug!(node = %identifier, from = %from, to = %parent_identifier, "reparented");
        Ok(MergeOutcome::Reparented {
            from,
            to: parent_identifier,
        })
    }

    /// All distinct target process ids in the tree (root excluded)
    pub fn get_all_pids(&self) -> BTreeSet<i64> {
        self.nodes
            .iter()
            .filter_map(|node| node.data.as_ref())
            .map(ProcessRecord::target_process_id)
            .collect()
    }

    /// Flat parent-referencing projection, one entry per node, root first
    pub fn export(&self) -> Vec<DependentreeEntry> {
        to_dependentree(self)
    }

    /// Nodes in creation order, root first
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter()
    }

    pub fn get(&self, identifier: &str) -> Option<&TreeNode> {
        self.index.get(identifier).map(|id| &self.nodes[id.0])
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.index.contains_key(identifier)
    }

    /// Identifier of the node's parent; `None` for the root or unknown identifiers
    pub fn parent_of(&self, identifier: &str) -> Option<&str> {
        let node = self.get(identifier)?;
        node.parent.map(|parent| self.nodes[parent.0].identifier.as_str())
    }

    /// Identifiers of the node's children in creation order
    pub fn children_of(&self, identifier: &str) -> Vec<&str> {
        self.get(identifier)
            .map(|node| {
                node.children
                    .iter()
                    .map(|child| self.nodes[child.0].identifier.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of nodes, root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing but the root is present
    pub fn is_empty(&self) -> bool {
        self.process_count() == 0
    }

    /// Number of non-root nodes
    pub fn process_count(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Indented box-drawing rendering, siblings ordered by tag
    pub fn display(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.nodes[ROOT_NODE.0].tag);
        out.push('\n');

        // (node, prefix of its line, last among its siblings)
        let mut stack: Vec<(NodeId, String, bool)> = Vec::new();
        self.push_children(ROOT_NODE, "", &mut stack);

        while let Some((node, prefix, is_last)) = stack.pop() {
            let (branch, extension) = if is_last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            out.push_str(&prefix);
            out.push_str(branch);
            out.push_str(&self.nodes[node.0].tag);
            out.push('\n');
            self.push_children(node, &format!("{prefix}{extension}"), &mut stack);
        }
        out
    }

    /// Push children in reverse display order so they pop in order
    fn push_children(
        &self,
        node: NodeId,
        prefix: &str,
        stack: &mut Vec<(NodeId, String, bool)>,
    ) {
        let mut children: Vec<NodeId> = self.nodes[node.0].children.iter().copied().collect();
        children.sort_by(|a, b| {
            let (a, b) = (&self.nodes[a.0], &self.nodes[b.0]);
            a.tag.cmp(&b.tag).then_with(|| a.identifier.cmp(&b.identifier))
        });

        let last = children.len().saturating_sub(1);
        for (position, child) in children.into_iter().enumerate().rev() {
            stack.push((child, prefix.to_string(), position == last));
        }
    }

    fn resolve_parent(&self, identifier: &str, parent: &str) -> ProcessTreeResult<NodeId> {
        self.index
            .get(parent)
            .copied()
            .ok_or_else(|| ProcessTreeError::UnknownParent {
                identifier: identifier.to_string(),
                parent: parent.to_string(),
            })
    }

    /// Walks up from `new_parent`; reaching `node` means the move closes a loop.
    fn ensure_acyclic(&self, node: NodeId, new_parent: NodeId) -> ProcessTreeResult<()> {
        let mut cursor = Some(new_parent);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == node || steps > self.nodes.len() {
                return Err(ProcessTreeError::Cycle {
                    identifier: self.nodes[node.0].identifier.clone(),
                    new_parent: self.nodes[new_parent.0].identifier.clone(),
                });
            }
            cursor = self.nodes[current.0].parent;
            steps += 1;
        }
        Ok(())
    }

    /// Detach from the current parent, attach to `new_parent`; returns the old parent's identifier
    fn move_node(&mut self, node: NodeId, new_parent: NodeId) -> String {
        let old_parent = self.nodes[node.0].parent.unwrap_or(ROOT_NODE);
        self.nodes[old_parent.0].children.remove(&node);
        self.nodes[new_parent.0].children.insert(node);
        self.nodes[node.0].parent = Some(new_parent);
        self.nodes[old_parent.0].identifier.clone()
    }

    fn snapshot(&self, node: NodeId) -> Change {
        let slot = &self.nodes[node.0];
        Change::Modified {
            node,
            tag: slot.tag.clone(),
            data: slot.data.clone(),
            parent: slot.parent.unwrap_or(ROOT_NODE),
        }
    }

    /// Undo journaled changes, newest first
    fn rollback(&mut self, journal: Vec<Change>) {
        if !journal.is_empty() {
            debug!(changes = journal.len(), "rolling back partially merged event");
        }
        for change in journal.into_iter().rev() {
            match change {
                Change::Modified {
                    node,
                    tag,
                    data,
                    parent,
                } => {
                    if self.nodes[node.0].parent != Some(parent) {
                        self.move_node(node, parent);
                    }
                    let slot = &mut self.nodes[node.0];
                    slot.tag = tag;
                    slot.data = data;
                }
                Change::Inserted(node) => {
                    // Newest first, so an inserted node is always the last slot
                    if let Some(removed) = self.nodes.pop() {
                        debug_assert_eq!(NodeId(self.nodes.len()), node);
                        if let Some(parent) = removed.parent {
                            self.nodes[parent.0].children.remove(&node);
                        }
                        self.index.remove(&removed.identifier);
                    }
                }
            }
        }
    }

    fn replace_payload(&mut self, node: NodeId, record: ProcessRecord) {
        let slot = &mut self.nodes[node.0];
        slot.tag = record.tag();
        slot.data = Some(record);
    }
}

impl fmt::Display for ProcessTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}
