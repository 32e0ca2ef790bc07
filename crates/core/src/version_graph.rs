//! Branching version history for a single document.
//!
//! The graph is an arena of [`VersionNode`]s in creation order. Nodes refer
//! to their parent by id and are never removed, so indices stay stable for
//! the lifetime of the graph.
//!
//! Numbering: the original document is `"0"`. Versions created from the
//! original (or without a parent) take the next root-level integer. A
//! version created from any other node becomes a branch of that node's
//! root-level ancestor: `"<ancestor>.<n>"`, where `n` is one past the
//! highest branch index already used under that ancestor.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::VersionError;
use crate::models::{parse_number, Checkpoint, VersionNode};

/// Arena-backed version tree for one document.
#[derive(Debug, Clone)]
pub struct VersionGraph {
    document_id: String,
    root_id: String,
    nodes: Vec<VersionNode>,
    index: HashMap<String, usize>,
}

impl VersionGraph {
    /// New graph whose root holds `original_content`, under a fresh
    /// document id.
    pub fn new(original_content: impl Into<String>) -> Self {
        Self::for_document(Uuid::new_v4().to_string(), original_content)
    }

    /// New graph for an existing document id.
    pub fn for_document(document_id: impl Into<String>, original_content: impl Into<String>) -> Self {
        let root = VersionNode {
            id: Uuid::new_v4().to_string(),
            number: "0".into(),
            parent_id: None,
            content: original_content.into(),
            prompt: None,
            note: "Original".into(),
            timestamp: Utc::now(),
            is_original: true,
            is_starred: false,
            is_archived: false,
            checkpoints: Vec::new(),
        };
        let document_id = document_id.into();
        info!(document_id = %document_id, root_id = %root.id, "version graph created");
        Self {
            document_id,
            root_id: root.id.clone(),
            index: HashMap::from([(root.id.clone(), 0)]),
            nodes: vec![root],
        }
    }

    /// Rebuild a graph from stored nodes (in creation order), checking the
    /// tree invariants: exactly one root, unique ids and numbers, every
    /// parent present, and every parent chain ending at the root.
    pub fn from_nodes(document_id: impl Into<String>, nodes: Vec<VersionNode>) -> Result<Self, VersionError> {
        let document_id = document_id.into();
        let corrupt = |detail: String| VersionError::CorruptGraph {
            document_id: document_id.clone(),
            detail,
        };

        let mut roots = nodes.iter().filter(|n| n.parent_id.is_none());
        let root_id = match (roots.next(), roots.next()) {
            (Some(root), None) => root.id.clone(),
            (None, _) => return Err(corrupt("no root version".into())),
            (Some(_), Some(_)) => return Err(corrupt("more than one root version".into())),
        };

        let mut index = HashMap::with_capacity(nodes.len());
        let mut numbers = HashSet::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(corrupt(format!("duplicate version id {}", node.id)));
            }
            if !numbers.insert(node.number.as_str()) {
                return Err(corrupt(format!("duplicate version number {}", node.number)));
            }
        }
        for node in &nodes {
            if let Some(parent) = &node.parent_id {
                if !index.contains_key(parent) {
                    return Err(corrupt(format!("version {} has unknown parent {parent}", node.number)));
                }
            }
        }

        let graph = Self {
            document_id,
            root_id,
            nodes,
            index,
        };
        for node in &graph.nodes {
            graph.lineage(&node.id)?;
        }
        debug!(document_id = %graph.document_id, nodes = graph.nodes.len(), "version graph loaded");
        Ok(graph)
    }

    // -----------------------------------------------------------------------
    // Creation & mutation
    // -----------------------------------------------------------------------

    /// Append a version. `parent_id` of `None` or the root yields a
    /// root-level version; an unknown parent is logged and replaced by the
    /// root.
    pub fn create_version(
        &mut self,
        content: impl Into<String>,
        prompt: Option<String>,
        parent_id: Option<&str>,
        note: Option<String>,
    ) -> &VersionNode {
        let parent = match parent_id {
            Some(id) if self.index.contains_key(id) => id.to_string(),
            Some(id) => {
                warn!(
                    document_id = %self.document_id,
                    parent_id = id,
                    "parent version not found, attaching new version to the original"
                );
                self.root_id.clone()
            }
            None => self.root_id.clone(),
        };

        let number = if parent == self.root_id {
            self.next_root_number().to_string()
        } else {
            let ancestor = self
                .get(&parent)
                .map(|p| p.number_segments()[0])
                .unwrap_or_default();
            format!("{ancestor}.{}", self.next_branch_index(ancestor))
        };

        let node = VersionNode {
            id: Uuid::new_v4().to_string(),
            number,
            parent_id: Some(parent),
            content: content.into(),
            prompt,
            note: note.unwrap_or_default(),
            timestamp: Utc::now(),
            is_original: false,
            is_starred: false,
            is_archived: false,
            checkpoints: Vec::new(),
        };
        info!(
            document_id = %self.document_id,
            version_id = %node.id,
            number = %node.number,
            parent_id = ?node.parent_id,
            "version created"
        );

        let position = self.nodes.len();
        self.index.insert(node.id.clone(), position);
        self.nodes.push(node);
        &self.nodes[position]
    }

    /// Overwrite a version's content in place. Locked versions are refused.
    pub fn update_version(&mut self, version_id: &str, content: impl Into<String>) -> Result<&VersionNode, VersionError> {
        if self.is_locked(version_id)? {
            let number = self.require(version_id)?.number.clone();
            return Err(VersionError::Locked { number });
        }
        let node = self.require_mut(version_id)?;
        node.content = content.into();
        node.timestamp = Utc::now();
        debug!(version_id, number = %node.number, "version updated in place");
        Ok(node)
    }

    /// Append an auto-save snapshot. Returns `false` when `content` is
    /// identical to the most recent checkpoint and nothing was stored.
    pub fn add_checkpoint(&mut self, version_id: &str, content: impl Into<String>) -> Result<bool, VersionError> {
        let content = content.into();
        let content_hash = hex::encode(Sha256::digest(content.as_bytes()));
        let node = self.require_mut(version_id)?;
        if node
            .checkpoints
            .last()
            .is_some_and(|last| last.content_hash == content_hash)
        {
            debug!(version_id, "checkpoint unchanged, skipping");
            return Ok(false);
        }
        node.checkpoints.push(Checkpoint {
            id: Uuid::new_v4().to_string(),
            content,
            content_hash,
            created_at: Utc::now(),
        });
        debug!(version_id, count = node.checkpoints.len(), "checkpoint added");
        Ok(true)
    }

    pub fn set_starred(&mut self, version_id: &str, starred: bool) -> Result<(), VersionError> {
        self.require_mut(version_id)?.is_starred = starred;
        info!(version_id, starred, "version star toggled");
        Ok(())
    }

    pub fn set_archived(&mut self, version_id: &str, archived: bool) -> Result<(), VersionError> {
        self.require_mut(version_id)?.is_archived = archived;
        info!(version_id, archived, "version archive toggled");
        Ok(())
    }

    pub fn set_note(&mut self, version_id: &str, note: impl Into<String>) -> Result<(), VersionError> {
        self.require_mut(version_id)?.note = note.into();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn root(&self) -> &VersionNode {
        &self.nodes[self.index[&self.root_id]]
    }

    /// The most recently created version.
    pub fn latest(&self) -> &VersionNode {
        self.nodes.last().unwrap_or_else(|| self.root())
    }

    /// All versions in creation order.
    pub fn nodes(&self) -> &[VersionNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, version_id: &str) -> Option<&VersionNode> {
        self.index.get(version_id).map(|&i| &self.nodes[i])
    }

    pub fn find_by_number(&self, number: &str) -> Option<&VersionNode> {
        self.nodes.iter().find(|n| n.number == number)
    }

    /// Like [`get`](Self::get) but with a typed error.
    pub fn require(&self, version_id: &str) -> Result<&VersionNode, VersionError> {
        self.get(version_id)
            .ok_or_else(|| VersionError::NotFound(version_id.to_string()))
    }

    fn require_mut(&mut self, version_id: &str) -> Result<&mut VersionNode, VersionError> {
        match self.index.get(version_id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(VersionError::NotFound(version_id.to_string())),
        }
    }

    /// Direct children of `parent_id`, in creation order.
    pub fn children(&self, parent_id: &str) -> Vec<&VersionNode> {
        self.nodes
            .iter()
            .filter(|n| n.parent_id.as_deref() == Some(parent_id))
            .collect()
    }

    /// Version numbers from the root down to `version_id`.
    pub fn lineage(&self, version_id: &str) -> Result<Vec<String>, VersionError> {
        Ok(self
            .path(version_id)?
            .into_iter()
            .map(|n| n.number.clone())
            .collect())
    }

    /// Nodes from the root down to `version_id`. The walk is bounded by the
    /// node count.
    pub fn path(&self, version_id: &str) -> Result<Vec<&VersionNode>, VersionError> {
        let mut path = Vec::new();
        let mut current = Some(self.require(version_id)?);
        while let Some(node) = current {
            if path.len() >= self.nodes.len() {
                return Err(VersionError::CorruptGraph {
                    document_id: self.document_id.clone(),
                    detail: format!("parent chain of {version_id} does not reach the root"),
                });
            }
            path.push(node);
            current = match &node.parent_id {
                Some(parent) => Some(self.require(parent)?),
                None => None,
            };
        }
        path.reverse();
        Ok(path)
    }

    /// A version is locked when a sibling number at the same depth and
    /// prefix is higher. The original is locked once any version exists.
    pub fn is_locked(&self, version_id: &str) -> Result<bool, VersionError> {
        let segments = self.require(version_id)?.number_segments();
        let Some((last, prefix)) = segments.split_last() else {
            return Ok(false);
        };
        Ok(self.nodes.iter().any(|other| {
            let theirs = other.number_segments();
            theirs.len() == segments.len()
                && theirs.starts_with(prefix)
                && theirs.last().is_some_and(|n| n > last)
        }))
    }

    /// Line-level unified diff from one version's content to another's.
    pub fn unified_patch(&self, base_id: &str, target_id: &str) -> Result<String, VersionError> {
        let base = self.require(base_id)?;
        let target = self.require(target_id)?;
        let patch = diffy::create_patch(&base.content, &target.content);
        Ok(patch.to_string())
    }

    fn next_root_number(&self) -> u32 {
        self.nodes
            .iter()
            .filter(|n| n.is_root_level())
            .map(|n| parse_number(&n.number)[0])
            .max()
            .map_or(1, |n| n + 1)
    }

    fn next_branch_index(&self, ancestor: u32) -> u32 {
        self.nodes
            .iter()
            .map(|n| n.number_segments())
            .filter(|s| s.len() == 2 && s[0] == ancestor)
            .map(|s| s[1])
            .max()
            .map_or(1, |n| n + 1)
    }
}
