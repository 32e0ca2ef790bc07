//! Per-paragraph provenance.
//!
//! Every version gets one [`ParagraphLineage`] entry per paragraph, naming
//! the version (and prompt) whose edit produced that paragraph's text.
//! Entries also carry the paragraph lock that AI rewrites must respect.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::LineageError;
use crate::models::{ParagraphLineage, VersionNode};
use crate::text::{paragraph_separator, MarkupExtractor, Paragraph, TextExtractor};
use crate::version_graph::VersionGraph;

/// A paragraph restored from another version, computed but not yet stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ParagraphRevert {
    /// Version the reverted paragraph belongs to.
    pub version_id: String,
    pub target_version_id: String,
    pub paragraph_index: usize,
    /// Full content of `version_id` with the paragraph replaced.
    pub content: String,
    /// Plain text of the restored paragraph.
    pub text: String,
    origin_version_id: String,
    prompt: Option<String>,
    original_content: String,
}

/// Tracks paragraph lineage for every version of one document.
#[derive(Clone)]
pub struct LineageTracker {
    extractor: Arc<dyn TextExtractor>,
    /// Entries per version id, ordered by paragraph index.
    entries: HashMap<String, Vec<ParagraphLineage>>,
}

impl Default for LineageTracker {
    fn default() -> Self {
        Self::new(Arc::new(MarkupExtractor))
    }
}

impl std::fmt::Debug for LineageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineageTracker")
            .field("versions", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl LineageTracker {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            extractor,
            entries: HashMap::new(),
        }
    }

    /// Rebuild a tracker from stored entries.
    pub fn from_entries(extractor: Arc<dyn TextExtractor>, entries: Vec<ParagraphLineage>) -> Self {
        let mut tracker = Self::new(extractor);
        for entry in entries {
            tracker
                .entries
                .entry(entry.version_id.clone())
                .or_default()
                .push(entry);
        }
        for list in tracker.entries.values_mut() {
            list.sort_by_key(|e| e.paragraph_index);
        }
        tracker
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Record (or overwrite) the entry for one paragraph of a version. The
    /// version itself is recorded as the origin.
    pub fn record_lineage(
        &mut self,
        version_id: &str,
        paragraph_index: usize,
        prompt: Option<String>,
        original_content: &str,
        current_content: &str,
    ) -> &ParagraphLineage {
        let entry = ParagraphLineage::new(
            version_id,
            paragraph_index,
            version_id,
            prompt,
            original_content,
            current_content,
        );
        let list = self.entries.entry(version_id.to_string()).or_default();
        let position = match list.binary_search_by_key(&paragraph_index, |e| e.paragraph_index) {
            Ok(i) => {
                list[i] = entry;
                i
            }
            Err(i) => {
                list.insert(i, entry);
                i
            }
        };
        &list[position]
    }

    /// Derive lineage for every paragraph of `version_id`, replacing any
    /// entries it already had.
    ///
    /// A paragraph keeps its previous entry when this version already
    /// recorded the same text at that index. Otherwise a paragraph whose
    /// text is unchanged from the parent at the same index inherits the
    /// parent's origin, prompt and lock; anything else originates here.
    pub fn record_version(&mut self, graph: &VersionGraph, version_id: &str) -> Result<&[ParagraphLineage], LineageError> {
        let node = graph.require(version_id)?;
        let paragraphs = self.extractor.paragraphs(&node.content);

        let parent = node.parent_id.as_deref().and_then(|id| graph.get(id));
        let parent_paragraphs = parent
            .map(|p| self.extractor.paragraphs(&p.content))
            .unwrap_or_default();
        let parent_entries = parent.map(|p| self.paragraph_lineage(&p.id)).unwrap_or_default();
        let previous = self.paragraph_lineage(version_id);

        let mut recorded = Vec::with_capacity(paragraphs.len());
        for (index, paragraph) in paragraphs.iter().enumerate() {
            let own = previous
                .iter()
                .find(|e| e.paragraph_index == index && e.current_content == paragraph.text);
            if let Some(entry) = own {
                recorded.push(entry.clone());
                continue;
            }

            let unchanged = parent_paragraphs
                .get(index)
                .is_some_and(|p| p.text == paragraph.text);
            let inherited = parent_entries.iter().find(|e| e.paragraph_index == index);
            let entry = match (unchanged, inherited, parent) {
                (true, Some(from), _) => {
                    let mut entry = ParagraphLineage::new(
                        version_id,
                        index,
                        from.origin_version_id.clone(),
                        from.prompt.clone(),
                        from.original_content.clone(),
                        paragraph.text.clone(),
                    );
                    entry.is_locked = from.is_locked;
                    entry
                }
                (true, None, Some(parent)) => ParagraphLineage::new(
                    version_id,
                    index,
                    parent.id.clone(),
                    parent.prompt.clone(),
                    paragraph.text.clone(),
                    paragraph.text.clone(),
                ),
                _ => ParagraphLineage::new(
                    version_id,
                    index,
                    version_id,
                    node.prompt.clone(),
                    paragraph.text.clone(),
                    paragraph.text.clone(),
                ),
            };
            recorded.push(entry);
        }

        let originated = recorded
            .iter()
            .filter(|e| e.origin_version_id == version_id)
            .count();
        debug!(
            version_id,
            paragraphs = recorded.len(),
            originated,
            "paragraph lineage recorded"
        );
        self.entries.insert(version_id.to_string(), recorded);
        Ok(self.paragraph_lineage(version_id))
    }

    // -----------------------------------------------------------------------
    // Locks
    // -----------------------------------------------------------------------

    pub fn lock(&mut self, paragraph_id: &str) -> Result<(), LineageError> {
        self.set_locked(paragraph_id, true)
    }

    pub fn unlock(&mut self, paragraph_id: &str) -> Result<(), LineageError> {
        self.set_locked(paragraph_id, false)
    }

    fn set_locked(&mut self, paragraph_id: &str, locked: bool) -> Result<(), LineageError> {
        let entry = self.entry_mut(paragraph_id)?;
        entry.is_locked = locked;
        info!(
            paragraph_id,
            version_id = %entry.version_id,
            index = entry.paragraph_index,
            locked,
            "paragraph lock changed"
        );
        Ok(())
    }

    /// Indices of the locked paragraphs of a version.
    pub fn locked_indices(&self, version_id: &str) -> Vec<usize> {
        self.paragraph_lineage(version_id)
            .iter()
            .filter(|e| e.is_locked)
            .map(|e| e.paragraph_index)
            .collect()
    }

    /// Restore `parent`'s locked paragraphs into `edited` content.
    ///
    /// Locked paragraph `i` of the parent replaces paragraph `i` of the
    /// edited content; when the edit has fewer paragraphs the locked text is
    /// appended. All other bytes of `edited` are kept.
    pub fn protect_locked(&self, parent: &VersionNode, edited: &str) -> String {
        let locked = self.locked_indices(&parent.id);
        if locked.is_empty() {
            return edited.to_string();
        }
        let parent_paragraphs = self.extractor.paragraphs(&parent.content);
        let edited_paragraphs = self.extractor.paragraphs(edited);
        let separator = paragraph_separator(edited, &edited_paragraphs);

        let mut content = edited.to_string();
        let mut appended = String::new();
        // Splice back to front so earlier spans stay valid.
        for &index in locked.iter().rev() {
            let Some(original) = parent_paragraphs.get(index) else {
                continue;
            };
            let raw = original.raw(&parent.content);
            match edited_paragraphs.get(index) {
                Some(target) => content.replace_range(target.span.clone(), raw),
                None => {
                    appended.insert_str(0, raw);
                    appended.insert_str(0, separator);
                }
            }
        }
        if !appended.is_empty() {
            if content.is_empty() {
                content.push_str(appended.strip_prefix(separator).unwrap_or(&appended));
            } else {
                content.push_str(&appended);
            }
        }
        debug!(version_id = %parent.id, locked = locked.len(), "locked paragraphs protected");
        content
    }

    // -----------------------------------------------------------------------
    // Revert
    // -----------------------------------------------------------------------

    /// Content of the paragraph's version with that one paragraph replaced
    /// by the paragraph at the same index in `target_version_id`. Every other
    /// byte is unchanged. The lineage entry is updated to point at the
    /// target version.
    pub fn revert_paragraph(
        &mut self,
        graph: &VersionGraph,
        paragraph_id: &str,
        target_version_id: &str,
    ) -> Result<String, LineageError> {
        let revert = self.prepare_revert(graph, paragraph_id, target_version_id)?;
        self.apply_revert(&revert.version_id, &revert)?;
        Ok(revert.content)
    }

    /// Compute a paragraph revert without touching any entry.
    pub fn prepare_revert(
        &self,
        graph: &VersionGraph,
        paragraph_id: &str,
        target_version_id: &str,
    ) -> Result<ParagraphRevert, LineageError> {
        let entry = self.entry(paragraph_id)?;
        let index = entry.paragraph_index;
        let current = graph.require(&entry.version_id)?;
        let target = graph.require(target_version_id)?;

        let current_paragraphs = self.extractor.paragraphs(&current.content);
        let target_paragraphs = self.extractor.paragraphs(&target.content);
        let replaced = stale_check(&current_paragraphs, index, &current.id)?;
        let replacement = stale_check(&target_paragraphs, index, &target.id)?;

        let mut content = current.content.clone();
        content.replace_range(replaced.span.clone(), replacement.raw(&target.content));

        let (origin_version_id, prompt, original_content) = self
            .paragraph_lineage(target_version_id)
            .iter()
            .find(|e| e.paragraph_index == index)
            .map(|e| (e.origin_version_id.clone(), e.prompt.clone(), e.original_content.clone()))
            .unwrap_or_else(|| {
                (
                    target.id.clone(),
                    target.prompt.clone(),
                    replacement.text.clone(),
                )
            });

        Ok(ParagraphRevert {
            version_id: current.id.clone(),
            target_version_id: target.id.clone(),
            paragraph_index: index,
            content,
            text: replacement.text.clone(),
            origin_version_id,
            prompt,
            original_content,
        })
    }

    /// Point the entry at `revert.paragraph_index` of `version_id` at the
    /// reverted text's origin. `version_id` is the version that now holds
    /// the reverted content, which differs from `revert.version_id` when the
    /// edit had to branch.
    pub fn apply_revert(&mut self, version_id: &str, revert: &ParagraphRevert) -> Result<&ParagraphLineage, LineageError> {
        let available = self.paragraph_lineage(version_id).len();
        let entry = self
            .entries
            .get_mut(version_id)
            .and_then(|list| list.iter_mut().find(|e| e.paragraph_index == revert.paragraph_index))
            .ok_or_else(|| LineageError::StaleParagraph {
                index: revert.paragraph_index,
                version_id: version_id.to_string(),
                available,
            })?;
        entry.origin_version_id = revert.origin_version_id.clone();
        entry.prompt = revert.prompt.clone();
        entry.original_content = revert.original_content.clone();
        entry.current_content = revert.text.clone();

        info!(
            paragraph_id = %entry.paragraph_id,
            version_id,
            target_version_id = %revert.target_version_id,
            index = revert.paragraph_index,
            "paragraph reverted"
        );
        Ok(&*entry)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Entries of one version, ordered by paragraph index.
    pub fn paragraph_lineage(&self, version_id: &str) -> &[ParagraphLineage] {
        self.entries.get(version_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entries of every version on the path from the root to `version_id`.
    pub fn lineage_for_path<'a>(
        &'a self,
        graph: &'a VersionGraph,
        version_id: &str,
    ) -> Result<Vec<(&'a VersionNode, &'a [ParagraphLineage])>, LineageError> {
        Ok(graph
            .path(version_id)?
            .into_iter()
            .map(|node| (node, self.paragraph_lineage(&node.id)))
            .collect())
    }

    pub fn get(&self, paragraph_id: &str) -> Option<&ParagraphLineage> {
        self.entries
            .values()
            .flatten()
            .find(|e| e.paragraph_id == paragraph_id)
    }

    /// Every entry, for persistence.
    pub fn all(&self) -> impl Iterator<Item = &ParagraphLineage> {
        self.entries.values().flatten()
    }

    fn entry(&self, paragraph_id: &str) -> Result<&ParagraphLineage, LineageError> {
        self.get(paragraph_id)
            .ok_or_else(|| LineageError::ParagraphNotFound(paragraph_id.to_string()))
    }

    fn entry_mut(&mut self, paragraph_id: &str) -> Result<&mut ParagraphLineage, LineageError> {
        self.entries
            .values_mut()
            .flatten()
            .find(|e| e.paragraph_id == paragraph_id)
            .ok_or_else(|| LineageError::ParagraphNotFound(paragraph_id.to_string()))
    }
}

fn stale_check<'a>(paragraphs: &'a [Paragraph], index: usize, version_id: &str) -> Result<&'a Paragraph, LineageError> {
    paragraphs.get(index).ok_or_else(|| LineageError::StaleParagraph {
        index,
        version_id: version_id.to_string(),
        available: paragraphs.len(),
    })
}
