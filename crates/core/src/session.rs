//! Document session: the façade an editor front end talks to.
//!
//! A [`DocumentSession`] owns one document's [`VersionGraph`] and
//! [`LineageTracker`] behind a single `tokio` mutex. Every state change
//! (including branch-number assignment) happens under that lock; the AI
//! edit itself runs with the lock released, so slow rewrites do not block
//! the rest of the session.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::diff::{Change, DiffEngine, Granularity};
use crate::errors::{CoreError, MergeError};
use crate::lineage::LineageTracker;
use crate::merge::presets;
use crate::merge::{MergeEngine, MergeOutcome, MergeReview, MergeRule};
use crate::models::{Document, ParagraphLineage, VersionNode};
use crate::store::DocumentStore;
use crate::text::{MarkupExtractor, TextExtractor};
use crate::version_graph::VersionGraph;

/// External rewrite collaborator: turns `(prompt, content)` into new
/// content. Failures are reported as [`CoreError::Editor`].
pub trait AiEditor: Send + Sync {
    fn edit(&self, prompt: &str, content: &str) -> impl Future<Output = anyhow::Result<String>> + Send;
}

struct SessionState {
    graph: VersionGraph,
    lineage: LineageTracker,
    current_version_id: String,
    compare_version_id: Option<String>,
}

/// One open document.
pub struct DocumentSession {
    document: Document,
    config: EngineConfig,
    diff: DiffEngine,
    merge: MergeEngine,
    state: Mutex<SessionState>,
}

impl DocumentSession {
    /// Start a new document whose original content is `content`.
    pub fn create(title: impl Into<String>, content: impl Into<String>, config: EngineConfig) -> Self {
        Self::create_with_extractor(title, content, config, Arc::new(MarkupExtractor))
    }

    pub fn create_with_extractor(
        title: impl Into<String>,
        content: impl Into<String>,
        config: EngineConfig,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let document = Document::new(title);
        let graph = VersionGraph::for_document(&document.id, content);
        let mut lineage = LineageTracker::new(extractor.clone());
        let root_id = graph.root().id.clone();
        if let Err(e) = lineage.record_version(&graph, &root_id) {
            warn!(error = %e, "failed to record lineage for the original");
        }
        info!(document_id = %document.id, title = %document.title, "document session created");
        Self::assemble(document, graph, lineage, config, extractor)
    }

    /// Open a stored document.
    pub fn load(store: &dyn DocumentStore, document_id: &str, config: EngineConfig) -> Result<Self, CoreError> {
        let extractor: Arc<dyn TextExtractor> = Arc::new(MarkupExtractor);
        let document = store
            .get_document(document_id)?
            .ok_or_else(|| crate::errors::DatabaseError::NotFound {
                entity: "document".into(),
                id: document_id.to_string(),
            })?;
        let graph = store.load_graph(document_id)?;
        let lineage = LineageTracker::from_entries(extractor.clone(), store.load_lineage(document_id)?);
        info!(document_id, versions = graph.len(), "document session loaded");
        Ok(Self::assemble(document, graph, lineage, config, extractor))
    }

    fn assemble(
        document: Document,
        graph: VersionGraph,
        lineage: LineageTracker,
        config: EngineConfig,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let diff = DiffEngine::with_extractor(config.diff.clone(), extractor);
        let merge = MergeEngine::new(diff.clone(), &config.merge);
        let current_version_id = graph.latest().id.clone();
        Self {
            document,
            config,
            diff,
            merge,
            state: Mutex::new(SessionState {
                graph,
                lineage,
                current_version_id,
                compare_version_id: None,
            }),
        }
    }

    /// Persist the document, its versions and lineage.
    pub async fn save(&self, store: &dyn DocumentStore) -> Result<(), CoreError> {
        if store.get_document(&self.document.id)?.is_none() {
            store.create_document(&self.document)?;
        }
        let state = self.state.lock().await;
        store.save_graph(&state.graph)?;
        let entries: Vec<ParagraphLineage> = state.lineage.all().cloned().collect();
        store.save_lineage(&self.document.id, &entries)?;
        debug!(document_id = %self.document.id, "session saved");
        Ok(())
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    /// Create a version and make it current.
    pub async fn create_version(
        &self,
        content: impl Into<String>,
        prompt: Option<String>,
        parent_id: Option<&str>,
        note: Option<String>,
    ) -> Result<VersionNode, CoreError> {
        let mut state = self.state.lock().await;
        let node = state.graph.create_version(content, prompt, parent_id, note).clone();
        Self::after_write(&mut state, &node.id)?;
        Ok(node)
    }

    /// Overwrite a version in place; locked versions are refused.
    pub async fn update_version(&self, version_id: &str, content: impl Into<String>) -> Result<VersionNode, CoreError> {
        let mut state = self.state.lock().await;
        let node = state.graph.update_version(version_id, content)?.clone();
        Self::after_write(&mut state, &node.id)?;
        Ok(node)
    }

    /// Update in place when the version is editable, otherwise branch from it.
    pub async fn save_edit(&self, version_id: &str, content: impl Into<String>) -> Result<VersionNode, CoreError> {
        let mut state = self.state.lock().await;
        let node = Self::save_edit_locked(&mut state, version_id, content.into())?;
        Ok(node)
    }

    fn save_edit_locked(state: &mut SessionState, version_id: &str, content: String) -> Result<VersionNode, CoreError> {
        let node = if state.graph.is_locked(version_id)? {
            let number = state.graph.require(version_id)?.number.clone();
            info!(version_id, %number, "version is locked, branching edit");
            state
                .graph
                .create_version(content, None, Some(version_id), Some(format!("Edited from {number}")))
                .clone()
        } else {
            state.graph.update_version(version_id, content)?.clone()
        };
        Self::after_write(state, &node.id)?;
        Ok(node)
    }

    fn after_write(state: &mut SessionState, version_id: &str) -> Result<(), CoreError> {
        let SessionState { graph, lineage, .. } = state;
        lineage.record_version(graph, version_id)?;
        state.current_version_id = version_id.to_string();
        Ok(())
    }

    pub async fn add_checkpoint(&self, version_id: &str, content: impl Into<String>) -> Result<bool, CoreError> {
        let mut state = self.state.lock().await;
        Ok(state.graph.add_checkpoint(version_id, content)?)
    }

    pub async fn set_starred(&self, version_id: &str, starred: bool) -> Result<(), CoreError> {
        Ok(self.state.lock().await.graph.set_starred(version_id, starred)?)
    }

    pub async fn set_archived(&self, version_id: &str, archived: bool) -> Result<(), CoreError> {
        Ok(self.state.lock().await.graph.set_archived(version_id, archived)?)
    }

    /// Replace a version's note; an empty note clears it.
    pub async fn set_note(&self, version_id: &str, note: &str) -> Result<(), CoreError> {
        Ok(self.state.lock().await.graph.set_note(version_id, note.trim())?)
    }

    pub async fn version(&self, version_id: &str) -> Result<VersionNode, CoreError> {
        Ok(self.state.lock().await.graph.require(version_id)?.clone())
    }

    pub async fn find_by_number(&self, number: &str) -> Result<VersionNode, CoreError> {
        let state = self.state.lock().await;
        state
            .graph
            .find_by_number(number)
            .cloned()
            .ok_or_else(|| crate::errors::VersionError::NumberNotFound(number.to_string()).into())
    }

    pub async fn versions(&self) -> Vec<VersionNode> {
        self.state.lock().await.graph.nodes().to_vec()
    }

    pub async fn is_locked(&self, version_id: &str) -> Result<bool, CoreError> {
        Ok(self.state.lock().await.graph.is_locked(version_id)?)
    }

    pub async fn current_version(&self) -> VersionNode {
        let state = self.state.lock().await;
        state
            .graph
            .get(&state.current_version_id)
            .unwrap_or_else(|| state.graph.latest())
            .clone()
    }

    pub async fn set_current_version(&self, version_id: &str) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        state.graph.require(version_id)?;
        state.current_version_id = version_id.to_string();
        Ok(())
    }

    pub async fn compare_version(&self) -> Option<VersionNode> {
        let state = self.state.lock().await;
        state
            .compare_version_id
            .as_deref()
            .and_then(|id| state.graph.get(id))
            .cloned()
    }

    pub async fn set_compare_version(&self, version_id: Option<&str>) -> Result<(), CoreError> {
        let mut state = self.state.lock().await;
        if let Some(id) = version_id {
            state.graph.require(id)?;
        }
        state.compare_version_id = version_id.map(str::to_string);
        Ok(())
    }

    /// Version numbers from the original down to `version_id`.
    pub async fn lineage(&self, version_id: &str) -> Result<Vec<String>, CoreError> {
        Ok(self.state.lock().await.graph.lineage(version_id)?)
    }

    pub async fn unified_patch(&self, base_id: &str, target_id: &str) -> Result<String, CoreError> {
        Ok(self.state.lock().await.graph.unified_patch(base_id, target_id)?)
    }

    /// A version's content as plain text, one paragraph per line.
    pub async fn plain_text(&self, version_id: &str) -> Result<String, CoreError> {
        let state = self.state.lock().await;
        let node = state.graph.require(version_id)?;
        Ok(self.diff.extractor().plain_text(&node.content))
    }

    // -----------------------------------------------------------------------
    // Diff & merge
    // -----------------------------------------------------------------------

    pub async fn diff(&self, base_id: &str, target_id: &str, granularity: Granularity) -> Result<Vec<Change>, CoreError> {
        let state = self.state.lock().await;
        let base = state.graph.require(base_id)?;
        let target = state.graph.require(target_id)?;
        Ok(self.diff.diff(&base.content, &target.content, granularity))
    }

    /// Classify the changes of `compare_ids` against `base_id`. `preset`
    /// defaults to the configured one.
    pub async fn classify_and_merge(
        &self,
        base_id: &str,
        compare_ids: &[&str],
        preset: Option<&str>,
        custom_rules: &[MergeRule],
    ) -> Result<MergeReview, CoreError> {
        let name = preset.unwrap_or(&self.config.merge.default_preset);
        let preset = presets::resolve(name, &self.config.merge.presets)
            .ok_or_else(|| MergeError::UnknownPreset(name.to_string()))?;

        let state = self.state.lock().await;
        let base = state.graph.require(base_id)?;
        let compare = compare_ids
            .iter()
            .map(|id| state.graph.require(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.merge.classify_and_merge(base, &compare, &preset, custom_rules)?)
    }

    /// Fold the accepted and auto-handled changes of `review` into a new
    /// version branched from the review's base, and make it current.
    pub async fn apply_merge(&self, review: &MergeReview) -> Result<(VersionNode, MergeOutcome), CoreError> {
        let mut state = self.state.lock().await;
        let base = state.graph.require(&review.base_version_id)?;
        let outcome = self.merge.merge_into(&base.content, &review.classified_changes);
        let note = format!(
            "Merged {} change(s) with preset {}",
            outcome.applied.len(),
            review.preset
        );
        let node = state
            .graph
            .create_version(outcome.content.clone(), None, Some(&review.base_version_id), Some(note))
            .clone();
        Self::after_write(&mut state, &node.id)?;
        info!(
            version_id = %node.id,
            number = %node.number,
            applied = outcome.applied.len(),
            skipped = outcome.skipped.len(),
            "merge applied"
        );
        Ok((node, outcome))
    }

    // -----------------------------------------------------------------------
    // Paragraphs
    // -----------------------------------------------------------------------

    pub async fn paragraph_lineage(&self, version_id: &str) -> Vec<ParagraphLineage> {
        self.state.lock().await.lineage.paragraph_lineage(version_id).to_vec()
    }

    /// Paragraph lineage of every version from the original down to
    /// `version_id`.
    pub async fn paragraph_history(&self, version_id: &str) -> Result<Vec<(VersionNode, Vec<ParagraphLineage>)>, CoreError> {
        let state = self.state.lock().await;
        let path = state.lineage.lineage_for_path(&state.graph, version_id)?;
        Ok(path
            .into_iter()
            .map(|(node, entries)| (node.clone(), entries.to_vec()))
            .collect())
    }

    pub async fn lock_paragraph(&self, paragraph_id: &str) -> Result<(), CoreError> {
        Ok(self.state.lock().await.lineage.lock(paragraph_id)?)
    }

    pub async fn unlock_paragraph(&self, paragraph_id: &str) -> Result<(), CoreError> {
        Ok(self.state.lock().await.lineage.unlock(paragraph_id)?)
    }

    /// Restore one paragraph from `target_version_id` and save the result as
    /// an edit of the paragraph's version. A locked version keeps its
    /// lineage untouched and the revert lands on the branch.
    pub async fn revert_paragraph(&self, paragraph_id: &str, target_version_id: &str) -> Result<VersionNode, CoreError> {
        let mut state = self.state.lock().await;
        let revert = state
            .lineage
            .prepare_revert(&state.graph, paragraph_id, target_version_id)?;
        let branching = state.graph.is_locked(&revert.version_id)?;
        if !branching {
            state.lineage.apply_revert(&revert.version_id, &revert)?;
        }
        let node = Self::save_edit_locked(&mut state, &revert.version_id, revert.content.clone())?;
        if branching {
            state.lineage.apply_revert(&node.id, &revert)?;
        }
        Ok(node)
    }

    // -----------------------------------------------------------------------
    // AI rewrite
    // -----------------------------------------------------------------------

    /// Run `editor` on the parent's content (the current version when
    /// `parent_id` is `None`) and store the result as a new version. Locked
    /// paragraphs of the parent are restored verbatim.
    pub async fn rewrite<E: AiEditor>(
        &self,
        editor: &E,
        prompt: &str,
        parent_id: Option<&str>,
    ) -> Result<VersionNode, CoreError> {
        let (parent_id, content) = {
            let state = self.state.lock().await;
            let id = parent_id.unwrap_or(&state.current_version_id).to_string();
            let content = state.graph.require(&id)?.content.clone();
            (id, content)
        };

        debug!(parent_id = %parent_id, prompt, "requesting AI edit");
        let edited = editor
            .edit(prompt, &content)
            .await
            .map_err(|e| CoreError::Editor(format!("{e:#}")))?;

        let mut state = self.state.lock().await;
        let parent = state.graph.require(&parent_id)?;
        let protected = state.lineage.protect_locked(parent, &edited);
        let node = state
            .graph
            .create_version(protected, Some(prompt.to_string()), Some(&parent_id), None)
            .clone();
        Self::after_write(&mut state, &node.id)?;
        info!(version_id = %node.id, number = %node.number, parent_id = %parent_id, "rewrite stored");
        Ok(node)
    }
}
