//! Reviewer settings persisted through the [`DocumentStore`].
//!
//! Stored as one JSON value per document under `review_settings:<id>`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::DatabaseError;
use crate::store::DocumentStore;

/// A reusable rewrite instruction offered to the AI editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewriteTemplate {
    pub name: String,
    pub prompt: String,
}

/// Per-document review preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewSettings {
    /// Merge preset to use when none is given.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub rewrite_templates: Vec<RewriteTemplate>,
}

impl ReviewSettings {
    fn key(document_id: &str) -> String {
        format!("review_settings:{document_id}")
    }

    /// Load the settings for a document, or defaults when none are stored.
    pub fn load(store: &dyn DocumentStore, document_id: &str) -> Result<Self, DatabaseError> {
        match store.load_setting(&Self::key(document_id))? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| DatabaseError::Decode {
                column: "settings.value".into(),
                detail: e.to_string(),
            }),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, store: &dyn DocumentStore, document_id: &str) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(self).map_err(|e| DatabaseError::Decode {
            column: "settings.value".into(),
            detail: e.to_string(),
        })?;
        store.save_setting(&Self::key(document_id), &raw)?;
        debug!(document_id, templates = self.rewrite_templates.len(), "review settings saved");
        Ok(())
    }

    /// Add or replace a template by name.
    pub fn upsert_template(&mut self, name: impl Into<String>, prompt: impl Into<String>) {
        let name = name.into();
        let prompt = prompt.into();
        match self.rewrite_templates.iter_mut().find(|t| t.name == name) {
            Some(existing) => existing.prompt = prompt,
            None => self.rewrite_templates.push(RewriteTemplate { name, prompt }),
        }
    }

    pub fn template(&self, name: &str) -> Option<&RewriteTemplate> {
        self.rewrite_templates.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_defaults_when_missing() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        assert_eq!(ReviewSettings::load(&db, "doc").unwrap(), ReviewSettings::default());
    }

    #[test]
    fn test_round_trip() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();

        let mut settings = ReviewSettings::default();
        settings.upsert_template("shorter", "Make it shorter");
        settings.upsert_template("shorter", "Cut it by half");
        settings.preset = Some("conservative".into());
        settings.save(&db, "doc").unwrap();

        let loaded = ReviewSettings::load(&db, "doc").unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.rewrite_templates.len(), 1);
        assert_eq!(loaded.template("shorter").unwrap().prompt, "Cut it by half");
        assert!(loaded.template("longer").is_none());
    }

    #[test]
    fn test_corrupt_value_is_reported() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db.save_setting("review_settings:doc", "{not json").unwrap();
        assert!(matches!(
            ReviewSettings::load(&db, "doc"),
            Err(DatabaseError::Decode { .. })
        ));
    }
}
