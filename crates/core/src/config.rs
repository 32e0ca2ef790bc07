//! TOML-based configuration for Draftline.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. The diff thresholds are empirically chosen constants and
//! are exposed here so deployments can tune them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::diff::Granularity;
use crate::errors::ConfigError;
use crate::merge::presets::{self, Preset};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level engine configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logging and storage location.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Diff thresholds.
    #[serde(default)]
    pub diff: DiffConfig,

    /// Merge classification settings and custom presets.
    #[serde(default)]
    pub merge: MergeConfig,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

/// Logging and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory holding the document database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".draftline")
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl GeneralConfig {
    /// Path of the SQLite database inside `data_dir`.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("draftline.db")
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Similarity thresholds used by the diff engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffConfig {
    /// Minimum similarity for two paragraphs to be matched (moved or edited).
    #[serde(default = "default_paragraph_move_threshold")]
    pub paragraph_move_threshold: f64,

    /// Minimum similarity for sentence/word units to be matched.
    #[serde(default = "default_move_threshold")]
    pub move_threshold: f64,

    /// Paragraphs at or above this similarity count as a light modification.
    #[serde(default = "default_paragraph_modification_threshold")]
    pub paragraph_modification_threshold: f64,

    /// Sentence/word units at or above this similarity count as a light
    /// modification.
    #[serde(default = "default_modification_threshold")]
    pub modification_threshold: f64,

    /// In-place pairs below the move threshold still pair up as a
    /// replacement from this similarity upwards.
    #[serde(default = "default_replacement_threshold")]
    pub replacement_threshold: f64,

    /// Trim punctuation from words before scoring, so `"end."` and `"end"`
    /// count as the same word.
    #[serde(default)]
    pub ignore_punctuation: bool,
}

fn default_paragraph_move_threshold() -> f64 {
    0.6
}
fn default_move_threshold() -> f64 {
    0.7
}
fn default_paragraph_modification_threshold() -> f64 {
    0.85
}
fn default_modification_threshold() -> f64 {
    0.9
}
fn default_replacement_threshold() -> f64 {
    0.3
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            paragraph_move_threshold: default_paragraph_move_threshold(),
            move_threshold: default_move_threshold(),
            paragraph_modification_threshold: default_paragraph_modification_threshold(),
            modification_threshold: default_modification_threshold(),
            replacement_threshold: default_replacement_threshold(),
            ignore_punctuation: false,
        }
    }
}

impl DiffConfig {
    /// Move threshold for the given granularity.
    pub fn move_threshold_for(&self, granularity: Granularity) -> f64 {
        match granularity {
            Granularity::Paragraph => self.paragraph_move_threshold,
            Granularity::Sentence | Granularity::Word => self.move_threshold,
        }
    }

    /// Modification threshold for the given granularity.
    pub fn modification_threshold_for(&self, granularity: Granularity) -> f64 {
        match granularity {
            Granularity::Paragraph => self.paragraph_modification_threshold,
            Granularity::Sentence | Granularity::Word => self.modification_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Preset used when none is requested explicitly.
    #[serde(default = "default_preset")]
    pub default_preset: String,

    /// Changes positioned before this percentage of the document are in its
    /// "early section" and escalate to critical when structural.
    #[serde(default = "default_early_section_percent")]
    pub early_section_percent: f64,

    /// Additions or deletions of at least this many words are critical.
    #[serde(default = "default_critical_word_count")]
    pub critical_word_count: usize,

    /// Additional named presets; a custom preset shadows a built-in one of
    /// the same name.
    #[serde(default)]
    pub presets: Vec<Preset>,
}

fn default_preset() -> String {
    presets::BALANCED.into()
}
fn default_early_section_percent() -> f64 {
    20.0
}
fn default_critical_word_count() -> usize {
    40
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            default_preset: default_preset(),
            early_section_percent: default_early_section_percent(),
            critical_word_count: default_critical_word_count(),
            presets: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl EngineConfig {
    /// Load an [`EngineConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply `DRAFTLINE_LOG_LEVEL` and `DRAFTLINE_DATA_DIR` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Some(level) = resolve_optional_env("DRAFTLINE_LOG_LEVEL", "general.log_level") {
            self.general.log_level = level;
        }
        if let Some(dir) = resolve_optional_env("DRAFTLINE_DATA_DIR", "general.data_dir") {
            self.general.data_dir = PathBuf::from(dir);
        }
    }

    /// Validate thresholds, bounds and preset references.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.diff;
        for (field, value) in [
            ("diff.paragraph_move_threshold", d.paragraph_move_threshold),
            ("diff.move_threshold", d.move_threshold),
            ("diff.paragraph_modification_threshold", d.paragraph_modification_threshold),
            ("diff.modification_threshold", d.modification_threshold),
            ("diff.replacement_threshold", d.replacement_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: format!("{value} must be within [0, 1]"),
                });
            }
        }

        for granularity in [Granularity::Paragraph, Granularity::Sentence] {
            let moved = d.move_threshold_for(granularity);
            let modified = d.modification_threshold_for(granularity);
            if d.replacement_threshold > moved || moved > modified {
                return Err(ConfigError::InvalidValue {
                    field: "diff".into(),
                    detail: format!(
                        "{granularity} thresholds must satisfy replacement ({}) <= move ({moved}) <= modification ({modified})",
                        d.replacement_threshold
                    ),
                });
            }
        }

        if !(0.0..=100.0).contains(&self.merge.early_section_percent) {
            return Err(ConfigError::InvalidValue {
                field: "merge.early_section_percent".into(),
                detail: "must be within [0, 100]".into(),
            });
        }

        let mut seen = HashSet::new();
        for preset in &self.merge.presets {
            if preset.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "merge.presets".into(),
                    detail: "preset name must not be empty".into(),
                });
            }
            if !seen.insert(preset.name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "merge.presets".into(),
                    detail: format!("duplicate preset '{}'", preset.name),
                });
            }
        }

        if presets::resolve(&self.merge.default_preset, &self.merge.presets).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "merge.default_preset".into(),
                detail: format!("unknown preset '{}'", self.merge.default_preset),
            });
        }

        Ok(())
    }

    /// Convenience: load, apply environment overrides, and validate.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Read an environment variable by name. Returns `Some(value)` when it is
/// set and non-empty.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "applied env override");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::rules::RuleAction;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[general]
log_level = "debug"
data_dir = "/tmp/draftline"

[diff]
paragraph_move_threshold = 0.55
move_threshold = 0.7
paragraph_modification_threshold = 0.8
modification_threshold = 0.9
replacement_threshold = 0.25
ignore_punctuation = true

[merge]
default_preset = "house-style"
early_section_percent = 15.0
critical_word_count = 25

[[merge.presets]]
name = "house-style"
description = "Accept punctuation fixes, flag the rest"

[[merge.presets.rules]]
name = "punctuation"
action = { auto_accept = 0 }
[merge.presets.rules.condition]
types = ["punctuation"]

[[merge.presets.rules]]
name = "flag everything else"
action = "flag"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: EngineConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.diff.paragraph_move_threshold, 0.55);
        assert!(config.diff.ignore_punctuation);
        assert_eq!(config.merge.critical_word_count, 25);
        assert_eq!(config.merge.presets.len(), 1);
        let preset = &config.merge.presets[0];
        assert_eq!(preset.rules.len(), 2);
        assert_eq!(preset.rules[0].action, RuleAction::AutoAccept(0));
        assert_eq!(preset.rules[1].action, RuleAction::Flag);
        config.validate().expect("sample config should validate");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("draftline.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = EngineConfig::load_from_file(&path).expect("load_from_file failed");
        assert_eq!(config.merge.default_preset, "house-style");
        assert_eq!(
            config.general.database_path(),
            PathBuf::from("/tmp/draftline/draftline.db")
        );
    }

    #[test]
    fn test_file_not_found() {
        let result = EngineConfig::load_from_file("/nonexistent/draftline.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.diff, DiffConfig::default());
        assert!(!config.diff.ignore_punctuation);
        assert_eq!(config.diff.move_threshold_for(Granularity::Paragraph), 0.6);
        assert_eq!(config.diff.move_threshold_for(Granularity::Word), 0.7);
        assert_eq!(config.diff.modification_threshold_for(Granularity::Paragraph), 0.85);
        assert_eq!(config.diff.modification_threshold_for(Granularity::Sentence), 0.9);
        assert_eq!(config.merge.default_preset, "balanced");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_out_of_range_threshold() {
        let mut config = EngineConfig::default();
        config.diff.move_threshold = 1.5;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "diff.move_threshold"
        ));
    }

    #[test]
    fn test_validate_rejects_unordered_thresholds() {
        let mut config = EngineConfig::default();
        config.diff.paragraph_modification_threshold = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "diff"
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_default_preset() {
        let mut config = EngineConfig::default();
        config.merge.default_preset = "nonexistent".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "merge.default_preset"
        ));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("DRAFTLINE_LOG_LEVEL", "trace");
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.general.log_level, "trace");
        std::env::remove_var("DRAFTLINE_LOG_LEVEL");
    }
}
