//! Draftline command-line tool.
//!
//! Provides subcommands for creating documents, browsing and editing the
//! version tree, diffing versions, running merge reviews, and managing
//! paragraph locks. Every command opens the document from the SQLite store,
//! applies its change through a `DocumentSession`, and saves it back.

mod document;
mod editor;
mod review;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use draftline_core::config::EngineConfig;
use draftline_core::db::Database;
use draftline_core::diff::Granularity;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Draftline command-line tool.
#[derive(Parser, Debug)]
#[command(
    name = "draftline",
    version,
    about = "Branching version history and merge review for AI-assisted writing"
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults to
    /// `<config dir>/draftline/config.toml`; built-in defaults apply when the
    /// file does not exist.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./draftline.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Create and list documents.
    Doc {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Browse and edit the version tree of a document.
    Version {
        #[command(subcommand)]
        action: VersionAction,
    },

    /// Classify the changes of one or more versions against a base and
    /// optionally apply the result.
    Merge {
        /// Document ID.
        document: String,

        /// Base version number.
        base: String,

        /// Version numbers to compare against the base.
        #[arg(required = true)]
        compare: Vec<String>,

        /// Rule preset: manual, conservative, balanced, aggressive or a
        /// configured one.
        #[arg(short, long)]
        preset: Option<String>,

        /// Accept an alternative: `<change-id>=<version number>`.
        #[arg(long = "accept", value_name = "CHANGE=VERSION")]
        accept: Vec<String>,

        /// Reject a change by id.
        #[arg(long = "reject", value_name = "CHANGE")]
        reject: Vec<String>,

        /// Store the merged content as a new version.
        #[arg(long)]
        apply: bool,

        /// Print the review as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect, lock and revert paragraphs.
    Paragraph {
        #[command(subcommand)]
        action: ParagraphAction,
    },

    /// Manage saved rewrite prompts of a document.
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand, Debug)]
enum DocAction {
    /// Create a document from a file.
    New {
        /// Document title.
        title: String,

        /// File holding the original content.
        #[arg(short, long)]
        file: PathBuf,
    },
    /// List all documents.
    List,
}

#[derive(Subcommand, Debug)]
enum VersionAction {
    /// List every version of a document.
    List {
        document: String,

        /// Include archived versions.
        #[arg(long)]
        all: bool,
    },
    /// Print one version.
    Show {
        document: String,
        number: String,

        /// Print the content as plain text, one paragraph per line.
        #[arg(long)]
        plain: bool,
    },
    /// Create a version from a file.
    Create {
        document: String,

        #[arg(short, long)]
        file: PathBuf,

        /// Parent version number; the original when omitted.
        #[arg(long)]
        parent: Option<String>,

        #[arg(long)]
        prompt: Option<String>,

        #[arg(long)]
        note: Option<String>,
    },
    /// Save new content for a version; locked versions branch instead.
    Edit {
        document: String,
        number: String,

        #[arg(short, long)]
        file: PathBuf,
    },
    /// Run an external rewrite command and store its output as a version.
    Rewrite {
        document: String,

        /// Instruction passed to the command.
        #[arg(long, required_unless_present = "template")]
        prompt: Option<String>,

        /// Saved template to take the prompt from.
        #[arg(long, conflicts_with = "prompt")]
        template: Option<String>,

        /// Shell command that reads content on stdin and writes the rewrite
        /// to stdout. The prompt is exported as `DRAFTLINE_PROMPT`.
        #[arg(long)]
        command: String,

        /// Parent version number; the latest version when omitted.
        #[arg(long)]
        parent: Option<String>,
    },
    /// Show the version numbers from the original to a version.
    Lineage {
        document: String,
        number: String,

        /// Also list where each paragraph of every version on the path came from.
        #[arg(long)]
        paragraphs: bool,
    },
    /// Diff two versions.
    Diff {
        document: String,
        base: String,
        target: String,

        /// word, sentence or paragraph.
        #[arg(short, long, default_value = "paragraph")]
        granularity: Granularity,

        /// Print a line-level unified patch instead.
        #[arg(long)]
        unified: bool,

        #[arg(long)]
        json: bool,
    },
    /// Star or unstar a version.
    Star {
        document: String,
        number: String,

        #[arg(long)]
        off: bool,
    },
    /// Archive or unarchive a version.
    Archive {
        document: String,
        number: String,

        #[arg(long)]
        off: bool,
    },
    /// Set the note of a version; an empty note clears it.
    Note {
        document: String,
        number: String,
        text: String,
    },
}

#[derive(Subcommand, Debug)]
enum ParagraphAction {
    /// List the paragraph lineage of a version.
    List { document: String, number: String },
    /// Protect a paragraph from rewrites.
    Lock { document: String, paragraph: String },
    /// Remove a paragraph lock.
    Unlock { document: String, paragraph: String },
    /// Restore a paragraph from another version.
    Revert {
        document: String,
        paragraph: String,

        /// Version number to take the paragraph from.
        target: String,
    },
}

#[derive(Subcommand, Debug)]
enum TemplateAction {
    /// Add or replace a template.
    Set {
        document: String,
        name: String,
        prompt: String,
    },
    /// List templates.
    List { document: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Without -v, the configured level applies; warn when there is no config.
    let level = match cli.verbose {
        0 => EngineConfig::load_from_file(&config_path)
            .map(|mut config| {
                config.apply_env_overrides();
                config.general.log_level
            })
            .unwrap_or_else(|_| "warn".to_string()),
        1 => "info".to_string(),
        _ => "debug".to_string(),
    };
    let filter = EnvFilter::try_from_env("DRAFTLINE_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    match run(cli, &config_path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config_path: &Path) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(config_path),
        command => {
            let config = load_config(config_path)?;
            let db = open_database(&config)?;

            match command {
                Commands::Doc { action } => document::run_doc(&db, &config, action).await,
                Commands::Version { action } => document::run_version(&db, &config, action).await,
                Commands::Paragraph { action } => document::run_paragraph(&db, &config, action).await,
                Commands::Template { action } => document::run_template(&db, action),
                Commands::Merge {
                    document,
                    base,
                    compare,
                    preset,
                    accept,
                    reject,
                    apply,
                    json,
                } => {
                    let request = review::MergeRequest {
                        document,
                        base,
                        compare,
                        preset,
                        accept,
                        reject,
                        apply,
                        json,
                    };
                    review::run_merge(&db, &config, request).await
                }
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("draftline")
        .join("config.toml")
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no configuration file, using defaults");
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        return Ok(config);
    }
    EngineConfig::load_and_validate(path).context("failed to load configuration file")
}

fn open_database(config: &EngineConfig) -> Result<Database> {
    let db_path = config.general.database_path();
    let db = Database::new(&db_path).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# Draftline Configuration

[general]
log_level = "info"
data_dir = ".draftline"

[diff]
paragraph_move_threshold = 0.6
move_threshold = 0.7
paragraph_modification_threshold = 0.85
modification_threshold = 0.9
replacement_threshold = 0.3
# Treat "end." and "end" as the same word when scoring similarity.
ignore_punctuation = false

[merge]
default_preset = "balanced"
early_section_percent = 20.0
critical_word_count = 40

# [[merge.presets]]
# name = "typos-only"
# description = "Accept spelling and punctuation fixes, review the rest"
#
# [[merge.presets.rules]]
# name = "typos"
# action = { auto_accept = 0 }
# [merge.presets.rules.condition]
# types = ["spelling", "punctuation"]
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Adjust thresholds and presets as needed");
    println!(
        "  2. Validate with: draftline validate --config {}",
        output.display()
    );
    println!(
        "  3. Create a document: draftline --config {} doc new \"Title\" --file draft.html",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        EngineConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.apply_env_overrides();
    println!("  [OK] Environment overrides processed");

    match config.validate() {
        Ok(()) => println!("  [OK] Thresholds and presets are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Data directory : {}", config.general.data_dir.display());
    println!("  Log level      : {}", config.general.log_level);
    println!("  Default preset : {}", config.merge.default_preset);
    println!("  Custom presets : {}", config.merge.presets.len());
    println!(
        "  Move threshold : {} (paragraph {})",
        config.diff.move_threshold, config.diff.paragraph_move_threshold
    );
    println!();
    println!("Configuration is valid.");

    Ok(())
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

pub(crate) fn read_content(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
