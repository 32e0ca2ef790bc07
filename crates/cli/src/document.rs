//! Document, version, paragraph and template commands.

use anyhow::{Context, Result};
use chrono::Local;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use draftline_core::config::EngineConfig;
use draftline_core::db::Database;
use draftline_core::models::VersionNode;
use draftline_core::session::DocumentSession;
use draftline_core::settings::ReviewSettings;
use draftline_core::store::DocumentStore;

use crate::editor::CommandEditor;
use crate::{read_content, truncate, DocAction, ParagraphAction, TemplateAction, VersionAction};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn open_session(db: &Database, config: &EngineConfig, document: &str) -> Result<DocumentSession> {
    DocumentSession::load(db, document, config.clone())
        .with_context(|| format!("failed to open document '{}'", document))
}

pub(crate) async fn resolve(session: &DocumentSession, number: &str) -> Result<VersionNode> {
    session
        .find_by_number(number)
        .await
        .with_context(|| format!("no version {} in this document", number))
}

fn timestamp(node: &VersionNode) -> String {
    node.timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

// ---------------------------------------------------------------------------
// doc
// ---------------------------------------------------------------------------

pub async fn run_doc(db: &Database, config: &EngineConfig, action: DocAction) -> Result<()> {
    match action {
        DocAction::New { title, file } => {
            let content = read_content(&file)?;
            let session = DocumentSession::create(title, content, config.clone());
            session.save(db).await.context("failed to save document")?;
            println!("Created document {}", session.document().id);
            Ok(())
        }
        DocAction::List => {
            let documents = db.list_documents().context("failed to list documents")?;
            if documents.is_empty() {
                println!("No documents found.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Title", "Created", "Versions"]);
            for doc in &documents {
                let versions = db.count_versions(&doc.id).context("failed to count versions")?;
                table.add_row(vec![
                    Cell::new(&doc.id),
                    Cell::new(&doc.title),
                    Cell::new(doc.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M")),
                    Cell::new(versions),
                ]);
            }
            println!("{}", table);
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

pub async fn run_version(db: &Database, config: &EngineConfig, action: VersionAction) -> Result<()> {
    match action {
        VersionAction::List { document, all } => {
            let session = open_session(db, config, &document)?;
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["#", "Created", "Prompt", "Note", "Flags"]);

            for node in session.versions().await {
                if node.is_archived && !all {
                    continue;
                }
                let mut flags = Vec::new();
                if node.is_starred {
                    flags.push("starred");
                }
                if node.is_archived {
                    flags.push("archived");
                }
                if session.is_locked(&node.id).await? {
                    flags.push("locked");
                }
                let number = if node.is_starred {
                    Cell::new(&node.number).fg(Color::Yellow)
                } else {
                    Cell::new(&node.number)
                };
                table.add_row(vec![
                    number,
                    Cell::new(timestamp(&node)),
                    Cell::new(truncate(node.prompt.as_deref().unwrap_or("-"), 40)),
                    Cell::new(truncate(&node.note, 40)),
                    Cell::new(flags.join(", ")),
                ]);
            }
            println!("{}", table);
            Ok(())
        }

        VersionAction::Show {
            document,
            number,
            plain,
        } => {
            let session = open_session(db, config, &document)?;
            let node = resolve(&session, &number).await?;
            println!("Version {} ({})", node.number, node.id);
            println!("  Created    : {}", timestamp(&node));
            if let Some(ref prompt) = node.prompt {
                println!("  Prompt     : {}", prompt);
            }
            if !node.note.is_empty() {
                println!("  Note       : {}", node.note);
            }
            println!("  Checkpoints: {}", node.checkpoints.len());
            println!();
            if plain {
                println!("{}", session.plain_text(&node.id).await?);
            } else {
                println!("{}", node.content);
            }
            Ok(())
        }

        VersionAction::Create {
            document,
            file,
            parent,
            prompt,
            note,
        } => {
            let session = open_session(db, config, &document)?;
            let content = read_content(&file)?;
            let parent_id = match parent {
                Some(number) => Some(resolve(&session, &number).await?.id),
                None => None,
            };
            let node = session
                .create_version(content, prompt, parent_id.as_deref(), note)
                .await?;
            session.save(db).await?;
            println!("Created version {}", node.number);
            Ok(())
        }

        VersionAction::Edit {
            document,
            number,
            file,
        } => {
            let session = open_session(db, config, &document)?;
            let node = resolve(&session, &number).await?;
            let content = read_content(&file)?;
            // Checkpoint the content being replaced.
            session.add_checkpoint(&node.id, node.content.clone()).await?;
            let saved = session.save_edit(&node.id, content).await?;
            session.save(db).await?;
            if saved.id == node.id {
                println!("Updated version {}", saved.number);
            } else {
                println!(
                    "Version {} is locked; saved as new version {}",
                    node.number, saved.number
                );
            }
            Ok(())
        }

        VersionAction::Rewrite {
            document,
            prompt,
            template,
            command,
            parent,
        } => {
            let session = open_session(db, config, &document)?;
            let prompt = match (prompt, template) {
                (Some(prompt), _) => prompt,
                (None, Some(name)) => ReviewSettings::load(db, &document)?
                    .template(&name)
                    .map(|t| t.prompt.clone())
                    .ok_or_else(|| anyhow::anyhow!("no template named '{}'", name))?,
                (None, None) => anyhow::bail!("either --prompt or --template is required"),
            };
            let parent_id = match parent {
                Some(number) => resolve(&session, &number).await?.id,
                None => session.current_version().await.id,
            };
            let editor = CommandEditor::new(command);
            let node = session.rewrite(&editor, &prompt, Some(&parent_id)).await?;
            session.save(db).await?;
            println!("Created version {} from prompt \"{}\"", node.number, truncate(&prompt, 60));
            Ok(())
        }

        VersionAction::Lineage {
            document,
            number,
            paragraphs,
        } => {
            let session = open_session(db, config, &document)?;
            let node = resolve(&session, &number).await?;
            println!("{}", session.lineage(&node.id).await?.join(" → "));
            if !paragraphs {
                return Ok(());
            }

            let history = session.paragraph_history(&node.id).await?;
            let number_of = |id: &str| {
                history
                    .iter()
                    .find(|(v, _)| v.id == id)
                    .map(|(v, _)| v.number.clone())
                    .unwrap_or_else(|| "?".into())
            };
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Version", "¶", "Origin", "Prompt", "Text"]);
            for (version, entries) in &history {
                for entry in entries {
                    table.add_row(vec![
                        Cell::new(&version.number),
                        Cell::new(entry.paragraph_index),
                        Cell::new(number_of(&entry.origin_version_id)),
                        Cell::new(truncate(entry.prompt.as_deref().unwrap_or("-"), 30)),
                        Cell::new(truncate(&entry.current_content, 50)),
                    ]);
                }
            }
            println!("{}", table);
            Ok(())
        }

        VersionAction::Diff {
            document,
            base,
            target,
            granularity,
            unified,
            json,
        } => {
            let session = open_session(db, config, &document)?;
            let base = resolve(&session, &base).await?;
            let target = resolve(&session, &target).await?;

            if unified {
                print!("{}", session.unified_patch(&base.id, &target.id).await?);
                return Ok(());
            }

            let changes = session.diff(&base.id, &target.id, granularity).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&changes)?);
                return Ok(());
            }
            if changes.is_empty() {
                println!("No differences at {} level.", granularity);
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Kind", "Base", "Target", "Similarity"]);
            for change in &changes {
                table.add_row(vec![
                    Cell::new(&change.id),
                    Cell::new(change.kind),
                    Cell::new(truncate(change.left_unit.as_deref().unwrap_or("-"), 50)),
                    Cell::new(truncate(change.right_unit.as_deref().unwrap_or("-"), 50)),
                    Cell::new(
                        change
                            .similarity
                            .map(|s| format!("{:.2}", s))
                            .unwrap_or_else(|| "-".into()),
                    ),
                ]);
            }
            println!("{}", table);
            println!("{} change(s)", changes.len());
            Ok(())
        }

        VersionAction::Star {
            document,
            number,
            off,
        } => {
            let session = open_session(db, config, &document)?;
            let node = resolve(&session, &number).await?;
            session.set_starred(&node.id, !off).await?;
            session.save(db).await?;
            println!("Version {} {}", node.number, if off { "unstarred" } else { "starred" });
            Ok(())
        }

        VersionAction::Archive {
            document,
            number,
            off,
        } => {
            let session = open_session(db, config, &document)?;
            let node = resolve(&session, &number).await?;
            session.set_archived(&node.id, !off).await?;
            session.save(db).await?;
            println!("Version {} {}", node.number, if off { "restored" } else { "archived" });
            Ok(())
        }

        VersionAction::Note {
            document,
            number,
            text,
        } => {
            let session = open_session(db, config, &document)?;
            let node = resolve(&session, &number).await?;
            session.set_note(&node.id, &text).await?;
            session.save(db).await?;
            if text.trim().is_empty() {
                println!("Note cleared for version {}", node.number);
            } else {
                println!("Note saved for version {}", node.number);
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// paragraph
// ---------------------------------------------------------------------------

pub async fn run_paragraph(db: &Database, config: &EngineConfig, action: ParagraphAction) -> Result<()> {
    match action {
        ParagraphAction::List { document, number } => {
            let session = open_session(db, config, &document)?;
            let node = resolve(&session, &number).await?;
            let versions = session.versions().await;
            let number_of = |id: &str| {
                versions
                    .iter()
                    .find(|v| v.id == id)
                    .map(|v| v.number.clone())
                    .unwrap_or_else(|| "?".into())
            };

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["¶", "ID", "Origin", "Prompt", "Text", "Lock"]);
            for entry in session.paragraph_lineage(&node.id).await {
                let lock = if entry.is_locked {
                    Cell::new("locked").fg(Color::Red)
                } else {
                    Cell::new("")
                };
                table.add_row(vec![
                    Cell::new(entry.paragraph_index),
                    Cell::new(&entry.paragraph_id),
                    Cell::new(number_of(&entry.origin_version_id)),
                    Cell::new(truncate(entry.prompt.as_deref().unwrap_or("-"), 30)),
                    Cell::new(truncate(&entry.current_content, 50)),
                    lock,
                ]);
            }
            println!("{}", table);
            Ok(())
        }

        ParagraphAction::Lock {
            document,
            paragraph,
        } => {
            let session = open_session(db, config, &document)?;
            session.lock_paragraph(&paragraph).await?;
            session.save(db).await?;
            println!("Paragraph {} locked", paragraph);
            Ok(())
        }

        ParagraphAction::Unlock {
            document,
            paragraph,
        } => {
            let session = open_session(db, config, &document)?;
            session.unlock_paragraph(&paragraph).await?;
            session.save(db).await?;
            println!("Paragraph {} unlocked", paragraph);
            Ok(())
        }

        ParagraphAction::Revert {
            document,
            paragraph,
            target,
        } => {
            let session = open_session(db, config, &document)?;
            let target = resolve(&session, &target).await?;
            let node = session.revert_paragraph(&paragraph, &target.id).await?;
            session.save(db).await?;
            println!(
                "Paragraph {} restored from version {} into version {}",
                paragraph, target.number, node.number
            );
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// template
// ---------------------------------------------------------------------------

pub fn run_template(db: &Database, action: TemplateAction) -> Result<()> {
    match action {
        TemplateAction::Set {
            document,
            name,
            prompt,
        } => {
            db.get_document(&document)?
                .ok_or_else(|| anyhow::anyhow!("document '{}' not found", document))?;
            let mut settings = ReviewSettings::load(db, &document)?;
            settings.upsert_template(&name, prompt);
            settings.save(db, &document)?;
            println!("Template '{}' saved", name);
            Ok(())
        }
        TemplateAction::List { document } => {
            let settings = ReviewSettings::load(db, &document)?;
            if settings.rewrite_templates.is_empty() {
                println!("No templates saved.");
                return Ok(());
            }
            for template in &settings.rewrite_templates {
                println!("{:<20} {}", template.name, template.prompt);
            }
            Ok(())
        }
    }
}
