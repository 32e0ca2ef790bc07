//! Merge review command.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use draftline_core::config::EngineConfig;
use draftline_core::db::Database;
use draftline_core::merge::{Impact, MergeReview, ReviewStatus};
use draftline_core::settings::ReviewSettings;

use crate::document::{open_session, resolve};
use crate::truncate;

/// Arguments of `draftline merge`.
#[derive(Debug)]
pub struct MergeRequest {
    pub document: String,
    pub base: String,
    pub compare: Vec<String>,
    pub preset: Option<String>,
    pub accept: Vec<String>,
    pub reject: Vec<String>,
    pub apply: bool,
    pub json: bool,
}

/// Split `change-3=2.1` into its change id and version number.
fn parse_accept(raw: &str) -> Result<(&str, &str)> {
    raw.split_once('=')
        .map(|(change, version)| (change.trim(), version.trim()))
        .filter(|(change, version)| !change.is_empty() && !version.is_empty())
        .ok_or_else(|| anyhow::anyhow!("invalid --accept '{}': expected CHANGE=VERSION", raw))
}

pub async fn run_merge(db: &Database, config: &EngineConfig, request: MergeRequest) -> Result<()> {
    let session = open_session(db, config, &request.document)?;
    let base = resolve(&session, &request.base).await?;
    let mut compare_ids = Vec::with_capacity(request.compare.len());
    for number in &request.compare {
        compare_ids.push(resolve(&session, number).await?.id);
    }
    let compare_refs: Vec<&str> = compare_ids.iter().map(String::as_str).collect();

    let stored_preset = ReviewSettings::load(db, &request.document)?.preset;
    let preset = request.preset.or(stored_preset);

    let mut review = session
        .classify_and_merge(&base.id, &compare_refs, preset.as_deref(), &[])
        .await
        .context("merge review failed")?;

    for raw in &request.accept {
        let (change_id, number) = parse_accept(raw)?;
        let version = resolve(&session, number).await?;
        review.accept(change_id, &version.id)?;
    }
    for change_id in &request.reject {
        review.reject(change_id)?;
    }

    if request.json {
        println!("{}", serde_json::to_string_pretty(&review)?);
    } else {
        print_review(&review, &session.versions().await);
    }

    if request.apply {
        let (node, outcome) = session.apply_merge(&review).await?;
        session.save(db).await?;
        println!();
        println!(
            "Created version {} with {} change(s) applied",
            node.number,
            outcome.applied.len()
        );
        for skipped in &outcome.skipped {
            println!("  skipped {}: {}", skipped.change_id, skipped.reason);
        }
    }

    Ok(())
}

fn print_review(review: &MergeReview, versions: &[draftline_core::models::VersionNode]) {
    let number_of = |id: &str| {
        versions
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.number.clone())
            .unwrap_or_else(|| id.to_string())
    };

    if review.classified_changes.is_empty() {
        println!("No changes to review.");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Where", "Type", "Impact", "Alternatives", "Status"]);

    for change in &review.classified_changes {
        let impact = match change.impact {
            Impact::Critical => Cell::new("critical").fg(Color::Red),
            Impact::Important => Cell::new("important").fg(Color::Yellow),
            Impact::Normal => Cell::new("normal"),
        };
        let alternatives = change
            .alternatives
            .iter()
            .map(|alt| {
                let source = if alt.is_manual {
                    alt.version_id.clone()
                } else {
                    format!("v{}", number_of(&alt.version_id))
                };
                format!("{}: {}", source, truncate(&alt.text, 40))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let mut status = change.status.to_string();
        if let Some(ref rule) = change.rule_applied {
            status = format!("{} ({})", status, rule);
        }
        if change.flagged {
            status.push_str(" ⚑");
        }
        let status = match change.status {
            ReviewStatus::Accepted | ReviewStatus::AutoHandled => Cell::new(status).fg(Color::Green),
            ReviewStatus::Rejected => Cell::new(status).fg(Color::DarkGrey),
            ReviewStatus::Pending => Cell::new(status),
        };

        table.add_row(vec![
            Cell::new(change.id()),
            Cell::new(change.location),
            Cell::new(change.change_type),
            impact,
            Cell::new(alternatives),
            status,
        ]);
    }

    println!("Merge review against v{} (preset {})", number_of(&review.base_version_id), review.preset);
    println!("{}", table);
    let stats = &review.stats;
    println!(
        "{} change(s): {} critical, {} important, {} normal, {} auto-handled, {} reviewed",
        stats.total, stats.critical, stats.important, stats.normal, stats.auto_handled, stats.reviewed
    );
}
