//! Markdown run summary
//!
//! The summary is the only audit trail a run leaves behind, so every
//! repository gets a section whether it was synced or skipped.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use crate::models::BranchRole;
use crate::orchestrator::{Presence, SyncOutcome};
use crate::policy::BranchPolicy;
use crate::sync::RunSummary;

/// Render the whole run as markdown
pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "## Fork branch sync: `{}`", summary.org);
    let _ = writeln!(out);
    let _ = writeln!(out, "- Run: `{}`", summary.run_id);
    let _ = writeln!(
        out,
        "- Started: {} ({:.1}s)",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.duration.as_secs_f64()
    );
    render_policy(&mut out, &summary.policy);
    let _ = writeln!(out);

    if summary.outcomes.is_empty() {
        let _ = writeln!(out, "_No repositories matched._");
        let _ = writeln!(out);
    }
    for outcome in &summary.outcomes {
        render_outcome(&mut out, &summary.policy, outcome);
    }

    let _ = writeln!(
        out,
        "**Totals:** {} processed, {} synced, {} skipped",
        summary.processed(),
        summary.synced(),
        summary.skipped()
    );
    out
}

fn render_policy(out: &mut String, policy: &BranchPolicy) {
    let _ = writeln!(out, "- Prefix: `{}`", policy.prefix);
    let _ = writeln!(out, "- Branch plan:");
    for spec in &policy.order {
        let _ = writeln!(
            out,
            "  - {}: `{}` (track `{}`, {})",
            spec.role,
            spec.full_ref,
            spec.track,
            if spec.update { "updated" } else { "create-once" }
        );
    }
}

fn render_outcome(out: &mut String, policy: &BranchPolicy, outcome: &SyncOutcome) {
    let _ = writeln!(out, "### `{}`", outcome.repo);
    let _ = writeln!(out);

    if let Some(reason) = &outcome.skipped {
        let _ = writeln!(out, "- **Skipped:** {}", reason);
    }
    if let Some(branch) = &outcome.mirror_branch {
        let _ = writeln!(out, "- Mirror branch: `{}`", branch);
    }
    let _ = writeln!(out, "- Mirror sync: {}", outcome.mirror_sync);

    if !outcome.bootstrap.is_empty() {
        let results = outcome
            .bootstrap
            .iter()
            .map(|result| result.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        let _ = writeln!(out, "- Bootstrap: {}", results);
    }

    if !outcome.presence.is_empty() {
        let missing: Vec<&str> = outcome
            .presence
            .iter()
            .filter(|p| !matches!(p.presence, Presence::Present(_)))
            .map(|p| p.branch.as_str())
            .collect();
        if missing.is_empty() {
            let _ = writeln!(out, "- Presence: all managed branches present");
        } else {
            let _ = writeln!(out, "- Presence: missing or unreadable `{}`", missing.join("`, `"));
        }
    }

    if let Some(action) = &outcome.product_action {
        let _ = writeln!(out, "- Product: {}", action);
        let _ = writeln!(
            out,
            "- Product changed: {}",
            if outcome.product_changed { "yes" } else { "no" }
        );
    }
    if let Some(target) = &outcome.downstream_target {
        let _ = writeln!(out, "- Downstream target: {}", target);
    }
    for promotion in &outcome.promotions {
        let _ = writeln!(
            out,
            "- {} (`{}`): {}",
            capitalize(promotion.role.as_str()),
            promotion.branch,
            promotion.action
        );
    }
    for branch in &outcome.create_once {
        let role = policy
            .order
            .iter()
            .find(|spec| &spec.full_ref == branch)
            .map(|spec| spec.role)
            .unwrap_or(BranchRole::Snapshot);
        let _ = writeln!(
            out,
            "- {} (`{}`): create-once, not promoted",
            capitalize(role.as_str()),
            branch
        );
    }
    if let Some(issue) = &outcome.issue {
        let _ = writeln!(out, "- Issue: {}", issue);
    }
    for note in &outcome.notes {
        let _ = writeln!(out, "- Note: {}", note);
    }
    let _ = writeln!(out);
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Append the rendered summary to a file such as the CI step summary
pub fn append_to(path: &Path, markdown: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create summary directory: {:?}", parent))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open summary file: {:?}", path))?;
    file.write_all(markdown.as_bytes())
        .with_context(|| format!("Failed to write summary file: {:?}", path))?;
    if !markdown.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    Ok(())
}
