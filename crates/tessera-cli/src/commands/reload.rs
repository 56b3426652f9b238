use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tessera_core::ReloadSummary;

pub async fn execute(root: &Path, json: bool) -> Result<()> {
    let client = super::connect(root).await?;
    let summary = client.reload().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

pub fn print_summary(summary: &ReloadSummary) {
    let headline = if summary.published {
        format!("Published version {}", summary.version_id).green()
    } else {
        format!("No changes (version {})", summary.version_id).normal()
    };
    println!("{}", headline);

    for (domain, changes) in &summary.changes {
        println!(
            "  {:<14} +{} -{} ~{} ={}",
            domain.as_str(),
            changes.added.len(),
            changes.removed.len(),
            changes.changed.len(),
            changes.unchanged
        );
    }
    for item in &summary.quarantined {
        println!("  {} {} ({})", "quarantined".red(), item.name, item.reason);
    }
    for blocked in &summary.blocked_domains {
        println!(
            "  {} {} (upstream {})",
            "blocked".yellow(),
            blocked.domain.as_str(),
            blocked.cause.as_str()
        );
    }
    for name in &summary.client_action_required {
        println!("  {} {}", "client action required".yellow(), name);
    }
    if summary.errors + summary.warnings > 0 {
        println!(
            "  {} error(s), {} warning(s); see `tess diagnostics`",
            summary.errors, summary.warnings
        );
    }
}
