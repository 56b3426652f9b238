use anyhow::Result;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use std::path::Path;
use tessera_core::DiagnosticPage;
use tessera_protocol::{DiagnosticsParams, ResolveParams};

pub async fn list(root: &Path, params: DiagnosticsParams, json: bool) -> Result<()> {
    let client = super::connect(root).await?;
    let page = client.diagnostics(params).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }
    if page.items.is_empty() {
        println!("{}", "No diagnostics".green());
        return Ok(());
    }
    println!("{}", render(&page));
    println!(
        "Showing {}-{} of {}",
        page.offset + 1,
        page.offset + page.items.len(),
        page.total
    );
    Ok(())
}

pub async fn resolve(root: &Path, params: ResolveParams) -> Result<()> {
    let client = super::connect(root).await?;
    let resolved = client.resolve(params).await?;
    println!("Resolved {} diagnostic(s)", resolved);
    Ok(())
}

pub fn render(page: &DiagnosticPage) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Severity", "Code", "Location", "Message", "State"]);
    for entry in &page.items {
        let d = &entry.diagnostic;
        let mut message = d.message.clone();
        if let Some(hint) = &d.suggestion {
            message.push_str(&format!("\nhint: {}", hint));
        }
        table.add_row(vec![
            d.severity.to_string(),
            d.code.clone(),
            d.location.to_string(),
            message,
            if entry.is_resolved() { "resolved" } else { "open" }.to_string(),
        ]);
    }
    table
}
