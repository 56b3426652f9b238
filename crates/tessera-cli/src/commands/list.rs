use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::Value;
use std::path::Path;
use tessera_core::Listing;

pub async fn execute(root: &Path, domain: &str, json: bool) -> Result<()> {
    let client = super::connect(root).await?;
    let listing = client.list(Some(domain)).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        println!("{}", render(&listing));
    }
    Ok(())
}

fn field(item: &Value, key: &str) -> String {
    match item.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Registered units, then quarantined names
pub fn render(listing: &Listing) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "Kind", "Returns", "Source", "Status"]);
    for item in &listing.items {
        table.add_row(vec![
            field(item, "name"),
            field(item, "source_kind"),
            field(item, "return_shape"),
            field(item, "source"),
            "ok".to_string(),
        ]);
    }
    for q in &listing.quarantined {
        table.add_row(vec![
            q.name.clone(),
            String::new(),
            String::new(),
            q.file.display().to_string(),
            format!("quarantined: {}", q.code),
        ]);
    }
    table
}
