use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use tessera_config::ProjectConfig;
use tessera_core::{Domain, Runtime};
use tessera_daemon::runtime_options;

/// Boot a throwaway runtime and report what it found
pub async fn execute(root: &Path, json: bool) -> Result<()> {
    let config = ProjectConfig::load(root)?;
    let runners = tessera_runners::default_runners(&config, root)?;
    let runtime = Runtime::new(runtime_options(root, &config), runners, None);

    let booted = runtime.boot().await;
    let page = runtime.diagnostics(usize::MAX, 0, false);
    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
    } else if !page.items.is_empty() {
        println!("{}", super::diagnostics::render(&page));
    }

    let summary = booted?;
    if !json {
        let version = runtime.current();
        println!(
            "{} {} function(s), {} entit(ies), {} exposed tool(s), {} warning(s)",
            "ok".green().bold(),
            version.domain(Domain::Functions).len(),
            version.domain(Domain::Entities).len(),
            version.domain(Domain::ExposedTools).len(),
            summary.warnings
        );
    }
    runtime.shutdown().await;
    Ok(())
}
