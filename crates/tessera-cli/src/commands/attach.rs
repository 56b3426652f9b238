//! Interactive session that holds the root's single client slot

use anyhow::Result;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;
use tessera_daemon_client::DaemonClient;
use tessera_protocol::DiagnosticsParams;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

const HELP: &str = "\
commands:
  invoke NAME [JSON]     call a function; arguments as a JSON object
  list [DOMAIN]          functions (default), entities or tools
  diagnostics [all]      unresolved diagnostics, or every entry
  reload                 run one reload cycle
  status                 daemon status
  detach                 leave the session; the daemon keeps running";

#[derive(Debug, PartialEq)]
pub enum SessionCommand {
    Empty,
    Help,
    Invoke {
        name: String,
        arguments: Map<String, Value>,
    },
    List(String),
    Diagnostics {
        all: bool,
    },
    Reload,
    Status,
    Detach,
}

pub fn parse_line(line: &str) -> Result<SessionCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    Ok(match word {
        "" => SessionCommand::Empty,
        "help" | "?" => SessionCommand::Help,
        "invoke" => {
            let (name, raw) = match rest.split_once(char::is_whitespace) {
                Some((name, raw)) => (name, raw.trim()),
                None => (rest, ""),
            };
            if name.is_empty() {
                return Err("usage: invoke NAME [JSON]".to_string());
            }
            let arguments = if raw.is_empty() {
                Map::new()
            } else {
                match serde_json::from_str(raw) {
                    Ok(Value::Object(map)) => map,
                    _ => return Err("arguments must be a JSON object".to_string()),
                }
            };
            SessionCommand::Invoke {
                name: name.to_string(),
                arguments,
            }
        }
        "list" | "ls" => SessionCommand::List(if rest.is_empty() {
            "functions".to_string()
        } else {
            rest.to_string()
        }),
        "diagnostics" | "diag" => SessionCommand::Diagnostics { all: rest == "all" },
        "reload" => SessionCommand::Reload,
        "status" => SessionCommand::Status,
        "detach" | "exit" | "quit" => SessionCommand::Detach,
        other => return Err(format!("unknown command '{}'; try `help`", other)),
    })
}

pub async fn execute(root: &Path) -> Result<()> {
    let client = super::connect(root).await?;
    let pid = std::process::id();
    client.attach(pid).await?;
    println!("Attached to {} (pid {}). Type `help` for commands.", root.display(), pid);

    let outcome = session(&client).await;

    match client.detach(Some(pid)).await {
        Ok(_) => println!("Detached; the daemon keeps running"),
        Err(e) => warn!("Failed to release client slot: {}", e),
    }
    outcome
}

/// Release whatever client holds the slot, without starting a daemon
pub async fn detach(root: &Path) -> Result<()> {
    if !tessera_daemon_client::is_daemon_running(&tessera_protocol::socket_path(root)) {
        println!("Daemon is not running");
        return Ok(());
    }
    let client = DaemonClient::connect(root).await?;
    if client.detach(None).await? {
        println!("Client slot released");
    } else {
        println!("No client was attached");
    }
    Ok(())
}

async fn session(client: &DaemonClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("tess> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            return Ok(());
        };
        let command = match parse_line(&line) {
            Ok(SessionCommand::Detach) => return Ok(()),
            Ok(command) => command,
            Err(msg) => {
                eprintln!("{}", msg);
                continue;
            }
        };
        if let Err(e) = run(client, command).await {
            eprintln!("error: {}", e);
        }
    }
}

async fn run(client: &DaemonClient, command: SessionCommand) -> Result<()> {
    match command {
        SessionCommand::Empty | SessionCommand::Detach => {}
        SessionCommand::Help => println!("{}", HELP),
        SessionCommand::Invoke { name, arguments } => {
            super::print_value(&client.invoke(&name, arguments).await?)?;
        }
        SessionCommand::List(domain) => {
            let listing = client.list(Some(&domain)).await?;
            println!("{}", super::list::render(&listing));
        }
        SessionCommand::Diagnostics { all } => {
            let page = client
                .diagnostics(DiagnosticsParams {
                    include_resolved: all,
                    ..Default::default()
                })
                .await?;
            println!("{}", super::diagnostics::render(&page));
        }
        SessionCommand::Reload => super::reload::print_summary(&client.reload().await?),
        SessionCommand::Status => super::print_value(&client.status().await?)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invoke_with_arguments() {
        let cmd = parse_line("invoke greet {\"who\": \"ada\"}").unwrap();
        let SessionCommand::Invoke { name, arguments } = cmd else {
            panic!("expected invoke");
        };
        assert_eq!(name, "greet");
        assert_eq!(arguments["who"], json!("ada"));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_line("  ").unwrap(), SessionCommand::Empty);
        assert_eq!(parse_line("list").unwrap(), SessionCommand::List("functions".into()));
        assert_eq!(parse_line("ls entities").unwrap(), SessionCommand::List("entities".into()));
        assert_eq!(
            parse_line("diagnostics all").unwrap(),
            SessionCommand::Diagnostics { all: true }
        );
        assert_eq!(parse_line("quit").unwrap(), SessionCommand::Detach);
    }

    #[test]
    fn test_bad_lines() {
        assert!(parse_line("invoke").is_err());
        assert!(parse_line("invoke f [1, 2]").is_err());
        assert!(parse_line("frobnicate").is_err());
    }
}
