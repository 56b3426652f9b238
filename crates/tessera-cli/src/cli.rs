use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tess")]
#[command(about = "tess - hot-reloadable function runtime for a project directory")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true, env = "TESSERA_ROOT")]
    pub root: Option<PathBuf>,

    /// Set log level; overrides RUST_LOG and `runtime.log_level`
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Daemon management (start, stop, status)
    #[command(subcommand)]
    Daemon(DaemonCommands),

    /// Invoke a registered function
    Invoke {
        /// Function name
        name: String,

        /// Arguments as a JSON object
        #[arg(long = "args", value_name = "JSON")]
        args_json: Option<String>,

        /// Single argument; the value is parsed as JSON when it can be
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        arg: Vec<String>,
    },

    /// List registered units in a domain (functions, entities, tools)
    List {
        #[arg(default_value = "functions")]
        domain: String,
    },

    /// Show diagnostics, unresolved only by default
    Diagnostics {
        /// Include resolved entries
        #[arg(long)]
        all: bool,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Mark diagnostics resolved by code and/or file
    Resolve {
        #[arg(long)]
        code: Option<String>,

        /// Path relative to the project root
        #[arg(long)]
        file: Option<String>,
    },

    /// Run one reload cycle now
    Reload,

    /// Interactive session holding the single client slot
    Attach,

    /// Release the client slot; the daemon keeps running
    Detach,

    /// Scan and validate the project without a daemon
    Check,
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Check daemon status
    Status,
    /// Serve in this process with logs in `.tessera/daemon.log`
    #[command(hide = true)]
    Serve,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_invoke_flags() {
        let cli = Cli::try_parse_from([
            "tess", "invoke", "greet", "--args", "{\"a\":1}", "--arg", "b=2", "--arg", "c=x",
        ])
        .unwrap();
        match cli.command {
            Commands::Invoke { name, args_json, arg } => {
                assert_eq!(name, "greet");
                assert_eq!(args_json.as_deref(), Some("{\"a\":1}"));
                assert_eq!(arg, vec!["b=2", "c=x"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tess", "daemon", "status", "--root", "/p", "-l", "debug"])
            .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/p")));
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(matches!(cli.command, Commands::Daemon(DaemonCommands::Status)));
    }
}
