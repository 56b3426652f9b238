use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use tessera_cli::{cli::Cli, exit};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match tessera_cli::run(cli).await {
        Ok(()) => ExitCode::from(exit::SUCCESS as u8),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(exit::code_for(&e) as u8)
        }
    }
}
