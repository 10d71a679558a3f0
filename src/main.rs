use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use claude_status::app;
use claude_status::cli::Cli;
use claude_status::config::StatusConfig;
use claude_status::util::setup_tracing;

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("claude-status error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<u8> {
    setup_tracing();
    let cli = Cli::parse();
    let config = StatusConfig::load()?;
    app::run(cli, config)?;
    Ok(0)
}
