use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use task_agent_rs::helpers::{build_gemini_client, init_tracing};
use task_agent_rs::llm::GenerationClient;
use task_agent_rs::{health, AgentConfig};

#[derive(Parser, Debug)]
#[command(name = "task-agent-health")]
#[command(about = "Checks directories, credentials and Gemini reachability")]
struct Args {
    /// YAML configuration file (defaults to /app/config/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("task-agent-health error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let args = Args::parse();
    let config = AgentConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log_level)?;

    let client = match build_gemini_client(&config) {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::error!(error = %err, "Gemini client unavailable");
            None
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    let report = runtime.block_on(health::run_checks(
        &config,
        client.as_ref().map(|c| c as &dyn GenerationClient),
    ));

    println!("{report}");
    Ok(report.all_passed())
}
