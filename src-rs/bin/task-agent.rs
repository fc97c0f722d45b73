use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use task_agent_rs::helpers::{build_gemini_client, init_tracing, spawn_signal_listener};
use task_agent_rs::{Agent, AgentConfig};

#[derive(Parser, Debug)]
#[command(name = "task-agent")]
#[command(about = "Watches a directory for JSON tasks and answers them with Gemini")]
#[command(version)]
struct Args {
    /// YAML configuration file (defaults to /app/config/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent name shown in log output
    #[arg(long, default_value = "task-agent")]
    name: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("task-agent error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AgentConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log_level)?;

    // Built before the runtime: the blocking HTTP client must not be created
    // or dropped from inside async code.
    let client = build_gemini_client(&config).context("failed to initialize Gemini client")?;
    let agent = Agent::new(&args.name, config, Arc::new(client));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    runtime.block_on(async {
        spawn_signal_listener(agent.shutdown_handle());
        agent.run().await
    })?;
    Ok(())
}
