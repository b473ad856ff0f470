// crates/group-memory/src/main.rs

#[cfg(feature = "cli")]
use std::{fs::File, io::BufReader, path::PathBuf, sync::Arc};

#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use group_memory::{api, config::MemoryConfig, import::read_jsonl, metrics, telemetry, MemorySystem};
#[cfg(feature = "cli")]
use tracing::{error, info};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "group-memory", version, about = "Group chat memory service")]
struct Cli {
    /// Debug-level logs for this service (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API with background consolidation
    Serve,
    /// Consolidate one conversation now, regardless of message age
    Consolidate {
        #[arg(long)]
        conversation: String,
    },
    /// Backfill messages from a JSONL file, then consolidate every conversation that grew
    Import {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print database statistics as JSON
    Stats,
    /// Print every chunk remembered for a conversation
    Export {
        #[arg(long)]
        conversation: String,
    },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing(cli.verbose);

    let config = MemoryConfig::from_env()?;
    config.print_config();
    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
    }

    let memory = Arc::new(MemorySystem::open(config)?);

    match cli.command {
        Command::Serve => {
            let addr = memory.config().api_addr()?;
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Shutdown requested");
            };
            api::run_service(Arc::clone(&memory), addr, shutdown).await?;
        }
        Command::Consolidate { conversation } => {
            let report = memory.force_consolidate(&conversation).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Import { file } => {
            let reader = File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?;
            let batch = read_jsonl(BufReader::new(reader))?;
            info!("Read {} messages from {}", batch.messages.len(), file.display());
            let report = memory.import(batch).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Stats => {
            let stats = memory.stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Export { conversation } => {
            print!("{}", memory.export(&conversation)?);
        }
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
