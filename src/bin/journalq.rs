use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use journalq::engine::{DEFAULT_JOURNAL_DIR, DEFAULT_MAX_MEMORY_BYTES};
use journalq::server::{Server, ServerConfig, DEFAULT_PORT};
use journalq::{Engine, EngineConfig, SharedEngine};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on. Default is all interfaces.
    #[arg(long, default_value = "")]
    address: String,

    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum bytes of items held in memory, and the size of each overflow journal.
    #[arg(long, default_value_t = DEFAULT_MAX_MEMORY_BYTES)]
    memory: usize,

    /// Journal directory. Must exist.
    #[arg(long, default_value = DEFAULT_JOURNAL_DIR)]
    path: PathBuf,

    /// Sync every journal write to stable storage.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("Max memory bytes: {}", args.memory);
    info!("Listening on {}:{}", args.address, args.port);
    info!("Journal path: {}", args.path.display());

    let config = EngineConfig::new(&args.path)
        .with_max_memory_bytes(args.memory)
        .with_sync_writes(args.sync);
    let engine = tokio::task::spawn_blocking(move || Engine::open(config))
        .await
        .context("recovery task panicked")?
        .context("failed to recover journals")?;

    let server_config = ServerConfig {
        address: args.address,
        port: args.port,
    };
    let server = Server::bind(&server_config, SharedEngine::new(engine)).await?;

    info!("Ready...");
    tokio::select! {
        result = server.run() => result.context("queue engine failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
