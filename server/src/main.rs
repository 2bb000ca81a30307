use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::engine::Engine;
use server::network::Server;
use server::systems::default_systems;
use shared::JsonResourceCatalog;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum number of concurrent sessions
    #[arg(short, long)]
    max_sessions: Option<usize>,

    /// JSON resource catalog
    #[arg(short, long)]
    resources: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_sessions) = args.max_sessions {
        config.max_sessions = max_sessions;
    }

    let mut builder = Engine::builder(config);
    builder.systems(default_systems());
    if let Some(path) = &args.resources {
        let catalog = JsonResourceCatalog::load(path)?;
        info!("Loaded {} resources from {}", catalog.len(), path.display());
        builder.resources(catalog);
    }
    let engine = builder.build()?;

    info!("Starting server...");
    info!("Max sessions: {}", engine.config().max_sessions);
    info!("Lobby space: {}", engine.lobby_space_id());

    let server = Server::bind(engine).await?;

    tokio::select! {
        _ = server.run() => {
            error!("Accept loop ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
