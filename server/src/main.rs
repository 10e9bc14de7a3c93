use clap::Parser;
use log::{error, info};
use server::credentials::FileCredentialStore;
use server::logger::LogLogger;
use server::transport::TcpTransport;
use server::{driver, Dispatcher, ServerConfig};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding persisted state (the shared secret lives in auth/)
    #[arg(short = 'd', long, default_value = "data")]
    data_dir: PathBuf,

    /// Port to listen on
    #[arg(short = 'p', long, default_value = "20000")]
    port: u16,

    /// Maximum simultaneous connections, self-connection included
    #[arg(short = 'c', long, default_value = "10")]
    max_connections: usize,

    /// Dispatcher ticks per second
    #[arg(short = 't', long, default_value = "60")]
    tick_rate: u32,

    /// Wrong secrets tolerated before a peer is disconnected
    #[arg(long, default_value = "0")]
    max_failed_attempts: u32,

    /// UDP port to listen on for discovery broadcasts
    #[arg(long)]
    discovery_port: Option<u16>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            data_dir: args.data_dir,
            port: args.port,
            max_connections: args.max_connections,
            max_failed_attempts: args.max_failed_attempts,
            tick_rate: args.tick_rate,
            discovery_port: args.discovery_port,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ServerConfig::from(Args::parse());

    info!("Starting master server...");
    info!("Data directory: {}", config.data_dir.display());

    let mut store = FileCredentialStore::new(config.keyphrase_path());

    let mut transport = TcpTransport::new();
    if let Some(port) = config.discovery_port {
        info!("Listening for discovery broadcasts on UDP port {}", port);
        transport = transport.with_discovery_port(port);
    }

    let mut dispatcher = Dispatcher::initialize(transport, LogLogger, &config, &mut store)?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => {
                error!("Unable to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    let ticks = driver::run(&mut dispatcher, config.tick_rate, shutdown).await;
    info!("Master server stopped after {} ticks", ticks);

    Ok(())
}
