use clap::Parser;
use log::{info, warn};
use shared::{encode, ActionCode};
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration};

/// Connects to a master server, optionally sends a debug line, then
/// authenticates and reports whether the server kept the connection open.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Master server address
    #[arg(short = 's', long, default_value = "127.0.0.1:20000")]
    server: String,

    /// Shared secret to authenticate with
    #[arg(long, conflicts_with = "keyphrase_file")]
    secret: Option<String>,

    /// File to read the shared secret from
    #[arg(short = 'k', long, default_value = "data/auth/keyphrase.passwd")]
    keyphrase_file: PathBuf,

    /// Debug message to send before authenticating
    #[arg(short = 'd', long)]
    debug: Option<String>,

    /// Seconds to wait for the server to close the connection
    #[arg(long, default_value = "2")]
    wait: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let secret = match args.secret {
        Some(secret) => secret,
        None => std::fs::read_to_string(&args.keyphrase_file)?,
    };

    info!("Connecting to {}", args.server);
    let mut stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {} from {}", args.server, stream.local_addr()?);

    if let Some(message) = &args.debug {
        let line = encode(ActionCode::Debug.into(), message);
        stream.write_all(line.as_bytes()).await?;
        println!("Sent debug message: {}", message);
        // Give the server a tick to pick up the debug line on its own
        sleep(Duration::from_millis(50)).await;
    }

    let line = encode(ActionCode::Auth.into(), &secret);
    stream.write_all(line.as_bytes()).await?;
    println!("Sent {} byte secret", secret.len());

    let mut buf = [0u8; 1024];
    match timeout(Duration::from_secs(args.wait), stream.read(&mut buf)).await {
        Ok(Ok(0)) => println!("Server closed the connection: authentication rejected"),
        Ok(Ok(len)) => println!(
            "Server replied with {} bytes: {}",
            len,
            String::from_utf8_lossy(&buf[..len])
        ),
        Ok(Err(e)) => {
            warn!("Connection error: {}", e);
            println!("Connection dropped: {}", e);
        }
        Err(_) => println!(
            "Connection still open after {}s: authentication accepted",
            args.wait
        ),
    }

    stream.shutdown().await?;
    Ok(())
}
