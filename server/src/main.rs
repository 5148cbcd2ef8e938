use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerMessage, ServerSettings, MAX_CLIENTS};
use shared::replication::{MAX_SNAPSHOT_RATE, MIN_SNAPSHOT_RATE};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Simulation rate (ticks per second)
    #[arg(short, long, default_value = "60")]
    tick_rate: u32,

    /// Snapshot broadcast rate in Hz
    #[arg(short, long, default_value = "60",
          value_parser = clap::value_parser!(u32).range(MIN_SNAPSHOT_RATE as i64..=MAX_SNAPSHOT_RATE as i64))]
    snapshot_rate: u32,

    /// Maximum number of connected players
    #[arg(short, long, default_value = "16",
          value_parser = clap::value_parser!(u64).range(1..=MAX_CLIENTS as u64))]
    max_clients: u64,

    /// Seconds before the ball is placed back after a goal or out of bounds
    #[arg(short, long, default_value = "2.0")]
    reset_delay: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let settings = ServerSettings {
        tick_rate: args.tick_rate,
        snapshot_rate: args.snapshot_rate,
        max_clients: args.max_clients as usize,
        reset_delay: args.reset_delay,
        ..ServerSettings::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, settings).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        return Err(e);
    }

    Ok(())
}
