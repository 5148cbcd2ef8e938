use clap::Parser;
use client::network::Client;
use log::{error, info};
use macroquad::window::Conf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Simulate network latency in milliseconds
    #[arg(short = 'l', long, default_value = "0")]
    fake_ping: u64,

    /// Fraction of packets to drop in each direction (0.0 - 1.0)
    #[arg(short = 'd', long, default_value = "0.0")]
    drop_rate: f64,

    /// Window width
    #[arg(short = 'w', long, default_value = "1280")]
    width: i32,

    /// Window height (no short flag to avoid conflict with --help)
    #[arg(long, default_value = "720")]
    height: i32,
}

fn window_conf() -> Conf {
    // Parsed twice: macroquad needs the size before `main` runs.
    let args = Args::parse();
    Conf {
        window_title: "Ball Client".to_owned(),
        window_width: args.width,
        window_height: args.height,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);
    if args.fake_ping > 0 {
        info!("Simulating {}ms latency", args.fake_ping);
    }
    if args.drop_rate > 0.0 {
        info!("Simulating {:.0}% packet loss", args.drop_rate * 100.0);
    }
    info!("Controls: WASD to move, J kick, K lob, L tackle, Esc to quit");
    info!("Press 1/2/3 to toggle Prediction/Reconciliation/Interpolation");

    let mut client = match Client::new(
        &args.server,
        args.fake_ping,
        args.drop_rate,
        args.width as f32,
        args.height as f32,
    ) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to start client: {}", e);
            return;
        }
    };

    if let Err(e) = client.run().await {
        error!("Client error: {}", e);
    }
}
