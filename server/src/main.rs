use clap::Parser;
use log::info;
use server::lag_compensation::CompensationConfig;
use server::network::{Server, ServerMessage};
use std::path::PathBuf;
use std::time::Duration;

/// Authoritative game server with lag-compensated hit detection
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "64")]
    tick_rate: u32,
    /// Maximum number of connected clients
    #[clap(short, long, default_value = "16")]
    max_clients: usize,
    /// JSON file with lag compensation settings
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Furthest back in time a shot may be rewound, in seconds
    #[clap(long)]
    max_unlag: Option<f64>,
    /// Resolve every shot against the present world
    #[clap(long)]
    no_lag_compensation: bool,
}

impl Args {
    fn compensation_config(&self) -> Result<CompensationConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => CompensationConfig::from_path(path)?,
            None => CompensationConfig::default(),
        };

        config.tick_rate = self.tick_rate;
        if let Some(window) = self.max_unlag {
            config.max_compensation_window_seconds = window;
        }
        if self.no_lag_compensation {
            config.enabled = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    if args.tick_rate == 0 {
        return Err("tick rate must be positive".into());
    }
    let config = args.compensation_config()?;

    let address = format!("{}:{}", args.host, args.port);
    let tick_duration = Duration::from_secs_f64(1.0 / args.tick_rate as f64);
    let mut server = Server::new(&address, tick_duration, args.max_clients, config).await?;

    let shutdown = server.shutdown_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await
}
