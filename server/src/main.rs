use clap::Parser;
use log::{error, info};
use server::network::{Server, ServerConfig};
use shared::{DEFAULT_PORT, MAX_PLAYERS};
use tokio::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Maximum number of players in a race
    #[clap(short, long, default_value_t = MAX_PLAYERS)]
    max_players: usize,
    /// State broadcasts per second
    #[clap(short, long, default_value = "30")]
    tick_rate: u32,
    /// Seconds of silence before a player is disconnected
    #[clap(long, default_value = "10")]
    timeout_secs: u64,
}

/// Parses command-line arguments, binds the listener and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout_secs);
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_players: args.max_players,
        tick_rate: args.tick_rate,
        session_timeout: timeout,
        handshake_timeout: timeout,
        ..ServerConfig::default()
    };

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
