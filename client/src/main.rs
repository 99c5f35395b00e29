use clap::Parser;
use client::game::{ClientGameState, RaceStatus, Update};
use client::input::Autopilot;
use client::network::RaceClient;
use log::{info, warn};
use shared::protocol::{JoinRequest, ServerMessage};
use shared::CarColor;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:5555")]
    server: String,

    /// Nickname shown to other players
    #[arg(short = 'n', long)]
    nickname: Option<String>,

    /// Car colour: light_blue, pink, blue or green
    #[arg(short = 'c', long, default_value = "light_blue")]
    color: CarColor,

    /// How long to stay connected, in seconds
    #[arg(short = 'd', long, default_value = "60")]
    duration_secs: u64,
}

/// Control messages per second, matching the server's broadcast rate.
const CONTROL_RATE: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let request = JoinRequest {
        nickname: args.nickname,
        car_color: args.color,
    };
    let (client, race) = RaceClient::connect(args.server.as_str(), request).await?;
    let mut game = ClientGameState::new(client.player_id(), race);
    let (mut inbound, mut outbound) = client.into_split();

    // Reads run in their own task; a half-read frame must never be dropped.
    let (message_tx, mut message_rx) = mpsc::channel::<ServerMessage>(64);
    let reader = tokio::spawn(async move {
        loop {
            match inbound.recv().await {
                Ok(message) => {
                    if message_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Connection lost: {}", e);
                    break;
                }
            }
        }
    });

    outbound.send_ready(true).await?;
    outbound.send_chat("Ready to race!").await?;

    let mut autopilot = Autopilot::new();
    let mut ticker = interval(Duration::from_millis(1000 / CONTROL_RATE));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = sleep(Duration::from_secs(args.duration_secs));
    tokio::pin!(deadline);
    let mut last_status = game.status();

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("Time is up, disconnecting");
                break;
            }
            message = message_rx.recv() => {
                let Some(message) = message else {
                    break;
                };
                match game.apply(message) {
                    Update::Chat(chat) => info!("[{}] {}: {}", chat.time, chat.sender, chat.message),
                    Update::Error(reason) => warn!("Server error: {}", reason),
                    Update::State | Update::Ignored => {}
                }

                let status = game.status();
                if status != last_status {
                    match status {
                        RaceStatus::Countdown(n) => info!("Race starts in {}", n),
                        RaceStatus::Racing => info!("Go!"),
                        RaceStatus::Finished => {
                            if let Some(winner) = game.winner() {
                                info!("{} won in {} seconds", winner.nickname, winner.time);
                            }
                        }
                        RaceStatus::WaitingForPlayers => info!("Waiting for players"),
                    }
                    last_status = status;
                }
            }
            _ = ticker.tick() => {
                let input = autopilot.next_input(game.my_car());
                outbound.send_control(input).await?;
            }
        }
    }

    reader.abort();
    Ok(())
}
