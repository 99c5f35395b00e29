//! Server network layer: TCP front end, per-session writer tasks, the
//! Broadcast Loop and the Countdown timer.

use crate::client_manager::{
    DisconnectReason, Frame, SessionHandle, OUTBOX_CAPACITY, SESSION_TIMEOUT,
};
use crate::error::ServerError;
use crate::game::GameState;
use crate::race::CountdownTick;
use crate::utils::unix_time;
use log::{debug, error, info, warn};
use shared::codec::{read_message, write_frame, write_message, CodecError};
use shared::protocol::{ClientMessage, ErrorNotice, ServerMessage, WireMessage};
use shared::{DEFAULT_PORT, MAX_PLAYERS, START_POSITIONS};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, timeout, Duration, Instant, MissedTickBehavior};

/// The single critical section shared by every task.
pub type SharedState = Arc<Mutex<GameState>>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_players: usize,
    /// Broadcast Loop frequency in Hz.
    pub tick_rate: u32,
    pub session_timeout: Duration,
    /// How long a new connection may take to send `init`.
    pub handshake_timeout: Duration,
    /// Period of one countdown step.
    pub countdown_tick: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_players: MAX_PLAYERS,
            tick_rate: 30,
            session_timeout: SESSION_TIMEOUT,
            handshake_timeout: SESSION_TIMEOUT,
            countdown_tick: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_players == 0 {
            return Err(ServerError::Config("max players must be at least 1".into()));
        }
        if self.max_players > START_POSITIONS.len() {
            return Err(ServerError::Config(format!(
                "max players {} exceeds the {} start positions",
                self.max_players,
                START_POSITIONS.len()
            )));
        }
        if self.tick_rate == 0 {
            return Err(ServerError::Config("tick rate must be positive".into()));
        }
        if self.session_timeout.is_zero() || self.countdown_tick.is_zero() {
            return Err(ServerError::Config("timeouts must be positive".into()));
        }
        Ok(())
    }
}

/// Authoritative race server
pub struct Server {
    listener: TcpListener,
    state: SharedState,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Validates `config` and binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let addr = config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            state: Arc::new(Mutex::new(GameState::new(config.max_players))),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Accepts connections until the future is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        let _broadcast = AbortOnDrop(tokio::spawn(broadcast_loop(
            Arc::clone(&self.state),
            Arc::clone(&self.config),
        )));

        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not disable Nagle for {}: {}", peer, e);
                    }
                    tokio::spawn(handle_connection(
                        stream,
                        peer,
                        Arc::clone(&self.state),
                        Arc::clone(&self.config),
                    ));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Stops the wrapped task when the owner goes away.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Connection worker: handshake, then route every inbound message until the
/// session ends one way or another.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: SharedState,
    config: Arc<ServerConfig>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request = match timeout(
        config.handshake_timeout,
        read_message::<ClientMessage, _>(&mut reader),
    )
    .await
    {
        Ok(Ok(ClientMessage::Init(request))) => request,
        Ok(Ok(other)) => {
            warn!("Expected init from {}, got {}", peer, other.kind());
            return;
        }
        Ok(Err(e)) => {
            warn!("Handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            warn!("Handshake with {} timed out", peer);
            return;
        }
    };

    let (outbox, queued) = mpsc::channel(OUTBOX_CAPACITY);
    let shutdown = Arc::new(Notify::new());
    let handle = SessionHandle::new(outbox, Arc::clone(&shutdown));

    let joined = state.lock().await.join(request, handle, Instant::now());
    let player_id = match joined {
        Ok(player_id) => player_id,
        Err(e) => {
            warn!("Rejecting connection from {}: {}", peer, e);
            if matches!(e, ServerError::ServerFull) {
                reject(&mut writer, &e.to_string()).await;
            }
            return;
        }
    };
    info!("New connection from {}, assigned player ID: {}", peer, player_id);

    let mut writer_task = tokio::spawn(write_frames(writer, queued, player_id));
    let mut writer_done = false;

    let reason = loop {
        let result = tokio::select! {
            _ = shutdown.notified() => break DisconnectReason::Closed,
            _ = &mut writer_task => {
                writer_done = true;
                break DisconnectReason::Transport;
            }
            result = read_message::<ClientMessage, _>(&mut reader) => result,
        };

        match result {
            Ok(message) => route(&state, &config, player_id, message).await,
            Err(e) if !e.is_fatal() => {
                warn!("Ignoring frame from player {}: {}", player_id, e);
                state.lock().await.touch(player_id, Instant::now());
            }
            Err(e) if e.is_disconnect() => break DisconnectReason::Closed,
            Err(CodecError::Framing(e)) => {
                warn!("Error receiving data from player {}: {}", player_id, e);
                break DisconnectReason::Transport;
            }
            Err(e) => {
                warn!("Protocol error from player {}: {}", player_id, e);
                break DisconnectReason::Protocol;
            }
        }
    };

    state.lock().await.leave(player_id, reason);

    // Leaving drops the session's outbox, so the writer drains and exits.
    if !writer_done {
        if let Err(e) = writer_task.await {
            error!("Writer task of player {} failed: {}", player_id, e);
        }
    }
}

/// Sends the rejection straight to the socket; the peer never became a session.
async fn reject(writer: &mut OwnedWriteHalf, reason: &str) {
    let message = ServerMessage::Error(ErrorNotice {
        message: reason.to_string(),
    });
    if let Err(e) = write_message(writer, &message).await {
        debug!("Could not deliver rejection: {}", e);
    }
    let _ = writer.shutdown().await;
}

/// Applies one inbound message under the critical section.
async fn route(
    state: &SharedState,
    config: &Arc<ServerConfig>,
    player_id: u32,
    message: ClientMessage,
) {
    let mut game = state.lock().await;
    game.touch(player_id, Instant::now());

    match message {
        ClientMessage::Control(input) => {
            game.apply_control(player_id, &input, unix_time());
        }
        ClientMessage::Chat(chat) => {
            game.chat_from(player_id, &chat.message);
        }
        ClientMessage::Ready(status) => {
            if let Some(epoch) = game.set_ready(player_id, status.ready) {
                tokio::spawn(run_countdown(
                    Arc::clone(state),
                    epoch,
                    config.countdown_tick,
                ));
            }
        }
        ClientMessage::Init(_) => {
            warn!("Player {} sent init twice, ignoring", player_id);
        }
    }
}

/// Drains one session's outbox onto its socket. Ends when the registry drops
/// the session or a write fails.
async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut queued: mpsc::Receiver<Frame>,
    player_id: u32,
) {
    while let Some(frame) = queued.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!("Error sending data to player {}: {}", player_id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Broadcast Loop: sweep and push the full state at the configured rate.
async fn broadcast_loop(state: SharedState, config: Arc<ServerConfig>) {
    let mut ticker = interval(config.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let report_every = u64::from(config.tick_rate) * 10;
    let mut tick: u64 = 0;

    loop {
        ticker.tick().await;
        let sessions = state
            .lock()
            .await
            .broadcast_tick(Instant::now(), config.session_timeout);

        tick += 1;
        if tick % report_every == 0 && sessions > 0 {
            debug!("Tick {}: {} sessions", tick, sessions);
        }
    }
}

/// Countdown timer for the race started in `epoch`. Exits once the race is
/// running or the countdown was abandoned.
async fn run_countdown(state: SharedState, epoch: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;
        let tick = state.lock().await.tick_countdown(epoch, unix_time());
        match tick {
            CountdownTick::Remaining(_) => {}
            CountdownTick::RaceStarted => break,
            CountdownTick::Idle => {
                debug!("Countdown of race {} abandoned", epoch);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::race::RacePhase;
    use shared::protocol::{JoinRequest, ReadyStatus};

    fn session_handle() -> (SessionHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        (SessionHandle::new(tx, Arc::new(Notify::new())), rx)
    }

    fn local_config(max_players: usize) -> ServerConfig {
        ServerConfig {
            port: 0,
            max_players,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.address(), "127.0.0.1:5555");
        assert_eq!(config.max_players, 4);
        assert_eq!(config.session_timeout, Duration::from_secs(10));
        assert_eq!(config.countdown_tick, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tick_period() {
        let config = ServerConfig {
            tick_rate: 20,
            ..ServerConfig::default()
        };
        assert_eq!(config.tick_period(), Duration::from_millis(50));
    }

    #[test]
    fn test_config_validation() {
        let too_many = ServerConfig {
            max_players: START_POSITIONS.len() + 1,
            ..ServerConfig::default()
        };
        assert!(matches!(too_many.validate(), Err(ServerError::Config(_))));

        let nobody = ServerConfig {
            max_players: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(nobody.validate(), Err(ServerError::Config(_))));

        let frozen = ServerConfig {
            tick_rate: 0,
            ..ServerConfig::default()
        };
        assert!(matches!(frozen.validate(), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let result = Server::bind(local_config(0)).await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = Server::bind(local_config(4)).await.unwrap();
        let taken = first.local_addr().unwrap();

        let result = Server::bind(ServerConfig {
            port: taken.port(),
            ..ServerConfig::default()
        })
        .await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_starts_race_after_three_ticks() {
        let state: SharedState = Arc::new(Mutex::new(GameState::new(4)));
        let (handle, _rx) = session_handle();
        let epoch = {
            let mut game = state.lock().await;
            let id = game
                .join(JoinRequest::default(), handle, Instant::now())
                .unwrap();
            game.set_ready(id, true).unwrap()
        };

        let timer = tokio::spawn(run_countdown(Arc::clone(&state), epoch, Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(state.lock().await.phase(), RacePhase::Countdown(1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.lock().await.phase(), RacePhase::Active);
        assert!(timer.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_stops_when_lobby_empties() {
        let state: SharedState = Arc::new(Mutex::new(GameState::new(4)));
        let (handle, _rx) = session_handle();
        let (id, epoch) = {
            let mut game = state.lock().await;
            let id = game
                .join(JoinRequest::default(), handle, Instant::now())
                .unwrap();
            (id, game.set_ready(id, true).unwrap())
        };

        let timer = tokio::spawn(run_countdown(Arc::clone(&state), epoch, Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        state.lock().await.leave(id, DisconnectReason::Closed);

        assert!(timeout(Duration::from_secs(5), timer).await.is_ok());
        let game = state.lock().await;
        assert_eq!(game.phase(), RacePhase::Lobby);
        assert!(!game.race().game_active);
    }

    #[tokio::test]
    async fn test_handshake_and_ready_over_tcp() {
        let server = Server::bind(local_config(4)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let state = server.state();
        tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let init = ClientMessage::Init(JoinRequest {
            nickname: Some("tester".to_string()),
            ..JoinRequest::default()
        });
        write_message(&mut writer, &init).await.unwrap();

        match read_message::<ServerMessage, _>(&mut reader).await.unwrap() {
            ServerMessage::InitConfirm(welcome) => {
                assert_eq!(welcome.player_id, 0);
                assert_eq!(welcome.game_state.players[&0].nickname, "tester");
            }
            other => panic!("Expected init_confirm, got {:?}", other),
        }

        let ready = ClientMessage::Ready(ReadyStatus { ready: true });
        write_message(&mut writer, &ready).await.unwrap();

        let started = timeout(Duration::from_secs(2), async {
            loop {
                let message = read_message::<ServerMessage, _>(&mut reader).await.unwrap();
                if let ServerMessage::State(race) = message {
                    if race.countdown.is_some() {
                        break;
                    }
                }
            }
        })
        .await;
        assert!(started.is_ok());
        assert!(matches!(state.lock().await.phase(), RacePhase::Countdown(_)));
    }

    #[tokio::test]
    async fn test_first_message_must_be_init() {
        let server = Server::bind(local_config(4)).await.unwrap();
        let addr = server.local_addr().unwrap();
        let state = server.state();
        tokio::spawn(server.run());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let ready = ClientMessage::Ready(ReadyStatus { ready: true });
        write_message(&mut stream, &ready).await.unwrap();

        let result = timeout(
            Duration::from_secs(2),
            read_message::<ServerMessage, _>(&mut stream),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(e) if e.is_disconnect()));
        assert!(state.lock().await.clients().is_empty());
    }
}
