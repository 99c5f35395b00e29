//! Session registry for connected players
//!
//! This module tracks every player that completed the handshake:
//! - Player id assignment (monotonic, never reused within a server's lifetime)
//! - Capacity enforcement against the configured player cap
//! - Liveness tracking and idle timeout detection
//! - The write side of each connection, shared by every task that sends to it
//!
//! Outbound frames are never written from here. Each session owns a bounded
//! queue drained by its own writer task, so sends are non-blocking and frames
//! from different senders cannot interleave on the socket.

use crate::error::ServerError;
use log::{info, warn};
use shared::SYSTEM_SENDER;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};

/// An encoded frame, shared between all sessions it is sent to.
pub type Frame = Arc<Vec<u8>>;

/// Sessions silent for longer than this are disconnected.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound frames a session may have queued before it counts as dead.
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    TimedOut,
    Transport,
    Protocol,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisconnectReason::Closed => "connection closed",
            DisconnectReason::TimedOut => "timed out",
            DisconnectReason::Transport => "transport error",
            DisconnectReason::Protocol => "protocol error",
        };
        f.write_str(reason)
    }
}

/// Write access to one connection.
///
/// The registry holds the only sender of the session's outbox; dropping the
/// handle ends the writer task, which then closes the socket's write half.
#[derive(Debug)]
pub struct SessionHandle {
    outbox: mpsc::Sender<Frame>,
    shutdown: Arc<Notify>,
}

impl SessionHandle {
    pub fn new(outbox: mpsc::Sender<Frame>, shutdown: Arc<Notify>) -> Self {
        Self { outbox, shutdown }
    }

    /// Queues a frame without waiting.
    pub fn send(&self, frame: &Frame) -> Result<(), TrySendError<Frame>> {
        self.outbox.try_send(Arc::clone(frame))
    }

    /// Asks the connection's reader to stop.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }
}

/// A registered player's connection and liveness metadata.
#[derive(Debug)]
pub struct Session {
    pub player_id: u32,
    pub nickname: String,
    pub last_activity: Instant,
    handle: SessionHandle,
}

impl Session {
    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_activity) > timeout
    }
}

/// Tracks all registered sessions.
pub struct ClientManager {
    sessions: BTreeMap<u32, Session>,
    next_player_id: u32,
    max_players: usize,
}

impl ClientManager {
    /// Creates an empty registry. Player ids start from 0.
    pub fn new(max_players: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            next_player_id: 0,
            max_players,
        }
    }

    /// Registers a new session and returns its player id.
    ///
    /// A missing or blank nickname, or one that would pass for the system
    /// sender, becomes `Player<id>`.
    pub fn register(
        &mut self,
        requested_nickname: Option<&str>,
        handle: SessionHandle,
        now: Instant,
    ) -> Result<u32, ServerError> {
        if self.sessions.len() >= self.max_players {
            return Err(ServerError::ServerFull);
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;

        let nickname = match requested_nickname.map(str::trim) {
            Some(name) if !name.is_empty() && !name.eq_ignore_ascii_case(SYSTEM_SENDER) => {
                name.to_string()
            }
            _ => format!("Player{}", player_id),
        };

        info!("Player {} registered as '{}'", player_id, nickname);
        self.sessions.insert(
            player_id,
            Session {
                player_id,
                nickname,
                last_activity: now,
                handle,
            },
        );
        Ok(player_id)
    }

    /// Records inbound activity. Returns false for unknown ids.
    pub fn touch(&mut self, player_id: u32, now: Instant) -> bool {
        match self.sessions.get_mut(&player_id) {
            Some(session) => {
                session.last_activity = now;
                true
            }
            None => false,
        }
    }

    /// Lists sessions idle for longer than `timeout`. The caller disconnects them.
    pub fn sweep(&self, now: Instant, timeout: Duration) -> Vec<u32> {
        self.sessions
            .values()
            .filter(|session| session.is_timed_out(now, timeout))
            .map(|session| session.player_id)
            .collect()
    }

    /// Removes a session and closes its connection. Unknown ids are ignored.
    pub fn unregister(&mut self, player_id: u32) -> Option<Session> {
        let session = self.sessions.remove(&player_id)?;
        session.handle.close();
        Some(session)
    }

    /// Queues a frame for one session. Returns false if the session is
    /// unknown or its outbox is closed or full.
    pub fn send_to(&self, player_id: u32, frame: &Frame) -> bool {
        match self.sessions.get(&player_id) {
            Some(session) => Self::try_deliver(session, frame),
            None => false,
        }
    }

    /// Queues a frame for every session and returns the ids that could not
    /// take it. A failure never stops delivery to the remaining sessions.
    pub fn deliver(&self, frame: &Frame) -> Vec<u32> {
        self.sessions
            .values()
            .filter(|session| !Self::try_deliver(session, frame))
            .map(|session| session.player_id)
            .collect()
    }

    fn try_deliver(session: &Session, frame: &Frame) -> bool {
        match session.handle.send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue of player {} is full", session.player_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Connection of player {} is gone", session.player_id);
                false
            }
        }
    }

    pub fn get(&self, player_id: u32) -> Option<&Session> {
        self.sessions.get(&player_id)
    }

    pub fn contains(&self, player_id: u32) -> bool {
        self.sessions.contains_key(&player_id)
    }

    /// Registered player ids in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        self.sessions.keys().copied().collect()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
