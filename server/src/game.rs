use crate::chat::ChatLog;
use crate::client_manager::{ClientManager, DisconnectReason, Frame, SessionHandle};
use crate::error::ServerError;
use crate::physics::{self, ControlOutcome};
use crate::race::{self, CountdownTick, RacePhase};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::codec::encode;
use shared::protocol::{ControlInput, JoinRequest, ServerMessage, Welcome, WireMessage};
use shared::{Car, Player, RaceState, START_POSITIONS, SYSTEM_SENDER};
use std::sync::Arc;
use tokio::time::{Duration, Instant};

/// Everything the server shares between connection workers and timers.
///
/// Lives behind one mutex; every method runs inside that critical section and
/// only ever queues frames, so no socket I/O happens while it is held.
pub struct GameState {
    race: RaceState,
    clients: ClientManager,
    chat: ChatLog,
    rng: StdRng,
    /// Bumped whenever the race is reset so stale countdown timers stop.
    race_epoch: u64,
}

impl GameState {
    pub fn new(max_players: usize) -> Self {
        Self::with_rng(max_players, StdRng::from_entropy())
    }

    pub fn with_rng(max_players: usize, rng: StdRng) -> Self {
        Self {
            race: RaceState::default(),
            clients: ClientManager::new(max_players),
            chat: ChatLog::default(),
            rng,
            race_epoch: 0,
        }
    }

    pub fn race(&self) -> &RaceState {
        &self.race
    }

    pub fn phase(&self) -> RacePhase {
        RacePhase::of(&self.race)
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn race_epoch(&self) -> u64 {
        self.race_epoch
    }

    /// Registers a player, places their car on the start grid and confirms
    /// the join to them before announcing it to everyone.
    pub fn join(
        &mut self,
        request: JoinRequest,
        handle: SessionHandle,
        now: Instant,
    ) -> Result<u32, ServerError> {
        let player_id = self
            .clients
            .register(request.nickname.as_deref(), handle, now)?;
        let nickname = self
            .clients
            .get(player_id)
            .map(|session| session.nickname.clone())
            .unwrap_or_default();

        let start = START_POSITIONS[player_id as usize % START_POSITIONS.len()];
        let player = Player {
            id: player_id,
            nickname: nickname.clone(),
            car: Car::new(start, request.car_color),
        };
        info!(
            "Added player {} at ({}, {}) with a {} car",
            player_id,
            start.0,
            start.1,
            request.car_color.as_str()
        );
        self.race.players.insert(player_id, player);

        let welcome = ServerMessage::InitConfirm(Welcome {
            player_id,
            game_state: self.race.clone(),
        });
        let delivered = match encode(&welcome) {
            Ok(frame) => self.clients.send_to(player_id, &Arc::new(frame)),
            Err(e) => {
                error!("Failed to encode welcome for player {}: {}", player_id, e);
                false
            }
        };
        if !delivered {
            // Never announced, so it goes without a chat line.
            self.clients.unregister(player_id);
            self.race.players.remove(&player_id);
            return Err(ServerError::Handshake(format!(
                "could not confirm join of player {}",
                player_id
            )));
        }

        self.post_chat(SYSTEM_SENDER, &format!("Player {} joined the game", nickname));
        Ok(player_id)
    }

    /// Removes a player and closes their connection. Returns false if the
    /// player was already gone.
    ///
    /// Sessions found dead while announcing the departure are removed in the
    /// same call.
    pub fn leave(&mut self, player_id: u32, reason: DisconnectReason) -> bool {
        let mut pending = vec![(player_id, reason)];
        let mut removed_requested = false;

        while let Some((id, reason)) = pending.pop() {
            let Some(session) = self.clients.unregister(id) else {
                continue;
            };
            removed_requested |= id == player_id;

            self.race.players.remove(&id);
            self.race.players_ready.remove(&id);
            info!("Player {} ({}) disconnected: {}", id, session.nickname, reason);

            if self.clients.is_empty() && self.phase() != RacePhase::Lobby {
                info!("All players left, returning to the lobby");
                race::reset(&mut self.race);
                self.race_epoch += 1;
            }

            let text = format!("Player {} left the game", session.nickname);
            if let Some(message) = self.chat.record(SYSTEM_SENDER, &text) {
                let dead = self.deliver(&ServerMessage::Chat(message));
                pending.extend(dead.into_iter().map(|id| (id, DisconnectReason::Transport)));
            }
        }

        removed_requested
    }

    /// Records inbound activity for the player.
    pub fn touch(&mut self, player_id: u32, now: Instant) -> bool {
        self.clients.touch(player_id, now)
    }

    /// Runs one control message through the physics engine. A finish crossing
    /// during an active race settles the winner.
    ///
    /// `now` is Unix time in seconds.
    pub fn apply_control(
        &mut self,
        player_id: u32,
        input: &ControlInput,
        now: f64,
    ) -> Option<ControlOutcome> {
        let player = self.race.players.get_mut(&player_id)?;
        let outcome = physics::apply_control(&mut player.car, input, &mut self.rng);
        if input.collision {
            debug!("Processing collision for player {}", player_id);
        }

        match outcome {
            ControlOutcome::FinishCrossed => {
                let nickname = player.nickname.clone();
                if let Some(winner) = race::record_finish(&mut self.race, player_id, &nickname, now)
                {
                    self.broadcast(&ServerMessage::State(self.race.clone()));
                    self.post_chat(
                        SYSTEM_SENDER,
                        &format!("{} won the race in {} seconds!", winner.nickname, winner.time),
                    );
                }
            }
            ControlOutcome::Driven
            | ControlOutcome::WallBounce
            | ControlOutcome::FinishSideBounce => {}
        }

        Some(outcome)
    }

    /// Records a ready flag. Returns the race epoch when this call started a
    /// countdown, which the caller hands to the countdown timer.
    pub fn set_ready(&mut self, player_id: u32, ready: bool) -> Option<u64> {
        if !self.clients.contains(player_id) {
            warn!("Ignoring ready status from unknown player {}", player_id);
            return None;
        }
        info!("Player {} ready status: {}", player_id, ready);

        let registered = self.clients.ids();
        if race::set_ready(&mut self.race, &registered, player_id, ready) {
            Some(self.race_epoch)
        } else {
            None
        }
    }

    /// One second of the countdown started in `epoch`. Stale epochs are idle.
    pub fn tick_countdown(&mut self, epoch: u64, now: f64) -> CountdownTick {
        if epoch != self.race_epoch {
            return CountdownTick::Idle;
        }

        let tick = race::tick_countdown(&mut self.race, now);
        if let CountdownTick::Remaining(remaining) = tick {
            debug!("Countdown: {}", remaining);
        }
        tick
    }

    /// Relays a chat line from a registered player under their nickname.
    pub fn chat_from(&mut self, player_id: u32, text: &str) -> bool {
        let Some(nickname) = self.clients.get(player_id).map(|s| s.nickname.clone()) else {
            return false;
        };
        self.post_chat(&nickname, text)
    }

    /// Stores and relays a chat line. Blank text is dropped silently.
    pub fn post_chat(&mut self, sender: &str, text: &str) -> bool {
        match self.chat.record(sender, text) {
            Some(message) => {
                self.broadcast(&ServerMessage::Chat(message));
                true
            }
            None => false,
        }
    }

    /// One Broadcast Loop cycle: drops timed-out sessions, then queues the
    /// whole race state to everyone left. Returns the number of sessions the
    /// state was queued for.
    pub fn broadcast_tick(&mut self, now: Instant, timeout: Duration) -> usize {
        for player_id in self.clients.sweep(now, timeout) {
            info!("Player {} timed out", player_id);
            self.leave(player_id, DisconnectReason::TimedOut);
        }
        if self.clients.is_empty() {
            return 0;
        }

        self.broadcast(&ServerMessage::State(self.race.clone()))
    }

    fn broadcast(&mut self, message: &ServerMessage) -> usize {
        let recipients = self.clients.len();
        let dead = self.deliver(message);
        let delivered = recipients - dead.len();
        for player_id in dead {
            self.leave(player_id, DisconnectReason::Transport);
        }
        delivered
    }

    /// Queues `message` to every session and returns the ones that failed.
    fn deliver(&self, message: &ServerMessage) -> Vec<u32> {
        match encode(message) {
            Ok(frame) => {
                let frame: Frame = Arc::new(frame);
                self.clients.deliver(&frame)
            }
            Err(e) => {
                error!("Failed to encode {} message: {}", message.kind(), e);
                Vec::new()
            }
        }
    }
}
