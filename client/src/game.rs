use log::debug;
use shared::protocol::ServerMessage;
use shared::{Car, ChatMessage, RaceState, Winner};
use std::collections::VecDeque;

/// Chat lines kept on the client side.
const CHAT_LINES: usize = 10;

/// What the client can tell about the race from the last snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceStatus {
    WaitingForPlayers,
    Countdown(u32),
    Racing,
    Finished,
}

/// Result of applying one server message.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    State,
    Chat(ChatMessage),
    Error(String),
    Ignored,
}

/// Client's copy of the race: the latest authoritative snapshot plus recent chat.
#[derive(Debug, Clone)]
pub struct ClientGameState {
    pub player_id: u32,
    pub race: RaceState,
    chat: VecDeque<ChatMessage>,
}

impl ClientGameState {
    pub fn new(player_id: u32, race: RaceState) -> Self {
        Self {
            player_id,
            race,
            chat: VecDeque::with_capacity(CHAT_LINES),
        }
    }

    /// Replaces the snapshot or records chat. The server's state always wins.
    pub fn apply(&mut self, message: ServerMessage) -> Update {
        match message {
            ServerMessage::State(race) => {
                self.race = race;
                Update::State
            }
            ServerMessage::Chat(chat) => {
                if self.chat.len() == CHAT_LINES {
                    self.chat.pop_front();
                }
                self.chat.push_back(chat.clone());
                Update::Chat(chat)
            }
            ServerMessage::Error(notice) => Update::Error(notice.message),
            ServerMessage::InitConfirm(_) => {
                debug!("Ignoring repeated init_confirm");
                Update::Ignored
            }
        }
    }

    pub fn my_car(&self) -> Option<&Car> {
        self.race.players.get(&self.player_id).map(|player| &player.car)
    }

    pub fn is_ready(&self) -> bool {
        self.race
            .players_ready
            .get(&self.player_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn status(&self) -> RaceStatus {
        if let Some(remaining) = self.race.countdown {
            RaceStatus::Countdown(remaining)
        } else if self.race.race_finished {
            RaceStatus::Finished
        } else if self.race.game_active {
            RaceStatus::Racing
        } else {
            RaceStatus::WaitingForPlayers
        }
    }

    pub fn winner(&self) -> Option<&Winner> {
        self.race.winner.as_ref()
    }

    pub fn chat(&self) -> impl Iterator<Item = &ChatMessage> {
        self.chat.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::ErrorNotice;
    use shared::{CarColor, Player, START_POSITIONS};

    fn state_with_me() -> ClientGameState {
        let mut race = RaceState::default();
        race.players.insert(
            1,
            Player {
                id: 1,
                nickname: "me".to_string(),
                car: Car::new(START_POSITIONS[1], CarColor::Blue),
            },
        );
        ClientGameState::new(1, race)
    }

    #[test]
    fn test_client_game_state_creation() {
        let state = state_with_me();
        assert_eq!(state.status(), RaceStatus::WaitingForPlayers);
        assert_eq!(state.my_car().unwrap().color, CarColor::Blue);
        assert!(!state.is_ready());
        assert!(state.winner().is_none());
    }

    #[test]
    fn test_state_update_replaces_snapshot() {
        let mut state = state_with_me();
        let mut race = state.race.clone();
        race.countdown = Some(2);
        race.players_ready.insert(1, true);
        race.players.get_mut(&1).unwrap().car.speed = 1.4;

        assert_eq!(state.apply(ServerMessage::State(race)), Update::State);
        assert_eq!(state.status(), RaceStatus::Countdown(2));
        assert!(state.is_ready());
        assert_approx_eq!(state.my_car().unwrap().speed, 1.4);
    }

    #[test]
    fn test_status_follows_race_flags() {
        let mut state = state_with_me();
        state.race.game_active = true;
        assert_eq!(state.status(), RaceStatus::Racing);
        state.race.race_finished = true;
        assert_eq!(state.status(), RaceStatus::Finished);
    }

    #[test]
    fn test_chat_is_bounded() {
        let mut state = state_with_me();
        for i in 0..25 {
            state.apply(ServerMessage::Chat(ChatMessage {
                sender: "system".to_string(),
                message: format!("line {}", i),
                time: String::new(),
            }));
        }
        let lines: Vec<_> = state.chat().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0].message, "line 15");
    }

    #[test]
    fn test_error_is_surfaced() {
        let mut state = state_with_me();
        let update = state.apply(ServerMessage::Error(ErrorNotice {
            message: "bad".to_string(),
        }));
        assert_eq!(update, Update::Error("bad".to_string()));
    }
}
