//! Race lifecycle: lobby, countdown, active race and finish.
//!
//! The phase is not stored separately; it is derived from the `game_active`,
//! `countdown` and `race_finished` fields of [`RaceState`] so the broadcast
//! snapshot and the state machine can never disagree.

use crate::utils::format_race_time;
use log::info;
use shared::{RaceState, Winner};

/// Seconds counted down before a race starts.
pub const COUNTDOWN_SECONDS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RacePhase {
    Lobby,
    Countdown(u32),
    Active,
    Finished,
}

impl RacePhase {
    pub fn of(state: &RaceState) -> RacePhase {
        if let Some(remaining) = state.countdown {
            RacePhase::Countdown(remaining)
        } else if state.race_finished {
            RacePhase::Finished
        } else if state.game_active {
            RacePhase::Active
        } else {
            RacePhase::Lobby
        }
    }
}

/// Result of one countdown timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    Remaining(u32),
    RaceStarted,
    /// No countdown is running any more; the timer should stop.
    Idle,
}

/// Records a ready flag and starts the countdown when every registered
/// player is ready. Returns true if this call started the countdown.
///
/// `registered` lists the currently registered player ids; flags for anyone
/// else are never consulted.
pub fn set_ready(state: &mut RaceState, registered: &[u32], player_id: u32, ready: bool) -> bool {
    state.players_ready.insert(player_id, ready);
    try_start_countdown(state, registered)
}

fn try_start_countdown(state: &mut RaceState, registered: &[u32]) -> bool {
    if RacePhase::of(state) != RacePhase::Lobby || registered.is_empty() {
        return false;
    }
    let all_ready = registered
        .iter()
        .all(|id| state.players_ready.get(id).copied().unwrap_or(false));
    if !all_ready {
        return false;
    }

    info!("All players ready, starting countdown");
    state.countdown = Some(COUNTDOWN_SECONDS);
    true
}

/// Advances a running countdown by one second. When it reaches zero the race
/// becomes active with `now` as its start time.
pub fn tick_countdown(state: &mut RaceState, now: f64) -> CountdownTick {
    let Some(remaining) = state.countdown else {
        return CountdownTick::Idle;
    };

    let remaining = remaining.saturating_sub(1);
    if remaining > 0 {
        state.countdown = Some(remaining);
        return CountdownTick::Remaining(remaining);
    }

    state.countdown = None;
    state.game_active = true;
    state.race_start_time = Some(now);
    info!("Race started!");
    CountdownTick::RaceStarted
}

/// Handles a finish-line crossing. The first crossing of an active race sets
/// the winner; later crossings, and crossings outside a race, change nothing.
pub fn record_finish(
    state: &mut RaceState,
    player_id: u32,
    nickname: &str,
    now: f64,
) -> Option<Winner> {
    if RacePhase::of(state) != RacePhase::Active {
        return None;
    }

    let elapsed = now - state.race_start_time.unwrap_or(now);
    let winner = Winner {
        player_id,
        nickname: nickname.to_string(),
        time: format_race_time(elapsed),
    };
    info!("Player {} won the race in {} seconds!", nickname, winner.time);

    state.winner = Some(winner.clone());
    state.race_finished = true;
    Some(winner)
}

/// Returns the race to the lobby, forgetting every ready flag.
pub fn reset(state: &mut RaceState) {
    state.game_active = false;
    state.countdown = None;
    state.players_ready.clear();
    state.race_start_time = None;
    state.winner = None;
    state.race_finished = false;
}
