use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod codec;
pub mod protocol;

pub const SCREEN_WIDTH: f32 = 810.0;
pub const SCREEN_HEIGHT: f32 = 810.0;
pub const CAR_WIDTH: f32 = 16.0;
pub const CAR_HEIGHT: f32 = 39.0;
pub const MAX_SPEED: f32 = 5.0;
pub const MIN_SPEED: f32 = -3.0;

pub const DEFAULT_PORT: u16 = 5555;
pub const MAX_PLAYERS: usize = 4;

/// Sender name used for join, leave and race announcements.
pub const SYSTEM_SENDER: &str = "system";

/// Starting grid, one slot per player the server can hold.
pub const START_POSITIONS: [(f32, f32); MAX_PLAYERS] =
    [(180.0, 200.0), (210.0, 200.0), (150.0, 200.0), (240.0, 200.0)];

pub const OBSTACLES: [Obstacle; 3] = [
    Obstacle {
        x: 100.0,
        y: 100.0,
        width: 50.0,
        height: 200.0,
    },
    Obstacle {
        x: 300.0,
        y: 300.0,
        width: 200.0,
        height: 50.0,
    },
    Obstacle {
        x: 600.0,
        y: 150.0,
        width: 50.0,
        height: 150.0,
    },
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CarColor {
    #[default]
    LightBlue,
    Pink,
    Blue,
    Green,
}

impl CarColor {
    pub const ALL: [CarColor; 4] = [
        CarColor::LightBlue,
        CarColor::Pink,
        CarColor::Blue,
        CarColor::Green,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CarColor::LightBlue => "light_blue",
            CarColor::Pink => "pink",
            CarColor::Blue => "blue",
            CarColor::Green => "green",
        }
    }
}

impl std::str::FromStr for CarColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CarColor::ALL
            .into_iter()
            .find(|color| color.as_str() == s)
            .ok_or_else(|| format!("unknown car color '{}'", s))
    }
}

/// A car's pose and velocity. `angle` is in degrees, 0 pointing up the screen.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Car {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub speed: f32,
    pub color: CarColor,
    pub start_x: f32,
    pub start_y: f32,
}

impl Car {
    pub fn new(start: (f32, f32), color: CarColor) -> Self {
        Self {
            x: start.0,
            y: start.1,
            angle: 0.0,
            speed: 0.0,
            color,
            start_x: start.0,
            start_y: start.1,
        }
    }

    pub fn reset_to_start(&mut self) {
        self.x = self.start_x;
        self.y = self.start_y;
        self.angle = 0.0;
        self.speed = 0.0;
    }

    /// Half the diagonal of the car's bounding box; the car's center never
    /// gets closer than this to a field edge.
    pub fn padding() -> f32 {
        (CAR_WIDTH * CAR_WIDTH + CAR_HEIGHT * CAR_HEIGHT).sqrt() / 2.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Player {
    pub id: u32,
    pub nickname: String,
    pub car: Car,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Winner {
    pub player_id: u32,
    pub nickname: String,
    /// Elapsed race time in seconds, two decimals.
    pub time: String,
}

/// The authoritative world snapshot, broadcast whole every tick.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RaceState {
    pub players: BTreeMap<u32, Player>,
    pub obstacles: Vec<Obstacle>,
    pub game_active: bool,
    pub countdown: Option<u32>,
    pub players_ready: BTreeMap<u32, bool>,
    /// Unix time in seconds.
    pub race_start_time: Option<f64>,
    pub winner: Option<Winner>,
    pub race_finished: bool,
}

impl RaceState {
    pub fn new(obstacles: Vec<Obstacle>) -> Self {
        Self {
            players: BTreeMap::new(),
            obstacles,
            game_active: false,
            countdown: None,
            players_ready: BTreeMap::new(),
            race_start_time: None,
            winner: None,
            race_finished: false,
        }
    }
}

impl Default for RaceState {
    fn default() -> Self {
        Self::new(OBSTACLES.to_vec())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub sender: String,
    pub message: String,
    pub time: String,
}

impl ChatMessage {
    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }
}
