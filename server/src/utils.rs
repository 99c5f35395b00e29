use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}

/// Formats an elapsed race time the way it is shown to players.
pub fn format_race_time(seconds: f64) -> String {
    format!("{:.2}", seconds.max(0.0))
}
