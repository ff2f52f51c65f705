//! Runtime settings for the session server.

use serde::Serialize;
use shared::MAX_PLAYERS;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Ticks per second.
    pub tick_rate: u32,
    /// Upper bound on how long one readiness poll may wait.
    pub poll_wait: Duration,
    pub max_players: usize,
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6000,
            tick_rate: 30,
            poll_wait: Duration::from_millis(5),
            max_players: MAX_PLAYERS,
        }
    }
}
