//! Runtime configuration.

use std::time::Duration;

use sleuth_core::SessionConfig;
use sleuth_proto::{GameId, PlayerId};

/// Configuration for a [`Driver`](crate::Driver).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Realtime endpoint, without query string.
    pub realtime_url: String,
    /// Game to join.
    pub game_id: GameId,
    /// The viewing player.
    pub player_id: PlayerId,
    /// Session timings and limits.
    pub session: SessionConfig,
    /// How often the driver ticks the session.
    pub tick_interval: Duration,
    /// Capacity of the update channel handed to the embedder.
    pub update_capacity: usize,
}

impl ClientConfig {
    /// Configuration with default timings.
    pub fn new(realtime_url: impl Into<String>, game_id: GameId, player_id: PlayerId) -> Self {
        Self {
            realtime_url: realtime_url.into(),
            game_id,
            player_id,
            session: SessionConfig::default(),
            tick_interval: Duration::from_millis(250),
            update_capacity: 64,
        }
    }

    /// Realtime URL with the game and player query parameters.
    pub fn channel_url(&self) -> String {
        let separator = if self.realtime_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}game_id={}&player_id={}",
            self.realtime_url, self.game_id, self.player_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_url_appends_ids() {
        let config = ClientConfig::new("wss://game.test/ws", 4, 9);
        assert_eq!(config.channel_url(), "wss://game.test/ws?game_id=4&player_id=9");

        let config = ClientConfig::new("wss://game.test/ws?v=2", 4, 9);
        assert_eq!(config.channel_url(), "wss://game.test/ws?v=2&game_id=4&player_id=9");
    }
}
