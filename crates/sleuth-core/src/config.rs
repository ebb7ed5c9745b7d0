//! Session tuning knobs.
//!
//! Every constant the state machines depend on lives here so tests and the
//! replay tool can shrink timings without touching logic.

use std::time::Duration;

/// Realtime channel timing and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Interval between heartbeat pings while the channel is open.
    pub heartbeat_interval: Duration,
    /// Silence tolerated after a ping before the socket is force-closed.
    pub heartbeat_timeout: Duration,
    /// First reconnect delay; doubled on every further attempt.
    pub reconnect_base: Duration,
    /// Upper bound on a single reconnect delay.
    pub reconnect_cap: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
            max_reconnect_attempts: 5,
        }
    }
}

impl ChannelConfig {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.reconnect_base.saturating_mul(factor).min(self.reconnect_cap)
    }
}

/// Session-wide configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Realtime channel policy.
    pub channel: ChannelConfig,
    /// Hand size auto-replenish draws up to after a disgrace discard.
    pub hand_size: usize,
    /// Cards shown by the discard top-N pick.
    pub discard_peek: usize,
    /// Delay between a successful add-to-set and arming its effect, so the
    /// refreshed snapshot lands first.
    pub set_settle_delay: Duration,
    /// Local countdown decrement period.
    pub countdown_step: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            hand_size: 6,
            discard_peek: 5,
            set_settle_delay: Duration::from_millis(300),
            countdown_step: Duration::from_secs(1),
        }
    }
}
