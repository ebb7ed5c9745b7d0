//! Fuzz target for the [`ChannelManager`] state machine
//!
//! # Strategy
//!
//! - Event sequences: arbitrary connects, disconnects, socket opens, frames,
//!   closes and clock advances, in any order
//! - Frames: well-formed pushes, pongs and arbitrary text
//!
//! # Invariants
//!
//! - NEVER panic on any event sequence or frame
//! - After `disconnect`, no `Open` is emitted until the next `connect`
//! - `disconnect` leaves the channel `Disconnected`
//! - An emitted `Open` leaves the channel connecting, never connected
//! - Reconnect attempts never exceed the configured maximum

#![no_main]

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sleuth_core::{ChannelAction, ChannelConfig, ChannelManager, ConnectionState};

/// Represents time as Duration since epoch 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FuzzInstant(Duration);

impl Sub for FuzzInstant {
    type Output = Duration;

    fn sub(self, other: Self) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

impl Add<Duration> for FuzzInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum ChannelEvent {
    Connect,
    Disconnect,
    Opened,
    Frame(FuzzedFrame),
    Closed { code: u16 },
    Tick { advance_ms: u16 },
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzedFrame {
    Pong,
    TimerTick { remaining: u32 },
    Status { connected: bool },
    Reconnecting { attempt: u32 },
    Public { turn_owner: u64, players: u8 },
    Text(String),
}

impl FuzzedFrame {
    fn encode(&self) -> String {
        let value = match self {
            Self::Pong => serde_json::json!({"type": "pong"}),
            Self::TimerTick { remaining } => {
                serde_json::json!({"type": "timer_tick", "remaining": remaining})
            },
            Self::Status { connected } => serde_json::json!({
                "type": "connection_status",
                "status": if *connected { "connected" } else { "disconnected" },
            }),
            Self::Reconnecting { attempt } => {
                serde_json::json!({"type": "reconnecting", "attempt": attempt})
            },
            Self::Public { turn_owner, players } => {
                let players: Vec<_> = (0..u64::from(*players % 8))
                    .map(|id| serde_json::json!({"id": id, "name": "p", "turn_order": id}))
                    .collect();
                serde_json::json!({
                    "type": "game_public_update",
                    "data": {"game_id": 1, "turn_owner": turn_owner, "players": players},
                })
            },
            Self::Text(text) => return text.clone(),
        };
        value.to_string()
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    events: Vec<ChannelEvent>,
}

fuzz_target!(|input: FuzzInput| {
    let config = ChannelConfig::default();
    let mut channel: ChannelManager<FuzzInstant> = ChannelManager::new(config);
    let mut now = FuzzInstant(Duration::ZERO);
    let mut manual = false;

    for event in input.events {
        let actions = match event {
            ChannelEvent::Connect => {
                manual = false;
                channel.connect()
            },
            ChannelEvent::Disconnect => {
                manual = true;
                let actions = channel.disconnect();
                assert_eq!(channel.state(), ConnectionState::Disconnected);
                actions
            },
            ChannelEvent::Opened => channel.handle_opened(now),
            ChannelEvent::Frame(frame) => channel.handle_frame(&frame.encode()),
            ChannelEvent::Closed { code } => channel.handle_closed(code, now),
            ChannelEvent::Tick { advance_ms } => {
                now = now + Duration::from_millis(u64::from(advance_ms) * 10);
                channel.tick(now)
            },
        };

        if actions.iter().any(|a| matches!(a, ChannelAction::Open)) {
            assert!(!manual, "Open emitted after disconnect");
            assert!(!channel.is_connected(), "Open emitted while connected");
        }

        match channel.state() {
            ConnectionState::Reconnecting { attempt } => {
                assert!(attempt <= config.max_reconnect_attempts);
            },
            ConnectionState::Failed { attempts } => {
                assert!(attempts <= config.max_reconnect_attempts);
            },
            _ => {},
        }
    }

    let _ = channel.disconnect();
    assert!(channel.disconnect().is_empty(), "second disconnect must be a no-op");
    assert_eq!(channel.state(), ConnectionState::Disconnected);
});
