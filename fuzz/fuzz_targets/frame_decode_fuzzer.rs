//! Fuzz target for realtime frame decoding
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary input interpreted as UTF-8 text frames
//! - Every decoded snapshot is pushed through viewer-first ordering
//!
//! # Invariants
//!
//! - NEVER panic on malformed JSON, wrong types or unknown frame kinds
//! - Ordering keeps every player exactly once
//! - Ordering puts the viewer first when present

#![no_main]

use libfuzzer_sys::fuzz_target;
use sleuth_core::reorder;
use sleuth_proto::{InboundMessage, RealtimeEvent};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(InboundMessage::Event(RealtimeEvent::GamePublicUpdate(snapshot))) =
        InboundMessage::decode(text)
    else {
        return;
    };

    let viewer = snapshot.turn_owner;
    let ordered = reorder(&snapshot.players, viewer);
    assert_eq!(ordered.len(), snapshot.players.len());
    for player in &snapshot.players {
        assert!(ordered.iter().any(|p| p == player));
    }
    if snapshot.player(viewer).is_some() {
        assert_eq!(ordered.first().map(|p| p.id), Some(viewer));
    }
});
