//! Sleuth wire protocol.
//!
//! Data model shared by the client session layer and the collaborators that
//! talk to the game server.
//!
//! # Components
//!
//! - [`card`]: hand and table cards, event names, detective set types
//! - [`snapshot`]: the public [`TurnSnapshot`] and the viewer's
//!   [`PrivatePlayerView`]
//! - [`api`]: REST request/response shapes consumed through `GameApi`
//! - [`message`]: realtime frames (inbound events, outbound ping)
//!
//! # Tags
//!
//! Server tags (card kinds, phases, set types, qualifiers) are compared after
//! [`normalize_tag`]: lowercase, ASCII alphanumerics only. `"Cards off the
//! table"`, `"cards_off_the_table"` and `" CARDS OFF THE TABLE "` are the same
//! tag.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod api;
pub mod card;
pub mod message;
pub mod snapshot;

pub use api::{ActionAck, ApiError, ApiRequest, ApiResponse, BulkMove, ReplenishSource};
pub use card::{Card, CardKind, EventCard, SetType};
pub use message::{EventKind, FrameError, InboundMessage, OutboundMessage, RealtimeEvent};
pub use snapshot::{
    EndGame, OwnSecret, Piles, PlayedSet, PlayerSummary, PrivatePlayerView, SecretSlot,
    TurnPhase, TurnSnapshot,
};

/// Game identifier.
pub type GameId = u64;

/// Player identifier, stable for the lifetime of a game.
pub type PlayerId = u64;

/// Card identifier, unique within a game.
pub type CardId = u64;

/// Secret card identifier.
pub type SecretId = u64;

/// Position of a played set in its owner's set list.
pub type SetIndex = usize;

/// Canonical form of a server tag.
///
/// Lowercases and drops everything that is not an ASCII letter or digit, so
/// comparisons ignore case, whitespace and punctuation.
pub fn normalize_tag(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_alphanumeric).map(|c| c.to_ascii_lowercase()).collect()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalize_ignores_case_and_spacing() {
        assert_eq!(normalize_tag("  Cards Off  the TABLE "), "cardsoffthetable");
        assert_eq!(normalize_tag("delay the murderer's escape!"), "delaythemurderersescape");
        assert_eq!(normalize_tag(""), "");
    }

    proptest! {
        #[test]
        fn normalized_tags_are_canonical(raw in "[ -~]{0,40}") {
            let tag = normalize_tag(&raw);
            prop_assert!(tag.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
            prop_assert_eq!(normalize_tag(&tag), tag.clone());
            prop_assert_eq!(normalize_tag(&raw.to_uppercase()), tag);
        }
    }
}
