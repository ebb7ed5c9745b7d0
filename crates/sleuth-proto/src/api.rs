//! REST request and response shapes.
//!
//! The client never speaks HTTP itself. The session layer emits
//! [`ApiRequest`]s and a `GameApi` collaborator turns them into calls bound
//! to one game and one player, answering with an [`ApiResponse`] or an
//! [`ApiError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Card, CardId, GameId, PlayerId, PrivatePlayerView, SecretId, SetIndex, SetType, TurnSnapshot,
};

/// Pile the turn owner draws back up from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplenishSource {
    /// Face-down draw pile.
    Draw,
    /// Face-up draft row.
    Draft,
}

/// Bulk pile moves armed by event cards and resolved by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkMove {
    /// Early train to Paddington: draw pile to discard pile.
    Paddington,
    /// Delay the murderer's escape: discard pile back onto the draw pile.
    Delay,
}

/// One REST operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ApiRequest {
    /// Public turn data.
    FetchPublic {
        /// Game to fetch.
        game_id: GameId,
    },
    /// Private data of one player.
    FetchPrivate {
        /// Game to fetch.
        game_id: GameId,
        /// Viewer.
        player_id: PlayerId,
    },
    /// Discard a card from hand.
    Discard {
        /// Card to discard.
        card_id: CardId,
    },
    /// Play an event card into the action zone.
    PlayEvent {
        /// Event card.
        card_id: CardId,
    },
    /// Counter-play an instant card.
    PlayInstant {
        /// Instant card.
        card_id: CardId,
    },
    /// Put a detective set on the table.
    PlaySet {
        /// Cards forming the set.
        card_ids: Vec<CardId>,
    },
    /// Add a detective to one of the viewer's own sets.
    AddCardToSet {
        /// Detective card.
        card_id: CardId,
        /// Target set.
        set_index: SetIndex,
    },
    /// Turn a secret face up.
    RevealSecret {
        /// Secret owner.
        owner: PlayerId,
        /// Secret to reveal.
        secret_id: SecretId,
    },
    /// Turn a secret face down.
    HideSecret {
        /// Secret owner.
        owner: PlayerId,
        /// Secret to hide.
        secret_id: SecretId,
    },
    /// Make a player reveal a secret of their choice.
    ForceReveal {
        /// Player who must reveal.
        target: PlayerId,
        /// Whether the revealed secret then moves to the requester.
        steal: bool,
    },
    /// Move a secret between players.
    StealSecret {
        /// Current owner.
        from: PlayerId,
        /// Secret to move.
        secret_id: SecretId,
        /// New owner.
        to: PlayerId,
    },
    /// Take a whole played set.
    StealSet {
        /// Set owner.
        from: PlayerId,
        /// Set to take.
        set_index: SetIndex,
    },
    /// Attach a held card to another player's set.
    AttachToSet {
        /// Card from hand.
        card_id: CardId,
        /// Set owner.
        owner: PlayerId,
        /// Target set.
        set_index: SetIndex,
    },
    /// Cast a suspicion vote.
    VoteSuspicion {
        /// Suspected player.
        suspect: PlayerId,
    },
    /// Offer a card to a trade counterpart.
    ExchangeCards {
        /// Other side of the trade.
        counterpart: PlayerId,
        /// Card offered.
        card_id: CardId,
    },
    /// Make a player discard every instant card in hand.
    StripInstants {
        /// Player to strip.
        target: PlayerId,
    },
    /// Draw one card back into hand.
    Replenish {
        /// Pile to draw from.
        source: ReplenishSource,
    },
    /// Look at the top of the discard pile.
    PeekDiscard {
        /// How many cards.
        count: usize,
    },
    /// Take a card from the discard pile into hand.
    TakeFromDiscard {
        /// Card to take.
        card_id: CardId,
    },
    /// Run a bulk pile move.
    BulkMove {
        /// Which move.
        kind: BulkMove,
    },
}

impl ApiRequest {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchPublic { .. } => "fetch_public",
            Self::FetchPrivate { .. } => "fetch_private",
            Self::Discard { .. } => "discard",
            Self::PlayEvent { .. } => "play_event",
            Self::PlayInstant { .. } => "play_instant",
            Self::PlaySet { .. } => "play_set",
            Self::AddCardToSet { .. } => "add_card_to_set",
            Self::RevealSecret { .. } => "reveal_secret",
            Self::HideSecret { .. } => "hide_secret",
            Self::ForceReveal { .. } => "force_reveal",
            Self::StealSecret { .. } => "steal_secret",
            Self::StealSet { .. } => "steal_set",
            Self::AttachToSet { .. } => "attach_to_set",
            Self::VoteSuspicion { .. } => "vote_suspicion",
            Self::ExchangeCards { .. } => "exchange_cards",
            Self::StripInstants { .. } => "strip_instants",
            Self::Replenish { .. } => "replenish",
            Self::PeekDiscard { .. } => "peek_discard",
            Self::TakeFromDiscard { .. } => "take_from_discard",
            Self::BulkMove { .. } => "bulk_move",
        }
    }
}

/// Acknowledgement of a game action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionAck {
    /// Seconds of response window granted; zero means none.
    #[serde(default)]
    pub timer: u32,
    /// Set type of the set the action produced or touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_type: Option<SetType>,
    /// Remaining structured payload.
    #[serde(default)]
    pub detail: Value,
}

impl ActionAck {
    /// Acknowledgement with a response window.
    pub fn with_timer(timer: u32) -> Self {
        Self { timer, ..Self::default() }
    }
}

/// Successful REST result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ApiResponse {
    /// Public turn data.
    Public(TurnSnapshot),
    /// Private player data.
    Private(PrivatePlayerView),
    /// Action acknowledgement.
    Ack(ActionAck),
    /// A list of cards (peek results).
    Cards(Vec<Card>),
}

impl ApiResponse {
    /// Acknowledgement payload; other payloads yield an empty ack.
    pub fn into_ack(self) -> ActionAck {
        match self {
            Self::Ack(ack) => ack,
            _ => ActionAck::default(),
        }
    }
}

/// Failed REST call: HTTP-like status plus detail payload.
///
/// Status `0` is used for transport failures where no response arrived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request failed with status {status}: {detail}")]
pub struct ApiError {
    /// HTTP-like status code.
    pub status: u16,
    /// Server detail payload.
    pub detail: Value,
}

impl ApiError {
    /// Error with a plain message as detail.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, detail: Value::String(message.into()) }
    }

    /// Transport failure, no response received.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    /// Whether the request never reached the server.
    pub fn is_transport(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ack_defaults_missing_fields() {
        let ack: ActionAck = serde_json::from_str(r#"{"timer": 5}"#).unwrap();
        assert_eq!(ack.timer, 5);
        assert_eq!(ack.set_type, None);
        assert_eq!(ack.detail, Value::Null);
    }

    #[test]
    fn ack_decodes_set_type() {
        let ack: ActionAck =
            serde_json::from_str(r#"{"timer": 3, "set_type": "Parker Pyne"}"#).unwrap();
        assert_eq!(ack.set_type, Some(SetType::ParkerPyne));
    }

    #[test]
    fn request_is_tagged_by_op() {
        let json = serde_json::to_value(ApiRequest::VoteSuspicion { suspect: 4 }).unwrap();
        assert_eq!(json, serde_json::json!({"op": "vote_suspicion", "suspect": 4}));
    }

    #[test]
    fn error_display_includes_status() {
        let err = ApiError::new(409, "not your turn");
        assert_eq!(err.to_string(), r#"request failed with status 409: "not your turn""#);
        assert!(!err.is_transport());
        assert!(ApiError::transport("refused").is_transport());
    }

    #[test]
    fn non_ack_response_yields_empty_ack() {
        let response = ApiResponse::Cards(Vec::new());
        assert_eq!(response.into_ack(), ActionAck::default());
    }
}
