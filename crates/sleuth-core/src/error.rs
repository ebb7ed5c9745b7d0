//! Session error types.

use sleuth_proto::{CardId, CardKind, SetIndex, TurnPhase};
use thiserror::Error;

use crate::{selection::SelectionMode, store::FetchId};

/// Errors from the realtime channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Tried to send while the socket is not open.
    #[error("channel is not connected")]
    NotConnected,

    /// Outbound message could not be serialized.
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error returned by a channel listener.
///
/// Logged by the channel; delivery to the remaining listeners continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listener failed: {0}")]
pub struct ListenerError(pub String);

/// Errors from the session store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Completion for a fetch that is not outstanding (already failed or
    /// never issued).
    #[error("unknown fetch {fetch}")]
    UnknownFetch {
        /// The fetch ticket.
        fetch: FetchId,
    },
}

/// Errors arming a selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The mode and qualifier pair has no transition.
    #[error("no transition for {mode:?} with qualifier {qualifier:?}")]
    Unsupported {
        /// Requested mode.
        mode: SelectionMode,
        /// Raw qualifier as supplied.
        qualifier: Option<String>,
    },

    /// Ariadne selections need the card being attached.
    #[error("ariadne selection requires a card")]
    MissingCard,
}

/// Why a player intent was refused before reaching the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// No snapshot or private view yet.
    #[error("session has not loaded yet")]
    NotLoaded,

    /// Viewer does not own the turn.
    #[error("not the viewer's turn")]
    NotYourTurn,

    /// Turn phase does not allow the intent.
    #[error("not allowed during phase {phase:?}")]
    WrongPhase {
        /// Current phase.
        phase: TurnPhase,
    },

    /// Viewer is in social disgrace.
    #[error("only instant cards may be played in disgrace")]
    InDisgrace,

    /// A pending effect or its response window is still open.
    #[error("an effect is still pending")]
    EffectPending,

    /// Card is not in the viewer's hand.
    #[error("card {card_id} is not in hand")]
    UnknownCard {
        /// The card.
        card_id: CardId,
    },

    /// Card kind cannot go where it was dropped.
    #[error("{kind:?} cards cannot be played into the action zone")]
    NotPlayable {
        /// The card's kind.
        kind: CardKind,
    },

    /// Instant played with no response window open.
    #[error("no response window is open")]
    NoResponseWindow,

    /// The per-turn disgrace discard has already been used or is in flight.
    #[error("disgrace discard already used this turn")]
    DiscardLocked,

    /// Add-to-set needs exactly one staged card.
    #[error("expected exactly one staged card, found {count}")]
    StagedCount {
        /// Staged cards.
        count: usize,
    },

    /// Target set is not among the matching sets.
    #[error("set {set_index} does not match the staged card")]
    NoMatchingSet {
        /// Requested set.
        set_index: SetIndex,
    },

    /// A set play needs cards.
    #[error("a set needs at least one card")]
    EmptySet,

    /// No sub-flow of the requested kind is open.
    #[error("no {flow} in progress")]
    NoFlow {
        /// The flow name.
        flow: &'static str,
    },

    /// Sub-flow already waiting on the server.
    #[error("{flow} already in flight")]
    InFlight {
        /// The flow name.
        flow: &'static str,
    },
}

/// Errors from [`Session::handle`](crate::Session::handle).
#[derive(Debug, Error)]
pub enum SessionError {
    /// Intent refused client-side; nothing was sent.
    #[error("intent rejected: {0}")]
    Rejected(#[from] Rejection),

    /// Realtime channel failure.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Selection could not be armed.
    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),
}

impl SessionError {
    /// Returns true if this error is fatal (unrecoverable).
    ///
    /// Rejections and selection errors are user-level and leave the session
    /// usable. Encoding failures indicate a bug.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Channel(ChannelError::Encode(_)) => true,
            Self::Rejected(_) | Self::Selection(_) | Self::Channel(ChannelError::NotConnected) => {
                false
            },
        }
    }
}
