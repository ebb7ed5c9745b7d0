//! Session events (inputs) and actions (outputs).

use sleuth_proto::{
    ApiError, ApiRequest, ApiResponse, BulkMove, Card, CardId, GameId, PlayerId, PlayerSummary,
    PrivatePlayerView, ReplenishSource, SecretId, SetIndex, TurnSnapshot,
};

use crate::{
    channel::ConnectionState,
    orchestrator::{DiscardPick, EffectKind, PendingEffect},
    outbox::RequestId,
    selection::{SelectionMode, SelectionState},
};

/// Where a dragged card was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    /// The discard pile.
    DiscardPile,
    /// The action zone in the middle of the table.
    ActionZone,
}

/// Input to [`Session::handle`](crate::Session::handle).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Open the realtime channel.
    Connect,
    /// Close the realtime channel for good.
    Disconnect,
    /// Refetch public and private state.
    Refresh,
    /// Advance timers. The driver sends this periodically.
    Tick,

    /// The socket requested by `OpenChannel` is open.
    ChannelOpened,
    /// Text frame from the socket.
    FrameReceived(String),
    /// The socket closed.
    ChannelClosed {
        /// WebSocket close code.
        code: u16,
    },
    /// Answer to a `Call` action.
    Response {
        /// Request being answered.
        id: RequestId,
        /// Outcome.
        result: Result<ApiResponse, ApiError>,
    },

    /// A card was dragged onto the board.
    DropCard {
        /// The card.
        card_id: CardId,
        /// Where it landed.
        target: DropTarget,
    },
    /// Play the given cards as a detective set.
    PlaySet {
        /// Cards in the set.
        card_ids: Vec<CardId>,
    },
    /// Stage a card for add-to-set.
    StageCard {
        /// The card.
        card_id: CardId,
    },
    /// Unstage a card.
    UnstageCard {
        /// The card.
        card_id: CardId,
    },
    /// Add the staged card to one of the viewer's sets.
    AddCardToSet {
        /// Target set.
        set_index: SetIndex,
    },
    /// Player clicked a player.
    PickPlayer {
        /// The player.
        player: PlayerId,
    },
    /// Player clicked a secret.
    PickSecret {
        /// Owner of the secret.
        owner: PlayerId,
        /// The secret.
        secret: SecretId,
    },
    /// Player clicked a played set.
    PickSet {
        /// Owner of the set.
        owner: PlayerId,
        /// The set.
        set_index: SetIndex,
    },
    /// Arm a selection directly.
    ArmSelection {
        /// Mode.
        mode: SelectionMode,
        /// Raw qualifier tag.
        qualifier: Option<String>,
    },
    /// Open the discard top-N pick.
    StartDiscardTop5,
    /// Take a card from the discard top-N pick.
    PickFromDiscard {
        /// The card.
        card_id: CardId,
    },
    /// Offer a card in the open trade.
    StartCardTrade {
        /// The card.
        card_id: CardId,
    },
    /// Run the armed bulk pile move.
    ResolveBulkMove,
    /// Start attaching an Ariadne Oliver card to another player's set.
    StartAriadne {
        /// The Ariadne card.
        card_id: CardId,
    },
    /// Draw back up by hand.
    Replenish {
        /// Pile to draw from.
        source: ReplenishSource,
    },
}

/// Something the rendering layer should tell the player.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A request failed and its flow was cleared or rolled back.
    RequestFailed {
        /// Operation name.
        operation: &'static str,
        /// Server error.
        error: ApiError,
    },
    /// A pending effect was countered and will not run.
    EffectCountered {
        /// Kind of the dropped effect.
        kind: EffectKind,
    },
    /// The realtime channel gave up reconnecting.
    ConnectionFailed {
        /// Attempts made.
        attempts: u32,
    },
}

/// Output of [`Session::handle`](crate::Session::handle).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Open the realtime socket.
    OpenChannel {
        /// Game to subscribe to.
        game_id: GameId,
        /// Viewer.
        player_id: PlayerId,
    },
    /// Send a text frame on the socket.
    SendFrame(String),
    /// Close the socket.
    CloseChannel {
        /// WebSocket close code.
        code: u16,
    },
    /// Issue a REST call; answer with `SessionEvent::Response`.
    Call {
        /// Correlation id.
        id: RequestId,
        /// The call.
        request: ApiRequest,
    },
    /// Tell the player something.
    Notify(Notice),
}

/// Everything the rendering layer reads.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    /// Public snapshot.
    pub turn: Option<TurnSnapshot>,
    /// Viewer's private view.
    pub private: Option<PrivatePlayerView>,
    /// Players rotated so the viewer comes first.
    pub ordered_players: Vec<PlayerSummary>,
    /// Armed selection.
    pub selection: SelectionState,
    /// Effect waiting on the response window.
    pub pending: Option<PendingEffect>,
    /// Seconds left in the response window.
    pub countdown: u32,
    /// Event card on its way into the action zone.
    pub currently_played: Option<Card>,
    /// Realtime connectivity.
    pub connection: ConnectionState,
    /// Whether a fetch is outstanding.
    pub is_loading: bool,
    /// Whether a fetch ever completed.
    pub has_loaded_once: bool,
    /// Cards staged for add-to-set.
    pub staged: Vec<CardId>,
    /// Viewer's sets the staged card can join.
    pub matching_sets: Vec<SetIndex>,
    /// Discard top-N pick.
    pub discard_pick: DiscardPick,
    /// Counterpart of the open trade.
    pub trade_counterpart: Option<PlayerId>,
    /// Bulk move waiting to be resolved.
    pub bulk_move: Option<BulkMove>,
}
