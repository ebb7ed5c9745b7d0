//! Action orchestrator.
//!
//! Turns player intents (drop a card, play a set, add to a set, the event
//! sub-flows) into REST calls, applies their optimistic local effect, and
//! rolls it back when the server refuses.
//!
//! # Response window
//!
//! Event cards and sets do not take effect immediately. The server answers
//! with a countdown during which other players may counter with instant
//! cards; the consequence is held as a [`PendingEffect`]. When the countdown
//! reaches zero the effect runs exactly once if the turn is still in the
//! `Playing` phase, and is dropped otherwise (it was countered). What running
//! it means is a [`FollowUp`]: usually arming a selection.
//!
//! # Legality
//!
//! Every intent is checked against the latest snapshot before anything is
//! sent. Illegal intents return a [`Rejection`] and never reach the network.
//! Responses are matched to their intent through tickets carrying what the
//! rollback needs. Each half (public piles, private hand) rolls back only if
//! no newer authoritative write replaced it; a half that was superseded is
//! left alone and a refetch is requested instead.

use std::time::Duration;

use sleuth_proto::{
    ActionAck, ApiError, ApiRequest, ApiResponse, BulkMove, Card, CardId, CardKind, EventCard,
    Piles, PlayerId, ReplenishSource, SetIndex, SetType, TurnPhase, TurnSnapshot,
};
use tracing::{debug, info, warn};

use crate::{
    config::SessionConfig,
    env::Timestamp,
    error::Rejection,
    event::{DropTarget, Notice},
    outbox::{Continuation, Outbox},
    selection::{Qualifier, SelectionMode},
    store::{FetchId, SessionStore},
};

/// Kind of a pending effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// From an event card.
    Event,
    /// From a detective set.
    Set,
}

/// Consequence held back during the response window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEffect {
    /// An event card was played.
    Event {
        /// The card.
        card: Card,
        /// Server acknowledgement.
        ack: ActionAck,
    },
    /// A set was played or extended.
    Set {
        /// Type of the set.
        set_type: SetType,
        /// Server acknowledgement.
        ack: ActionAck,
    },
}

impl PendingEffect {
    /// Kind of this effect.
    pub fn kind(&self) -> EffectKind {
        match self {
            Self::Event { .. } => EffectKind::Event,
            Self::Set { .. } => EffectKind::Set,
        }
    }

    fn ack(&self) -> &ActionAck {
        match self {
            Self::Event { ack, .. } | Self::Set { ack, .. } => ack,
        }
    }

    /// What running this effect does. `None` for unknown cards or sets.
    pub fn follow_up(&self) -> Option<FollowUp> {
        use SelectionMode as M;

        let select = |mode, qualifier| Some(FollowUp::Select { mode, qualifier });
        match self {
            Self::Event { card, .. } => match card.event()? {
                EventCard::LookIntoTheAshes => Some(FollowUp::DiscardTopPick),
                EventCard::AndThenThereWasOneMore => {
                    select(M::SelectOtherRevealedSecret, Some(Qualifier::OneMore))
                },
                EventCard::EarlyTrainToPaddington => Some(FollowUp::BulkMove(BulkMove::Paddington)),
                EventCard::DelayTheMurderersEscape => Some(FollowUp::BulkMove(BulkMove::Delay)),
                EventCard::AnotherVictim => select(M::SelectSet, Some(Qualifier::Another)),
                EventCard::CardTrade => select(M::SelectOtherPlayer, Some(Qualifier::CardTrade)),
                EventCard::CardsOffTheTable => {
                    select(M::SelectOtherPlayer, Some(Qualifier::CardsOffTheTable))
                },
                EventCard::PointYourSuspicions => {
                    select(M::SelectOtherPlayer, Some(Qualifier::Point))
                },
            },
            Self::Set { set_type, .. } => match set_type {
                SetType::Poirot | SetType::Marple => select(M::SelectOtherNotRevealedSecret, None),
                SetType::ParkerPyne => select(M::SelectRevealedSecret, None),
                SetType::Beresford | SetType::EileenBrent | SetType::Satterthwaite => {
                    select(M::SelectOtherPlayer, None)
                },
                SetType::SatterthwaiteQuin => {
                    select(M::SelectOtherPlayer, Some(Qualifier::Specials))
                },
                SetType::Other(_) => None,
            },
        }
    }
}

/// What a resolved effect asks the session to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    /// Arm a selection.
    Select {
        /// Mode.
        mode: SelectionMode,
        /// Qualifier.
        qualifier: Option<Qualifier>,
    },
    /// Open the discard top-N pick.
    DiscardTopPick,
    /// Arm a bulk pile move for the board to resolve.
    BulkMove(BulkMove),
}

/// Discard top-N pick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DiscardPick {
    /// Not open.
    #[default]
    Closed,
    /// Peek requested.
    Loading,
    /// Waiting for the player to choose.
    Choosing(Vec<Card>),
    /// Take requested.
    Taking,
}

#[derive(Debug, Clone, Copy)]
struct Countdown<I> {
    remaining: u32,
    last_step: Option<I>,
}

impl<I: Timestamp> Countdown<I> {
    fn set(&mut self, remaining: u32, now: I) {
        self.remaining = remaining;
        self.last_step = Some(now);
    }

    /// Step down once per elapsed `step`. True if this call reached zero.
    fn advance(&mut self, now: I, step: Duration) -> bool {
        let Some(last) = self.last_step else {
            return false;
        };
        if self.remaining == 0 || step.is_zero() {
            return false;
        }

        let steps = (now - last).as_nanos() / step.as_nanos();
        if steps == 0 {
            return false;
        }
        let steps = u32::try_from(steps).unwrap_or(u32::MAX);
        self.remaining = self.remaining.saturating_sub(steps);
        self.last_step = Some(last + step.saturating_mul(steps));
        self.remaining == 0
    }
}

/// Hand and piles before an optimistic edit.
#[derive(Debug, Clone)]
pub(crate) struct Rollback {
    hand: Vec<Card>,
    piles: Option<Piles>,
    public_revision: u64,
    private_revision: u64,
}

impl Rollback {
    fn capture(store: &SessionStore, hand: Vec<Card>, piles: Option<Piles>) -> Self {
        Self {
            hand,
            piles,
            public_revision: store.public_revision(),
            private_revision: store.private_revision(),
        }
    }

    /// Put back each half that no newer write replaced. Refetches if either
    /// half was skipped.
    fn restore(self, store: &mut SessionStore, out: &mut Outbox) {
        let public_current = store.public_revision() == self.public_revision;
        let private_current = store.private_revision() == self.private_revision;
        if let Some((turn, private)) = store.optimistic() {
            if private_current {
                private.hand = self.hand;
            }
            if let Some(piles) = self.piles.filter(|_| public_current) {
                turn.piles = piles;
            }
        }

        if !(public_current && private_current) {
            debug!(public_current, private_current, "rollback partly superseded, refetching");
            out.request_refresh();
        }
    }
}

/// Response context of a discard.
#[derive(Debug)]
pub(crate) struct DiscardTicket {
    rollback: Rollback,
    disgrace: bool,
    owner: PlayerId,
}

/// Response context of an event play.
#[derive(Debug)]
pub(crate) struct EventTicket {
    card: Card,
    rollback: Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Open,
    InFlight,
    Used,
}

/// One disgrace discard per turn, keyed by turn owner.
#[derive(Debug, Clone, Copy)]
struct DiscardLock {
    owner: Option<PlayerId>,
    state: LockState,
}

impl DiscardLock {
    fn sync(&mut self, turn_owner: PlayerId) {
        if self.owner != Some(turn_owner) {
            self.owner = Some(turn_owner);
            self.state = LockState::Open;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ReplenishLoop {
    owner: PlayerId,
    awaiting: Option<FetchId>,
}

#[derive(Debug, Clone)]
struct Settling<I> {
    effect: PendingEffect,
    ready_at: I,
}

#[derive(Debug, Clone, Copy)]
struct Trade {
    counterpart: PlayerId,
    in_flight: bool,
}

/// Intent handling and the response window.
///
/// # Type Parameters
///
/// - `I`: instant type of the session's environment
pub struct Orchestrator<I> {
    viewer: PlayerId,
    config: SessionConfig,
    pending: Option<PendingEffect>,
    countdown: Countdown<I>,
    currently_played: Option<Card>,
    staged: Vec<CardId>,
    settling: Option<Settling<I>>,
    discard_lock: DiscardLock,
    replenish: Option<ReplenishLoop>,
    discard_pick: DiscardPick,
    trade: Option<Trade>,
    bulk_move: Option<BulkMove>,
}

impl<I: Timestamp> Orchestrator<I> {
    /// Idle orchestrator for `viewer`.
    pub fn new(viewer: PlayerId, config: SessionConfig) -> Self {
        Self {
            viewer,
            config,
            pending: None,
            countdown: Countdown { remaining: 0, last_step: None },
            currently_played: None,
            staged: Vec::new(),
            settling: None,
            discard_lock: DiscardLock { owner: None, state: LockState::Open },
            replenish: None,
            discard_pick: DiscardPick::Closed,
            trade: None,
            bulk_move: None,
        }
    }

    /// Effect waiting for its response window to close.
    pub fn pending(&self) -> Option<&PendingEffect> {
        self.pending.as_ref()
    }

    /// Seconds left in the response window.
    pub fn countdown(&self) -> u32 {
        self.countdown.remaining
    }

    /// Event card on its way into the action zone.
    pub fn currently_played(&self) -> Option<&Card> {
        self.currently_played.as_ref()
    }

    /// Cards staged for add-to-set.
    pub fn staged(&self) -> &[CardId] {
        &self.staged
    }

    /// State of the discard top-N pick.
    pub fn discard_pick(&self) -> &DiscardPick {
        &self.discard_pick
    }

    /// Counterpart of the open trade.
    pub fn trade_counterpart(&self) -> Option<PlayerId> {
        self.trade.map(|t| t.counterpart)
    }

    /// Bulk move waiting to be resolved.
    pub fn bulk_move(&self) -> Option<BulkMove> {
        self.bulk_move
    }

    /// Whether auto-replenish is running.
    pub fn is_replenishing(&self) -> bool {
        self.replenish.is_some()
    }

    /// Whether an effect is pending, settling, counting down, or an event
    /// play is awaiting its answer. No new selection may start meanwhile.
    pub fn effect_blocking(&self) -> bool {
        self.pending.is_some()
            || self.settling.is_some()
            || self.currently_played.is_some()
            || self.countdown.remaining > 0
    }

    /// Route a card dropped on the board.
    pub(crate) fn drop_card(
        &mut self,
        card_id: CardId,
        target: DropTarget,
        store: &mut SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        match target {
            DropTarget::DiscardPile => self.discard(card_id, store, out),
            DropTarget::ActionZone => {
                let kind = store
                    .private_view()
                    .ok_or(Rejection::NotLoaded)?
                    .card(card_id)
                    .ok_or(Rejection::UnknownCard { card_id })?
                    .kind;
                match kind {
                    CardKind::Event => self.play_event(card_id, store, out),
                    CardKind::Instant => self.play_instant(card_id, store, out),
                    kind => {
                        warn!(card_id, ?kind, "card cannot be played into the action zone");
                        Err(Rejection::NotPlayable { kind })
                    },
                }
            },
        }
    }

    fn discard(
        &mut self,
        card_id: CardId,
        store: &mut SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let viewer = self.viewer;
        let (turn, private) = loaded(store)?;

        if !turn.is_turn_owner(viewer) {
            return Err(Rejection::NotYourTurn);
        }
        if !matches!(turn.phase, TurnPhase::None | TurnPhase::Discarding) {
            return Err(Rejection::WrongPhase { phase: turn.phase });
        }
        let position = private
            .hand
            .iter()
            .position(|c| c.id == card_id)
            .ok_or(Rejection::UnknownCard { card_id })?;

        let disgrace = turn.in_disgrace(viewer);
        if disgrace {
            self.discard_lock.sync(turn.turn_owner);
            if self.discard_lock.state != LockState::Open {
                return Err(Rejection::DiscardLocked);
            }
            self.discard_lock.state = LockState::InFlight;
        }

        let rollback = Rollback::capture(store, private.hand.clone(), Some(turn.piles.clone()));
        let (turn, private) = store.optimistic().ok_or(Rejection::NotLoaded)?;
        let card = private.hand.remove(position);
        turn.piles.discard_count += 1;
        turn.piles.discard_top = Some(card);

        info!(card_id, disgrace, "discarding");
        out.call(
            ApiRequest::Discard { card_id },
            Continuation::Discard(DiscardTicket { rollback, disgrace, owner: viewer }),
        );
        Ok(())
    }

    fn play_event(
        &mut self,
        card_id: CardId,
        store: &mut SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let viewer = self.viewer;
        let blocking = self.effect_blocking();
        let (turn, private) = loaded(store)?;

        let card = private.card(card_id).ok_or(Rejection::UnknownCard { card_id })?.clone();
        if turn.in_disgrace(viewer) {
            return Err(Rejection::InDisgrace);
        }
        if !turn.is_turn_owner(viewer) {
            return Err(Rejection::NotYourTurn);
        }
        if turn.phase != TurnPhase::None {
            return Err(Rejection::WrongPhase { phase: turn.phase });
        }
        if blocking {
            return Err(Rejection::EffectPending);
        }

        let rollback = Rollback::capture(store, private.hand.clone(), None);
        if let Some((_, private)) = store.optimistic() {
            private.hand.retain(|c| c.id != card_id);
        }
        self.currently_played = Some(card.clone());

        info!(card_id, name = %card.name, "playing event");
        out.call(
            ApiRequest::PlayEvent { card_id },
            Continuation::PlayEvent(EventTicket { card, rollback }),
        );
        Ok(())
    }

    fn play_instant(
        &mut self,
        card_id: CardId,
        store: &SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let (turn, private) = loaded(store)?;
        if private.card(card_id).is_none() {
            return Err(Rejection::UnknownCard { card_id });
        }
        if self.countdown.remaining == 0 {
            return Err(Rejection::NoResponseWindow);
        }
        if !matches!(turn.phase, TurnPhase::Playing | TurnPhase::Discarding) {
            return Err(Rejection::WrongPhase { phase: turn.phase });
        }

        info!(card_id, remaining = self.countdown.remaining, "countering with instant");
        out.call(ApiRequest::PlayInstant { card_id }, Continuation::PlayInstant);
        Ok(())
    }

    /// Put a detective set on the table.
    pub(crate) fn play_set(
        &mut self,
        card_ids: Vec<CardId>,
        store: &SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let (turn, private) = loaded(store)?;
        self.check_own_play(turn)?;
        if card_ids.is_empty() {
            return Err(Rejection::EmptySet);
        }
        if let Some(&card_id) = card_ids.iter().find(|&&id| private.card(id).is_none()) {
            return Err(Rejection::UnknownCard { card_id });
        }

        info!(cards = card_ids.len(), "playing set");
        out.call(ApiRequest::PlaySet { card_ids }, Continuation::PlaySet);
        Ok(())
    }

    /// Stage a card for add-to-set.
    pub(crate) fn stage_card(
        &mut self,
        card_id: CardId,
        store: &SessionStore,
    ) -> Result<(), Rejection> {
        let (_, private) = loaded(store)?;
        if private.card(card_id).is_none() {
            return Err(Rejection::UnknownCard { card_id });
        }
        if !self.staged.contains(&card_id) {
            self.staged.push(card_id);
        }
        Ok(())
    }

    /// Remove a card from the staging area.
    pub(crate) fn unstage_card(&mut self, card_id: CardId) {
        self.staged.retain(|&id| id != card_id);
    }

    /// Viewer's sets the single staged card can join.
    pub fn matching_sets(&self, store: &SessionStore) -> Vec<SetIndex> {
        let &[card_id] = self.staged.as_slice() else {
            return Vec::new();
        };
        let (Some(turn), Some(private)) = (store.turn(), store.private_view()) else {
            return Vec::new();
        };
        let (Some(card), Some(player)) = (private.card(card_id), turn.player(self.viewer)) else {
            return Vec::new();
        };
        player.sets.iter().filter(|set| set.accepts(card)).map(|set| set.index).collect()
    }

    /// Add the staged card to one of the viewer's sets.
    pub(crate) fn add_card_to_set(
        &mut self,
        set_index: SetIndex,
        store: &SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let &[card_id] = self.staged.as_slice() else {
            return Err(Rejection::StagedCount { count: self.staged.len() });
        };
        if !self.matching_sets(store).contains(&set_index) {
            return Err(Rejection::NoMatchingSet { set_index });
        }
        let (turn, _) = loaded(store)?;
        if turn.in_disgrace(self.viewer) {
            return Err(Rejection::InDisgrace);
        }
        if self.effect_blocking() {
            return Err(Rejection::EffectPending);
        }

        let set_type = turn.set(self.viewer, set_index).map(|set| set.set_type.clone());
        info!(card_id, set_index, "adding card to set");
        out.call(
            ApiRequest::AddCardToSet { card_id, set_index },
            Continuation::AddCardToSet { set_type },
        );
        Ok(())
    }

    /// Check an Ariadne play before its selection is armed.
    pub(crate) fn check_ariadne(
        &self,
        card_id: CardId,
        store: &SessionStore,
    ) -> Result<(), Rejection> {
        let (turn, private) = loaded(store)?;
        let card = private.card(card_id).ok_or(Rejection::UnknownCard { card_id })?;
        if !card.is_ariadne() {
            return Err(Rejection::NotPlayable { kind: card.kind });
        }
        self.check_own_play(turn)
    }

    /// Peek at the top of the discard pile.
    pub(crate) fn start_discard_top5(&mut self, out: &mut Outbox) -> Result<(), Rejection> {
        if self.discard_pick != DiscardPick::Closed {
            return Err(Rejection::InFlight { flow: "discard pick" });
        }
        self.discard_pick = DiscardPick::Loading;
        out.call(
            ApiRequest::PeekDiscard { count: self.config.discard_peek },
            Continuation::PeekDiscard,
        );
        Ok(())
    }

    /// Take one of the peeked discards.
    pub(crate) fn pick_from_discard(
        &mut self,
        card_id: CardId,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let DiscardPick::Choosing(options) = &self.discard_pick else {
            return Err(Rejection::NoFlow { flow: "discard pick" });
        };
        if !options.iter().any(|c| c.id == card_id) {
            return Err(Rejection::UnknownCard { card_id });
        }
        self.discard_pick = DiscardPick::Taking;
        out.call(ApiRequest::TakeFromDiscard { card_id }, Continuation::TakeFromDiscard);
        Ok(())
    }

    /// Open a trade with `counterpart`, replacing any idle one.
    pub(crate) fn open_trade(&mut self, counterpart: PlayerId) {
        if self.trade.is_some_and(|t| t.in_flight) {
            debug!(counterpart, "trade already in flight, request ignored");
            return;
        }
        info!(counterpart, "trade opened");
        self.trade = Some(Trade { counterpart, in_flight: false });
    }

    /// Offer a card in the open trade.
    pub(crate) fn start_card_trade(
        &mut self,
        card_id: CardId,
        store: &SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let trade = self.trade.ok_or(Rejection::NoFlow { flow: "trade" })?;
        if trade.in_flight {
            return Err(Rejection::InFlight { flow: "trade" });
        }
        let (_, private) = loaded(store)?;
        if private.card(card_id).is_none() {
            return Err(Rejection::UnknownCard { card_id });
        }

        self.trade = Some(Trade { in_flight: true, ..trade });
        out.call(
            ApiRequest::ExchangeCards { counterpart: trade.counterpart, card_id },
            Continuation::Trade,
        );
        Ok(())
    }

    /// Run the armed bulk pile move.
    pub(crate) fn resolve_bulk_move(&mut self, out: &mut Outbox) -> Result<(), Rejection> {
        let kind = self.bulk_move.take().ok_or(Rejection::NoFlow { flow: "bulk move" })?;
        info!(?kind, "bulk move");
        out.call(ApiRequest::BulkMove { kind }, Continuation::Refresh);
        Ok(())
    }

    /// Draw a card back up by hand.
    pub(crate) fn replenish(
        &mut self,
        source: ReplenishSource,
        store: &SessionStore,
        out: &mut Outbox,
    ) -> Result<(), Rejection> {
        let (turn, _) = loaded(store)?;
        if !turn.is_turn_owner(self.viewer) {
            return Err(Rejection::NotYourTurn);
        }
        if self.replenish.is_some() {
            return Err(Rejection::InFlight { flow: "replenish" });
        }
        out.call(ApiRequest::Replenish { source }, Continuation::Refresh);
        Ok(())
    }

    /// Set the countdown from the server.
    pub(crate) fn set_countdown(
        &mut self,
        remaining: u32,
        now: I,
        phase: TurnPhase,
        out: &mut Outbox,
    ) -> Option<FollowUp> {
        self.countdown.set(remaining, now);
        if remaining == 0 { self.resolve(Some(phase), out) } else { None }
    }

    /// Advance local timers.
    pub(crate) fn tick(&mut self, now: I, phase: TurnPhase, out: &mut Outbox) -> Option<FollowUp> {
        if let Some(settling) = self.settling.take_if(|s| now >= s.ready_at) {
            let timer = settling.effect.ack().timer;
            debug!(timer, "set effect settled");
            self.pending = Some(settling.effect);
            self.countdown.set(timer, now);
            if timer == 0 {
                return self.resolve(None, out);
            }
            return None;
        }

        if self.countdown.advance(now, self.config.countdown_step) {
            return self.resolve(Some(phase), out);
        }
        None
    }

    /// Consume the pending effect. With `phase` set, it only runs in
    /// `Playing`; `None` runs it unconditionally (no response window).
    fn resolve(&mut self, phase: Option<TurnPhase>, out: &mut Outbox) -> Option<FollowUp> {
        let effect = self.pending.take()?;
        self.currently_played = None;

        match phase {
            Some(phase) if phase != TurnPhase::Playing => {
                info!(kind = ?effect.kind(), ?phase, "effect countered, discarded");
                out.notice(Notice::EffectCountered { kind: effect.kind() });
                None
            },
            _ => {
                let follow_up = effect.follow_up();
                info!(kind = ?effect.kind(), ?follow_up, "effect resolved");
                if follow_up.is_none() {
                    warn!(?effect, "no follow-up known for effect");
                }
                follow_up
            },
        }
    }

    /// Apply a follow-up that the orchestrator owns. Selections are returned
    /// to the caller.
    pub(crate) fn apply_follow_up(
        &mut self,
        follow_up: FollowUp,
        out: &mut Outbox,
    ) -> Option<(SelectionMode, Option<Qualifier>)> {
        match follow_up {
            FollowUp::Select { mode, qualifier } => return Some((mode, qualifier)),
            FollowUp::DiscardTopPick => {
                if let Err(e) = self.start_discard_top5(out) {
                    debug!(error = %e, "discard pick not opened");
                }
            },
            FollowUp::BulkMove(kind) => self.bulk_move = Some(kind),
        }
        None
    }

    /// A response for one of the orchestrator's requests arrived.
    pub(crate) fn complete(
        &mut self,
        continuation: Continuation,
        result: Result<ApiResponse, ApiError>,
        store: &mut SessionStore,
        out: &mut Outbox,
        now: I,
    ) -> Option<FollowUp> {
        match continuation {
            Continuation::Discard(ticket) => {
                self.complete_discard(ticket, result.is_ok(), store, out);
            },
            Continuation::Replenish { owner } => match result {
                Ok(_) => {
                    let fetch = out.fetch(store);
                    if let Some(replenish) = self.replenish.as_mut().filter(|r| r.owner == owner) {
                        replenish.awaiting = Some(fetch);
                    }
                },
                Err(_) => {
                    info!(owner, "replenish failed, auto-replenish stopped");
                    self.replenish = None;
                },
            },
            Continuation::PlayEvent(ticket) => {
                return self.complete_event(ticket, result, store, out, now);
            },
            Continuation::PlayInstant => {
                if let Ok(response) = result {
                    let timer = response.into_ack().timer;
                    let phase = store.turn().map_or(TurnPhase::None, |t| t.phase);
                    return self.set_countdown(timer, now, phase, out);
                }
            },
            Continuation::PlaySet => {
                if let Ok(response) = result {
                    out.request_refresh();
                    let ack = response.into_ack();
                    match ack.set_type.clone() {
                        Some(set_type) => {
                            return self.arm_effect(PendingEffect::Set { set_type, ack }, now, out);
                        },
                        None => warn!("set acknowledged without a set type, no effect armed"),
                    }
                }
            },
            Continuation::AddCardToSet { set_type } => {
                if let Ok(response) = result {
                    self.staged.clear();
                    out.request_refresh();
                    let ack = response.into_ack();
                    match ack.set_type.clone().or(set_type) {
                        Some(set_type) => {
                            self.settling = Some(Settling {
                                effect: PendingEffect::Set { set_type, ack },
                                ready_at: now + self.config.set_settle_delay,
                            });
                        },
                        None => warn!("unknown set type after add-to-set, no effect armed"),
                    }
                }
            },
            Continuation::PeekDiscard => {
                self.discard_pick = match result {
                    Ok(ApiResponse::Cards(cards)) => DiscardPick::Choosing(cards),
                    Ok(other) => {
                        warn!(?other, "unexpected peek response");
                        DiscardPick::Closed
                    },
                    Err(_) => DiscardPick::Closed,
                };
            },
            Continuation::TakeFromDiscard => {
                self.discard_pick = DiscardPick::Closed;
                if result.is_ok() {
                    out.request_refresh();
                }
            },
            Continuation::Trade => {
                self.trade = None;
                if result.is_ok() {
                    out.request_refresh();
                }
            },
            other => debug!(?other, "continuation not owned by the orchestrator"),
        }
        None
    }

    fn complete_discard(
        &mut self,
        ticket: DiscardTicket,
        ok: bool,
        store: &mut SessionStore,
        out: &mut Outbox,
    ) {
        let same_turn = self.discard_lock.owner == Some(ticket.owner);
        if ok {
            if ticket.disgrace && same_turn {
                self.discard_lock.state = LockState::Used;
                info!("disgrace discard done, replenishing");
                self.replenish = Some(ReplenishLoop { owner: ticket.owner, awaiting: None });
                self.replenish_step(store, out);
            }
            return;
        }

        ticket.rollback.restore(store, out);
        if ticket.disgrace && same_turn && self.discard_lock.state == LockState::InFlight {
            self.discard_lock.state = LockState::Open;
        }
    }

    fn complete_event(
        &mut self,
        ticket: EventTicket,
        result: Result<ApiResponse, ApiError>,
        store: &mut SessionStore,
        out: &mut Outbox,
        now: I,
    ) -> Option<FollowUp> {
        match result {
            Ok(response) => {
                let ack = response.into_ack();
                self.arm_effect(PendingEffect::Event { card: ticket.card, ack }, now, out)
            },
            Err(_) => {
                ticket.rollback.restore(store, out);
                self.currently_played = None;
                None
            },
        }
    }

    fn arm_effect(&mut self, effect: PendingEffect, now: I, out: &mut Outbox) -> Option<FollowUp> {
        let timer = effect.ack().timer;
        debug!(kind = ?effect.kind(), timer, "effect pending");
        self.pending = Some(effect);
        self.countdown.set(timer, now);
        if timer == 0 { self.resolve(None, out) } else { None }
    }

    fn replenish_step(&mut self, store: &SessionStore, out: &mut Outbox) {
        let Some(replenish) = self.replenish else {
            return;
        };
        let (Some(turn), Some(private)) = (store.turn(), store.private_view()) else {
            self.replenish = None;
            return;
        };

        if turn.turn_owner != replenish.owner {
            info!("turn moved on, auto-replenish stopped");
            self.replenish = None;
        } else if private.hand.len() >= self.config.hand_size {
            info!(hand = private.hand.len(), "hand full, auto-replenish done");
            self.replenish = None;
        } else {
            out.call(
                ApiRequest::Replenish { source: ReplenishSource::Draw },
                Continuation::Replenish { owner: replenish.owner },
            );
        }
    }

    /// A fetch finished.
    pub(crate) fn on_fetch_complete(
        &mut self,
        fetch: FetchId,
        ok: bool,
        store: &SessionStore,
        out: &mut Outbox,
    ) {
        let Some(replenish) = self.replenish.filter(|r| r.awaiting == Some(fetch)) else {
            return;
        };
        if !ok {
            info!("refetch failed, auto-replenish stopped");
            self.replenish = None;
            return;
        }
        self.replenish = Some(ReplenishLoop { awaiting: None, ..replenish });
        self.replenish_step(store, out);
    }

    /// A new snapshot was applied.
    pub(crate) fn on_snapshot(&mut self, turn: &TurnSnapshot) {
        self.discard_lock.sync(turn.turn_owner);

        if turn.end_game.is_some() {
            debug!("game over, pending flows dropped");
            self.pending = None;
            self.countdown = Countdown { remaining: 0, last_step: None };
            self.currently_played = None;
            self.settling = None;
            self.replenish = None;
            self.discard_pick = DiscardPick::Closed;
            self.trade = None;
            self.bulk_move = None;
            self.staged.clear();
        }
    }

    fn check_own_play(&self, turn: &TurnSnapshot) -> Result<(), Rejection> {
        if turn.in_disgrace(self.viewer) {
            return Err(Rejection::InDisgrace);
        }
        if !turn.is_turn_owner(self.viewer) {
            return Err(Rejection::NotYourTurn);
        }
        if turn.phase != TurnPhase::None {
            return Err(Rejection::WrongPhase { phase: turn.phase });
        }
        if self.effect_blocking() {
            return Err(Rejection::EffectPending);
        }
        Ok(())
    }
}

fn loaded(
    store: &SessionStore,
) -> Result<(&TurnSnapshot, &sleuth_proto::PrivatePlayerView), Rejection> {
    match (store.turn(), store.private_view()) {
        (Some(turn), Some(private)) => Ok((turn, private)),
        _ => Err(Rejection::NotLoaded),
    }
}
