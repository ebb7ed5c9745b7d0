//! Selection state machine.
//!
//! Multi-step "pick a target, then act" interactions. A selection is armed
//! with a mode (what the player must click) and an optional qualifier (which
//! card or set asked for it). Picks fill in targets; once every target the
//! mode needs is known, the transition builds its request from the final
//! values, fires it once, and clears the selection.
//!
//! # Representation
//!
//! [`Selection`] is one tagged union with a variant per awaited target set,
//! so a half-filled target can never leak from one flow into the next:
//! arming a new mode replaces the whole value. [`SelectionState`] is the flat
//! projection the rendering layer reads.
//!
//! # Transitions
//!
//! | Mode | Targets | Qualifier | Effect |
//! |---|---|---|---|
//! | my-not-revealed-secret | secret | | reveal own secret |
//! | other-not-revealed-secret | player, secret | | reveal their secret |
//! | my-revealed-secret | secret | | hide own secret |
//! | revealed-secret | player, secret | | hide a secret |
//! | other-player | player | | force the player to reveal |
//! | other-player | player | specials | forced reveal, secret is stolen |
//! | other-player | player | card trade | open a trade |
//! | other-player | player | cards off the table | strip instants |
//! | other-player | player | point | suspicion vote |
//! | other-revealed-secret | secret | one more | remember source, pick recipient |
//! | player | player | one more | steal, then hide for the recipient |
//! | set | player, set | another | steal the set |
//! | set | player, set | ariadne | attach the card to the set |
//!
//! Reveal, hide, forced reveal, strip, vote and trade clear as soon as the
//! request is queued. The one-more transfer, specials, set steal and Ariadne
//! stay armed, holding the in-flight [`RequestId`], until the server answers;
//! picks in the meantime are ignored.

use sleuth_proto::{
    ApiRequest, CardId, PlayerId, SecretId, SetIndex, TurnSnapshot, normalize_tag,
};
use tracing::{debug, info, warn};

use crate::{
    error::SelectionError,
    outbox::{Continuation, Outbox, RequestId},
};

/// What the player is asked to click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionMode {
    /// Any player, including the viewer.
    SelectPlayer,
    /// Any player but the viewer.
    SelectOtherPlayer,
    /// A face-up secret of any player.
    SelectRevealedSecret,
    /// One of the viewer's face-up secrets.
    SelectMyRevealedSecret,
    /// A face-up secret of another player.
    SelectOtherRevealedSecret,
    /// One of the viewer's face-down secrets.
    SelectMyNotRevealedSecret,
    /// A face-down secret of another player.
    SelectOtherNotRevealedSecret,
    /// A played set.
    SelectSet,
}

/// Which card or set armed the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Satterthwaite with Quin: the forced reveal steals the secret.
    Specials,
    /// Card trade event.
    CardTrade,
    /// Cards off the table event.
    CardsOffTheTable,
    /// Point your suspicions event.
    Point,
    /// And then there was one more event.
    OneMore,
    /// Another victim event.
    Another,
    /// Ariadne Oliver detective.
    Ariadne,
}

impl Qualifier {
    /// Parse a qualifier tag, ignoring case, spacing and punctuation.
    ///
    /// Returns `None` for unknown tags.
    pub fn parse(raw: &str) -> Option<Self> {
        let qualifier = match normalize_tag(raw).as_str() {
            "specials" => Self::Specials,
            "cardtrade" => Self::CardTrade,
            "cardsoffthetable" => Self::CardsOffTheTable,
            "point" | "pointyoursuspicions" => Self::Point,
            "onemore" => Self::OneMore,
            "another" | "anothervictim" => Self::Another,
            "ariadne" => Self::Ariadne,
            _ => return None,
        };
        Some(qualifier)
    }
}

/// Purpose of an other-player selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerPurpose {
    /// Force the player to reveal a secret.
    ForceReveal,
    /// Forced reveal that steals the secret.
    Specials,
    /// Trade a card with the player.
    CardTrade,
    /// Strip the player's instant cards.
    CardsOffTheTable,
    /// Vote the player as suspect.
    Point,
}

impl PlayerPurpose {
    fn qualifier(self) -> Option<Qualifier> {
        match self {
            Self::ForceReveal => None,
            Self::Specials => Some(Qualifier::Specials),
            Self::CardTrade => Some(Qualifier::CardTrade),
            Self::CardsOffTheTable => Some(Qualifier::CardsOffTheTable),
            Self::Point => Some(Qualifier::Point),
        }
    }
}

/// Step of the one-more secret transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Moving the secret to the recipient.
    Steal,
    /// Turning it face down.
    Hide,
}

/// In-flight one-more transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    /// Player receiving the secret.
    pub recipient: PlayerId,
    /// Outstanding request.
    pub request: RequestId,
    /// Current step.
    pub stage: TransferStage,
}

/// The armed selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection {
    /// Nothing armed.
    #[default]
    Idle,
    /// Reveal one of the viewer's hidden secrets.
    RevealOwn,
    /// Reveal another player's hidden secret.
    RevealOther {
        /// Pre-selected owner.
        player: Option<PlayerId>,
    },
    /// Hide one of the viewer's revealed secrets.
    HideOwn,
    /// Hide any revealed secret.
    Hide {
        /// Pre-selected owner.
        player: Option<PlayerId>,
    },
    /// Pick another player.
    TargetPlayer {
        /// What happens to the picked player.
        purpose: PlayerPurpose,
        /// Picked player, once the request is in flight.
        player: Option<PlayerId>,
        /// Outstanding request for completion-cleared purposes.
        in_flight: Option<RequestId>,
    },
    /// One more: pick the revealed secret to move.
    OneMoreSource,
    /// One more: pick who receives it.
    OneMoreRecipient {
        /// Current owner of the secret.
        source: PlayerId,
        /// The secret.
        secret: SecretId,
        /// Transfer in progress.
        transfer: Option<Transfer>,
    },
    /// Another victim: pick a set to steal.
    StealSet {
        /// Set owner.
        player: Option<PlayerId>,
        /// Picked set.
        set: Option<SetIndex>,
        /// Outstanding request.
        in_flight: Option<RequestId>,
    },
    /// Ariadne Oliver: pick a set to attach the card to.
    Ariadne {
        /// The Ariadne card.
        card: CardId,
        /// Set owner.
        player: Option<PlayerId>,
        /// Picked set.
        set: Option<SetIndex>,
        /// Outstanding request.
        in_flight: Option<RequestId>,
    },
}

impl Selection {
    /// Mode the player is in, `None` when idle.
    pub fn mode(&self) -> Option<SelectionMode> {
        let mode = match self {
            Self::Idle => return None,
            Self::RevealOwn => SelectionMode::SelectMyNotRevealedSecret,
            Self::RevealOther { .. } => SelectionMode::SelectOtherNotRevealedSecret,
            Self::HideOwn => SelectionMode::SelectMyRevealedSecret,
            Self::Hide { .. } => SelectionMode::SelectRevealedSecret,
            Self::TargetPlayer { .. } => SelectionMode::SelectOtherPlayer,
            Self::OneMoreSource => SelectionMode::SelectOtherRevealedSecret,
            Self::OneMoreRecipient { .. } => SelectionMode::SelectPlayer,
            Self::StealSet { .. } | Self::Ariadne { .. } => SelectionMode::SelectSet,
        };
        Some(mode)
    }

    /// Flat projection for display.
    pub fn state(&self) -> SelectionState {
        let mut state = SelectionState { mode: self.mode(), ..SelectionState::default() };
        match *self {
            Self::Idle | Self::RevealOwn | Self::HideOwn => {},
            Self::RevealOther { player } | Self::Hide { player } => state.player = player,
            Self::TargetPlayer { purpose, player, .. } => {
                state.player = player;
                state.action = purpose.qualifier();
            },
            Self::OneMoreSource => state.action = Some(Qualifier::OneMore),
            Self::OneMoreRecipient { source, secret, transfer } => {
                state.action = Some(Qualifier::OneMore);
                state.source_player = Some(source);
                state.secret = Some(secret);
                state.player = transfer.map(|t| t.recipient);
            },
            Self::StealSet { player, set, .. } => {
                state.action = Some(Qualifier::Another);
                state.player = player;
                state.set = set;
            },
            Self::Ariadne { card, player, set, .. } => {
                state.action = Some(Qualifier::Ariadne);
                state.card = Some(card);
                state.player = player;
                state.set = set;
            },
        }
        state
    }

    fn in_flight(&self) -> Option<RequestId> {
        match *self {
            Self::TargetPlayer { in_flight, .. }
            | Self::StealSet { in_flight, .. }
            | Self::Ariadne { in_flight, .. } => in_flight,
            Self::OneMoreRecipient { transfer, .. } => transfer.map(|t| t.request),
            _ => None,
        }
    }
}

/// Display projection of the armed selection. All `None` when idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionState {
    /// Current mode.
    pub mode: Option<SelectionMode>,
    /// Target player.
    pub player: Option<PlayerId>,
    /// Target secret.
    pub secret: Option<SecretId>,
    /// Target set.
    pub set: Option<SetIndex>,
    /// Qualifier.
    pub action: Option<Qualifier>,
    /// Source of a one-more transfer.
    pub source_player: Option<PlayerId>,
    /// Card attached by an Ariadne selection.
    pub card: Option<CardId>,
}

/// Work the selection hands to the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Open a card trade with this player.
    OpenTrade {
        /// Trade counterpart.
        counterpart: PlayerId,
    },
}

/// Owner of the armed [`Selection`].
#[derive(Debug)]
pub struct SelectionMachine {
    viewer: PlayerId,
    current: Selection,
    /// Server-requested arm waiting for an in-flight flow to finish.
    deferred: Option<(SelectionMode, Option<Qualifier>)>,
}

impl SelectionMachine {
    /// Idle machine for `viewer`.
    pub fn new(viewer: PlayerId) -> Self {
        Self { viewer, current: Selection::Idle, deferred: None }
    }

    /// The armed selection.
    pub fn current(&self) -> &Selection {
        &self.current
    }

    /// Flat projection of the armed selection.
    pub fn state(&self) -> SelectionState {
        self.current.state()
    }

    /// Whether nothing is armed.
    pub fn is_idle(&self) -> bool {
        self.current == Selection::Idle
    }

    /// Whether the armed selection is waiting on the server.
    pub fn is_busy(&self) -> bool {
        self.current.in_flight().is_some()
    }

    /// Selection queued behind the in-flight flow, if any.
    pub fn deferred(&self) -> Option<(SelectionMode, Option<Qualifier>)> {
        self.deferred
    }

    /// Arm now, or once the in-flight flow completes.
    ///
    /// Used for arms the player did not ask for (server pushes, effect
    /// follow-ups). A later request replaces an earlier queued one.
    ///
    /// # Errors
    ///
    /// Same as [`arm_with`](Self::arm_with) when arming immediately.
    pub fn arm_when_free(
        &mut self,
        mode: SelectionMode,
        qualifier: Option<Qualifier>,
    ) -> Result<(), SelectionError> {
        if self.is_busy() {
            debug!(?mode, ?qualifier, selection = ?self.current, "arm deferred");
            self.deferred = Some((mode, qualifier));
            return Ok(());
        }
        self.arm_with(mode, qualifier, None)
    }

    fn settle(&mut self) {
        if !self.is_idle() {
            return;
        }
        if let Some((mode, qualifier)) = self.deferred.take()
            && let Err(e) = self.arm_with(mode, qualifier, None)
        {
            warn!(error = %e, "deferred selection not armed");
        }
    }

    /// Arm from a mode and a raw qualifier tag.
    ///
    /// Blank qualifiers count as none. An unknown qualifier is refused rather
    /// than treated as none, so an unrecognized tag can never fall through to
    /// the unqualified forced reveal.
    ///
    /// # Errors
    ///
    /// - `SelectionError::Unsupported` if the pair has no transition
    /// - `SelectionError::MissingCard` for Ariadne without a card
    pub fn arm(
        &mut self,
        mode: SelectionMode,
        qualifier: Option<&str>,
        card: Option<CardId>,
    ) -> Result<(), SelectionError> {
        let parsed = match qualifier.filter(|raw| !normalize_tag(raw).is_empty()) {
            None => None,
            Some(raw) => Some(Qualifier::parse(raw).ok_or_else(|| SelectionError::Unsupported {
                mode,
                qualifier: Some(raw.to_string()),
            })?),
        };
        self.arm_with(mode, parsed, card).map_err(|e| match e {
            SelectionError::Unsupported { mode, .. } => {
                SelectionError::Unsupported { mode, qualifier: qualifier.map(str::to_string) }
            },
            other => other,
        })
    }

    /// Arm from a typed mode and qualifier.
    ///
    /// # Errors
    ///
    /// - `SelectionError::Unsupported` if the pair has no transition
    /// - `SelectionError::MissingCard` for Ariadne without a card
    pub fn arm_with(
        &mut self,
        mode: SelectionMode,
        qualifier: Option<Qualifier>,
        card: Option<CardId>,
    ) -> Result<(), SelectionError> {
        use SelectionMode as M;

        let target = |purpose| Selection::TargetPlayer { purpose, player: None, in_flight: None };
        let next = match (mode, qualifier) {
            (M::SelectMyNotRevealedSecret, None) => Selection::RevealOwn,
            (M::SelectOtherNotRevealedSecret, None) => Selection::RevealOther { player: None },
            (M::SelectMyRevealedSecret, None) => Selection::HideOwn,
            (M::SelectRevealedSecret, None) => Selection::Hide { player: None },
            (M::SelectOtherPlayer, None) => target(PlayerPurpose::ForceReveal),
            (M::SelectOtherPlayer, Some(Qualifier::Specials)) => target(PlayerPurpose::Specials),
            (M::SelectOtherPlayer, Some(Qualifier::CardTrade)) => target(PlayerPurpose::CardTrade),
            (M::SelectOtherPlayer, Some(Qualifier::CardsOffTheTable)) => {
                target(PlayerPurpose::CardsOffTheTable)
            },
            (M::SelectOtherPlayer, Some(Qualifier::Point)) => target(PlayerPurpose::Point),
            (M::SelectOtherRevealedSecret, Some(Qualifier::OneMore)) => Selection::OneMoreSource,
            (M::SelectSet, Some(Qualifier::Another)) => {
                Selection::StealSet { player: None, set: None, in_flight: None }
            },
            (M::SelectSet, Some(Qualifier::Ariadne)) => Selection::Ariadne {
                card: card.ok_or(SelectionError::MissingCard)?,
                player: None,
                set: None,
                in_flight: None,
            },
            _ => return Err(SelectionError::Unsupported { mode, qualifier: None }),
        };

        if !self.is_idle() {
            debug!(replaced = ?self.current, "selection replaced");
        }
        debug!(?mode, ?qualifier, "selection armed");
        self.current = next;
        Ok(())
    }

    /// Drop whatever is armed.
    pub fn clear(&mut self) {
        self.current = Selection::Idle;
    }

    /// The player clicked a player.
    pub(crate) fn pick_player(&mut self, player: PlayerId, out: &mut Outbox) -> Option<Handoff> {
        match self.current {
            Selection::RevealOther { .. } if player == self.viewer => {
                debug!("own player picked for other-player secret, ignored");
            },
            Selection::RevealOther { .. } => {
                self.current = Selection::RevealOther { player: Some(player) };
            },
            Selection::Hide { .. } => {
                self.current = Selection::Hide { player: Some(player) };
            },
            Selection::TargetPlayer { in_flight: Some(_), .. }
            | Selection::OneMoreRecipient { transfer: Some(_), .. } => {
                debug!(player, "pick ignored while request in flight");
            },
            Selection::TargetPlayer { .. } if player == self.viewer => {
                debug!("viewer cannot target themself");
            },
            Selection::TargetPlayer { purpose, .. } => {
                return self.target_player(purpose, player, out);
            },
            Selection::OneMoreRecipient { source, secret, transfer: None } => {
                let request = out.call(
                    ApiRequest::StealSecret { from: source, secret_id: secret, to: player },
                    Continuation::Selection,
                );
                info!(source, secret, recipient = player, "one more transfer started");
                let transfer = Transfer { recipient: player, request, stage: TransferStage::Steal };
                self.current =
                    Selection::OneMoreRecipient { source, secret, transfer: Some(transfer) };
            },
            Selection::StealSet { in_flight: None, .. } if player != self.viewer => {
                self.current =
                    Selection::StealSet { player: Some(player), set: None, in_flight: None };
            },
            Selection::Ariadne { card, in_flight: None, .. } if player != self.viewer => {
                self.current =
                    Selection::Ariadne { card, player: Some(player), set: None, in_flight: None };
            },
            _ => debug!(player, selection = ?self.current, "player pick ignored"),
        }
        None
    }

    fn target_player(
        &mut self,
        purpose: PlayerPurpose,
        player: PlayerId,
        out: &mut Outbox,
    ) -> Option<Handoff> {
        info!(?purpose, player, "player targeted");
        match purpose {
            PlayerPurpose::ForceReveal => {
                out.call(
                    ApiRequest::ForceReveal { target: player, steal: false },
                    Continuation::Ignore,
                );
                self.clear();
            },
            PlayerPurpose::Specials => {
                let request = out.call(
                    ApiRequest::ForceReveal { target: player, steal: true },
                    Continuation::Selection,
                );
                self.current = Selection::TargetPlayer {
                    purpose,
                    player: Some(player),
                    in_flight: Some(request),
                };
            },
            PlayerPurpose::CardTrade => {
                self.clear();
                return Some(Handoff::OpenTrade { counterpart: player });
            },
            PlayerPurpose::CardsOffTheTable => {
                out.call(ApiRequest::StripInstants { target: player }, Continuation::Refresh);
                self.clear();
            },
            PlayerPurpose::Point => {
                out.call(ApiRequest::VoteSuspicion { suspect: player }, Continuation::Ignore);
                self.clear();
            },
        }
        None
    }

    /// The player clicked a secret of `owner`.
    ///
    /// When the snapshot knows the secret, picks of the wrong face (a hidden
    /// secret for a hide, say) are ignored. So are secrets of anyone but the
    /// owner already picked for the selection.
    pub(crate) fn pick_secret(
        &mut self,
        owner: PlayerId,
        secret: SecretId,
        turn: Option<&TurnSnapshot>,
        out: &mut Outbox,
    ) {
        let own = owner == self.viewer;
        let face_is =
            |revealed: bool| secret_face(turn, owner, secret).is_none_or(|r| r == revealed);
        let picked_owner = |player: Option<PlayerId>| player.is_none_or(|p| p == owner);

        match self.current {
            Selection::RevealOwn if own && face_is(false) => {
                self.fire_secret(ApiRequest::RevealSecret { owner, secret_id: secret }, out);
            },
            Selection::RevealOther { player }
                if !own && face_is(false) && picked_owner(player) =>
            {
                self.fire_secret(ApiRequest::RevealSecret { owner, secret_id: secret }, out);
            },
            Selection::HideOwn if own && face_is(true) => {
                self.fire_secret(ApiRequest::HideSecret { owner, secret_id: secret }, out);
            },
            Selection::Hide { player } if face_is(true) && picked_owner(player) => {
                self.fire_secret(ApiRequest::HideSecret { owner, secret_id: secret }, out);
            },
            Selection::OneMoreSource if !own && face_is(true) => {
                debug!(owner, secret, "one more source picked");
                self.current =
                    Selection::OneMoreRecipient { source: owner, secret, transfer: None };
            },
            _ => debug!(owner, secret, selection = ?self.current, "secret pick ignored"),
        }
    }

    fn fire_secret(&mut self, request: ApiRequest, out: &mut Outbox) {
        info!(op = request.name(), "secret selection fired");
        out.call(request, Continuation::Ignore);
        self.clear();
    }

    /// The player clicked set `index` of `owner`.
    pub(crate) fn pick_set(&mut self, owner: PlayerId, index: SetIndex, out: &mut Outbox) {
        if owner == self.viewer {
            debug!("own set picked, ignored");
            return;
        }

        match self.current {
            Selection::StealSet { in_flight: None, .. } => {
                let request = out.call(
                    ApiRequest::StealSet { from: owner, set_index: index },
                    Continuation::Selection,
                );
                info!(owner, index, "set steal requested");
                self.current = Selection::StealSet {
                    player: Some(owner),
                    set: Some(index),
                    in_flight: Some(request),
                };
            },
            Selection::Ariadne { card, in_flight: None, .. } => {
                let request = out.call(
                    ApiRequest::AttachToSet { card_id: card, owner, set_index: index },
                    Continuation::Selection,
                );
                info!(card, owner, index, "ariadne attach requested");
                self.current = Selection::Ariadne {
                    card,
                    player: Some(owner),
                    set: Some(index),
                    in_flight: Some(request),
                };
            },
            _ => debug!(owner, index, selection = ?self.current, "set pick ignored"),
        }
    }

    /// A request owned by the selection finished.
    ///
    /// Returns false for requests that no longer belong to the armed
    /// selection (it was replaced or abandoned meanwhile).
    pub(crate) fn complete(&mut self, request: RequestId, ok: bool, out: &mut Outbox) -> bool {
        if self.current.in_flight() != Some(request) {
            debug!(%request, "stale selection completion ignored");
            return false;
        }

        match self.current {
            Selection::OneMoreRecipient { source, secret, transfer: Some(transfer) }
                if ok && transfer.stage == TransferStage::Steal =>
            {
                let request = out.call(
                    ApiRequest::HideSecret { owner: transfer.recipient, secret_id: secret },
                    Continuation::Selection,
                );
                self.current = Selection::OneMoreRecipient {
                    source,
                    secret,
                    transfer: Some(Transfer { request, stage: TransferStage::Hide, ..transfer }),
                };
            },
            Selection::StealSet { .. } | Selection::Ariadne { .. } => {
                if ok {
                    out.request_refresh();
                }
                self.clear();
            },
            _ => self.clear(),
        }
        self.settle();
        true
    }

    /// A new snapshot was applied.
    ///
    /// Abandons an Ariadne selection once the viewer no longer owns the turn,
    /// and everything once the game is over.
    pub(crate) fn on_snapshot(&mut self, turn: &TurnSnapshot) {
        if turn.end_game.is_some() && !(self.is_idle() && self.deferred.is_none()) {
            debug!("game over, selection dropped");
            self.deferred = None;
            self.clear();
            return;
        }
        if matches!(self.current, Selection::Ariadne { .. }) && !turn.is_turn_owner(self.viewer) {
            info!("turn lost, ariadne selection abandoned");
            self.clear();
            self.settle();
        }
    }
}

/// Face of a secret in the snapshot: `Some(revealed)` or `None` if unknown.
fn secret_face(turn: Option<&TurnSnapshot>, owner: PlayerId, secret: SecretId) -> Option<bool> {
    turn?.player(owner)?.secrets.iter().find(|s| s.id == secret).map(|s| s.revealed)
}
