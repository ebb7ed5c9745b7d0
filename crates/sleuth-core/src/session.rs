//! Session state machine.
//!
//! The `Session` composes the four components and is the single entry point
//! for the runtime: every socket event, REST answer, timer tick and player
//! intent goes in as a [`SessionEvent`]; every piece of I/O comes out as a
//! [`SessionAction`]. Pure state machine, the caller performs the I/O.
//!
//! # Request correlation
//!
//! Each `Call` action carries a [`RequestId`]. The session remembers what the
//! answer is for and routes `SessionEvent::Response` back to the component
//! that asked. Answers for unknown ids (already failed, superseded, or from
//! before a restart) are dropped.

use std::collections::HashMap;

use sleuth_proto::{ApiError, ApiResponse, EventKind, GameId, PlayerId, RealtimeEvent, TurnPhase};
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelAction, ChannelManager, Listener, ListenerId},
    config::SessionConfig,
    env::Environment,
    error::{Rejection, SessionError},
    event::{Notice, SessionAction, SessionEvent, SessionView},
    orchestrator::{FollowUp, Orchestrator},
    outbox::{Continuation, Half, Outbox, RequestId},
    selection::{Handoff, Qualifier, SelectionMachine, SelectionMode},
    store::{FetchId, FetchPart, FetchProgress, SessionStore},
};

/// Who the session plays as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Game being played.
    pub game_id: GameId,
    /// The viewing player.
    pub player_id: PlayerId,
}

impl SessionIdentity {
    /// Identity of `player_id` in `game_id`.
    pub fn new(game_id: GameId, player_id: PlayerId) -> Self {
        Self { game_id, player_id }
    }
}

#[derive(Debug)]
struct InFlight {
    operation: &'static str,
    continuation: Continuation,
}

/// Client session for one player in one game.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time
pub struct Session<E: Environment> {
    env: E,
    identity: SessionIdentity,
    channel: ChannelManager<E::Instant>,
    store: SessionStore,
    selection: SelectionMachine,
    orchestrator: Orchestrator<E::Instant>,
    requests: HashMap<RequestId, InFlight>,
    next_request: u64,
}

impl<E: Environment> Session<E> {
    /// Create a session. Nothing is connected or fetched until asked.
    pub fn new(env: E, identity: SessionIdentity, config: SessionConfig) -> Self {
        let SessionIdentity { game_id, player_id } = identity;
        Self {
            env,
            identity,
            channel: ChannelManager::new(config.channel),
            store: SessionStore::new(game_id, player_id),
            selection: SelectionMachine::new(player_id),
            orchestrator: Orchestrator::new(player_id, config),
            requests: HashMap::new(),
            next_request: 0,
        }
    }

    /// Who this session plays as.
    pub fn identity(&self) -> SessionIdentity {
        self.identity
    }

    /// Mirrored server state.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Realtime channel.
    pub fn channel(&self) -> &ChannelManager<E::Instant> {
        &self.channel
    }

    /// Armed selection.
    pub fn selection(&self) -> &SelectionMachine {
        &self.selection
    }

    /// Intent and response-window state.
    pub fn orchestrator(&self) -> &Orchestrator<E::Instant> {
        &self.orchestrator
    }

    /// Calls issued but not answered.
    pub fn outstanding_requests(&self) -> usize {
        self.requests.len()
    }

    /// Register a realtime listener.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.channel.on(kind, listener)
    }

    /// Remove a realtime listener.
    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        self.channel.off(kind, id)
    }

    /// Snapshot of everything the rendering layer reads.
    pub fn view(&self) -> SessionView {
        SessionView {
            turn: self.store.turn().cloned(),
            private: self.store.private_view().cloned(),
            ordered_players: self.store.ordered_players().to_vec(),
            selection: self.selection.state(),
            pending: self.orchestrator.pending().cloned(),
            countdown: self.orchestrator.countdown(),
            currently_played: self.orchestrator.currently_played().cloned(),
            connection: self.channel.state(),
            is_loading: self.store.is_loading(),
            has_loaded_once: self.store.has_loaded_once(),
            staged: self.orchestrator.staged().to_vec(),
            matching_sets: self.orchestrator.matching_sets(&self.store),
            discard_pick: self.orchestrator.discard_pick().clone(),
            trade_counterpart: self.orchestrator.trade_counterpart(),
            bulk_move: self.orchestrator.bulk_move(),
        }
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// - `SessionError::Rejected` if a player intent is illegal right now;
    ///   nothing is sent and no state changes
    /// - `SessionError::Selection` if a selection cannot be armed
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<SessionAction>, SessionError> {
        let now = self.env.now();
        let mut out = Outbox::new(self.next_request);
        let mut actions = Vec::new();

        self.dispatch(event, now, &mut out, &mut actions)?;
        self.flush(out, &mut actions);
        Ok(actions)
    }

    fn dispatch(
        &mut self,
        event: SessionEvent,
        now: E::Instant,
        out: &mut Outbox,
        actions: &mut Vec<SessionAction>,
    ) -> Result<(), SessionError> {
        match event {
            SessionEvent::Connect => {
                let channel_actions = self.channel.connect();
                self.apply_channel(channel_actions, now, out, actions);
            },
            SessionEvent::Disconnect => {
                let channel_actions = self.channel.disconnect();
                self.apply_channel(channel_actions, now, out, actions);
            },
            SessionEvent::Refresh => {
                out.fetch(&mut self.store);
            },
            SessionEvent::Tick => {
                let channel_actions = self.channel.tick(now);
                self.apply_channel(channel_actions, now, out, actions);
                if let Some(follow_up) = self.orchestrator.tick(now, self.phase(), out) {
                    self.follow_up(follow_up, out);
                }
            },
            SessionEvent::ChannelOpened => {
                let channel_actions = self.channel.handle_opened(now);
                self.apply_channel(channel_actions, now, out, actions);
            },
            SessionEvent::FrameReceived(text) => {
                let channel_actions = self.channel.handle_frame(&text);
                self.apply_channel(channel_actions, now, out, actions);
            },
            SessionEvent::ChannelClosed { code } => {
                let channel_actions = self.channel.handle_closed(code, now);
                self.apply_channel(channel_actions, now, out, actions);
            },
            SessionEvent::Response { id, result } => self.handle_response(id, result, now, out),

            SessionEvent::DropCard { card_id, target } => {
                self.orchestrator.drop_card(card_id, target, &mut self.store, out)?;
            },
            SessionEvent::PlaySet { card_ids } => {
                self.orchestrator.play_set(card_ids, &self.store, out)?;
            },
            SessionEvent::StageCard { card_id } => {
                self.orchestrator.stage_card(card_id, &self.store)?;
            },
            SessionEvent::UnstageCard { card_id } => self.orchestrator.unstage_card(card_id),
            SessionEvent::AddCardToSet { set_index } => {
                self.orchestrator.add_card_to_set(set_index, &self.store, out)?;
            },
            SessionEvent::PickPlayer { player } => {
                if let Some(Handoff::OpenTrade { counterpart }) =
                    self.selection.pick_player(player, out)
                {
                    self.orchestrator.open_trade(counterpart);
                }
            },
            SessionEvent::PickSecret { owner, secret } => {
                self.selection.pick_secret(owner, secret, self.store.turn(), out);
            },
            SessionEvent::PickSet { owner, set_index } => {
                self.selection.pick_set(owner, set_index, out);
            },
            SessionEvent::ArmSelection { mode, qualifier } => {
                if self.orchestrator.effect_blocking() {
                    return Err(Rejection::EffectPending.into());
                }
                self.check_selection_free()?;
                self.selection.arm(mode, qualifier.as_deref(), None)?;
            },
            SessionEvent::StartDiscardTop5 => self.orchestrator.start_discard_top5(out)?,
            SessionEvent::PickFromDiscard { card_id } => {
                self.orchestrator.pick_from_discard(card_id, out)?;
            },
            SessionEvent::StartCardTrade { card_id } => {
                self.orchestrator.start_card_trade(card_id, &self.store, out)?;
            },
            SessionEvent::ResolveBulkMove => self.orchestrator.resolve_bulk_move(out)?,
            SessionEvent::StartAriadne { card_id } => {
                self.orchestrator.check_ariadne(card_id, &self.store)?;
                self.check_selection_free()?;
                self.selection.arm_with(
                    SelectionMode::SelectSet,
                    Some(Qualifier::Ariadne),
                    Some(card_id),
                )?;
            },
            SessionEvent::Replenish { source } => {
                self.orchestrator.replenish(source, &self.store, out)?;
            },
        }
        Ok(())
    }

    fn apply_channel(
        &mut self,
        channel_actions: Vec<ChannelAction>,
        now: E::Instant,
        out: &mut Outbox,
        actions: &mut Vec<SessionAction>,
    ) {
        for action in channel_actions {
            match action {
                ChannelAction::Open => actions.push(SessionAction::OpenChannel {
                    game_id: self.identity.game_id,
                    player_id: self.identity.player_id,
                }),
                ChannelAction::Send(text) => actions.push(SessionAction::SendFrame(text)),
                ChannelAction::Close { code } => actions.push(SessionAction::CloseChannel { code }),
                ChannelAction::Deliver(event) => self.on_realtime(event, now, out),
            }
        }
    }

    fn on_realtime(&mut self, event: RealtimeEvent, now: E::Instant, out: &mut Outbox) {
        let viewer = self.identity.player_id;
        match event {
            RealtimeEvent::GamePublicUpdate(snapshot) => {
                let stamp = self.store.stamp_now(snapshot.version);
                if self.store.set_turn_snapshot(snapshot, stamp) {
                    self.after_public_update();
                }
            },
            RealtimeEvent::PlayerPrivateUpdate(view) => {
                if view.player_id != viewer {
                    debug!(player = view.player_id, "private update for another player dropped");
                    return;
                }
                let stamp = self.store.stamp_now(view.version);
                self.store.set_private_view(view, stamp);
            },
            RealtimeEvent::ConnectionStatus { connected: true } => {
                // Pushes may have been missed while disconnected.
                out.request_refresh();
            },
            RealtimeEvent::ConnectionFailed { attempts } => {
                out.notice(Notice::ConnectionFailed { attempts });
            },
            RealtimeEvent::ForcedReveal { target, requester } => {
                if target == viewer {
                    info!(?requester, "forced to reveal a secret");
                    self.arm_from_server(SelectionMode::SelectMyNotRevealedSecret, None);
                }
            },
            RealtimeEvent::SuspicionVote { initiator } => {
                info!(?initiator, "suspicion vote started");
                self.arm_from_server(SelectionMode::SelectOtherPlayer, Some(Qualifier::Point));
            },
            RealtimeEvent::TimerTick { remaining } => {
                if let Some(follow_up) =
                    self.orchestrator.set_countdown(remaining, now, self.phase(), out)
                {
                    self.follow_up(follow_up, out);
                }
            },
            RealtimeEvent::TradeRequest { from } => self.orchestrator.open_trade(from),
            RealtimeEvent::ConnectionStatus { connected: false }
            | RealtimeEvent::Reconnecting { .. } => {},
            RealtimeEvent::Other { kind, .. } => debug!(%kind, "unhandled realtime event"),
        }
    }

    fn handle_response(
        &mut self,
        id: RequestId,
        result: Result<ApiResponse, ApiError>,
        now: E::Instant,
        out: &mut Outbox,
    ) {
        let Some(InFlight { operation, continuation }) = self.requests.remove(&id) else {
            debug!(%id, "response for unknown request dropped");
            return;
        };

        if let Err(error) = &result {
            warn!(%id, operation, %error, "request failed");
            out.notice(Notice::RequestFailed { operation, error: error.clone() });
        }

        match continuation {
            Continuation::Fetch { fetch, half } => self.complete_fetch(fetch, half, result, out),
            Continuation::Selection => {
                self.selection.complete(id, result.is_ok(), out);
            },
            Continuation::Refresh => {
                if result.is_ok() {
                    out.request_refresh();
                }
            },
            Continuation::Ignore => {},
            other => {
                if let Some(follow_up) =
                    self.orchestrator.complete(other, result, &mut self.store, out, now)
                {
                    self.follow_up(follow_up, out);
                }
            },
        }
    }

    fn complete_fetch(
        &mut self,
        fetch: FetchId,
        half: Half,
        result: Result<ApiResponse, ApiError>,
        out: &mut Outbox,
    ) {
        let part = match (half, result) {
            (Half::Public, Ok(ApiResponse::Public(snapshot))) => Some(FetchPart::Public(snapshot)),
            (Half::Private, Ok(ApiResponse::Private(view))) => Some(FetchPart::Private(view)),
            (_, Ok(other)) => {
                warn!(?half, ?other, "fetch answered with the wrong payload");
                None
            },
            (_, Err(_)) => None,
        };

        let Some(part) = part else {
            match self.store.fail_fetch(fetch) {
                Ok(()) => self.orchestrator.on_fetch_complete(fetch, false, &self.store, out),
                Err(e) => debug!(error = %e, "fetch already abandoned"),
            }
            return;
        };

        match self.store.complete_fetch(fetch, part) {
            Ok(FetchProgress::Waiting) => {},
            Ok(FetchProgress::Completed { public_applied, .. }) => {
                if public_applied {
                    self.after_public_update();
                }
                self.orchestrator.on_fetch_complete(fetch, true, &self.store, out);
            },
            Err(e) => debug!(error = %e, "late fetch half dropped"),
        }
    }

    fn after_public_update(&mut self) {
        if let Some(turn) = self.store.turn() {
            self.orchestrator.on_snapshot(turn);
            self.selection.on_snapshot(turn);
        }
    }

    fn follow_up(&mut self, follow_up: FollowUp, out: &mut Outbox) {
        if let Some((mode, qualifier)) = self.orchestrator.apply_follow_up(follow_up, out)
            && let Err(e) = self.selection.arm_when_free(mode, qualifier)
        {
            warn!(error = %e, "follow-up selection not armed");
        }
    }

    fn arm_from_server(&mut self, mode: SelectionMode, qualifier: Option<Qualifier>) {
        if let Err(e) = self.selection.arm_when_free(mode, qualifier) {
            warn!(error = %e, "server-requested selection not armed");
        }
    }

    /// Player-armed selections never replace one waiting on the server.
    fn check_selection_free(&self) -> Result<(), Rejection> {
        if self.selection.is_busy() {
            return Err(Rejection::InFlight { flow: "selection" });
        }
        Ok(())
    }

    fn phase(&self) -> TurnPhase {
        self.store.turn().map_or(TurnPhase::None, |turn| turn.phase)
    }

    fn flush(&mut self, mut out: Outbox, actions: &mut Vec<SessionAction>) {
        if out.take_refresh() {
            out.fetch(&mut self.store);
        }
        self.next_request = out.next_id();

        for (id, request, continuation) in out.calls {
            let operation = request.name();
            debug!(%id, operation, "call");
            self.requests.insert(id, InFlight { operation, continuation });
            actions.push(SessionAction::Call { id, request });
        }
        actions.extend(out.notices.into_iter().map(SessionAction::Notify));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        ops::{Add, Sub},
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Duration,
    };

    use sleuth_proto::{
        ActionAck, ApiRequest, Card, CardKind, Piles, PlayerSummary, PrivatePlayerView,
        TurnSnapshot,
    };

    use super::*;
    use crate::{event::DropTarget, selection::Selection};

    const GAME: GameId = 7;
    const VIEWER: PlayerId = 1;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct TestInstant(Duration);

    impl Sub for TestInstant {
        type Output = Duration;

        fn sub(self, other: Self) -> Duration {
            self.0.saturating_sub(other.0)
        }
    }

    impl Add<Duration> for TestInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self {
            Self(self.0 + rhs)
        }
    }

    #[derive(Debug, Clone, Default)]
    struct ManualEnv {
        millis: Arc<AtomicU64>,
    }

    impl ManualEnv {
        fn advance(&self, duration: Duration) {
            let millis = u64::try_from(duration.as_millis()).unwrap();
            self.millis.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Environment for ManualEnv {
        type Instant = TestInstant;

        fn now(&self) -> TestInstant {
            TestInstant(Duration::from_millis(self.millis.load(Ordering::SeqCst)))
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            std::future::ready(())
        }
    }

    fn session() -> (Session<ManualEnv>, ManualEnv) {
        let env = ManualEnv::default();
        let session = Session::new(
            env.clone(),
            SessionIdentity::new(GAME, VIEWER),
            SessionConfig::default(),
        );
        (session, env)
    }

    fn snapshot(turn_owner: PlayerId) -> TurnSnapshot {
        let player = |id: PlayerId, turn_order| PlayerSummary {
            id,
            name: format!("p{id}"),
            avatar: None,
            turn_order,
            secrets: Vec::new(),
            sets: Vec::new(),
            in_disgrace: false,
        };
        TurnSnapshot {
            game_id: GAME,
            turn_owner,
            phase: TurnPhase::None,
            players: vec![player(2, 1), player(1, 2), player(3, 3)],
            piles: Piles::default(),
            end_game: None,
            version: None,
        }
    }

    fn private(hand: Vec<Card>) -> PrivatePlayerView {
        PrivatePlayerView { player_id: VIEWER, hand, secrets: Vec::new(), version: None }
    }

    fn calls(actions: &[SessionAction]) -> Vec<(RequestId, ApiRequest)> {
        actions
            .iter()
            .filter_map(|action| match action {
                SessionAction::Call { id, request } => Some((*id, request.clone())),
                _ => None,
            })
            .collect()
    }

    /// Answer both halves of the fetch in `actions`.
    fn answer_fetch(
        session: &mut Session<ManualEnv>,
        actions: &[SessionAction],
        turn: TurnSnapshot,
        view: PrivatePlayerView,
    ) -> Vec<SessionAction> {
        let mut produced = Vec::new();
        for (id, request) in calls(actions) {
            let result = match request {
                ApiRequest::FetchPublic { .. } => Ok(ApiResponse::Public(turn.clone())),
                ApiRequest::FetchPrivate { .. } => Ok(ApiResponse::Private(view.clone())),
                _ => continue,
            };
            produced.extend(session.handle(SessionEvent::Response { id, result }).unwrap());
        }
        produced
    }

    fn loaded(turn: TurnSnapshot, hand: Vec<Card>) -> (Session<ManualEnv>, ManualEnv) {
        let (mut session, env) = session();
        let actions = session.handle(SessionEvent::Refresh).unwrap();
        answer_fetch(&mut session, &actions, turn, private(hand));
        (session, env)
    }

    #[test]
    fn opening_the_channel_triggers_a_fetch() {
        let (mut session, _) = session();

        let actions = session.handle(SessionEvent::Connect).unwrap();
        assert_eq!(actions, vec![SessionAction::OpenChannel { game_id: GAME, player_id: VIEWER }]);

        let actions = session.handle(SessionEvent::ChannelOpened).unwrap();
        let requests: Vec<_> = calls(&actions).into_iter().map(|(_, r)| r).collect();
        assert_eq!(requests, vec![
            ApiRequest::FetchPublic { game_id: GAME },
            ApiRequest::FetchPrivate { game_id: GAME, player_id: VIEWER },
        ]);
        assert!(session.view().is_loading);
    }

    #[test]
    fn fetch_populates_view_with_viewer_first() {
        let (mut session, _) = session();
        let actions = session.handle(SessionEvent::Refresh).unwrap();
        assert!(!session.view().has_loaded_once);

        answer_fetch(&mut session, &actions, snapshot(2), private(Vec::new()));

        let view = session.view();
        assert!(view.has_loaded_once);
        assert!(!view.is_loading);
        let order: Vec<_> = view.ordered_players.iter().map(|p| p.id).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert_eq!(session.outstanding_requests(), 0);
    }

    #[test]
    fn unknown_response_is_dropped() {
        let (mut session, _) = session();
        let actions = session.handle(SessionEvent::Refresh).unwrap();
        let (id, _) = calls(&actions)[0].clone();
        let stale = RequestId(id.get() + 100);

        let result = Ok(ApiResponse::Cards(Vec::new()));
        let actions = session.handle(SessionEvent::Response { id: stale, result }).unwrap();
        assert!(actions.is_empty());
        assert_eq!(session.outstanding_requests(), 2);
    }

    #[test]
    fn failed_request_is_reported() {
        let card = Card::new(5, "Blackmailed", CardKind::Devious);
        let (mut session, _) = loaded(snapshot(VIEWER), vec![card]);

        let actions = session
            .handle(SessionEvent::DropCard { card_id: 5, target: DropTarget::DiscardPile })
            .unwrap();
        let (id, request) = calls(&actions)[0].clone();
        assert_eq!(request, ApiRequest::Discard { card_id: 5 });
        assert!(session.store().private_view().unwrap().hand.is_empty());

        let error = ApiError::new(409, "nope");
        let actions = session
            .handle(SessionEvent::Response { id, result: Err(error.clone()) })
            .unwrap();
        assert_eq!(actions, vec![SessionAction::Notify(Notice::RequestFailed {
            operation: "discard",
            error,
        })]);
        assert_eq!(session.store().private_view().unwrap().hand.len(), 1);
    }

    #[test]
    fn failed_discard_restores_hand_after_public_push() {
        let card = Card::new(5, "Blackmailed", CardKind::Devious);
        let (mut session, _) = loaded(snapshot(VIEWER), vec![card.clone()]);
        session.handle(SessionEvent::Connect).unwrap();
        let opened = session.handle(SessionEvent::ChannelOpened).unwrap();
        answer_fetch(&mut session, &opened, snapshot(VIEWER), private(vec![card.clone()]));

        let actions = session
            .handle(SessionEvent::DropCard { card_id: 5, target: DropTarget::DiscardPile })
            .unwrap();
        let (id, _) = calls(&actions)[0].clone();

        // The server pushes the public half unchanged before refusing.
        let frame = serde_json::json!({"type": "game_public_update", "data": snapshot(VIEWER)});
        session.handle(SessionEvent::FrameReceived(frame.to_string())).unwrap();
        assert_eq!(session.store().turn().unwrap().piles.discard_count, 0);

        let actions = session
            .handle(SessionEvent::Response { id, result: Err(ApiError::new(409, "nope")) })
            .unwrap();
        assert_eq!(session.store().private_view().unwrap().hand, vec![card]);
        let refetch: Vec<_> = calls(&actions).into_iter().map(|(_, r)| r).collect();
        assert!(refetch.contains(&ApiRequest::FetchPublic { game_id: GAME }));
    }

    #[test]
    fn rejected_intent_sends_nothing() {
        let card = Card::new(5, "Cards off the table", CardKind::Event);
        let (mut session, _) = loaded(snapshot(2), vec![card]);

        let err = session
            .handle(SessionEvent::DropCard { card_id: 5, target: DropTarget::ActionZone })
            .unwrap_err();
        assert!(matches!(err, SessionError::Rejected(Rejection::NotYourTurn)));
        assert!(!err.is_fatal());
        assert_eq!(session.outstanding_requests(), 0);
    }

    #[test]
    fn forced_reveal_for_viewer_arms_own_secret_pick() {
        let (mut session, _) = session();
        session.handle(SessionEvent::Connect).unwrap();
        session.handle(SessionEvent::ChannelOpened).unwrap();

        session
            .handle(SessionEvent::FrameReceived(
                r#"{"type":"forced_reveal","target":3}"#.to_string(),
            ))
            .unwrap();
        assert!(session.selection().is_idle());

        session
            .handle(SessionEvent::FrameReceived(
                r#"{"type":"forced_reveal","target":1,"requester":2}"#.to_string(),
            ))
            .unwrap();
        assert_eq!(*session.selection().current(), Selection::RevealOwn);
    }

    #[test]
    fn event_without_window_arms_follow_up() {
        let card = Card::new(5, "Cards off the table", CardKind::Event);
        let (mut session, _) = loaded(snapshot(VIEWER), vec![card]);

        let actions = session
            .handle(SessionEvent::DropCard { card_id: 5, target: DropTarget::ActionZone })
            .unwrap();
        let (id, _) = calls(&actions)[0].clone();
        assert!(session.view().currently_played.is_some());

        session
            .handle(SessionEvent::Response {
                id,
                result: Ok(ApiResponse::Ack(ActionAck::with_timer(0))),
            })
            .unwrap();

        let view = session.view();
        assert_eq!(view.selection.mode, Some(SelectionMode::SelectOtherPlayer));
        assert_eq!(view.selection.action, Some(Qualifier::CardsOffTheTable));
        assert!(view.currently_played.is_none());
        assert!(view.pending.is_none());
    }

    #[test]
    fn countdown_resolves_on_local_ticks() {
        let card = Card::new(5, "Point your suspicions", CardKind::Event);
        let (mut session, env) = loaded(snapshot(VIEWER), vec![card]);

        let actions = session
            .handle(SessionEvent::DropCard { card_id: 5, target: DropTarget::ActionZone })
            .unwrap();
        let (id, _) = calls(&actions)[0].clone();
        session
            .handle(SessionEvent::Response {
                id,
                result: Ok(ApiResponse::Ack(ActionAck::with_timer(2))),
            })
            .unwrap();
        assert_eq!(session.view().countdown, 2);

        // The window only resolves while the server says Playing.
        session.handle(SessionEvent::Connect).unwrap();
        session.handle(SessionEvent::ChannelOpened).unwrap();
        let mut playing = snapshot(VIEWER);
        playing.phase = TurnPhase::Playing;
        let frame = serde_json::json!({"type": "game_public_update", "data": playing});
        session.handle(SessionEvent::FrameReceived(frame.to_string())).unwrap();
        assert_eq!(session.store().turn().unwrap().phase, TurnPhase::Playing);

        env.advance(Duration::from_secs(1));
        session.handle(SessionEvent::Tick).unwrap();
        assert_eq!(session.view().countdown, 1);
        assert!(session.selection().is_idle());

        env.advance(Duration::from_secs(1));
        session.handle(SessionEvent::Tick).unwrap();
        let view = session.view();
        assert_eq!(view.countdown, 0);
        assert_eq!(view.selection.action, Some(Qualifier::Point));
    }

    #[test]
    fn arming_is_refused_during_response_window() {
        let card = Card::new(5, "Card trade", CardKind::Event);
        let (mut session, _) = loaded(snapshot(VIEWER), vec![card]);

        let actions = session
            .handle(SessionEvent::DropCard { card_id: 5, target: DropTarget::ActionZone })
            .unwrap();
        assert!(!actions.is_empty());

        let err = session
            .handle(SessionEvent::ArmSelection {
                mode: SelectionMode::SelectOtherPlayer,
                qualifier: Some("Point".to_string()),
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Rejected(Rejection::EffectPending)));
    }

    /// Loaded session with the channel open and the one-more steal to
    /// player 3 in flight. Returns the steal's request id.
    fn one_more_in_flight() -> (Session<ManualEnv>, RequestId) {
        let (mut session, _) = loaded(snapshot(VIEWER), Vec::new());
        session.handle(SessionEvent::Connect).unwrap();
        let opened = session.handle(SessionEvent::ChannelOpened).unwrap();
        answer_fetch(&mut session, &opened, snapshot(VIEWER), private(Vec::new()));

        session
            .handle(SessionEvent::ArmSelection {
                mode: SelectionMode::SelectOtherRevealedSecret,
                qualifier: Some("one more".to_string()),
            })
            .unwrap();
        session.handle(SessionEvent::PickSecret { owner: 2, secret: 20 }).unwrap();
        let actions = session.handle(SessionEvent::PickPlayer { player: 3 }).unwrap();
        let (id, request) = calls(&actions)[0].clone();
        assert_eq!(request, ApiRequest::StealSecret { from: 2, secret_id: 20, to: 3 });
        (session, id)
    }

    #[test]
    fn suspicion_vote_push_waits_for_transfer_to_finish() {
        let (mut session, steal) = one_more_in_flight();

        let frame = r#"{"type":"suspicion_vote","initiator":2}"#.to_string();
        session.handle(SessionEvent::FrameReceived(frame)).unwrap();
        assert_eq!(session.view().selection.action, Some(Qualifier::OneMore));

        let ok = Ok(ApiResponse::Ack(ActionAck::default()));
        let actions =
            session.handle(SessionEvent::Response { id: steal, result: ok.clone() }).unwrap();
        let (hide, request) = calls(&actions)[0].clone();
        assert_eq!(request, ApiRequest::HideSecret { owner: 3, secret_id: 20 });

        session.handle(SessionEvent::Response { id: hide, result: ok }).unwrap();
        let selection = session.view().selection;
        assert_eq!(selection.mode, Some(SelectionMode::SelectOtherPlayer));
        assert_eq!(selection.action, Some(Qualifier::Point));
    }

    #[test]
    fn player_cannot_rearm_over_in_flight_selection() {
        let (mut session, _) = one_more_in_flight();

        let err = session
            .handle(SessionEvent::ArmSelection {
                mode: SelectionMode::SelectOtherPlayer,
                qualifier: None,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Rejected(Rejection::InFlight { flow: "selection" })));
        assert_eq!(session.view().selection.action, Some(Qualifier::OneMore));
    }

    #[test]
    fn disconnect_twice_closes_once() {
        let (mut session, _) = session();
        session.handle(SessionEvent::Connect).unwrap();
        session.handle(SessionEvent::ChannelOpened).unwrap();

        let first = session.handle(SessionEvent::Disconnect).unwrap();
        assert_eq!(first, vec![SessionAction::CloseChannel { code: 1000 }]);
        let second = session.handle(SessionEvent::Disconnect).unwrap();
        assert!(second.is_empty());
    }
}
