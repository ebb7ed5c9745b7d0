//! In-memory game backend.
//!
//! `FakeServer` holds authoritative state for one game and answers
//! [`ApiRequest`]s the way the real backend does closely enough for the
//! session layer: cards move between hands and piles, event plays open a
//! response window, every mutation bumps a version that rides along on
//! fetches and pushes. Failures can be scripted per operation.
//!
//! It never talks to a session directly. [`SimWorld`](crate::SimWorld)
//! decides when answers and frames are delivered.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;
use serde_json::json;
use sleuth_client::GameApi;
use sleuth_proto::{
    ActionAck, ApiError, ApiRequest, ApiResponse, Card, CardId, CardKind, EndGame, GameId,
    OwnSecret, Piles, PlayedSet, PlayerId, PlayerSummary, PrivatePlayerView, SecretSlot, SetType,
    TurnPhase, TurnSnapshot,
};
use tracing::debug;

/// Authoritative state of one game.
#[derive(Debug, Clone)]
pub struct FakeServer {
    turn: TurnSnapshot,
    hands: BTreeMap<PlayerId, PrivatePlayerView>,
    draw: Vec<Card>,
    discard: Vec<Card>,
    version: u64,
    ack_timer: u32,
    failures: VecDeque<(&'static str, ApiError)>,
    log: Vec<(PlayerId, ApiRequest)>,
}

impl FakeServer {
    /// Game with the given players, in turn order, each holding two hidden
    /// secrets and an empty hand. The first player owns the turn.
    pub fn new(game_id: GameId, players: &[(PlayerId, &str)]) -> Self {
        let mut summaries = Vec::with_capacity(players.len());
        let mut hands = BTreeMap::new();
        for (order, &(id, name)) in (1u32..).zip(players) {
            let secrets = [id * 100 + 1, id * 100 + 2];
            summaries.push(PlayerSummary {
                id,
                name: name.to_string(),
                avatar: None,
                turn_order: order,
                secrets: secrets
                    .iter()
                    .map(|&secret| SecretSlot { id: secret, revealed: false, name: None })
                    .collect(),
                sets: Vec::new(),
                in_disgrace: false,
            });
            hands.insert(id, PrivatePlayerView {
                player_id: id,
                hand: Vec::new(),
                secrets: secrets
                    .iter()
                    .map(|&secret| OwnSecret {
                        id: secret,
                        name: format!("secret {secret}"),
                        revealed: false,
                    })
                    .collect(),
                version: None,
            });
        }

        let turn_owner = players.first().map_or(0, |&(id, _)| id);
        Self {
            turn: TurnSnapshot {
                game_id,
                turn_owner,
                phase: TurnPhase::None,
                players: summaries,
                piles: Piles::default(),
                end_game: None,
                version: None,
            },
            hands,
            draw: Vec::new(),
            discard: Vec::new(),
            version: 1,
            ack_timer: 5,
            failures: VecDeque::new(),
            log: Vec::new(),
        }
    }

    /// Three players (1, 2, 3) with player 1 on turn.
    ///
    /// Player 1 holds one card of every kind the scenarios need; the draw
    /// pile holds twenty detectives.
    pub fn standard(game_id: GameId) -> Self {
        let mut server = Self::new(game_id, &[(1, "Ann"), (2, "Bo"), (3, "Cy")]);
        server.deal(1, vec![
            Card::new(10, "Point your suspicions", CardKind::Event),
            Card::new(11, "Not so fast", CardKind::Instant),
            Card::new(12, "Hercule Poirot", CardKind::Detective),
            Card::new(13, "Hercule Poirot", CardKind::Detective),
            Card::new(14, "Blackmailed", CardKind::Devious),
            Card::new(15, "Social faux pas", CardKind::Devious),
        ]);
        server.deal(2, vec![Card::new(20, "Not so fast", CardKind::Instant)]);
        server.stock((100..120).map(|id| Card::new(id, "Miss Marple", CardKind::Detective)));
        server
    }

    /// Add cards to a player's hand.
    pub fn deal(&mut self, player: PlayerId, cards: Vec<Card>) {
        if let Some(view) = self.hands.get_mut(&player) {
            view.hand.extend(cards);
            self.bump();
        }
    }

    /// Put cards on top of the draw pile.
    pub fn stock(&mut self, cards: impl IntoIterator<Item = Card>) {
        self.draw.extend(cards);
        self.turn.piles.draw_count = count(self.draw.len());
        self.bump();
    }

    /// Timer granted by the next action acknowledgements.
    pub fn set_ack_timer(&mut self, timer: u32) {
        self.ack_timer = timer;
    }

    /// Fail the next request of `operation` (see [`ApiRequest::name`]).
    pub fn fail_next(&mut self, operation: &'static str, status: u16) {
        self.failures.push_back((operation, ApiError::new(status, format!("{operation} refused"))));
    }

    /// Set the turn phase.
    pub fn set_phase(&mut self, phase: TurnPhase) {
        self.turn.phase = phase;
        self.bump();
    }

    /// An opponent counters the open response window.
    pub fn counter(&mut self) {
        self.set_phase(TurnPhase::Waiting);
    }

    /// Hand the turn to `player` and reset the phase.
    pub fn pass_turn(&mut self, player: PlayerId) {
        self.turn.turn_owner = player;
        self.turn.phase = TurnPhase::None;
        self.bump();
    }

    /// Put a player in or out of social disgrace.
    pub fn set_disgrace(&mut self, player: PlayerId, in_disgrace: bool) {
        if let Some(summary) = self.turn.players.iter_mut().find(|p| p.id == player) {
            summary.in_disgrace = in_disgrace;
            self.bump();
        }
    }

    /// End the game.
    pub fn end_game(&mut self, winners: Vec<PlayerId>) {
        self.turn.end_game = Some(EndGame { winners, reason: None });
        self.bump();
    }

    /// Current public state, versioned.
    pub fn public(&self) -> TurnSnapshot {
        TurnSnapshot { version: Some(self.version), ..self.turn.clone() }
    }

    /// Current private state of `player`, versioned.
    pub fn private(&self, player: PlayerId) -> Option<PrivatePlayerView> {
        self.hands
            .get(&player)
            .map(|view| PrivatePlayerView { version: Some(self.version), ..view.clone() })
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Every request received, with its caller.
    pub fn requests(&self) -> &[(PlayerId, ApiRequest)] {
        &self.log
    }

    /// Number of requests named `operation` received so far.
    pub fn count(&self, operation: &str) -> usize {
        self.log.iter().filter(|(_, request)| request.name() == operation).count()
    }

    /// `game_public_update` frame for the current state.
    pub fn public_frame(&self) -> String {
        json!({"type": "game_public_update", "data": self.public()}).to_string()
    }

    /// `player_private_update` frame for `player`.
    pub fn private_frame(&self, player: PlayerId) -> Option<String> {
        self.private(player)
            .map(|view| json!({"type": "player_private_update", "data": view}).to_string())
    }

    /// `timer_tick` frame.
    pub fn timer_frame(remaining: u32) -> String {
        json!({"type": "timer_tick", "remaining": remaining}).to_string()
    }

    /// `forced_reveal` frame.
    pub fn forced_reveal_frame(target: PlayerId, requester: PlayerId) -> String {
        json!({"type": "forced_reveal", "target": target, "requester": requester}).to_string()
    }

    /// `suspicion_vote` frame.
    pub fn suspicion_vote_frame(initiator: PlayerId) -> String {
        json!({"type": "suspicion_vote", "initiator": initiator}).to_string()
    }

    /// Answer one request made by `caller`.
    pub fn answer(
        &mut self,
        caller: PlayerId,
        request: &ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        self.log.push((caller, request.clone()));
        if let Some(position) = self.failures.iter().position(|(op, _)| *op == request.name())
            && let Some((_, error)) = self.failures.remove(position)
        {
            debug!(operation = request.name(), status = error.status, "scripted failure");
            return Err(error);
        }

        match request {
            ApiRequest::FetchPublic { game_id } => {
                if *game_id != self.turn.game_id {
                    return Err(ApiError::new(404, "no such game"));
                }
                Ok(ApiResponse::Public(self.public()))
            },
            ApiRequest::FetchPrivate { player_id, .. } => self
                .private(*player_id)
                .map(ApiResponse::Private)
                .ok_or_else(|| ApiError::new(404, "no such player")),
            ApiRequest::Discard { card_id } => {
                let card = self.take(caller, *card_id)?;
                self.turn.piles.discard_top = Some(card.clone());
                self.discard.push(card);
                self.turn.piles.discard_count = count(self.discard.len());
                self.turn.phase = TurnPhase::Discarding;
                self.bump();
                Ok(ApiResponse::Ack(ActionAck::default()))
            },
            ApiRequest::PlayEvent { card_id } => {
                let card = self.take(caller, *card_id)?;
                self.discard.push(card);
                self.turn.phase = TurnPhase::Playing;
                self.bump();
                Ok(ApiResponse::Ack(ActionAck::with_timer(self.ack_timer)))
            },
            ApiRequest::PlayInstant { card_id } => {
                let card = self.take(caller, *card_id)?;
                self.discard.push(card);
                self.bump();
                Ok(ApiResponse::Ack(ActionAck::with_timer(self.ack_timer)))
            },
            ApiRequest::PlaySet { card_ids } => self.play_set(caller, card_ids),
            ApiRequest::Replenish { .. } => {
                let card = self.draw.pop().ok_or_else(|| ApiError::new(409, "draw pile empty"))?;
                self.turn.piles.draw_count = count(self.draw.len());
                if let Some(view) = self.hands.get_mut(&caller) {
                    view.hand.push(card);
                }
                self.bump();
                Ok(ApiResponse::Ack(ActionAck::default()))
            },
            ApiRequest::PeekDiscard { count } => {
                Ok(ApiResponse::Cards(self.discard.iter().rev().take(*count).cloned().collect()))
            },
            ApiRequest::TakeFromDiscard { card_id } => {
                let position = self
                    .discard
                    .iter()
                    .position(|c| c.id == *card_id)
                    .ok_or_else(|| ApiError::new(404, "card not in discard pile"))?;
                let card = self.discard.remove(position);
                if let Some(view) = self.hands.get_mut(&caller) {
                    view.hand.push(card);
                }
                self.turn.piles.discard_count = count(self.discard.len());
                self.turn.piles.discard_top = self.discard.last().cloned();
                self.bump();
                Ok(ApiResponse::Ack(ActionAck::default()))
            },
            _ => {
                self.bump();
                Ok(ApiResponse::Ack(ActionAck::default()))
            },
        }
    }

    fn play_set(&mut self, caller: PlayerId, card_ids: &[CardId]) -> Result<ApiResponse, ApiError> {
        let mut cards = Vec::with_capacity(card_ids.len());
        for &card_id in card_ids {
            cards.push(self.take(caller, card_id)?);
        }
        let set_type = cards
            .first()
            .map(|c| SetType::from(c.name.clone()))
            .ok_or_else(|| ApiError::new(400, "empty set"))?;

        let owner = self
            .turn
            .players
            .iter_mut()
            .find(|p| p.id == caller)
            .ok_or_else(|| ApiError::new(404, "no such player"))?;
        let index = owner.sets.len();
        owner.sets.push(PlayedSet { index, set_type: set_type.clone(), cards });
        self.turn.phase = TurnPhase::Playing;
        self.bump();

        let ack = ActionAck { set_type: Some(set_type), ..ActionAck::with_timer(self.ack_timer) };
        Ok(ApiResponse::Ack(ack))
    }

    fn take(&mut self, player: PlayerId, card_id: CardId) -> Result<Card, ApiError> {
        let view =
            self.hands.get_mut(&player).ok_or_else(|| ApiError::new(404, "no such player"))?;
        let position = view
            .hand
            .iter()
            .position(|c| c.id == card_id)
            .ok_or_else(|| ApiError::new(409, format!("card {card_id} not in hand")))?;
        Ok(view.hand.remove(position))
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// A [`FakeServer`] shared with a driver, answering as one player.
#[derive(Debug, Clone)]
pub struct SharedFakeServer {
    inner: Arc<Mutex<FakeServer>>,
    caller: PlayerId,
}

/// Wrap `server` for use as a [`GameApi`] by `caller`.
pub fn create_shared_server(server: FakeServer, caller: PlayerId) -> SharedFakeServer {
    SharedFakeServer { inner: Arc::new(Mutex::new(server)), caller }
}

impl SharedFakeServer {
    /// Lock the underlying server.
    ///
    /// Returns `None` if a previous holder panicked.
    pub fn lock(&self) -> Option<MutexGuard<'_, FakeServer>> {
        self.inner.lock().ok()
    }
}

#[async_trait]
impl GameApi for SharedFakeServer {
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut server = self.lock().ok_or_else(|| ApiError::transport("server lock poisoned"))?;
        server.answer(self.caller, &request)
    }
}
