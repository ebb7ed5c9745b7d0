//! Session state store.
//!
//! Local mirror of server truth: the public [`TurnSnapshot`], the viewer's
//! [`PrivatePlayerView`], and the viewer-relative player order derived from
//! them.
//!
//! # Fetches
//!
//! A fetch is two requests (public and private) issued together. The store
//! hands out a [`FetchId`] per fetch, buffers whichever half arrives first,
//! and applies both only when the second half lands. A failed half abandons
//! the whole fetch, so a failure never partially overwrites state.
//!
//! # Ordering
//!
//! Every write carries a [`Stamp`]: the server `version` when the payload has
//! one, plus a local sequence number taken when the fetch was issued or the
//! push arrived. A write older than the last applied one is dropped. This
//! keeps a slow fetch issued before a push from clobbering the pushed state.

use std::{collections::BTreeMap, fmt};

use sleuth_proto::{GameId, PlayerId, PlayerSummary, PrivatePlayerView, TurnSnapshot};
use tracing::debug;

use crate::error::StoreError;

/// Identifier of one outstanding fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchId(u64);

impl fmt::Display for FetchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordering key of a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// Server sequence number, when the payload carried one.
    pub server: Option<u64>,
    /// Local sequence at request issue or frame arrival.
    pub local: u64,
}

impl Stamp {
    /// Whether a write stamped `self` may replace one stamped `previous`.
    ///
    /// Server versions win when both sides have one; otherwise local order
    /// decides.
    pub fn supersedes(&self, previous: &Self) -> bool {
        match (self.server, previous.server) {
            (Some(ours), Some(theirs)) if ours != theirs => ours > theirs,
            _ => self.local > previous.local,
        }
    }
}

/// One half of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPart {
    /// Public turn data.
    Public(TurnSnapshot),
    /// Private player data.
    Private(PrivatePlayerView),
}

/// Where a fetch stands after one of its halves arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchProgress {
    /// Still waiting for the other half.
    Waiting,
    /// Both halves arrived and were offered to the store.
    Completed {
        /// Whether the snapshot was newer than the current one.
        public_applied: bool,
        /// Whether the private view was newer than the current one.
        private_applied: bool,
    },
}

#[derive(Debug, Default)]
struct PendingFetch {
    issued: u64,
    public: Option<TurnSnapshot>,
    private: Option<PrivatePlayerView>,
}

/// Viewer-relative mirror of the game.
#[derive(Debug)]
pub struct SessionStore {
    game_id: GameId,
    viewer: PlayerId,
    turn: Option<TurnSnapshot>,
    private: Option<PrivatePlayerView>,
    ordered: Vec<PlayerSummary>,
    public_stamp: Option<Stamp>,
    private_stamp: Option<Stamp>,
    /// Local sequence source for stamps.
    clock: u64,
    /// Bumped on every applied public snapshot.
    public_revision: u64,
    /// Bumped on every applied private view.
    private_revision: u64,
    fetches: BTreeMap<FetchId, PendingFetch>,
    next_fetch: u64,
    loaded_once: bool,
}

impl SessionStore {
    /// Empty store for `viewer` in `game_id`.
    pub fn new(game_id: GameId, viewer: PlayerId) -> Self {
        Self {
            game_id,
            viewer,
            turn: None,
            private: None,
            ordered: Vec::new(),
            public_stamp: None,
            private_stamp: None,
            clock: 0,
            public_revision: 0,
            private_revision: 0,
            fetches: BTreeMap::new(),
            next_fetch: 0,
            loaded_once: false,
        }
    }

    /// Game this store mirrors.
    pub fn game_id(&self) -> GameId {
        self.game_id
    }

    /// The viewing player.
    pub fn viewer(&self) -> PlayerId {
        self.viewer
    }

    /// Current public snapshot.
    pub fn turn(&self) -> Option<&TurnSnapshot> {
        self.turn.as_ref()
    }

    /// Current private view.
    pub fn private_view(&self) -> Option<&PrivatePlayerView> {
        self.private.as_ref()
    }

    /// Players rotated so the viewer comes first.
    pub fn ordered_players(&self) -> &[PlayerSummary] {
        &self.ordered
    }

    /// Whether any fetch is outstanding.
    pub fn is_loading(&self) -> bool {
        !self.fetches.is_empty()
    }

    /// Whether a fetch has ever completed. Never reset.
    pub fn has_loaded_once(&self) -> bool {
        self.loaded_once
    }

    /// Counter bumped by every applied public snapshot.
    ///
    /// Optimistic mutations do not bump it, so an unchanged revision means no
    /// authoritative snapshot arrived in between.
    pub fn public_revision(&self) -> u64 {
        self.public_revision
    }

    /// Counter bumped by every applied private view. Same rules as
    /// [`public_revision`](Self::public_revision).
    pub fn private_revision(&self) -> u64 {
        self.private_revision
    }

    /// Start a fetch.
    pub fn begin_fetch(&mut self) -> FetchId {
        let fetch = FetchId(self.next_fetch);
        self.next_fetch += 1;
        let issued = self.tick_clock();
        self.fetches.insert(fetch, PendingFetch { issued, ..PendingFetch::default() });
        debug!(%fetch, "fetch started");
        fetch
    }

    /// Record one half of a fetch; applies both halves once complete.
    ///
    /// # Errors
    ///
    /// `StoreError::UnknownFetch` if the fetch is not outstanding.
    pub fn complete_fetch(
        &mut self,
        fetch: FetchId,
        part: FetchPart,
    ) -> Result<FetchProgress, StoreError> {
        let pending = self.fetches.get_mut(&fetch).ok_or(StoreError::UnknownFetch { fetch })?;
        match part {
            FetchPart::Public(snapshot) => pending.public = Some(snapshot),
            FetchPart::Private(view) => pending.private = Some(view),
        }
        if pending.public.is_none() || pending.private.is_none() {
            return Ok(FetchProgress::Waiting);
        }

        let Some(PendingFetch { issued, public: Some(snapshot), private: Some(view) }) =
            self.fetches.remove(&fetch)
        else {
            return Err(StoreError::UnknownFetch { fetch });
        };

        let public_stamp = Stamp { server: snapshot.version, local: issued };
        let private_stamp = Stamp { server: view.version, local: issued };
        let public_applied = self.set_turn_snapshot(snapshot, public_stamp);
        let private_applied = self.set_private_view(view, private_stamp);
        self.loaded_once = true;

        debug!(%fetch, public_applied, private_applied, "fetch completed");
        Ok(FetchProgress::Completed { public_applied, private_applied })
    }

    /// Abandon a fetch after a failed half. Prior state is untouched.
    ///
    /// # Errors
    ///
    /// `StoreError::UnknownFetch` if the fetch is not outstanding.
    pub fn fail_fetch(&mut self, fetch: FetchId) -> Result<(), StoreError> {
        self.fetches.remove(&fetch).map(drop).ok_or(StoreError::UnknownFetch { fetch })
    }

    /// Stamp for a write arriving now.
    pub fn stamp_now(&mut self, server: Option<u64>) -> Stamp {
        Stamp { server, local: self.tick_clock() }
    }

    /// Replace the public snapshot if `stamp` supersedes the current one.
    pub fn set_turn_snapshot(&mut self, snapshot: TurnSnapshot, stamp: Stamp) -> bool {
        if self.public_stamp.is_some_and(|current| !stamp.supersedes(&current)) {
            debug!(?stamp, current = ?self.public_stamp, "stale snapshot dropped");
            return false;
        }

        self.ordered = reorder(&snapshot.players, self.viewer);
        self.turn = Some(snapshot);
        self.public_stamp = Some(stamp);
        self.public_revision += 1;
        true
    }

    /// Replace the private view if `stamp` supersedes the current one.
    pub fn set_private_view(&mut self, view: PrivatePlayerView, stamp: Stamp) -> bool {
        if self.private_stamp.is_some_and(|current| !stamp.supersedes(&current)) {
            debug!(?stamp, current = ?self.private_stamp, "stale private view dropped");
            return false;
        }

        self.private = Some(view);
        self.private_stamp = Some(stamp);
        self.private_revision += 1;
        true
    }

    /// Both halves of state, for the orchestrator's optimistic path.
    pub(crate) fn optimistic(&mut self) -> Option<(&mut TurnSnapshot, &mut PrivatePlayerView)> {
        match (self.turn.as_mut(), self.private.as_mut()) {
            (Some(turn), Some(private)) => Some((turn, private)),
            _ => None,
        }
    }

    fn tick_clock(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Sort players by turn order and rotate so `viewer` comes first.
///
/// If `viewer` is not among the players the plain turn-sorted list is
/// returned.
pub fn reorder(players: &[PlayerSummary], viewer: PlayerId) -> Vec<PlayerSummary> {
    let mut ordered = players.to_vec();
    ordered.sort_by_key(|p| p.turn_order);
    if let Some(position) = ordered.iter().position(|p| p.id == viewer) {
        ordered.rotate_left(position);
    }
    ordered
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use sleuth_proto::{Card, CardKind};

    use super::*;

    fn player(id: PlayerId, turn_order: u32) -> PlayerSummary {
        PlayerSummary {
            id,
            name: format!("p{id}"),
            avatar: None,
            turn_order,
            secrets: Vec::new(),
            sets: Vec::new(),
            in_disgrace: false,
        }
    }

    fn snapshot(turn_owner: PlayerId, version: Option<u64>) -> TurnSnapshot {
        TurnSnapshot {
            game_id: 1,
            turn_owner,
            phase: sleuth_proto::TurnPhase::None,
            players: vec![player(1, 1), player(2, 2), player(3, 3), player(4, 4)],
            piles: sleuth_proto::Piles::default(),
            end_game: None,
            version,
        }
    }

    fn view(cards: u64) -> PrivatePlayerView {
        PrivatePlayerView {
            player_id: 3,
            hand: (0..cards).map(|id| Card::new(id, "Card", CardKind::Detective)).collect(),
            secrets: Vec::new(),
            version: None,
        }
    }

    #[test]
    fn reorder_rotates_viewer_first() {
        let players = vec![player(1, 1), player(2, 2), player(3, 3), player(4, 4)];
        let ids: Vec<_> = reorder(&players, 3).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 4, 1, 2]);
    }

    #[test]
    fn reorder_without_viewer_sorts_only() {
        let players = vec![player(4, 4), player(2, 2), player(1, 1)];
        let ids: Vec<_> = reorder(&players, 9).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 4]);
    }

    #[test]
    fn fetch_applies_only_when_both_halves_arrive() {
        let mut store = SessionStore::new(1, 3);
        let fetch = store.begin_fetch();
        assert!(store.is_loading());

        let progress = store.complete_fetch(fetch, FetchPart::Public(snapshot(1, None))).unwrap();
        assert_eq!(progress, FetchProgress::Waiting);
        assert!(store.turn().is_none());

        let progress = store.complete_fetch(fetch, FetchPart::Private(view(2))).unwrap();
        assert_eq!(
            progress,
            FetchProgress::Completed { public_applied: true, private_applied: true }
        );
        assert!(!store.is_loading());
        assert!(store.has_loaded_once());
        assert_eq!(store.ordered_players()[0].id, 3);
    }

    #[test]
    fn failed_fetch_leaves_state_untouched() {
        let mut store = SessionStore::new(1, 3);
        let first = store.begin_fetch();
        store.complete_fetch(first, FetchPart::Public(snapshot(1, None))).unwrap();
        store.complete_fetch(first, FetchPart::Private(view(2))).unwrap();

        let second = store.begin_fetch();
        store.complete_fetch(second, FetchPart::Public(snapshot(2, None))).unwrap();
        store.fail_fetch(second).unwrap();

        assert_eq!(store.turn().unwrap().turn_owner, 1);
        assert!(!store.is_loading());
        assert!(store.has_loaded_once());

        // The surviving half of the failed fetch is refused.
        let late = store.complete_fetch(second, FetchPart::Private(view(5)));
        assert_eq!(late, Err(StoreError::UnknownFetch { fetch: second }));
        assert_eq!(store.private_view().unwrap().hand.len(), 2);
    }

    #[test]
    fn loading_tracks_overlapping_fetches() {
        let mut store = SessionStore::new(1, 3);
        let a = store.begin_fetch();
        let b = store.begin_fetch();

        store.complete_fetch(a, FetchPart::Public(snapshot(1, None))).unwrap();
        store.complete_fetch(a, FetchPart::Private(view(1))).unwrap();
        assert!(store.is_loading());
        assert!(store.has_loaded_once());

        store.fail_fetch(b).unwrap();
        assert!(!store.is_loading());
        assert!(store.has_loaded_once());
    }

    #[test]
    fn fetch_issued_before_push_does_not_clobber_it() {
        let mut store = SessionStore::new(1, 3);
        let fetch = store.begin_fetch();

        let stamp = store.stamp_now(None);
        assert!(store.set_turn_snapshot(snapshot(4, None), stamp));

        store.complete_fetch(fetch, FetchPart::Public(snapshot(2, None))).unwrap();
        let progress = store.complete_fetch(fetch, FetchPart::Private(view(1))).unwrap();

        assert_eq!(
            progress,
            FetchProgress::Completed { public_applied: false, private_applied: true }
        );
        assert_eq!(store.turn().unwrap().turn_owner, 4);
    }

    #[test]
    fn server_versions_take_precedence() {
        let mut store = SessionStore::new(1, 3);
        let fetch = store.begin_fetch();

        let stamp = store.stamp_now(Some(7));
        store.set_turn_snapshot(snapshot(4, Some(7)), stamp);

        store.complete_fetch(fetch, FetchPart::Public(snapshot(2, Some(8)))).unwrap();
        store.complete_fetch(fetch, FetchPart::Private(view(1))).unwrap();
        assert_eq!(store.turn().unwrap().turn_owner, 2);

        let stamp = store.stamp_now(Some(6));
        assert!(!store.set_turn_snapshot(snapshot(1, Some(6)), stamp));
        assert_eq!(store.turn().unwrap().turn_owner, 2);
    }

    #[test]
    fn optimistic_edits_do_not_bump_revision() {
        let mut store = SessionStore::new(1, 3);
        let fetch = store.begin_fetch();
        store.complete_fetch(fetch, FetchPart::Public(snapshot(3, None))).unwrap();
        store.complete_fetch(fetch, FetchPart::Private(view(3))).unwrap();
        let revisions = (store.public_revision(), store.private_revision());

        let (turn, private) = store.optimistic().unwrap();
        private.hand.pop();
        turn.piles.discard_count += 1;

        assert_eq!((store.public_revision(), store.private_revision()), revisions);
        assert_eq!(store.private_view().unwrap().hand.len(), 2);
    }

    #[test]
    fn revisions_track_each_half() {
        let mut store = SessionStore::new(1, 3);
        let stamp = store.stamp_now(None);
        store.set_turn_snapshot(snapshot(3, None), stamp);
        assert_eq!((store.public_revision(), store.private_revision()), (1, 0));

        let stamp = store.stamp_now(None);
        store.set_private_view(view(3), stamp);
        assert_eq!((store.public_revision(), store.private_revision()), (1, 1));

        // Dropped writes leave the counter alone.
        let stale = Stamp { server: None, local: 0 };
        assert!(!store.set_turn_snapshot(snapshot(1, None), stale));
        assert_eq!(store.public_revision(), 1);
    }

    proptest! {
        #[test]
        fn reorder_is_a_rotation_of_turn_order(
            orders in proptest::collection::btree_set(0u32..50, 1..8),
            pick in any::<prop::sample::Index>(),
        ) {
            let players: Vec<_> =
                orders.iter().enumerate().map(|(i, &order)| player(i as u64, order)).collect();
            let viewer = players[pick.index(players.len())].id;
            let ordered = reorder(&players, viewer);

            prop_assert_eq!(ordered.len(), players.len());
            prop_assert_eq!(ordered[0].id, viewer);

            let mut sorted = ordered.clone();
            sorted.sort_by_key(|p| p.turn_order);
            let start = sorted.iter().position(|p| p.id == viewer).unwrap();
            sorted.rotate_left(start);
            prop_assert_eq!(ordered, sorted);
        }
    }
}
