//! Request bookkeeping shared by the components.
//!
//! Components never talk to the server. They queue [`ApiRequest`]s in an
//! [`Outbox`] together with a [`Continuation`] saying who handles the
//! response. The session drains the outbox into `SessionAction::Call`s and
//! routes each response back through its continuation.

use std::fmt;

use sleuth_proto::{ApiRequest, PlayerId, SetType};

use crate::{
    event::Notice,
    orchestrator::{DiscardTicket, EventTicket},
    store::{FetchId, SessionStore},
};

/// Identifier of one REST call, unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub(crate) u64);

impl RequestId {
    /// Raw value, for logs and transports that need a number.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Half of a fetch a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Half {
    Public,
    Private,
}

/// What to do with a response.
#[derive(Debug)]
pub(crate) enum Continuation {
    Fetch { fetch: FetchId, half: Half },
    /// Owned by the selection machine, which matches the request id.
    Selection,
    Discard(DiscardTicket),
    /// Step of the post-disgrace auto-replenish loop.
    Replenish { owner: PlayerId },
    PlayEvent(EventTicket),
    PlayInstant,
    PlaySet,
    AddCardToSet { set_type: Option<SetType> },
    PeekDiscard,
    TakeFromDiscard,
    Trade,
    /// Refetch on success.
    Refresh,
    /// Nothing to do beyond reporting a failure.
    Ignore,
}

/// Requests and notices produced while handling one event.
#[derive(Debug)]
pub(crate) struct Outbox {
    next_id: u64,
    pub(crate) calls: Vec<(RequestId, ApiRequest, Continuation)>,
    pub(crate) notices: Vec<Notice>,
    refresh: bool,
}

impl Outbox {
    pub(crate) fn new(next_id: u64) -> Self {
        Self { next_id, calls: Vec::new(), notices: Vec::new(), refresh: false }
    }

    /// Queue a call and return its id.
    pub(crate) fn call(&mut self, request: ApiRequest, continuation: Continuation) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.calls.push((id, request, continuation));
        id
    }

    /// Start a fetch now and return its ticket.
    pub(crate) fn fetch(&mut self, store: &mut SessionStore) -> FetchId {
        let fetch = store.begin_fetch();
        let game_id = store.game_id();
        let player_id = store.viewer();
        self.call(
            ApiRequest::FetchPublic { game_id },
            Continuation::Fetch { fetch, half: Half::Public },
        );
        self.call(
            ApiRequest::FetchPrivate { game_id, player_id },
            Continuation::Fetch { fetch, half: Half::Private },
        );
        fetch
    }

    /// Ask for one refetch once the current event is handled. Repeated
    /// requests coalesce.
    pub(crate) fn request_refresh(&mut self) {
        self.refresh = true;
    }

    pub(crate) fn take_refresh(&mut self) -> bool {
        std::mem::take(&mut self.refresh)
    }

    pub(crate) fn notice(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }
}
