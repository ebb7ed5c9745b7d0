//! One session wired to one fake server.
//!
//! The world plays the role of the driver without any async: actions the
//! session emits are recorded, REST calls wait in a queue until the test
//! delivers them, and the socket opens only when told to. This makes the
//! interleavings the real system can produce (a push landing between a
//! request and its answer, two fetches racing) explicit and repeatable.

use std::time::Duration;

use sleuth_core::{
    Environment, Notice, RequestId, Session, SessionAction, SessionConfig, SessionError,
    SessionEvent, SessionIdentity, SessionView,
};
use sleuth_proto::{ApiRequest, PlayerId};
use tracing::debug;

use crate::{fake_server::FakeServer, sim_env::SimEnv};

/// Session plus backend under test.
pub struct SimWorld {
    env: SimEnv,
    session: Session<SimEnv>,
    server: FakeServer,
    viewer: PlayerId,
    pending: Vec<(RequestId, ApiRequest)>,
    issued: Vec<ApiRequest>,
    frames_sent: Vec<String>,
    notices: Vec<Notice>,
    rejections: Vec<SessionError>,
    opening: bool,
    socket_open: bool,
    opens: usize,
    closes: Vec<u16>,
    broadcast: bool,
}

impl SimWorld {
    /// World for `viewer` with default session timings.
    pub fn new(env: SimEnv, server: FakeServer, viewer: PlayerId) -> Self {
        Self::with_config(env, server, viewer, SessionConfig::default())
    }

    /// World with explicit session timings.
    pub fn with_config(
        env: SimEnv,
        server: FakeServer,
        viewer: PlayerId,
        config: SessionConfig,
    ) -> Self {
        let identity = SessionIdentity::new(server.public().game_id, viewer);
        Self {
            session: Session::new(env.clone(), identity, config),
            env,
            server,
            viewer,
            pending: Vec::new(),
            issued: Vec::new(),
            frames_sent: Vec::new(),
            notices: Vec::new(),
            rejections: Vec::new(),
            opening: false,
            socket_open: false,
            opens: 0,
            closes: Vec::new(),
            broadcast: true,
        }
    }

    /// Connect, open the socket and deliver everything: a loaded session.
    pub fn boot(env: SimEnv, server: FakeServer, viewer: PlayerId) -> Result<Self, SessionError> {
        let mut world = Self::new(env, server, viewer);
        world.handle(SessionEvent::Connect)?;
        world.open_socket()?;
        world.deliver_all()?;
        Ok(world)
    }

    /// Whether mutating answers are followed by public and private pushes.
    /// On by default.
    pub fn set_broadcast(&mut self, broadcast: bool) {
        self.broadcast = broadcast;
    }

    /// Feed one event and record what comes out.
    ///
    /// Non-fatal errors are recorded and returned; nothing else changes.
    pub fn handle(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        match self.session.handle(event) {
            Ok(actions) => {
                for action in actions {
                    self.record(action);
                }
                Ok(())
            },
            Err(e) => {
                if !e.is_fatal() {
                    self.rejections.push(clone_rejection(&e));
                }
                Err(e)
            },
        }
    }

    /// Feed a player intent, keeping only whether it was accepted.
    pub fn intent(&mut self, event: SessionEvent) -> bool {
        self.handle(event).is_ok()
    }

    fn record(&mut self, action: SessionAction) {
        match action {
            SessionAction::OpenChannel { .. } => {
                self.opens += 1;
                self.opening = true;
            },
            SessionAction::SendFrame(text) => self.frames_sent.push(text),
            SessionAction::CloseChannel { code } => {
                self.socket_open = false;
                self.opening = false;
                self.closes.push(code);
            },
            SessionAction::Call { id, request } => {
                self.issued.push(request.clone());
                self.pending.push((id, request));
            },
            SessionAction::Notify(notice) => self.notices.push(notice),
        }
    }

    /// Complete a requested socket open. No-op if none was requested.
    pub fn open_socket(&mut self) -> Result<(), SessionError> {
        if !self.opening {
            return Ok(());
        }
        self.opening = false;
        self.socket_open = true;
        self.handle(SessionEvent::ChannelOpened)
    }

    /// The socket dropped with `code`.
    pub fn drop_socket(&mut self, code: u16) -> Result<(), SessionError> {
        self.socket_open = false;
        self.opening = false;
        self.handle(SessionEvent::ChannelClosed { code })
    }

    /// Push a frame if the socket is open. Returns whether it was delivered.
    pub fn push(&mut self, frame: String) -> Result<bool, SessionError> {
        if !self.socket_open {
            debug!("socket closed, push lost");
            return Ok(false);
        }
        self.handle(SessionEvent::FrameReceived(frame))?;
        Ok(true)
    }

    /// Push the server's current public and viewer-private state.
    pub fn push_state(&mut self) -> Result<(), SessionError> {
        self.push(self.server.public_frame())?;
        if let Some(frame) = self.server.private_frame(self.viewer) {
            self.push(frame)?;
        }
        Ok(())
    }

    /// Answer the pending call at `index` (issue order).
    ///
    /// Returns `false` if there is no such call.
    pub fn deliver(&mut self, index: usize) -> Result<bool, SessionError> {
        if index >= self.pending.len() {
            return Ok(false);
        }
        let (id, request) = self.pending.remove(index);
        let version = self.server.version();
        let result = self.server.answer(self.viewer, &request);
        let mutated = self.server.version() != version;
        debug!(%id, operation = request.name(), ok = result.is_ok(), "delivering response");

        self.handle(SessionEvent::Response { id, result })?;
        if mutated && self.broadcast {
            self.push_state()?;
        }
        Ok(true)
    }

    /// Answer the oldest pending call.
    pub fn deliver_next(&mut self) -> Result<bool, SessionError> {
        self.deliver(0)
    }

    /// Answer calls in issue order until none are left, including calls made
    /// in reaction to earlier answers.
    pub fn deliver_all(&mut self) -> Result<usize, SessionError> {
        let mut delivered = 0;
        while self.deliver_next()? {
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Like [`deliver_all`](Self::deliver_all) but in an order chosen by the
    /// environment's seeded RNG.
    pub fn deliver_shuffled(&mut self) -> Result<usize, SessionError> {
        let mut delivered = 0;
        while !self.pending.is_empty() {
            let index = self.env.pick(self.pending.len());
            self.deliver(index)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Advance the clock by `step` at a time until `total` has elapsed,
    /// ticking the session after each step.
    pub fn advance(&mut self, total: Duration, step: Duration) -> Result<(), SessionError> {
        let step = step.max(Duration::from_millis(1));
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let delta = step.min(total - elapsed);
            self.env.advance(delta);
            elapsed += delta;
            self.handle(SessionEvent::Tick)?;
        }
        Ok(())
    }

    /// Current view.
    pub fn view(&self) -> SessionView {
        self.session.view()
    }

    /// The session.
    pub fn session(&self) -> &Session<SimEnv> {
        &self.session
    }

    /// The backend.
    pub fn server(&self) -> &FakeServer {
        &self.server
    }

    /// Mutable backend, for scripting.
    pub fn server_mut(&mut self) -> &mut FakeServer {
        &mut self.server
    }

    /// The environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Time since the simulation started.
    pub fn elapsed(&self) -> Duration {
        self.env.now().elapsed()
    }

    /// Every request the session issued, answered or not.
    pub fn issued(&self) -> &[ApiRequest] {
        &self.issued
    }

    /// Issued requests named `operation`.
    pub fn issued_count(&self, operation: &str) -> usize {
        self.issued.iter().filter(|r| r.name() == operation).count()
    }

    /// Requests still waiting for an answer.
    pub fn pending(&self) -> impl Iterator<Item = &ApiRequest> {
        self.pending.iter().map(|(_, request)| request)
    }

    /// Frames the session sent on the socket.
    pub fn frames_sent(&self) -> &[String] {
        &self.frames_sent
    }

    /// Notices raised so far.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Intents refused so far.
    pub fn rejections(&self) -> &[SessionError] {
        &self.rejections
    }

    /// Socket opens requested so far.
    pub fn opens(&self) -> usize {
        self.opens
    }

    /// Close codes the session asked for.
    pub fn closes(&self) -> &[u16] {
        &self.closes
    }

    /// Whether the socket is open.
    pub fn socket_open(&self) -> bool {
        self.socket_open
    }
}

/// `SessionError` is not `Clone` (it wraps `serde_json::Error`); the
/// recorded copy keeps rejections and selection errors, which are.
fn clone_rejection(error: &SessionError) -> SessionError {
    match error {
        SessionError::Rejected(rejection) => SessionError::Rejected(rejection.clone()),
        SessionError::Selection(e) => SessionError::Selection(e.clone()),
        SessionError::Channel(_) => SessionError::Channel(sleuth_core::ChannelError::NotConnected),
    }
}
