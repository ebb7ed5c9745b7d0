//! Realtime channel manager.
//!
//! Owns the lifecycle of the single realtime connection a session keeps to
//! the game server: opening, heartbeat, reconnection with exponential
//! backoff, and dispatch of decoded frames to registered listeners.
//!
//! # Architecture
//!
//! The manager is a pure state machine. Socket events go in as method calls
//! (`handle_opened`, `handle_frame`, `handle_closed`, `tick`), and the
//! required I/O comes back as [`ChannelAction`]s. Events produced by the
//! channel are dispatched to listeners and also returned to the caller as
//! [`ChannelAction::Deliver`] so the owning session can react to them.
//!
//! # States
//!
//! ```text
//! Idle ──connect──> Opening ──opened──> Open
//!   ^                  ^                  │
//!   │                  │         close != 1000 / heartbeat timeout
//!   │               backoff               v
//!   │                elapsed ──────── Backoff ──attempts exhausted──> Failed
//!   │
//!   └──── disconnect (from any state), clean close (1000)
//! ```
//!
//! # Invariants
//!
//! - At most one socket is open or opening at a time.
//! - A manual disconnect never schedules a reconnect.
//! - A failing or panicking listener never stops delivery to the others.

use std::{
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind},
    time::Duration,
};

use serde::Serialize;
use sleuth_proto::{EventKind, InboundMessage, OutboundMessage, RealtimeEvent};
use tracing::{debug, error, info, warn};

use crate::{
    config::ChannelConfig,
    env::Timestamp,
    error::{ChannelError, ListenerError},
};

/// Close code for a deliberate, clean close.
pub const NORMAL_CLOSE: u16 = 1000;

/// Close code used when the heartbeat goes unanswered.
pub const HEARTBEAT_TIMEOUT_CLOSE: u16 = 4000;

/// Handle returned by [`ChannelManager::on`].
pub type ListenerId = u64;

/// Listener callback.
pub type Listener = Box<dyn FnMut(&RealtimeEvent) -> Result<(), ListenerError> + Send>;

/// Connectivity as exposed to the rendering layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket and none scheduled.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Waiting for, or running, a reconnect attempt.
    Reconnecting {
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// Reconnect attempts exhausted.
    Failed {
        /// Attempts made.
        attempts: u32,
    },
}

/// I/O requested by the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelAction {
    /// Open the socket.
    Open,
    /// Send a text frame.
    Send(String),
    /// Close the socket with a close code.
    Close {
        /// WebSocket close code.
        code: u16,
    },
    /// Event already dispatched to listeners, handed to the owner.
    Deliver(RealtimeEvent),
}

#[derive(Debug, Clone, Copy)]
enum Link<I> {
    Idle,
    Opening { attempt: u32 },
    Open { last_ping: I, awaiting_since: Option<I> },
    Backoff { attempt: u32, since: I, delay: Duration },
    Failed { attempts: u32 },
}

/// Realtime channel state machine.
///
/// # Type Parameters
///
/// - `I`: instant type of the session's environment
pub struct ChannelManager<I> {
    config: ChannelConfig,
    link: Link<I>,
    /// Reconnect attempts since the last successful open.
    attempts: u32,
    /// Set by [`Self::disconnect`], cleared by [`Self::connect`].
    manual: bool,
    listeners: BTreeMap<EventKind, Vec<(ListenerId, Listener)>>,
    next_listener: ListenerId,
}

impl<I: Timestamp> ChannelManager<I> {
    /// Create an idle channel.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            link: Link::Idle,
            attempts: 0,
            manual: false,
            listeners: BTreeMap::new(),
            next_listener: 0,
        }
    }

    /// Open the connection. Ignored while a socket is open or opening.
    pub fn connect(&mut self) -> Vec<ChannelAction> {
        self.manual = false;
        match self.link {
            Link::Opening { .. } | Link::Open { .. } => {
                debug!("connect ignored, channel already active");
                Vec::new()
            },
            Link::Backoff { attempt, .. } => {
                debug!(attempt, "connect requested during backoff, reconnecting now");
                self.link = Link::Opening { attempt };
                vec![ChannelAction::Open]
            },
            Link::Idle | Link::Failed { .. } => {
                self.attempts = 0;
                self.link = Link::Opening { attempt: 0 };
                vec![ChannelAction::Open]
            },
        }
    }

    /// Close the connection for good and drop every listener. Idempotent.
    pub fn disconnect(&mut self) -> Vec<ChannelAction> {
        self.manual = true;
        self.listeners.clear();
        self.attempts = 0;

        let had_socket = matches!(self.link, Link::Opening { .. } | Link::Open { .. });
        self.link = Link::Idle;

        if had_socket {
            info!("channel closed by client");
            vec![ChannelAction::Close { code: NORMAL_CLOSE }]
        } else {
            Vec::new()
        }
    }

    /// The socket finished opening.
    pub fn handle_opened(&mut self, now: I) -> Vec<ChannelAction> {
        if !matches!(self.link, Link::Opening { .. }) {
            // Opened after a disconnect or a superseding attempt.
            debug!("stale socket opened, closing it");
            return vec![ChannelAction::Close { code: NORMAL_CLOSE }];
        }

        info!(after_attempts = self.attempts, "channel open");
        self.attempts = 0;
        self.link = Link::Open { last_ping: now, awaiting_since: None };
        vec![self.emit(RealtimeEvent::ConnectionStatus { connected: true })]
    }

    /// A text frame arrived.
    ///
    /// Any frame counts as a heartbeat reply. Pongs are swallowed; malformed
    /// frames are logged and dropped.
    pub fn handle_frame(&mut self, text: &str) -> Vec<ChannelAction> {
        match &mut self.link {
            Link::Open { awaiting_since, .. } => *awaiting_since = None,
            _ => {
                debug!("frame received while not open, dropping");
                return Vec::new();
            },
        }

        match InboundMessage::decode(text) {
            Ok(InboundMessage::Pong) => Vec::new(),
            Ok(InboundMessage::Event(event)) => vec![self.emit(event)],
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                Vec::new()
            },
        }
    }

    /// The socket closed with `code`.
    pub fn handle_closed(&mut self, code: u16, now: I) -> Vec<ChannelAction> {
        if !matches!(self.link, Link::Opening { .. } | Link::Open { .. }) {
            debug!(code, "close for inactive socket ignored");
            return Vec::new();
        }

        if self.manual || code == NORMAL_CLOSE {
            info!(code, "channel closed");
            self.link = Link::Idle;
            return vec![self.emit(RealtimeEvent::ConnectionStatus { connected: false })];
        }

        warn!(code, "channel dropped");
        self.schedule_reconnect(now)
    }

    /// Advance timers: heartbeat while open, reconnect while backing off.
    pub fn tick(&mut self, now: I) -> Vec<ChannelAction> {
        match self.link {
            Link::Open { last_ping, awaiting_since } => {
                if let Some(sent) = awaiting_since
                    && now - sent >= self.config.heartbeat_timeout
                {
                    warn!("heartbeat unanswered, forcing reconnect");
                    let mut actions = vec![ChannelAction::Close { code: HEARTBEAT_TIMEOUT_CLOSE }];
                    actions.extend(self.schedule_reconnect(now));
                    return actions;
                }

                if now - last_ping >= self.config.heartbeat_interval {
                    self.link =
                        Link::Open { last_ping: now, awaiting_since: awaiting_since.or(Some(now)) };
                    return match OutboundMessage::Ping.encode() {
                        Ok(ping) => vec![ChannelAction::Send(ping)],
                        Err(e) => {
                            error!(error = %e, "failed to encode ping");
                            Vec::new()
                        },
                    };
                }
                Vec::new()
            },
            Link::Backoff { attempt, since, delay } if now - since >= delay => {
                info!(attempt, "reconnecting");
                self.link = Link::Opening { attempt };
                vec![ChannelAction::Open]
            },
            _ => Vec::new(),
        }
    }

    /// Serialize and send `message` over the open socket.
    ///
    /// # Errors
    ///
    /// - `ChannelError::NotConnected` if the socket is not open
    /// - `ChannelError::Encode` if `message` does not serialize
    pub fn send<T: Serialize>(&self, message: &T) -> Result<ChannelAction, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        Ok(ChannelAction::Send(serde_json::to_string(message)?))
    }

    /// Register a listener for one event kind.
    pub fn on(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.entry(kind).or_default().push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        before != list.len()
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        matches!(self.link, Link::Open { .. })
    }

    /// Connectivity for display.
    pub fn state(&self) -> ConnectionState {
        match self.link {
            Link::Idle => ConnectionState::Disconnected,
            Link::Opening { attempt: 0 } => ConnectionState::Connecting,
            Link::Opening { attempt } | Link::Backoff { attempt, .. } => {
                ConnectionState::Reconnecting { attempt }
            },
            Link::Open { .. } => ConnectionState::Connected,
            Link::Failed { attempts } => ConnectionState::Failed { attempts },
        }
    }

    fn schedule_reconnect(&mut self, now: I) -> Vec<ChannelAction> {
        if self.attempts >= self.config.max_reconnect_attempts {
            error!(attempts = self.attempts, "reconnect attempts exhausted");
            self.link = Link::Failed { attempts: self.attempts };
            return vec![self.emit(RealtimeEvent::ConnectionFailed { attempts: self.attempts })];
        }

        let delay = self.config.backoff(self.attempts);
        self.attempts += 1;
        let attempt = self.attempts;
        info!(attempt, ?delay, "reconnect scheduled");
        self.link = Link::Backoff { attempt, since: now, delay };
        vec![self.emit(RealtimeEvent::Reconnecting { attempt })]
    }

    fn emit(&mut self, event: RealtimeEvent) -> ChannelAction {
        self.dispatch(&event);
        ChannelAction::Deliver(event)
    }

    fn dispatch(&mut self, event: &RealtimeEvent) {
        let kind = event.kind();
        let Some(list) = self.listeners.get_mut(&kind) else {
            return;
        };

        for (id, listener) in list.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {},
                Ok(Err(e)) => warn!(listener = *id, ?kind, error = %e, "listener failed"),
                Err(_) => error!(listener = *id, ?kind, "listener panicked"),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        ops::{Add, Sub},
        sync::{Arc, Mutex},
    };

    use super::*;

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

    fn at(secs: u64) -> TestInstant {
        TestInstant(Duration::from_secs(secs))
    }

    fn open_channel() -> ChannelManager<TestInstant> {
        let mut channel = ChannelManager::new(ChannelConfig::default());
        assert_eq!(channel.connect(), vec![ChannelAction::Open]);
        channel.handle_opened(at(0));
        channel
    }

    fn recorder(
        channel: &mut ChannelManager<TestInstant>,
        kind: EventKind,
    ) -> Arc<Mutex<Vec<RealtimeEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.on(
            kind,
            Box::new(move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            }),
        );
        seen
    }

    #[test]
    fn connect_is_ignored_while_active() {
        let mut channel = ChannelManager::<TestInstant>::new(ChannelConfig::default());
        assert_eq!(channel.connect(), vec![ChannelAction::Open]);
        assert!(channel.connect().is_empty());
        assert_eq!(channel.state(), ConnectionState::Connecting);

        channel.handle_opened(at(0));
        assert!(channel.connect().is_empty());
        assert!(channel.is_connected());
    }

    #[test]
    fn open_emits_connected_status() {
        let mut channel = ChannelManager::new(ChannelConfig::default());
        let seen = recorder(&mut channel, EventKind::ConnectionStatus);
        channel.connect();
        let actions = channel.handle_opened(at(0));

        let connected = RealtimeEvent::ConnectionStatus { connected: true };
        assert_eq!(actions, vec![ChannelAction::Deliver(connected.clone())]);
        assert_eq!(*seen.lock().unwrap(), vec![connected]);
    }

    #[test]
    fn heartbeat_pings_then_times_out() {
        let mut channel = open_channel();
        assert!(channel.tick(at(29)).is_empty());

        let actions = channel.tick(at(30));
        assert_eq!(actions, vec![ChannelAction::Send(r#"{"type":"ping"}"#.to_string())]);

        assert!(channel.tick(at(39)).is_empty());
        let actions = channel.tick(at(40));
        assert_eq!(actions[0], ChannelAction::Close { code: HEARTBEAT_TIMEOUT_CLOSE });
        assert_eq!(
            actions[1],
            ChannelAction::Deliver(RealtimeEvent::Reconnecting { attempt: 1 })
        );
        assert_eq!(channel.state(), ConnectionState::Reconnecting { attempt: 1 });
    }

    #[test]
    fn any_frame_answers_heartbeat() {
        let mut channel = open_channel();
        channel.tick(at(30));
        channel.handle_frame(r#"{"type":"timer_tick","remaining":2}"#);

        assert!(channel.tick(at(45)).is_empty());
        assert!(channel.is_connected());
    }

    #[test]
    fn pong_is_not_dispatched() {
        let mut channel = open_channel();
        let seen = recorder(&mut channel, EventKind::Other);
        assert!(channel.handle_frame(r#"{"type":"pong"}"#).is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_frame_is_dropped() {
        let mut channel = open_channel();
        assert!(channel.handle_frame("{oops").is_empty());
        assert!(channel.is_connected());
    }

    #[test]
    fn unclean_close_backs_off_exponentially() {
        let mut channel = open_channel();
        channel.handle_closed(1006, at(0));

        assert!(channel.tick(at(0)).is_empty());
        assert_eq!(channel.tick(at(1)), vec![ChannelAction::Open]);

        // Second failure doubles the delay.
        channel.handle_closed(1006, at(1));
        assert!(channel.tick(at(2)).is_empty());
        assert_eq!(channel.tick(at(3)), vec![ChannelAction::Open]);
        assert_eq!(channel.state(), ConnectionState::Reconnecting { attempt: 2 });

        // A successful open resets the counter.
        channel.handle_opened(at(3));
        channel.handle_closed(1006, at(3));
        assert_eq!(channel.tick(at(4)), vec![ChannelAction::Open]);
    }

    #[test]
    fn exhausting_attempts_fails() {
        let config = ChannelConfig { max_reconnect_attempts: 2, ..ChannelConfig::default() };
        let mut channel = ChannelManager::new(config);
        let failed = recorder(&mut channel, EventKind::ConnectionFailed);
        channel.connect();

        let mut now = 0;
        for _ in 0..2 {
            channel.handle_closed(1006, at(now));
            now += 60;
            assert_eq!(channel.tick(at(now)), vec![ChannelAction::Open]);
        }
        channel.handle_closed(1006, at(now));

        assert_eq!(channel.state(), ConnectionState::Failed { attempts: 2 });
        assert_eq!(*failed.lock().unwrap(), vec![RealtimeEvent::ConnectionFailed { attempts: 2 }]);
        assert!(channel.tick(at(now + 600)).is_empty());
    }

    #[test]
    fn clean_close_does_not_reconnect() {
        let mut channel = open_channel();
        channel.handle_closed(NORMAL_CLOSE, at(1));
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(channel.tick(at(100)).is_empty());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut channel = open_channel();
        let seen = recorder(&mut channel, EventKind::TimerTick);

        assert_eq!(channel.disconnect(), vec![ChannelAction::Close { code: NORMAL_CLOSE }]);
        assert!(channel.disconnect().is_empty());
        assert!(!channel.is_connected());

        // Late close from the old socket neither reconnects nor notifies.
        assert!(channel.handle_closed(1006, at(1)).is_empty());
        assert!(channel.tick(at(100)).is_empty());

        // Listeners were dropped.
        channel.connect();
        channel.handle_opened(at(101));
        channel.handle_frame(r#"{"type":"timer_tick","remaining":1}"#);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn disconnect_cancels_pending_reconnect() {
        let mut channel = open_channel();
        channel.handle_closed(1006, at(0));
        assert!(channel.disconnect().is_empty());
        assert!(channel.tick(at(60)).is_empty());
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn failing_listener_does_not_block_others() {
        let mut channel = open_channel();
        channel.on(EventKind::TimerTick, Box::new(|_| Err(ListenerError("boom".to_string()))));
        #[allow(clippy::panic)]
        channel.on(EventKind::TimerTick, Box::new(|_| panic!("listener bug")));
        let seen = recorder(&mut channel, EventKind::TimerTick);

        channel.handle_frame(r#"{"type":"timer_tick","remaining":3}"#);
        assert_eq!(*seen.lock().unwrap(), vec![RealtimeEvent::TimerTick { remaining: 3 }]);
    }

    #[test]
    fn off_removes_listener() {
        let mut channel = open_channel();
        let seen = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&seen);
        let id = channel.on(
            EventKind::TimerTick,
            Box::new(move |_| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }),
        );

        channel.handle_frame(r#"{"type":"timer_tick","remaining":3}"#);
        assert!(channel.off(EventKind::TimerTick, id));
        assert!(!channel.off(EventKind::TimerTick, id));
        channel.handle_frame(r#"{"type":"timer_tick","remaining":2}"#);

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn send_requires_open_socket() {
        let mut channel = ChannelManager::<TestInstant>::new(ChannelConfig::default());
        assert!(matches!(channel.send(&OutboundMessage::Ping), Err(ChannelError::NotConnected)));

        channel.connect();
        channel.handle_opened(at(0));
        let action = channel.send(&OutboundMessage::Ping).unwrap();
        assert_eq!(action, ChannelAction::Send(r#"{"type":"ping"}"#.to_string()));
    }

    #[test]
    fn stale_open_is_closed() {
        let mut channel = ChannelManager::<TestInstant>::new(ChannelConfig::default());
        assert_eq!(channel.handle_opened(at(0)), vec![ChannelAction::Close { code: NORMAL_CLOSE }]);
        assert!(!channel.is_connected());
    }
}
