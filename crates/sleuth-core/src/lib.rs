//! Sleuth session core
//!
//! Client-side session layer for the Sleuth card game. Keeps a local mirror
//! of server truth, drives the realtime channel, tracks what the player is
//! selecting on the board, and turns player intents into REST calls.
//!
//! # Architecture
//!
//! The session is a pure state machine that:
//! - Receives events from the caller (socket frames, REST answers, ticks,
//!   player intents)
//! - Produces actions for the caller to execute (open or close the socket,
//!   send frames, issue REST calls, show notices)
//! - Uses the `Environment` trait for time (deterministic testing)
//!
//! # Components
//!
//! - [`ChannelManager`]: realtime connection, heartbeat, reconnect, listeners
//! - [`SessionStore`]: public snapshot, private view, viewer-first ordering
//! - [`SelectionMachine`]: multi-step board selections
//! - [`Orchestrator`]: intents, optimistic edits, the response window
//! - [`Session`]: composes the four and correlates requests with answers

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod channel;
pub mod config;
pub mod env;
pub mod error;
pub mod event;
pub mod orchestrator;
mod outbox;
pub mod selection;
pub mod session;
pub mod store;

pub use channel::{
    ChannelAction, ChannelManager, ConnectionState, HEARTBEAT_TIMEOUT_CLOSE, Listener, ListenerId,
    NORMAL_CLOSE,
};
pub use config::{ChannelConfig, SessionConfig};
pub use env::{Environment, Timestamp};
pub use error::{ChannelError, ListenerError, Rejection, SelectionError, SessionError, StoreError};
pub use event::{DropTarget, Notice, SessionAction, SessionEvent, SessionView};
pub use orchestrator::{DiscardPick, EffectKind, FollowUp, Orchestrator, PendingEffect};
pub use outbox::RequestId;
pub use selection::{
    Handoff, PlayerPurpose, Qualifier, Selection, SelectionMachine, SelectionMode, SelectionState,
    Transfer, TransferStage,
};
pub use session::{Session, SessionIdentity};
pub use store::{FetchId, FetchPart, FetchProgress, SessionStore, Stamp, reorder};
