//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from the wall clock. This
//! enables:
//!
//! - Deterministic simulation: the harness drives a virtual clock, so
//!   heartbeat timeouts, reconnect backoff and response-window countdowns are
//!   reproducible without waiting.
//!
//! - Production runtime: the client crate implements it on top of
//!   `std::time::Instant` and `tokio::time::sleep`.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: implementations must not share global state

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// A point in time as seen by the session.
///
/// Blanket-implemented for anything that orders, subtracts to a `Duration`
/// and can be advanced by one. `std::time::Instant` qualifies.
pub trait Timestamp:
    Copy
    + Ord
    + Debug
    + Send
    + Sync
    + 'static
    + Sub<Output = Duration>
    + Add<Duration, Output = Self>
{
}

impl<T> Timestamp for T where
    T: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + 'static
        + Sub<Output = Duration>
        + Add<Duration, Output = Self>
{
}

/// Abstract environment providing time and async sleeping.
///
/// The session core only ever calls [`Environment::now`]; `sleep` exists for
/// driver code.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type produced by this environment.
    type Instant: Timestamp;

    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: subsequent calls return values >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only used by driver code, never by the state machines.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
