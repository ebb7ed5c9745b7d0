//! Deterministic simulation harness for the Sleuth session layer.
//!
//! Drives a real [`Session`](sleuth_core::Session) against an in-memory game
//! backend on a virtual clock, so multi-step scenarios (response windows,
//! racing fetches, rejected optimistic edits) run instantly and reproducibly.
//!
//! # Pieces
//!
//! - [`SimEnv`]: seeded virtual clock implementing `Environment`
//! - [`FakeServer`]: authoritative game state answering `ApiRequest`s and
//!   producing realtime frames
//! - [`SimWorld`]: one session wired to one server, with explicit control
//!   over when responses and pushes are delivered

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fake_server;
pub mod sim_env;
pub mod world;

pub use fake_server::{FakeServer, SharedFakeServer, create_shared_server};
pub use sim_env::{SimEnv, SimInstant};
pub use world::SimWorld;
