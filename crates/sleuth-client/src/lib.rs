//! Sleuth client runtime.
//!
//! This crate runs the Sans-IO session core on tokio:
//! - System time and tokio timers
//! - A `Connector`/`Socket` pair for the realtime channel
//! - A `GameApi` for REST calls
//! - Offline replay of recorded realtime transcripts
//!
//! ## Architecture
//!
//! ```text
//! sleuth-client
//!   ├─ SystemEnv     (production Environment impl)
//!   ├─ Driver        (select loop around Session)
//!   ├─ transport     (GameApi, Connector, Socket seams)
//!   └─ replay        (transcript parsing and playback)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod error;
pub mod replay;
mod system_env;
mod transport;

pub use config::ClientConfig;
pub use driver::{Driver, DriverHandle, DriverUpdate};
pub use error::{DriverError, TransportError};
pub use system_env::SystemEnv;
pub use transport::{ABNORMAL_CLOSE, Connector, GameApi, Inbound, Socket};
