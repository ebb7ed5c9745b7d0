//! Collaborator seams: REST calls and the realtime socket.
//!
//! The driver never speaks HTTP or WebSocket itself. Embedders plug in a
//! [`GameApi`] bound to one game and player, and a [`Connector`] that opens
//! [`Socket`]s to the realtime endpoint.

use async_trait::async_trait;
use sleuth_proto::{ApiError, ApiRequest, ApiResponse};

use crate::error::TransportError;

/// Close code reported when a socket drops without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// REST collaborator.
#[async_trait]
pub trait GameApi: Send + Sync + 'static {
    /// Perform one call.
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Something received from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// The socket closed.
    Closed {
        /// WebSocket close code.
        code: u16,
    },
}

/// An open realtime socket.
#[async_trait]
pub trait Socket: Send {
    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound item. Must keep returning `Closed` once closed.
    async fn recv(&mut self) -> Result<Inbound, TransportError>;

    /// Close with `code`.
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;
}

/// Opens realtime sockets.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError>;
}
