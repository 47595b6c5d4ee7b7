//! # Transports
//!
//! A transport carries an [`InvocationRequest`] to a remote minion and
//! brings back its [`InvocationResponse`]. The dispatcher never looks inside
//! a transport; it only bounds the wait and classifies the error.
//!
//! ```text
//! Dispatcher::invoke(Remote("mac01"), "keychain.list_certs", ..)
//!   │ timeout(bound, transport.send(mac01, request))
//!   ▼
//! Transport (trait)
//!   ├── HttpTransport     (POST {base_url}/run, reqwest)
//!   └── ChannelTransport  (in-process minions, tokio mpsc + oneshot)
//!   ▼
//! minion: Dispatcher::invoke_local(request) → InvocationResponse
//! ```
//!
//! To add a transport, implement [`Transport`] and pass it to
//! `Dispatcher::with_transport`.

pub mod channel;
pub mod http;

use async_trait::async_trait;

use crate::dispatch::request::{InvocationRequest, InvocationResponse, MinionId};

pub use channel::ChannelTransport;
pub use http::HttpTransport;

/// The contract for carrying requests to remote minions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name (e.g., "http", "channel")
    fn name(&self) -> &str;

    /// Deliver `request` to `minion` and wait for its response.
    ///
    /// Implementations may enforce their own deadline and report it as
    /// [`TransportError::Timeout`]; the dispatcher applies its bound on top.
    async fn send(
        &self,
        minion: &MinionId,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, TransportError>;
}

/// Transport error types
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unknown minion: {0}")]
    UnknownMinion(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Channel closed: {0}")]
    Closed(String),
}
