//! Error types for the inter-process link.
//!
//! Network and decode failures end the affected connection only. Protocol
//! violations reject the offending message (and, before authentication, the
//! connection). An unauthorized address is the one fatal condition: the AI
//! process cannot continue without a link it is allowed to hold.

use crate::protocol::LoginResult;
use world_core::WorldError;

/// Errors raised by the sync link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Socket-level failures such as refused connections or broken pipes
    #[error("Network error: {0}")]
    Network(String),

    /// A frame could not be parsed
    #[error("Decode error: {0}")]
    Decode(String),

    /// A message arrived that the current state does not accept
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The peer refused the login
    #[error("Login rejected: {0:?}")]
    Rejected(LoginResult),

    /// The Game process does not accept links from this address
    #[error("Unauthorized address: {0}")]
    UnauthorizedAddress(String),

    /// No authenticated peer to send to
    #[error("No peer is linked")]
    NotLinked,

    /// The connection is gone
    #[error("Connection {0} is closed")]
    Closed(u64),

    /// A world operation failed while applying a message
    #[error(transparent)]
    World(#[from] WorldError),
}

impl LinkError {
    /// Whether the process must stop instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::UnauthorizedAddress(_))
    }
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        LinkError::Network(e.to_string())
    }
}
