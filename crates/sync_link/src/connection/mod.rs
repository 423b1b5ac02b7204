//! Connection tracking and the transport seam.
//!
//! The protocol handlers never touch sockets. They send frames and drop
//! connections through [`Transport`], which the TCP layer implements with
//! [`ConnectionManager`] and tests implement with [`RecordingTransport`].

pub mod manager;
pub mod recording;

pub use manager::{ConnectionManager, Outbound};
pub use recording::RecordingTransport;

use crate::error::LinkError;
use std::fmt;

/// Identifier of one TCP connection for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound side of the transport collaborator.
pub trait Transport: Send + Sync {
    /// Queues one encoded frame for the connection.
    fn send(&self, connection: ConnectionId, frame: Vec<u8>) -> Result<(), LinkError>;

    /// Closes the connection once frames queued before this call are written.
    fn disconnect(&self, connection: ConnectionId);
}
