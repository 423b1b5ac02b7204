//! In-memory [`Transport`] that records what the handlers send.

use super::{ConnectionId, Transport};
use crate::error::LinkError;
use crate::protocol::SyncMessage;
use std::collections::HashSet;
use std::sync::Mutex;
use world_core::utils::lock;

/// Records every frame and disconnect. Sends to a disconnected connection
/// fail like they would on a real socket.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ConnectionId, Vec<u8>)>>,
    disconnected: Mutex<HashSet<ConnectionId>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded messages sent to one connection, in send order.
    pub fn messages_to(&self, connection: ConnectionId) -> Vec<SyncMessage> {
        lock(&self.sent)
            .iter()
            .filter(|(id, _)| *id == connection)
            .filter_map(|(_, frame)| SyncMessage::decode(frame).ok())
            .collect()
    }

    /// Like [`messages_to`](Self::messages_to) but forgets them afterwards.
    pub fn take_messages_to(&self, connection: ConnectionId) -> Vec<SyncMessage> {
        let mut sent = lock(&self.sent);
        let (taken, kept): (Vec<_>, Vec<_>) = sent.drain(..).partition(|(id, _)| *id == connection);
        *sent = kept;
        taken
            .into_iter()
            .filter_map(|(_, frame)| SyncMessage::decode(&frame).ok())
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn is_disconnected(&self, connection: ConnectionId) -> bool {
        lock(&self.disconnected).contains(&connection)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, connection: ConnectionId, frame: Vec<u8>) -> Result<(), LinkError> {
        if self.is_disconnected(connection) {
            return Err(LinkError::Closed(connection.0));
        }
        lock(&self.sent).push((connection, frame));
        Ok(())
    }

    fn disconnect(&self, connection: ConnectionId) {
        lock(&self.disconnected).insert(connection);
    }
}
