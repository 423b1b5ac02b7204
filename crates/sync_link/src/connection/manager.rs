//! Connection manager for the link's TCP connections.

use super::{ConnectionId, Transport};
use crate::error::LinkError;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Work for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Vec<u8>),
    Close,
}

#[derive(Debug)]
struct ConnectionEntry {
    remote_addr: SocketAddr,
    connected_at: Instant,
    sender: mpsc::UnboundedSender<Outbound>,
}

/// Tracks live connections and routes outbound frames to their writer tasks.
///
/// Each connection owns an unbounded queue drained by its writer task, so
/// [`Transport::send`] never blocks the partition that produced the frame.
#[derive(Debug)]
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    next_id: AtomicU64,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a new connection and returns its unique ID.
    ///
    /// # Arguments
    ///
    /// * `remote_addr` - The network address of the peer
    ///
    /// # Returns
    ///
    /// The assigned `ConnectionId` and the receiver the writer task drains.
    pub fn add_connection(&self, remote_addr: SocketAddr) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.insert(
            id,
            ConnectionEntry {
                remote_addr,
                connected_at: Instant::now(),
                sender,
            },
        );
        info!("🔗 Connection {} from {}", id, remote_addr);
        (id, receiver)
    }

    /// Removes a connection. Returns whether it was still tracked.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        match self.connections.remove(&id) {
            Some((_, entry)) => {
                info!(
                    "❌ Connection {} from {} disconnected after {:?}",
                    id,
                    entry.remote_addr,
                    entry.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    pub fn remote_addr(&self, id: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&id).map(|entry| entry.remote_addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Asks every writer task to close. Used during shutdown.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for entry in self.connections.iter() {
            if entry.sender.send(Outbound::Close).is_ok() {
                closed += 1;
            }
        }
        closed
    }
}

impl Transport for ConnectionManager {
    fn send(&self, connection: ConnectionId, frame: Vec<u8>) -> Result<(), LinkError> {
        let entry = self
            .connections
            .get(&connection)
            .ok_or(LinkError::Closed(connection.0))?;
        entry
            .sender
            .send(Outbound::Frame(frame))
            .map_err(|_| LinkError::Closed(connection.0))
    }

    fn disconnect(&self, connection: ConnectionId) {
        if let Some(entry) = self.connections.get(&connection) {
            debug!(connection = %connection, "closing connection");
            let _ = entry.sender.send(Outbound::Close);
        }
    }
}
