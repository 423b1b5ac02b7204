//! The authenticated peer.
//!
//! [`PeerLink`] holds the one connection currently bound as the link to the
//! other process. On the Game side binding is what enforces the single
//! uplink: a second AI process cannot bind while the first is attached. The
//! link also tracks liveness for the ping watchdog.

use crate::connection::{ConnectionId, Transport};
use crate::error::LinkError;
use crate::protocol::SyncMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

const UNBOUND: u64 = 0;

/// What a keepalive pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keepalive {
    /// Nobody is linked
    Idle,
    /// A ping went out
    Pinged,
    /// The peer was silent too long and has been disconnected
    TimedOut(ConnectionId),
}

pub struct PeerLink {
    transport: Arc<dyn Transport>,
    peer: AtomicU64,
    last_seen_ms: AtomicU64,
    lag_ms: AtomicU64,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("peer", &self.peer())
            .field("lag_ms", &self.lag_ms())
            .finish()
    }
}

impl PeerLink {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            peer: AtomicU64::new(UNBOUND),
            last_seen_ms: AtomicU64::new(0),
            lag_ms: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Binds `connection` as the peer. Fails if another connection is bound.
    pub fn bind(&self, connection: ConnectionId, now_ms: u64) -> bool {
        let bound = self
            .peer
            .compare_exchange(UNBOUND, connection.0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if bound {
            self.last_seen_ms.store(now_ms, Ordering::Release);
            self.lag_ms.store(0, Ordering::Release);
        }
        bound
    }

    /// Clears the binding if `connection` holds it.
    pub fn unbind(&self, connection: ConnectionId) -> bool {
        self.peer
            .compare_exchange(connection.0, UNBOUND, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn peer(&self) -> Option<ConnectionId> {
        match self.peer.load(Ordering::Acquire) {
            UNBOUND => None,
            id => Some(ConnectionId(id)),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    pub fn is_peer(&self, connection: ConnectionId) -> bool {
        self.peer() == Some(connection)
    }

    /// Sends to the bound peer.
    pub fn send(&self, message: &SyncMessage) -> Result<(), LinkError> {
        let peer = self.peer().ok_or(LinkError::NotLinked)?;
        self.send_to(peer, message)
    }

    /// Sends to any connection, bound or not.
    pub fn send_to(&self, connection: ConnectionId, message: &SyncMessage) -> Result<(), LinkError> {
        trace!(connection = %connection, message = ?message.message_type(), "sending");
        self.transport.send(connection, message.encode()?)
    }

    pub fn disconnect(&self, connection: ConnectionId) {
        self.transport.disconnect(connection);
    }

    /// Records traffic from the peer.
    pub fn touch(&self, now_ms: u64) {
        self.last_seen_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub fn silence_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen_ms.load(Ordering::Acquire))
    }

    /// Latest one-way lag estimate.
    pub fn lag_ms(&self) -> u64 {
        self.lag_ms.load(Ordering::Acquire)
    }

    /// Answers a ping request or records the lag from a reply.
    pub fn handle_ping(
        &self,
        connection: ConnectionId,
        origin_ms: u64,
        reply_ms: u64,
        now_ms: u64,
        warn_ms: u64,
    ) -> Result<(), LinkError> {
        if reply_ms == 0 {
            return self.send_to(
                connection,
                &SyncMessage::Ping {
                    origin_ms,
                    reply_ms: now_ms.max(1),
                },
            );
        }
        let lag = now_ms.saturating_sub(origin_ms) / 2;
        self.lag_ms.store(lag, Ordering::Release);
        if lag > warn_ms {
            warn!("🐢 Link lag {}ms exceeds {}ms", lag, warn_ms);
        } else {
            trace!(lag_ms = lag, "ping reply");
        }
        Ok(())
    }

    /// Pings the peer, or drops it if it has been silent past `timeout_ms`.
    pub fn keepalive(&self, now_ms: u64, timeout_ms: u64) -> Keepalive {
        let Some(peer) = self.peer() else {
            return Keepalive::Idle;
        };
        let silence = self.silence_ms(now_ms);
        if silence > timeout_ms {
            warn!("💔 Peer {} silent for {}ms, disconnecting", peer, silence);
            self.transport.disconnect(peer);
            return Keepalive::TimedOut(peer);
        }
        let ping = SyncMessage::Ping {
            origin_ms: now_ms,
            reply_ms: 0,
        };
        match self.send_to(peer, &ping) {
            Ok(()) => Keepalive::Pinged,
            Err(e) => {
                debug!(peer = %peer, error = %e, "ping not sent");
                Keepalive::Idle
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RecordingTransport;

    fn link() -> (Arc<RecordingTransport>, PeerLink) {
        let transport = Arc::new(RecordingTransport::new());
        let link = PeerLink::new(transport.clone());
        (transport, link)
    }

    #[test]
    fn only_one_connection_binds_at_a_time() {
        let (_, link) = link();
        assert!(link.bind(ConnectionId(1), 0));
        assert!(!link.bind(ConnectionId(2), 0));
        assert!(!link.unbind(ConnectionId(2)));
        assert!(link.is_peer(ConnectionId(1)));

        assert!(link.unbind(ConnectionId(1)));
        assert!(link.bind(ConnectionId(2), 0));
    }

    #[test]
    fn send_without_peer_is_not_linked() {
        let (_, link) = link();
        assert!(matches!(
            link.send(&SyncMessage::QueryRole(world_core::RoleId(1))),
            Err(LinkError::NotLinked)
        ));
    }

    #[test]
    fn ping_requests_are_echoed_and_replies_measure_lag() {
        let (transport, link) = link();
        let peer = ConnectionId(3);
        link.bind(peer, 0);

        link.handle_ping(peer, 100, 0, 180, 1500).unwrap();
        assert_eq!(
            transport.messages_to(peer),
            vec![SyncMessage::Ping {
                origin_ms: 100,
                reply_ms: 180
            }]
        );

        link.handle_ping(peer, 1000, 1020, 1400, 1500).unwrap();
        assert_eq!(link.lag_ms(), 200);
        link.handle_ping(peer, 1000, 1020, 5000, 1500).unwrap();
        assert_eq!(link.lag_ms(), 2000);
    }

    #[test]
    fn keepalive_pings_then_times_out() {
        let (transport, link) = link();
        assert_eq!(link.keepalive(0, 15_000), Keepalive::Idle);

        let peer = ConnectionId(1);
        link.bind(peer, 1_000);
        assert_eq!(link.keepalive(5_000, 15_000), Keepalive::Pinged);
        link.touch(6_000);
        assert_eq!(link.keepalive(20_000, 15_000), Keepalive::Pinged);
        assert_eq!(link.keepalive(21_001, 15_000), Keepalive::TimedOut(peer));
        assert!(transport.is_disconnected(peer));
    }
}
