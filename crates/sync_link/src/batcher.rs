//! Spawn batching for the AI uplink.
//!
//! Generator spawns and local despawns are buffered and flushed as SpawnNpc
//! messages on the spawn-flush interval instead of one message per monster.

use crate::error::LinkError;
use crate::peer::PeerLink;
use crate::protocol::{SpawnBatch, SpawnEntry, SyncMessage};
use std::sync::Mutex;
use tracing::{debug, warn};
use world_core::utils::lock;
use world_core::RoleId;

#[derive(Debug, Default)]
struct Pending {
    spawns: Vec<SpawnEntry>,
    destroys: Vec<RoleId>,
}

#[derive(Debug)]
pub struct SpawnBatcher {
    pending: Mutex<Pending>,
    max_entries: usize,
}

impl SpawnBatcher {
    pub fn new(max_entries: usize) -> Self {
        Self {
            pending: Mutex::new(Pending::default()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn push_spawn(&self, entry: SpawnEntry) {
        lock(&self.pending).spawns.push(entry);
    }

    /// Queues a destroy. A monster spawned and destroyed within the same
    /// window is dropped from the batch entirely; the peer never saw it.
    pub fn push_destroy(&self, id: RoleId) {
        let mut pending = lock(&self.pending);
        let before = pending.spawns.len();
        pending.spawns.retain(|entry| entry.id != id);
        if pending.spawns.len() == before {
            pending.destroys.push(id);
        }
    }

    /// Buffered (spawns, destroys).
    pub fn pending(&self) -> (usize, usize) {
        let pending = lock(&self.pending);
        (pending.spawns.len(), pending.destroys.len())
    }

    pub fn clear(&self) {
        *lock(&self.pending) = Pending::default();
    }

    /// Sends everything buffered to the peer: destroys first, then spawns,
    /// so an identity released and re-minted in one window arrives in order.
    ///
    /// While no peer is linked the buffer is kept, and whatever a failed send
    /// left unsent goes back ahead of entries pushed since. Returns the
    /// number of entries sent.
    pub fn flush(&self, peer: &PeerLink) -> Result<usize, LinkError> {
        if !peer.is_linked() {
            return Ok(0);
        }
        let Pending { spawns, destroys } = std::mem::take(&mut *lock(&self.pending));

        let mut sent = 0;
        for chunk in destroys.chunks(self.max_entries) {
            if let Err(e) = peer.send(&SyncMessage::SpawnNpc(SpawnBatch::Destroy(chunk.to_vec()))) {
                self.requeue(destroys[sent..].to_vec(), spawns);
                return Err(e);
            }
            sent += chunk.len();
        }
        let mut spawned = 0;
        for chunk in spawns.chunks(self.max_entries) {
            if let Err(e) = peer.send(&SyncMessage::SpawnNpc(SpawnBatch::Spawn(chunk.to_vec()))) {
                self.requeue(Vec::new(), spawns[spawned..].to_vec());
                return Err(e);
            }
            spawned += chunk.len();
        }
        sent += spawned;
        if sent > 0 {
            debug!(entries = sent, "spawn batch flushed");
        }
        Ok(sent)
    }

    fn requeue(&self, mut destroys: Vec<RoleId>, mut spawns: Vec<SpawnEntry>) {
        let mut guard = lock(&self.pending);
        let pending = &mut *guard;
        // A destroy pushed during the send cancels a spawn the peer never got.
        spawns.retain(|entry| match pending.destroys.iter().position(|id| *id == entry.id) {
            Some(index) => {
                pending.destroys.remove(index);
                false
            }
            None => true,
        });
        warn!(spawns = spawns.len(), destroys = destroys.len(), "spawn batch send failed, entries kept");
        destroys.append(&mut pending.destroys);
        spawns.append(&mut pending.spawns);
        pending.destroys = destroys;
        pending.spawns = spawns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, RecordingTransport};
    use std::sync::Arc;
    use world_core::{Cell, MapId, TemplateId};

    fn entry(id: u32) -> SpawnEntry {
        SpawnEntry {
            id: RoleId(id),
            generator: None,
            template: TemplateId(1),
            map: MapId(1),
            cell: Cell::new(1, 1),
        }
    }

    #[test]
    fn flush_chunks_and_orders_destroys_first() {
        let transport = Arc::new(RecordingTransport::new());
        let peer = PeerLink::new(transport.clone());
        let batcher = SpawnBatcher::new(2);
        for id in 1..=3 {
            batcher.push_spawn(entry(id));
        }
        batcher.push_destroy(RoleId(90));

        assert_eq!(batcher.flush(&peer).unwrap(), 0);
        assert_eq!(batcher.pending(), (3, 1));

        peer.bind(ConnectionId(1), 0);
        assert_eq!(batcher.flush(&peer).unwrap(), 4);
        assert_eq!(
            transport.messages_to(ConnectionId(1)),
            vec![
                SyncMessage::SpawnNpc(SpawnBatch::Destroy(vec![RoleId(90)])),
                SyncMessage::SpawnNpc(SpawnBatch::Spawn(vec![entry(1), entry(2)])),
                SyncMessage::SpawnNpc(SpawnBatch::Spawn(vec![entry(3)])),
            ]
        );
        assert_eq!(batcher.pending(), (0, 0));
    }

    #[test]
    fn failed_send_keeps_unsent_entries() {
        let transport = Arc::new(RecordingTransport::new());
        let peer = PeerLink::new(transport.clone());
        peer.bind(ConnectionId(1), 0);
        // Too many entries for one frame: every spawn chunk fails to encode.
        let batcher = SpawnBatcher::new(3_200);
        for id in 0..3_200 {
            batcher.push_spawn(entry(1_050_000 + id));
        }
        batcher.push_destroy(RoleId(90));

        assert!(batcher.flush(&peer).is_err());
        assert_eq!(batcher.pending(), (3_200, 0));
        assert_eq!(
            transport.take_messages_to(ConnectionId(1)),
            vec![SyncMessage::SpawnNpc(SpawnBatch::Destroy(vec![RoleId(90)]))]
        );

        batcher.push_spawn(entry(7));
        assert!(batcher.flush(&peer).is_err());
        assert_eq!(batcher.pending(), (3_201, 0));
        assert!(transport.messages_to(ConnectionId(1)).is_empty());
    }

    #[test]
    fn destroy_during_a_failed_send_cancels_the_kept_spawn() {
        let batcher = SpawnBatcher::new(10);
        batcher.push_destroy(RoleId(5));
        batcher.requeue(vec![RoleId(8)], vec![entry(5), entry(6)]);
        assert_eq!(batcher.pending(), (1, 1));
        let pending = lock(&batcher.pending);
        assert_eq!(pending.spawns, vec![entry(6)]);
        assert_eq!(pending.destroys, vec![RoleId(8)]);
    }

    #[test]
    fn spawn_then_destroy_in_one_window_cancels_out() {
        let batcher = SpawnBatcher::new(10);
        batcher.push_spawn(entry(5));
        batcher.push_destroy(RoleId(5));
        assert_eq!(batcher.pending(), (0, 0));
    }
}
