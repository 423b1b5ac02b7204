//! Outbound replication of locally originated world changes.
//!
//! [`Replicator`] is installed as the world's observer. The world only
//! reports changes this process decided, so whatever the peer sent us is
//! never echoed back.

use crate::batcher::SpawnBatcher;
use crate::peer::PeerLink;
use crate::protocol::{ActionRequest, DynaMapChange, PlayerSnapshot, SpawnBatch, SpawnEntry, SyncMessage};
use std::sync::Arc;
use tracing::{debug, info, warn};
use world_core::{
    ChangeSource, MapDescriptor, MapId, ProcessSide, Role, StatusChange, World, WorldError,
    WorldObserver,
};

#[derive(Debug)]
pub struct Replicator {
    side: ProcessSide,
    peer: Arc<PeerLink>,
    batcher: Option<Arc<SpawnBatcher>>,
}

impl Replicator {
    /// Game side: every change goes out immediately.
    pub fn immediate(peer: Arc<PeerLink>) -> Self {
        Self {
            side: ProcessSide::Game,
            peer,
            batcher: None,
        }
    }

    /// AI side: generator spawns and despawns go through the batcher.
    pub fn batched(peer: Arc<PeerLink>, batcher: Arc<SpawnBatcher>) -> Self {
        Self {
            side: ProcessSide::Ai,
            peer,
            batcher: Some(batcher),
        }
    }

    fn send(&self, message: SyncMessage) {
        if let Err(e) = self.peer.send(&message) {
            debug!(message = ?message.message_type(), error = %e, "change not replicated");
        }
    }
}

impl WorldObserver for Replicator {
    fn role_spawned(&self, role: &Arc<Role>) {
        if let Some(player) = PlayerSnapshot::from_role(role) {
            if self.side == ProcessSide::Game {
                self.send(SyncMessage::PlayerLogin(player));
            }
            return;
        }
        let Some(entry) = SpawnEntry::from_role(role) else {
            return;
        };
        match (&self.batcher, entry.generator) {
            (Some(batcher), Some(_)) => batcher.push_spawn(entry),
            _ => self.send(SyncMessage::RoleLogin(entry)),
        }
    }

    fn role_despawned(&self, role: &Arc<Role>) {
        if role.is_player() {
            if self.side == ProcessSide::Game {
                self.send(SyncMessage::PlayerLogout(role.id()));
            }
            return;
        }
        match &self.batcher {
            Some(batcher) => batcher.push_destroy(role.id()),
            None => self.send(SyncMessage::SpawnNpc(SpawnBatch::Destroy(vec![role.id()]))),
        }
    }

    fn role_moved(&self, role: &Arc<Role>) {
        self.send(SyncMessage::Action(ActionRequest::walk(role)));
    }

    fn status_changed(&self, change: &StatusChange) {
        self.send(SyncMessage::RoleStatusFlag(*change));
    }

    fn dynamic_map_added(&self, descriptor: &MapDescriptor) {
        self.send(SyncMessage::DynaMap(DynaMapChange::Add(descriptor.clone())));
    }

    fn dynamic_map_removed(&self, map: MapId) {
        self.send(SyncMessage::DynaMap(DynaMapChange::Remove(map)));
    }
}

/// Applies a walk received from the peer: a plain move on the same map,
/// a transfer when the walk names another map. Peer-owned roles are
/// placed where the peer says without occupancy checks; a checked walk
/// must land on a free cell, also across maps.
pub(crate) fn apply_walk(world: &World, request: &ActionRequest, checked: bool) -> Result<bool, WorldError> {
    let role = world
        .roles()
        .get(request.actor)
        .ok_or(WorldError::RoleNotFound(request.actor))?;
    if role.map() != request.map {
        if checked {
            let target = world.maps().get(request.map).ok_or(WorldError::MapNotFound(request.map))?;
            if !target.is_move_enable(request.cell, role.footprint(), Some(request.actor)) {
                return Ok(false);
            }
        }
        world.transfer_role(request.actor, request.map, request.cell, ChangeSource::Remote)?;
        return Ok(true);
    }
    if checked {
        world.move_role(request.actor, request.cell, ChangeSource::Remote)
    } else {
        world.transfer_role(request.actor, request.map, request.cell, ChangeSource::Remote)?;
        Ok(true)
    }
}

/// Applies a dynamic map change received from the peer.
pub(crate) fn apply_dyna_map(world: &World, change: DynaMapChange) {
    match change {
        DynaMapChange::Add(descriptor) => match world.add_dynamic_map(&descriptor, ChangeSource::Remote) {
            Ok(map) => info!("🗺️ Dynamic map {} '{}' added by peer", map.id(), map.name()),
            Err(e) => warn!(map = %descriptor.id, error = %e, "dynamic map add rejected"),
        },
        DynaMapChange::Remove(id) => {
            if let Err(e) = world.remove_dynamic_map(id, ChangeSource::Remote) {
                warn!(map = %id, error = %e, "dynamic map removal rejected");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionId, RecordingTransport};
    use crate::protocol::ActionKind;
    use world_core::{
        AccountId, Cell, CharacterProfile, GeneratorId, MonsterOrigin, MonsterProfile, RoleId,
        TemplateId,
    };

    const PEER: ConnectionId = ConnectionId(1);

    fn linked() -> (Arc<RecordingTransport>, Arc<PeerLink>) {
        let transport = Arc::new(RecordingTransport::new());
        let peer = Arc::new(PeerLink::new(transport.clone()));
        peer.bind(PEER, 0);
        (transport, peer)
    }

    fn monster(id: u32, origin: MonsterOrigin) -> Arc<Role> {
        Arc::new(Role::monster(
            RoleId(id),
            MonsterProfile {
                template: TemplateId(9),
                name: "Pheasant".into(),
                origin,
                footprint: 1,
            },
            MapId(1),
            Cell::new(3, 3),
        ))
    }

    fn player(id: u32) -> Arc<Role> {
        Arc::new(Role::character(
            RoleId(id),
            CharacterProfile {
                account: AccountId(id),
                name: "Ayla".into(),
                level: 1,
                hp: 10,
                max_hp: 10,
                guild: None,
                shadow: false,
            },
            MapId(1),
            Cell::new(0, 0),
        ))
    }

    #[test]
    fn ai_side_batches_generator_monsters_and_sends_summons_now() {
        let (transport, peer) = linked();
        let batcher = Arc::new(SpawnBatcher::new(100));
        let replicator = Replicator::batched(peer, batcher.clone());

        replicator.role_spawned(&monster(1, MonsterOrigin::Generator(GeneratorId(4))));
        let pet = monster(2, MonsterOrigin::Summoned);
        replicator.role_spawned(&pet);
        replicator.role_despawned(&monster(3, MonsterOrigin::Generator(GeneratorId(4))));

        assert_eq!(batcher.pending(), (1, 1));
        assert_eq!(
            transport.messages_to(PEER),
            vec![SyncMessage::RoleLogin(SpawnEntry::from_role(&pet).unwrap())]
        );
    }

    #[test]
    fn game_side_announces_players_and_destroys_immediately() {
        let (transport, peer) = linked();
        let replicator = Replicator::immediate(peer);
        let ayla = player(42);

        replicator.role_spawned(&ayla);
        replicator.role_despawned(&ayla);
        replicator.role_despawned(&monster(7, MonsterOrigin::Summoned));

        assert_eq!(
            transport.messages_to(PEER),
            vec![
                SyncMessage::PlayerLogin(PlayerSnapshot::from_role(&ayla).unwrap()),
                SyncMessage::PlayerLogout(RoleId(42)),
                SyncMessage::SpawnNpc(SpawnBatch::Destroy(vec![RoleId(7)])),
            ]
        );
    }

    #[test]
    fn moves_go_out_as_walks_with_the_current_map() {
        let (transport, peer) = linked();
        let replicator = Replicator::immediate(peer);
        let ayla = player(42);

        replicator.role_moved(&ayla);

        let sent = transport.messages_to(PEER);
        assert_eq!(sent.len(), 1);
        let SyncMessage::Action(request) = &sent[0] else {
            panic!("expected a walk, got {:?}", sent[0]);
        };
        assert_eq!(request.kind, ActionKind::Walk);
        assert_eq!((request.actor, request.map, request.cell), (RoleId(42), MapId(1), Cell::new(0, 0)));
    }
}
