//! Game-process end of the link.
//!
//! The Game process listens; at most one AI process may be linked at a
//! time. Every connection gets its own partition lane so its messages are
//! applied strictly in receipt order.

use crate::config::LinkConfig;
use crate::connection::{ConnectionId, Transport};
use crate::error::LinkError;
use crate::peer::{Keepalive, PeerLink};
use crate::protocol::{
    ActionKind, ActionRequest, LoginResult, PlayerSnapshot, SpawnBatch, SpawnEntry, SyncMessage,
};
use crate::replication::{apply_dyna_map, apply_walk, Replicator};
use crate::server::LinkHandler;
use crate::session::{check_login, LinkState};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use world_core::{ChangeSource, PartitionId, RoleId, World, WorldError};

#[derive(Debug, Clone, Copy)]
struct Session {
    remote_addr: SocketAddr,
    state: LinkState,
    partition: PartitionId,
    connected_ms: u64,
}

#[derive(Debug)]
pub struct GameLink {
    world: Arc<World>,
    config: LinkConfig,
    peer: Arc<PeerLink>,
    sessions: DashMap<ConnectionId, Session>,
}

impl GameLink {
    /// Creates the link and installs its replicator as the world observer.
    pub fn new(world: Arc<World>, config: LinkConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let peer = Arc::new(PeerLink::new(transport));
        if !world.set_observer(Arc::new(Replicator::immediate(peer.clone()))) {
            warn!("world already has an observer, local changes will not reach the AI process");
        }
        Arc::new(Self {
            world,
            config,
            peer,
            sessions: DashMap::new(),
        })
    }

    pub fn peer(&self) -> &Arc<PeerLink> {
        &self.peer
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn session_state(&self, connection: ConnectionId) -> Option<LinkState> {
        self.sessions.get(&connection).map(|session| session.state)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn now_ms(&self) -> u64 {
        self.world.clock().monotonic_ms()
    }

    /// Starts tracking a new connection on the least loaded partition.
    pub fn on_connect(&self, connection: ConnectionId, remote_addr: SocketAddr) -> PartitionId {
        let partition = self.world.processor().select_partition();
        self.sessions.insert(
            connection,
            Session {
                remote_addr,
                state: LinkState::AwaitingAuth,
                partition,
                connected_ms: self.now_ms(),
            },
        );
        debug!(connection = %connection, partition = %partition, "link connection awaiting login");
        partition
    }

    /// Forgets a connection. If it was the AI link, the link is freed for a
    /// future login and every monster the AI process minted is dropped; the
    /// AI process resends its population when it links again.
    pub fn on_disconnect(&self, connection: ConnectionId) {
        let Some((_, session)) = self.sessions.remove(&connection) else {
            return;
        };
        self.world.processor().deselect_partition(session.partition);
        if self.peer.unbind(connection) {
            let dropped = self.drop_peer_monsters();
            info!(
                "🔌 AI process at {} unlinked, {} mirrored monsters dropped",
                session.remote_addr, dropped
            );
        }
    }

    fn drop_peer_monsters(&self) -> usize {
        let identities = self.world.identities();
        let mirrored = self
            .world
            .roles()
            .query(|role| !role.is_player() && identities.category_of(role.id()).is_none());
        let mut dropped = 0;
        for role in mirrored {
            if self.world.despawn(role.id(), ChangeSource::Remote).is_some() {
                dropped += 1;
            }
        }
        dropped
    }

    /// Applies one received frame.
    pub fn handle_frame(&self, connection: ConnectionId, frame: &[u8]) -> Result<(), LinkError> {
        let state = self
            .session_state(connection)
            .ok_or(LinkError::Closed(connection.0))?;

        let message = match SyncMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                if state == LinkState::AwaitingAuth {
                    warn!(connection = %connection, error = %e, "undecodable frame before login, disconnecting");
                    self.peer.disconnect(connection);
                }
                return Err(e);
            }
        };

        if self.peer.is_peer(connection) {
            self.peer.touch(self.now_ms());
        }

        match state {
            LinkState::AwaitingAuth => self.handle_login(connection, message),
            LinkState::Authenticated => self.dispatch(connection, message),
        }
    }

    fn handle_login(&self, connection: ConnectionId, message: SyncMessage) -> Result<(), LinkError> {
        let SyncMessage::LoginExchange { username, password } = message else {
            warn!(
                connection = %connection,
                message = ?message.message_type(),
                "message before login, disconnecting"
            );
            self.peer.disconnect(connection);
            return Err(LinkError::Protocol(format!(
                "{:?} received before login",
                message.message_type()
            )));
        };

        let remote_addr = self
            .sessions
            .get(&connection)
            .map(|session| session.remote_addr)
            .ok_or(LinkError::Closed(connection.0))?;

        let mut result = check_login(&self.config, remote_addr.ip(), &username, &password);
        if result == LoginResult::Success && !self.peer.bind(connection, self.now_ms()) {
            result = LoginResult::AlreadyBound;
        }

        self.peer
            .send_to(connection, &SyncMessage::LoginExchangeEx(result))?;

        if result != LoginResult::Success {
            warn!("🚫 AI login from {} rejected: {:?}", remote_addr, result);
            self.peer.disconnect(connection);
            return Ok(());
        }

        if let Some(mut session) = self.sessions.get_mut(&connection) {
            session.state = LinkState::Authenticated;
        }
        info!("🤝 AI process linked from {} as '{}'", remote_addr, username);
        self.push_players(connection);
        Ok(())
    }

    /// Sends every online player so the AI process can build its shadows.
    fn push_players(&self, connection: ConnectionId) {
        let players: Vec<_> = self
            .world
            .roles()
            .query(|role| role.is_player())
            .iter()
            .filter_map(|role| PlayerSnapshot::from_role(role))
            .collect();
        let count = players.len();
        for player in players {
            if let Err(e) = self.peer.send_to(connection, &SyncMessage::PlayerLogin(player)) {
                warn!(error = %e, "player snapshot not sent");
                return;
            }
        }
        debug!(players = count, "online players pushed to AI process");
    }

    fn dispatch(&self, connection: ConnectionId, message: SyncMessage) -> Result<(), LinkError> {
        match message {
            SyncMessage::LoginExchange { .. } => {
                self.peer
                    .send_to(connection, &SyncMessage::LoginExchangeEx(LoginResult::AlreadySignedIn))?;
            }
            SyncMessage::Ping { origin_ms, reply_ms } => {
                self.peer.handle_ping(
                    connection,
                    origin_ms,
                    reply_ms,
                    self.now_ms(),
                    self.config.lag_warning_ms,
                )?;
            }
            SyncMessage::SpawnNpc(SpawnBatch::Spawn(entries)) => {
                self.spawn_entries(connection, &entries)?;
            }
            SyncMessage::RoleLogin(entry) => {
                self.spawn_entries(connection, &[entry])?;
            }
            SyncMessage::SpawnNpc(SpawnBatch::Destroy(ids)) => {
                let removed = ids
                    .iter()
                    .filter(|id| self.world.despawn(**id, ChangeSource::Remote).is_some())
                    .count();
                trace!(requested = ids.len(), removed, "DestroyNpc applied");
            }
            SyncMessage::RoleStatusFlag(change) => {
                self.world.apply_status(change, ChangeSource::Remote);
            }
            SyncMessage::DynaMap(change) => apply_dyna_map(&self.world, change),
            SyncMessage::Action(request) => self.apply_action(&request),
            SyncMessage::QueryRole(id) => self.answer_query(connection, id)?,
            other @ (SyncMessage::LoginExchangeEx(_)
            | SyncMessage::PlayerLogin(_)
            | SyncMessage::PlayerLogout(_)) => {
                warn!(
                    connection = %connection,
                    message = ?other.message_type(),
                    "AI process sent a Game-to-AI message, ignored"
                );
                return Err(LinkError::Protocol(format!(
                    "{:?} is not accepted by the Game process",
                    other.message_type()
                )));
            }
        }
        Ok(())
    }

    /// Registers each entry; entries that cannot be resolved are echoed
    /// back in one DestroyNpc so the AI process can reconcile. Returns the
    /// identities echoed.
    pub fn spawn_entries(
        &self,
        connection: ConnectionId,
        entries: &[SpawnEntry],
    ) -> Result<Vec<RoleId>, LinkError> {
        let mut unresolved = Vec::new();
        for entry in entries {
            match self.world.spawn_monster(entry.to_spawn(), ChangeSource::Remote) {
                Ok(_) => {}
                Err(e @ (WorldError::DuplicateRole(_) | WorldError::DuplicateAccount(_))) => {
                    warn!(role = %entry.id, error = %e, "duplicate spawn ignored");
                }
                Err(e) => {
                    warn!(role = %entry.id, map = %entry.map, error = %e, "spawn entry unresolved");
                    unresolved.push(entry.id);
                }
            }
        }
        if !unresolved.is_empty() {
            self.peer.send_to(
                connection,
                &SyncMessage::SpawnNpc(SpawnBatch::Destroy(unresolved.clone())),
            )?;
        }
        Ok(unresolved)
    }

    fn apply_action(&self, request: &ActionRequest) {
        match request.kind {
            ActionKind::Walk if !self.ai_may_walk(request.actor) => {
                warn!(role = %request.actor, "protocol violation: AI process walked a role it does not own");
            }
            ActionKind::Walk => match apply_walk(&self.world, request, true) {
                Ok(true) => {}
                Ok(false) => debug!(role = %request.actor, cell = %request.cell, "walk refused"),
                Err(e) => debug!(role = %request.actor, error = %e, "walk for unknown role"),
            },
            ActionKind::Action | ActionKind::Interact => {
                trace!(role = %request.actor, verb = request.verb, kind = ?request.kind, "monster action");
            }
        }
    }

    /// Players and roles minted from this process's identity pools are
    /// moved here and only mirrored by the AI process.
    fn ai_may_walk(&self, id: RoleId) -> bool {
        if self.world.identities().category_of(id).is_some() {
            return false;
        }
        self.world.roles().get(id).map_or(true, |role| !role.is_player())
    }

    /// Answers with a fresh snapshot, or a logout if the player is gone.
    fn answer_query(&self, connection: ConnectionId, id: RoleId) -> Result<(), LinkError> {
        let reply = match self.world.roles().get(id).and_then(|role| PlayerSnapshot::from_role(&role)) {
            Some(snapshot) => SyncMessage::PlayerLogin(snapshot),
            None => SyncMessage::PlayerLogout(id),
        };
        self.peer.send_to(connection, &reply)
    }

    /// One keepalive pass over the AI link. Connections that have not
    /// logged in within the ping timeout are dropped on the same pass.
    pub fn keepalive(&self) -> Keepalive {
        let now = self.now_ms();
        let timeout = self.config.ping_timeout().as_millis() as u64;
        self.expire_logins(now, timeout);
        self.peer.keepalive(now, timeout)
    }

    /// Disconnects connections still awaiting login after `timeout_ms`.
    /// Returns how many were dropped.
    pub fn expire_logins(&self, now_ms: u64, timeout_ms: u64) -> usize {
        let stale: Vec<_> = self
            .sessions
            .iter()
            .filter(|session| {
                session.state == LinkState::AwaitingAuth
                    && now_ms.saturating_sub(session.connected_ms) > timeout_ms
            })
            .map(|session| (*session.key(), session.remote_addr))
            .collect();
        for (connection, remote_addr) in &stale {
            warn!(connection = %connection, remote = %remote_addr, "no login within {}ms, disconnecting", timeout_ms);
            self.peer.disconnect(*connection);
        }
        stale.len()
    }
}

impl LinkHandler for GameLink {
    fn submit_frame(self: &Arc<Self>, connection: ConnectionId, frame: Vec<u8>) -> bool {
        let Some(partition) = self.sessions.get(&connection).map(|session| session.partition) else {
            return false;
        };
        let link = self.clone();
        self.world.processor().submit(partition, async move {
            if let Err(e) = link.handle_frame(connection, &frame) {
                warn!(connection = %connection, error = %e, "link message rejected");
            }
            Ok(())
        })
    }

    fn submit_disconnect(self: &Arc<Self>, connection: ConnectionId) {
        let Some(partition) = self.sessions.get(&connection).map(|session| session.partition) else {
            return;
        };
        let link = self.clone();
        let queued = self.world.processor().submit(partition, async move {
            link.on_disconnect(connection);
            Ok(())
        });
        if !queued {
            self.on_disconnect(connection);
        }
    }
}
