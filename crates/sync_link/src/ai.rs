//! AI-process end of the link.
//!
//! The AI process connects out and logs in. From then on it mirrors online
//! players as shadow characters and announces the monsters its generators
//! spawn.

use crate::batcher::SpawnBatcher;
use crate::config::LinkConfig;
use crate::connection::{ConnectionId, Transport};
use crate::error::LinkError;
use crate::peer::{Keepalive, PeerLink};
use crate::protocol::{
    ActionKind, ActionRequest, LoginResult, PlayerSnapshot, SpawnBatch, SpawnEntry, SyncMessage,
};
use crate::replication::{apply_dyna_map, apply_walk, Replicator};
use crate::server::LinkHandler;
use crate::session::LinkState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, trace, warn};
use world_core::utils::lock;
use world_core::{ChangeSource, CharacterProfile, PartitionId, RoleId, World, WorldError};

/// NPC logic fed by actions from the Game process.
pub trait NpcBrain: Send + Sync {
    fn on_action(&self, world: &World, request: &ActionRequest);
}

/// Brain that only logs what it is told.
#[derive(Debug, Default)]
pub struct LoggingBrain;

impl NpcBrain for LoggingBrain {
    fn on_action(&self, _world: &World, request: &ActionRequest) {
        trace!(
            actor = %request.actor,
            kind = ?request.kind,
            verb = request.verb,
            cell = %request.cell,
            "action routed to NPC logic"
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct Uplink {
    connection: ConnectionId,
    state: LinkState,
    partition: PartitionId,
}

pub struct AiLink {
    world: Arc<World>,
    config: LinkConfig,
    peer: Arc<PeerLink>,
    batcher: Arc<SpawnBatcher>,
    brain: Arc<dyn NpcBrain>,
    uplink: Mutex<Option<Uplink>>,
    fatal: AtomicBool,
}

impl std::fmt::Debug for AiLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiLink")
            .field("peer", &self.peer)
            .field("uplink", &*lock(&self.uplink))
            .field("fatal", &self.is_fatal())
            .finish()
    }
}

impl AiLink {
    /// Creates the link and installs its replicator as the world observer.
    pub fn new(
        world: Arc<World>,
        config: LinkConfig,
        transport: Arc<dyn Transport>,
        brain: Arc<dyn NpcBrain>,
    ) -> Arc<Self> {
        let peer = Arc::new(PeerLink::new(transport));
        let batcher = Arc::new(SpawnBatcher::new(config.max_batch_entries));
        if !world.set_observer(Arc::new(Replicator::batched(peer.clone(), batcher.clone()))) {
            warn!("world already has an observer, spawns will not reach the Game process");
        }
        Arc::new(Self {
            world,
            config,
            peer,
            batcher,
            brain,
            uplink: Mutex::new(None),
            fatal: AtomicBool::new(false),
        })
    }

    pub fn peer(&self) -> &Arc<PeerLink> {
        &self.peer
    }

    pub fn batcher(&self) -> &Arc<SpawnBatcher> {
        &self.batcher
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Set once the Game process refused this address.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    pub fn uplink_state(&self) -> Option<LinkState> {
        lock(&self.uplink).as_ref().map(|uplink| uplink.state)
    }

    fn state_of(&self, connection: ConnectionId) -> Option<Uplink> {
        lock(&self.uplink)
            .as_ref()
            .filter(|uplink| uplink.connection == connection)
            .copied()
    }

    fn now_ms(&self) -> u64 {
        self.world.clock().monotonic_ms()
    }

    /// Adopts a fresh connection and sends the login exchange. Returns the
    /// partition the connection's messages run on.
    pub fn on_connected(&self, connection: ConnectionId) -> Result<PartitionId, LinkError> {
        let partition = self.world.processor().select_partition();
        let previous = lock(&self.uplink).replace(Uplink {
            connection,
            state: LinkState::AwaitingAuth,
            partition,
        });
        if let Some(previous) = previous {
            self.world.processor().deselect_partition(previous.partition);
        }
        self.peer.send_to(
            connection,
            &SyncMessage::LoginExchange {
                username: self.config.username.clone(),
                password: self.config.password.clone(),
            },
        )?;
        Ok(partition)
    }

    /// Waits until everything already queued on `partition` has run.
    pub async fn drain(&self, partition: PartitionId) {
        let _ = self
            .world
            .processor()
            .execute(partition, async { Ok::<(), WorldError>(()) })
            .await;
    }

    /// Drops the uplink. Shadow characters go with it; the Game process
    /// pushes every online player again after the next login.
    pub fn on_disconnected(&self, connection: ConnectionId) {
        let uplink = {
            let mut guard = lock(&self.uplink);
            if guard.as_ref().is_some_and(|uplink| uplink.connection == connection) {
                guard.take()
            } else {
                None
            }
        };
        let Some(uplink) = uplink else {
            return;
        };
        self.world.processor().deselect_partition(uplink.partition);
        if self.peer.unbind(connection) {
            let shadows = self.world.roles().query(|role| {
                role.variant::<CharacterProfile>()
                    .is_some_and(|profile| profile.shadow)
            });
            let dropped = shadows.len();
            for shadow in shadows {
                self.world.despawn(shadow.id(), ChangeSource::Remote);
            }
            info!("🔌 Uplink to Game process closed, {} shadow players dropped", dropped);
        }
    }

    /// Applies one received frame.
    pub fn handle_frame(&self, connection: ConnectionId, frame: &[u8]) -> Result<(), LinkError> {
        let uplink = self
            .state_of(connection)
            .ok_or(LinkError::Closed(connection.0))?;
        let message = SyncMessage::decode(frame)?;

        if self.peer.is_peer(connection) {
            self.peer.touch(self.now_ms());
        }

        match (uplink.state, message) {
            (LinkState::AwaitingAuth, SyncMessage::LoginExchangeEx(result)) => {
                self.handle_login_result(connection, result)
            }
            (LinkState::AwaitingAuth, other) => {
                warn!(message = ?other.message_type(), "message before login result, ignored");
                Err(LinkError::Protocol(format!(
                    "{:?} received before login completed",
                    other.message_type()
                )))
            }
            (LinkState::Authenticated, message) => self.dispatch(connection, message),
        }
    }

    fn handle_login_result(&self, connection: ConnectionId, result: LoginResult) -> Result<(), LinkError> {
        match result {
            LoginResult::Success => {
                if let Some(uplink) = lock(&self.uplink).as_mut() {
                    uplink.state = LinkState::Authenticated;
                }
                self.peer.bind(connection, self.now_ms());
                info!("🤝 Linked to Game process at {}", self.config.peer_address);
                let resent = self.resync()?;
                debug!(monsters = resent, "local monsters announced");
                Ok(())
            }
            LoginResult::AlreadySignedIn => {
                debug!("Game process reports this link already signed in");
                Ok(())
            }
            LoginResult::InvalidAddress => {
                error!(
                    "🚫 Game process at {} refused this address, the AI process cannot continue",
                    self.config.peer_address
                );
                self.fatal.store(true, Ordering::Release);
                self.peer.disconnect(connection);
                Err(LinkError::UnauthorizedAddress(self.config.peer_address.to_string()))
            }
            LoginResult::InvalidPassword | LoginResult::AlreadyBound => {
                warn!("🚫 Login to Game process rejected: {:?}", result);
                self.peer.disconnect(connection);
                Err(LinkError::Rejected(result))
            }
        }
    }

    fn dispatch(&self, connection: ConnectionId, message: SyncMessage) -> Result<(), LinkError> {
        match message {
            SyncMessage::Ping { origin_ms, reply_ms } => {
                self.peer.handle_ping(
                    connection,
                    origin_ms,
                    reply_ms,
                    self.now_ms(),
                    self.config.lag_warning_ms,
                )?;
            }
            SyncMessage::PlayerLogin(snapshot) => self.login_shadow(snapshot),
            SyncMessage::PlayerLogout(id) => {
                if self.world.roles().get(id).is_some_and(|role| role.is_player()) {
                    self.world.despawn(id, ChangeSource::Remote);
                }
            }
            SyncMessage::SpawnNpc(SpawnBatch::Destroy(ids)) => {
                for id in ids {
                    if self.world.despawn(id, ChangeSource::Remote).is_none() {
                        trace!(role = %id, "DestroyNpc for unknown role");
                    }
                }
            }
            SyncMessage::RoleStatusFlag(change) => {
                self.world.apply_status(change, ChangeSource::Remote);
            }
            SyncMessage::DynaMap(change) => apply_dyna_map(&self.world, change),
            SyncMessage::Action(request) => self.route_action(&request)?,
            SyncMessage::LoginExchangeEx(_) => {
                debug!("login result after login, ignored");
            }
            other @ (SyncMessage::LoginExchange { .. }
            | SyncMessage::SpawnNpc(SpawnBatch::Spawn(_))
            | SyncMessage::RoleLogin(_)
            | SyncMessage::QueryRole(_)) => {
                warn!(
                    message = ?other.message_type(),
                    "Game process sent an AI-to-Game message, ignored"
                );
                return Err(LinkError::Protocol(format!(
                    "{:?} is not accepted by the AI process",
                    other.message_type()
                )));
            }
        }
        Ok(())
    }

    /// Registers a shadow character. A second login for an identity or
    /// account already present is rejected and the first one stays.
    fn login_shadow(&self, snapshot: PlayerSnapshot) {
        let id = snapshot.id;
        match self
            .world
            .spawn_role(Arc::new(snapshot.into_shadow()), ChangeSource::Remote)
        {
            Ok(role) => debug!(role = %id, map = %role.map(), "shadow player created"),
            Err(e @ (WorldError::DuplicateRole(_) | WorldError::DuplicateAccount(_))) => {
                warn!(role = %id, error = %e, "duplicate player login rejected");
            }
            Err(e) => warn!(role = %id, error = %e, "shadow player not created"),
        }
    }

    /// Hands an action to the brain once every role it names is known;
    /// unknown roles are queried from the Game process instead. A walk by a
    /// shadow player moves the shadow first, across maps for a map jump.
    fn route_action(&self, request: &ActionRequest) -> Result<(), LinkError> {
        let mut unknown: Vec<RoleId> = Vec::new();
        for id in std::iter::once(request.actor).chain(request.target) {
            if !self.world.roles().contains(id) && !unknown.contains(&id) {
                unknown.push(id);
            }
        }
        if unknown.is_empty() {
            let is_shadow = self
                .world
                .roles()
                .get(request.actor)
                .is_some_and(|role| role.is_shadow());
            if request.kind == ActionKind::Walk && is_shadow {
                if let Err(e) = apply_walk(&self.world, request, false) {
                    debug!(role = %request.actor, map = %request.map, error = %e, "shadow walk not applied");
                }
            }
            self.brain.on_action(&self.world, request);
            return Ok(());
        }
        for id in unknown {
            debug!(role = %id, "action names unknown role, querying");
            self.peer.send(&SyncMessage::QueryRole(id))?;
        }
        Ok(())
    }

    /// Re-announces every monster this process owns. Runs after each login
    /// so a Game process that dropped our monsters while we were away gets
    /// them back. Returns how many were announced.
    pub fn resync(&self) -> Result<usize, LinkError> {
        self.batcher.clear();
        let identities = self.world.identities();
        let owned = self
            .world
            .roles()
            .query(|role| !role.is_player() && identities.category_of(role.id()).is_some());

        let mut announced = 0;
        for role in owned {
            let Some(entry) = SpawnEntry::from_role(&role) else {
                continue;
            };
            if entry.generator.is_some() {
                self.batcher.push_spawn(entry);
            } else {
                self.peer.send(&SyncMessage::RoleLogin(entry))?;
            }
            announced += 1;
        }
        self.flush()?;
        Ok(announced)
    }

    /// Sends buffered spawns and destroys.
    pub fn flush(&self) -> Result<usize, LinkError> {
        self.batcher.flush(&self.peer)
    }

    /// One keepalive pass over the uplink.
    pub fn keepalive(&self) -> Keepalive {
        self.peer
            .keepalive(self.now_ms(), self.config.ping_timeout().as_millis() as u64)
    }
}

impl LinkHandler for AiLink {
    fn submit_frame(self: &Arc<Self>, connection: ConnectionId, frame: Vec<u8>) -> bool {
        let Some(uplink) = self.state_of(connection) else {
            return false;
        };
        let link = self.clone();
        self.world.processor().submit(uplink.partition, async move {
            if let Err(e) = link.handle_frame(connection, &frame) {
                warn!(connection = %connection, error = %e, "link message rejected");
            }
            Ok(())
        })
    }

    fn submit_disconnect(self: &Arc<Self>, connection: ConnectionId) {
        let Some(uplink) = self.state_of(connection) else {
            return;
        };
        let link = self.clone();
        let queued = self.world.processor().submit(uplink.partition, async move {
            link.on_disconnected(connection);
            Ok(())
        });
        if !queued {
            self.on_disconnected(connection);
        }
    }
}
