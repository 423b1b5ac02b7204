//! The world service object.
//!
//! [`World`] owns every piece of world state of one process: loaded maps,
//! the role registry, monster templates, generators, identity pools and the
//! partitioned processor. It is constructed explicitly and passed around by
//! `Arc`; nothing in the core is global.
//!
//! Changes this process originates are reported to an optional
//! [`WorldObserver`], which is how the sync link learns what to replicate to
//! the peer process. Changes applied on behalf of the peer are not reported
//! back.

use crate::clock::Clock;
use crate::config::{WorldConfig, DYNAMIC_MAP_THRESHOLD};
use crate::error::WorldError;
use crate::generator::{Generator, GeneratorDescriptor, GeneratorRegistry, MonsterTemplate};
use crate::identity::{IdentityCategory, IdentityPools};
use crate::persistence::WorldRepository;
use crate::processor::PartitionedProcessor;
use crate::registry::RoleRegistry;
use crate::role::{MonsterOrigin, MonsterProfile, Role, StatusFlag};
use crate::spatial::{GameMap, MapDescriptor, MapManager};
use crate::types::{Cell, MapId, ProcessSide, RoleId, TemplateId};
use crate::utils::lock;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Who originated a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// Decided by this process; replicated to the peer
    Local,
    /// Applied on behalf of the peer; not echoed back
    Remote,
}

/// A status flag being attached to or detached from a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub target: RoleId,
    pub caster: RoleId,
    pub flag: StatusFlag,
    /// Zero lasts until detached
    pub duration: Duration,
    pub attach: bool,
}

/// Receives locally originated world changes.
pub trait WorldObserver: Send + Sync {
    fn role_spawned(&self, _role: &Arc<Role>) {}

    fn role_despawned(&self, _role: &Arc<Role>) {}

    /// The role now stands at its current map and cell.
    fn role_moved(&self, _role: &Arc<Role>) {}

    fn status_changed(&self, _change: &StatusChange) {}

    fn dynamic_map_added(&self, _descriptor: &MapDescriptor) {}

    fn dynamic_map_removed(&self, _map: MapId) {}
}

/// Counts of what [`World::load`] brought in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub maps: usize,
    pub templates: usize,
    pub generators: usize,
    pub processable_generators: usize,
}

/// Counts from one role tick over one map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleTickSummary {
    pub expired_flags: usize,
    pub removed_dead: usize,
}

/// A monster to place in the world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonsterSpawn {
    pub id: RoleId,
    pub template: TemplateId,
    pub map: MapId,
    pub cell: Cell,
    pub origin: MonsterOrigin,
}

/// All world state of one process.
pub struct World {
    config: WorldConfig,
    side: ProcessSide,
    maps: MapManager,
    roles: RoleRegistry,
    templates: DashMap<TemplateId, MonsterTemplate>,
    generators: GeneratorRegistry,
    identities: IdentityPools,
    processor: PartitionedProcessor,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    observer: OnceCell<Arc<dyn WorldObserver>>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("side", &self.side)
            .field("maps", &self.maps.len())
            .field("roles", &self.roles.len())
            .field("generators", &self.generators.len())
            .finish()
    }
}

impl World {
    pub fn new(config: WorldConfig, side: ProcessSide, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            maps: MapManager::new(),
            roles: RoleRegistry::new(),
            templates: DashMap::new(),
            generators: GeneratorRegistry::new(),
            identities: IdentityPools::new(config.identity.for_side(side)),
            processor: PartitionedProcessor::new(config.effective_partition_count()),
            clock,
            rng: Mutex::new(rng),
            observer: OnceCell::new(),
            config,
            side,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn side(&self) -> ProcessSide {
        self.side
    }

    pub fn maps(&self) -> &MapManager {
        &self.maps
    }

    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    pub fn generators(&self) -> &GeneratorRegistry {
        &self.generators
    }

    pub fn identities(&self) -> &IdentityPools {
        &self.identities
    }

    pub fn processor(&self) -> &PartitionedProcessor {
        &self.processor
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Installs the observer. Only the first call takes effect.
    pub fn set_observer(&self, observer: Arc<dyn WorldObserver>) -> bool {
        self.observer.set(observer).is_ok()
    }

    fn notify(&self, source: ChangeSource, event: impl FnOnce(&dyn WorldObserver)) {
        if source == ChangeSource::Local {
            if let Some(observer) = self.observer.get() {
                event(observer.as_ref());
            }
        }
    }

    /// Starts the partition consumers.
    pub fn start(&self) {
        self.processor.start();
    }

    /// Drains queued work and stops the partition consumers.
    pub async fn shutdown(&self) {
        self.processor.shutdown().await;
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Loads maps, templates and (if enabled) generators from the repository.
    pub async fn load(&self, repo: &dyn WorldRepository) -> Result<LoadSummary, WorldError> {
        let mut summary = LoadSummary::default();

        for descriptor in repo.load_map_list().await? {
            match self.load_map(&descriptor) {
                Ok(_) => summary.maps += 1,
                Err(e) => warn!(map = %descriptor.id, error = %e, "map skipped"),
            }
        }

        for template in repo.load_monster_templates().await? {
            self.add_template(template);
            summary.templates += 1;
        }

        if self.config.generators_enabled {
            for descriptor in repo.load_generators().await? {
                if self.add_generator(&descriptor) {
                    summary.generators += 1;
                }
            }
            summary.processable_generators = self.generators.processable_count();
        }

        info!(
            "🌍 World loaded: {} maps, {} templates, {} generators ({} processable)",
            summary.maps, summary.templates, summary.generators, summary.processable_generators
        );
        Ok(summary)
    }

    /// Builds a map and assigns it the least loaded partition.
    pub fn load_map(&self, descriptor: &MapDescriptor) -> Result<Arc<GameMap>, WorldError> {
        if self.maps.contains(descriptor.id) {
            return Err(WorldError::DuplicateMap(descriptor.id));
        }
        let partition = self.processor.select_partition();
        let map = GameMap::new(descriptor, self.config.block_size, partition);
        self.maps.insert(map).map_err(|e| {
            self.processor.deselect_partition(partition);
            e
        })
    }

    pub fn add_template(&self, template: MonsterTemplate) {
        self.templates.insert(template.id, template);
    }

    pub fn template(&self, id: TemplateId) -> Option<MonsterTemplate> {
        self.templates.get(&id).map(|entry| entry.value().clone())
    }

    /// Registers a generator, resolving its map and template now. Unresolved
    /// generators are kept but never tick.
    pub fn add_generator(&self, descriptor: &GeneratorDescriptor) -> bool {
        let map = self.maps.get(descriptor.map);
        let template = self.template(descriptor.template);
        self.generators
            .insert(Generator::new(descriptor, map.as_ref(), template, &self.config))
    }

    // ------------------------------------------------------------------
    // Role lifecycle
    // ------------------------------------------------------------------

    /// Places a role on its map and registers it.
    ///
    /// Fails without side effects if the map is unknown, the cell is off the
    /// map, or the identity (or account) is already registered.
    pub fn spawn_role(&self, role: Arc<Role>, source: ChangeSource) -> Result<Arc<Role>, WorldError> {
        let map = self
            .maps
            .get(role.map())
            .ok_or(WorldError::MapNotFound(role.map()))?;
        if !map.contains(role.cell()) {
            return Err(WorldError::OutOfBounds {
                map: map.id(),
                cell: role.cell(),
            });
        }

        self.roles.add(role.clone())?;
        if let Err(e) = map.add_role(&role) {
            self.roles.remove(role.id());
            return Err(e);
        }

        trace!(role = %role.id(), map = %map.id(), cell = %role.cell(), "role spawned");
        self.notify(source, |observer| observer.role_spawned(&role));
        Ok(role)
    }

    /// Creates and places a monster from a template.
    pub fn spawn_monster(&self, spawn: MonsterSpawn, source: ChangeSource) -> Result<Arc<Role>, WorldError> {
        let template = self
            .template(spawn.template)
            .ok_or(WorldError::TemplateNotFound(spawn.template))?;
        let role = Arc::new(Role::monster(
            spawn.id,
            MonsterProfile {
                template: template.id,
                name: template.name,
                origin: spawn.origin,
                footprint: template.footprint,
            },
            spawn.map,
            spawn.cell,
        ));
        self.spawn_role(role, source)
    }

    /// Removes a role from its map, then from the registry.
    ///
    /// A generator-owned monster hands its slot back to the generator and a
    /// locally minted identity goes back to its pool.
    pub fn despawn(&self, id: RoleId, source: ChangeSource) -> Option<Arc<Role>> {
        let role = self.roles.get(id)?;
        if let Some(map) = self.maps.get(role.map()) {
            map.remove_role(&role);
        }
        self.roles.remove(id);
        role.kill();

        if let Some(generator) = role.generator().and_then(|g| self.generators.get(g)) {
            generator.remove(id, self.clock.now());
        }
        if !role.is_player() {
            self.identities.release(id);
        }

        trace!(role = %id, ?source, "role despawned");
        self.notify(source, |observer| observer.role_despawned(&role));
        Some(role)
    }

    /// Moves a role within its map if the destination is legal.
    pub fn move_role(&self, id: RoleId, to: Cell, source: ChangeSource) -> Result<bool, WorldError> {
        let role = self.roles.get(id).ok_or(WorldError::RoleNotFound(id))?;
        let map = self
            .maps
            .get(role.map())
            .ok_or(WorldError::MapNotFound(role.map()))?;
        let moved = map.try_move(&role, to);
        if moved {
            self.notify(source, |observer| observer.role_moved(&role));
        }
        Ok(moved)
    }

    /// Moves a role to another cell, possibly on another map, without
    /// occupancy checks.
    ///
    /// Across maps the role joins the target map before it leaves the old
    /// one; if the target refuses it, the role stays where it was.
    pub fn transfer_role(&self, id: RoleId, map_id: MapId, to: Cell, source: ChangeSource) -> Result<(), WorldError> {
        let role = self.roles.get(id).ok_or(WorldError::RoleNotFound(id))?;
        let target = self.maps.get(map_id).ok_or(WorldError::MapNotFound(map_id))?;
        if !target.contains(to) {
            return Err(WorldError::OutOfBounds { map: map_id, cell: to });
        }

        if role.map() == map_id {
            target.relocate(&role, to)?;
            self.notify(source, |observer| observer.role_moved(&role));
            return Ok(());
        }

        let (from_map, from_cell) = (role.map(), role.cell());
        role.set_map(map_id);
        role.set_cell(to);
        if let Err(e) = target.add_role(&role) {
            role.set_map(from_map);
            role.set_cell(from_cell);
            return Err(e);
        }
        if let Some(old) = self.maps.get(from_map) {
            old.remove_role_at(&role, from_cell);
        }

        debug!(role = %id, from = %from_map, map = %map_id, cell = %to, "role transferred");
        self.notify(source, |observer| observer.role_moved(&role));
        Ok(())
    }

    /// Marks a role dead. Dead monsters are removed by the next role tick.
    pub fn kill(&self, id: RoleId) -> bool {
        self.roles.get(id).is_some_and(|role| role.kill())
    }

    /// Attaches or detaches a status flag. Unknown targets are ignored.
    pub fn apply_status(&self, change: StatusChange, source: ChangeSource) -> bool {
        let Some(role) = self.roles.get(change.target) else {
            trace!(role = %change.target, flag = change.flag, "status change for unknown role ignored");
            return false;
        };
        if change.attach {
            role.attach_status(change.flag, change.caster, change.duration, self.clock.now());
        } else {
            role.detach_status(change.flag);
        }
        self.notify(source, |observer| observer.status_changed(&change));
        true
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    /// Spawns one monster for a slot the generator reserved. Runs as
    /// partition work on the generator's map partition.
    pub fn spawn_from_generator(&self, generator: &Generator) -> Result<(), WorldError> {
        let (Some(map), Some(template)) = (generator.map(), generator.template()) else {
            generator.abort_spawn();
            return Ok(());
        };

        let point = generator.find_spawn_point(&mut *lock(&self.rng));
        let Some(cell) = point else {
            trace!(generator = %generator.id(), "no spawn point this tick");
            generator.abort_spawn();
            return Ok(());
        };
        let Some(id) = self.identities.next(IdentityCategory::Monster) else {
            debug!(generator = %generator.id(), "monster identity pool exhausted");
            generator.abort_spawn();
            return Ok(());
        };

        let role = Arc::new(Role::monster(
            id,
            MonsterProfile {
                template: template.id,
                name: template.name.clone(),
                origin: MonsterOrigin::Generator(generator.id()),
                footprint: template.footprint,
            },
            map.id(),
            cell,
        ));
        match self.spawn_role(role.clone(), ChangeSource::Local) {
            Ok(_) => {
                generator.record_spawned(&role);
                Ok(())
            }
            Err(e) => {
                generator.abort_spawn();
                self.identities.release(id);
                Err(e)
            }
        }
    }

    /// Ticks every generator, queueing spawn work on the map partitions.
    pub fn tick_generators(self: &Arc<Self>) -> usize {
        let now = self.clock.now();
        self.generators.tick(now, &self.processor, |generator| {
            let world = self.clone();
            Box::pin(async move { world.spawn_from_generator(&generator) })
        })
    }

    /// Housekeeping for one map: expires status flags and removes dead monsters.
    pub fn tick_map_roles(&self, map: &GameMap) -> RoleTickSummary {
        let now = self.clock.now();
        let mut summary = RoleTickSummary::default();
        for role in map.roles() {
            summary.expired_flags += role.on_timer(now);
            if !role.is_player() && !role.is_alive() && self.despawn(role.id(), ChangeSource::Local).is_some() {
                summary.removed_dead += 1;
            }
        }
        summary
    }

    /// Queues a role tick for every map on its partition. Returns the number
    /// of maps queued.
    pub fn tick_roles(self: &Arc<Self>) -> usize {
        let mut queued = 0;
        for map in self.maps.all() {
            let world = self.clone();
            let partition = map.partition();
            let accepted = self.processor.submit(partition, async move {
                let summary = world.tick_map_roles(&map);
                if summary != RoleTickSummary::default() {
                    debug!(
                        map = %map.id(),
                        expired = summary.expired_flags,
                        removed = summary.removed_dead,
                        "role tick"
                    );
                }
                Ok(())
            });
            if accepted {
                queued += 1;
            }
        }
        queued
    }

    // ------------------------------------------------------------------
    // Dynamic maps
    // ------------------------------------------------------------------

    /// Creates an instance map at runtime.
    pub fn add_dynamic_map(&self, descriptor: &MapDescriptor, source: ChangeSource) -> Result<Arc<GameMap>, WorldError> {
        if descriptor.id.0 <= DYNAMIC_MAP_THRESHOLD {
            return Err(WorldError::NotDynamic(descriptor.id));
        }
        let map = self.load_map(descriptor)?;
        self.notify(source, |observer| observer.dynamic_map_added(descriptor));
        Ok(map)
    }

    /// Tears down an instance map. Players are moved to the configured
    /// fallback map; everything else on the map is despawned, and so are
    /// shadow players when there is no fallback. Returns the number of roles
    /// despawned.
    ///
    /// Refused while players this process owns stand on the map and no
    /// fallback map is loaded, or when the fallback cell is not standable.
    /// Nothing is despawned until every player has left the map.
    pub fn remove_dynamic_map(&self, id: MapId, source: ChangeSource) -> Result<usize, WorldError> {
        if id.0 <= DYNAMIC_MAP_THRESHOLD {
            return Err(WorldError::NotDynamic(id));
        }
        let map = self.maps.get(id).ok_or(WorldError::MapNotFound(id))?;

        let roles = map.roles();
        let fallback = self.config.fallback_map.and_then(|fallback| self.maps.get(fallback));
        let (players, others): (Vec<_>, Vec<_>) = roles.into_iter().partition(|role| role.is_player());
        let owns_players = players.iter().any(|role| !role.is_shadow());
        let cell = self.config.fallback_cell;

        let mut despawned = 0;
        match fallback {
            None if owns_players => return Err(WorldError::MapOccupied(id)),
            Some(fallback) if !players.is_empty() && !fallback.can_stand(cell) => {
                return Err(WorldError::UnusableFallback { map: fallback.id(), cell });
            }
            // Shadows follow their owner's move instead of announcing one.
            Some(fallback) => {
                for role in &players {
                    let origin = if role.is_shadow() { ChangeSource::Remote } else { ChangeSource::Local };
                    match self.transfer_role(role.id(), fallback.id(), cell, origin) {
                        Ok(()) | Err(WorldError::RoleNotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
            }
            None => {
                for role in &players {
                    if self.despawn(role.id(), ChangeSource::Remote).is_some() {
                        despawned += 1;
                    }
                }
            }
        }
        for role in &others {
            if self.despawn(role.id(), source).is_some() {
                despawned += 1;
            }
        }
        self.generators.remove_map(id);
        self.maps.remove(id);
        self.processor.deselect_partition(map.partition());

        info!("🗺️ Dynamic map {} removed ({} roles despawned)", id, despawned);
        self.notify(source, |observer| observer.dynamic_map_removed(id));
        Ok(despawned)
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Saves every player owned by this process. Returns how many were saved;
    /// individual failures are logged and skipped.
    pub async fn save_players(&self, repo: &dyn WorldRepository) -> usize {
        let records: Vec<_> = self
            .roles
            .query(|role| role.is_player())
            .iter()
            .filter_map(|role| role.save_record())
            .collect();

        let mut saved = 0;
        for record in records {
            match repo.save(&record).await {
                Ok(()) => saved += 1,
                Err(e) => warn!(role = %record.role, error = %e, "player save failed"),
            }
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::MemoryRepository;
    use crate::role::CharacterProfile;
    use crate::types::{AccountId, GeneratorId, PartitionId};

    const FIELDS: MapId = MapId(1);
    const CAVE: MapId = MapId(2);

    #[derive(Default)]
    struct Recorder {
        spawned: Mutex<Vec<RoleId>>,
        despawned: Mutex<Vec<RoleId>>,
        statuses: Mutex<Vec<StatusChange>>,
        moved: Mutex<Vec<(RoleId, MapId, Cell)>>,
    }

    impl WorldObserver for Recorder {
        fn role_spawned(&self, role: &Arc<Role>) {
            self.spawned.lock().unwrap().push(role.id());
        }

        fn role_despawned(&self, role: &Arc<Role>) {
            self.despawned.lock().unwrap().push(role.id());
        }

        fn status_changed(&self, change: &StatusChange) {
            self.statuses.lock().unwrap().push(*change);
        }

        fn role_moved(&self, role: &Arc<Role>) {
            self.moved.lock().unwrap().push((role.id(), role.map(), role.cell()));
        }
    }

    fn map_descriptor(id: MapId, size: i32) -> MapDescriptor {
        MapDescriptor {
            id,
            name: format!("map-{id}"),
            width: size,
            height: size,
            blocked: vec![Cell::new(2, 2), Cell::new(7, 1)],
        }
    }

    fn template() -> MonsterTemplate {
        MonsterTemplate {
            id: TemplateId(9),
            name: "Pheasant".into(),
            footprint: 1,
            level: 2,
            hp: 30,
        }
    }

    fn generator(id: u32, max_per_gen: u32) -> GeneratorDescriptor {
        GeneratorDescriptor {
            id: GeneratorId(id),
            map: FIELDS,
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            template: TemplateId(9),
            max_per_gen,
            rest_secs: 10,
        }
    }

    fn world(clock: Arc<ManualClock>) -> Arc<World> {
        let config = WorldConfig {
            partition_count: 2,
            rng_seed: Some(7),
            ..WorldConfig::default()
        };
        let world = Arc::new(World::new(config, ProcessSide::Ai, clock));
        world.load_map(&map_descriptor(FIELDS, 36)).unwrap();
        world.load_map(&map_descriptor(CAVE, 20)).unwrap();
        world.add_template(template());
        world
    }

    fn player(id: u32, map: MapId, cell: Cell) -> Arc<Role> {
        character(id, map, cell, false)
    }

    fn character(id: u32, map: MapId, cell: Cell, shadow: bool) -> Arc<Role> {
        Arc::new(Role::character(
            RoleId(id),
            CharacterProfile {
                account: AccountId(id),
                name: format!("p{id}"),
                level: 10,
                hp: 100,
                max_hp: 100,
                guild: None,
                shadow,
            },
            map,
            cell,
        ))
    }

    fn monster(id: u32, origin: MonsterOrigin) -> MonsterSpawn {
        MonsterSpawn {
            id: RoleId(id),
            template: TemplateId(9),
            map: FIELDS,
            cell: Cell::new(12, 12),
            origin,
        }
    }

    #[test]
    fn maps_are_spread_over_partitions() {
        let world = world(Arc::new(ManualClock::new()));
        assert_eq!(world.maps().get(FIELDS).unwrap().partition(), PartitionId(0));
        assert_eq!(world.maps().get(CAVE).unwrap().partition(), PartitionId(1));
        assert_eq!(
            world.load_map(&map_descriptor(FIELDS, 10)).unwrap_err(),
            WorldError::DuplicateMap(FIELDS)
        );
        assert_eq!(world.processor().weight(PartitionId(0)), Some(1));
    }

    #[tokio::test]
    async fn generator_tick_populates_bounds_within_cap() {
        let world = world(Arc::new(ManualClock::new()));
        world.spawn_role(player(1, FIELDS, Cell::new(30, 30)), ChangeSource::Local).unwrap();
        assert!(world.add_generator(&generator(1, 5)));
        world.start();

        assert_eq!(world.tick_generators(), 5);
        world.shutdown().await;

        let generator = world.generators().get(GeneratorId(1)).unwrap();
        let monsters = world.roles().query(|role| role.generator() == Some(GeneratorId(1)));
        assert!(!monsters.is_empty());
        assert!(monsters.len() <= 5);
        assert_eq!(generator.live_count(), monsters.len());

        let fields = world.maps().get(FIELDS).unwrap();
        for monster in monsters {
            assert!(generator.bounds().contains(monster.cell()));
            assert!(fields.can_stand(monster.cell()));
            assert!(fields.block_for(monster.cell()).unwrap().contains(monster.id()));
            assert!(world.identities().category_of(monster.id()) == Some(IdentityCategory::Monster));
        }
    }

    #[tokio::test]
    async fn generators_on_empty_maps_do_nothing() {
        let world = world(Arc::new(ManualClock::new()));
        world.add_generator(&generator(1, 5));
        assert_eq!(world.tick_generators(), 0);
        world.shutdown().await;
    }

    #[test]
    fn despawn_from_uncapped_generator_frees_slot_at_once() {
        let clock = Arc::new(ManualClock::new());
        let world = world(clock.clone());
        world.spawn_role(player(1, FIELDS, Cell::new(30, 30)), ChangeSource::Local).unwrap();
        world.add_generator(&generator(1, 0));
        let generator = world.generators().get(GeneratorId(1)).unwrap();

        let slots = generator.begin_tick(clock.now());
        for _ in 0..slots {
            let _ = world.spawn_from_generator(&generator);
        }
        let before = generator.population(clock.now());
        let victim = generator.live_roles()[0].id();

        world.despawn(victim, ChangeSource::Local).unwrap();
        assert_eq!(generator.population(clock.now()), before - 1);
        clock.advance(generator.rest());
        assert!(generator.available_slots(clock.now()) >= 1);
    }

    #[test]
    fn despawn_from_capped_generator_cools_slot_down() {
        let clock = Arc::new(ManualClock::new());
        let world = world(clock.clone());
        world.spawn_role(player(1, FIELDS, Cell::new(30, 30)), ChangeSource::Local).unwrap();
        world.add_generator(&generator(1, 5));
        let generator = world.generators().get(GeneratorId(1)).unwrap();

        // Fill the generator to its cap, retrying missed spawn points.
        for _ in 0..20 {
            clock.advance(Duration::from_secs(10));
            let slots = generator.begin_tick(clock.now());
            for _ in 0..slots {
                let _ = world.spawn_from_generator(&generator);
            }
            if generator.live_count() == 5 {
                break;
            }
        }
        assert_eq!(generator.live_count(), 5);

        let victim = generator.live_roles()[0].id();
        let pool_before = world.identities().get(IdentityCategory::Monster).remaining();
        world.despawn(victim, ChangeSource::Local).unwrap();
        assert_eq!(world.identities().get(IdentityCategory::Monster).remaining(), pool_before + 1);

        clock.advance(Duration::from_secs(9));
        assert_eq!(generator.available_slots(clock.now()), 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(generator.available_slots(clock.now()), 1);
    }

    #[test]
    fn failed_spawn_leaves_no_trace() {
        let world = world(Arc::new(ManualClock::new()));

        let lost = player(5, MapId(77), Cell::new(1, 1));
        assert_eq!(
            world.spawn_role(lost, ChangeSource::Remote).unwrap_err(),
            WorldError::MapNotFound(MapId(77))
        );
        let off_map = player(5, FIELDS, Cell::new(99, 1));
        assert!(matches!(
            world.spawn_role(off_map, ChangeSource::Remote),
            Err(WorldError::OutOfBounds { .. })
        ));
        assert!(world.roles().is_empty());

        let first = world.spawn_role(player(5, FIELDS, Cell::new(1, 1)), ChangeSource::Remote).unwrap();
        let err = world
            .spawn_role(player(5, FIELDS, Cell::new(20, 20)), ChangeSource::Remote)
            .unwrap_err();
        assert_eq!(err, WorldError::DuplicateAccount(AccountId(5)));
        let fields = world.maps().get(FIELDS).unwrap();
        assert_eq!(fields.role_count(), 1);
        assert!(Arc::ptr_eq(&world.roles().get(RoleId(5)).unwrap(), &first));
    }

    #[test]
    fn spawn_monster_requires_known_template() {
        let world = world(Arc::new(ManualClock::new()));
        let mut spawn = monster(2_000_001, MonsterOrigin::Summoned);
        spawn.template = TemplateId(404);
        assert_eq!(
            world.spawn_monster(spawn, ChangeSource::Remote).unwrap_err(),
            WorldError::TemplateNotFound(TemplateId(404))
        );

        let role = world
            .spawn_monster(monster(2_000_001, MonsterOrigin::Summoned), ChangeSource::Remote)
            .unwrap();
        assert_eq!(role.name(), "Pheasant");
    }

    #[test]
    fn transfer_moves_between_maps() {
        let world = world(Arc::new(ManualClock::new()));
        let p = world.spawn_role(player(3, FIELDS, Cell::new(5, 5)), ChangeSource::Local).unwrap();

        world.transfer_role(RoleId(3), CAVE, Cell::new(19, 19), ChangeSource::Local).unwrap();
        let fields = world.maps().get(FIELDS).unwrap();
        let cave = world.maps().get(CAVE).unwrap();
        assert_eq!(p.map(), CAVE);
        assert_eq!(fields.role_count(), 0);
        assert!(!fields.has_players());
        assert!(cave.block_for(Cell::new(19, 19)).unwrap().contains(RoleId(3)));
        assert_eq!(cave.role_count(), 1);

        assert!(world.transfer_role(RoleId(3), CAVE, Cell::new(20, 0), ChangeSource::Local).is_err());
        assert_eq!(p.map(), CAVE);
        assert_eq!(p.cell(), Cell::new(19, 19));
        assert_eq!(
            world.transfer_role(RoleId(99), CAVE, Cell::new(0, 0), ChangeSource::Local).unwrap_err(),
            WorldError::RoleNotFound(RoleId(99))
        );
        assert!(world.move_role(RoleId(3), Cell::new(18, 19), ChangeSource::Local).unwrap());
        assert!(!world.move_role(RoleId(3), Cell::new(2, 2), ChangeSource::Local).unwrap());
    }

    #[test]
    fn local_moves_are_observed_and_remote_ones_are_not() {
        let world = world(Arc::new(ManualClock::new()));
        let recorder = Arc::new(Recorder::default());
        world.set_observer(recorder.clone());
        world.spawn_role(player(3, FIELDS, Cell::new(5, 5)), ChangeSource::Remote).unwrap();

        assert!(world.move_role(RoleId(3), Cell::new(6, 5), ChangeSource::Local).unwrap());
        assert!(world.move_role(RoleId(3), Cell::new(7, 5), ChangeSource::Remote).unwrap());
        world.transfer_role(RoleId(3), CAVE, Cell::new(1, 1), ChangeSource::Local).unwrap();
        world.transfer_role(RoleId(3), FIELDS, Cell::new(1, 1), ChangeSource::Remote).unwrap();

        assert_eq!(*recorder.moved.lock().unwrap(), vec![(RoleId(3), FIELDS, Cell::new(6, 5)), (RoleId(3), CAVE, Cell::new(1, 1))]);
        let fields = world.maps().get(FIELDS).unwrap();
        assert!(fields.block_for(Cell::new(1, 1)).unwrap().contains(RoleId(3)));
        assert_eq!(world.maps().get(CAVE).unwrap().role_count(), 0);
    }

    #[test]
    fn role_tick_expires_flags_and_removes_dead_monsters() {
        let clock = Arc::new(ManualClock::new());
        let world = world(clock.clone());
        let recorder = Arc::new(Recorder::default());
        assert!(world.set_observer(recorder.clone()));

        world.spawn_role(player(1, FIELDS, Cell::new(30, 30)), ChangeSource::Remote).unwrap();
        world
            .spawn_monster(monster(1_000_123, MonsterOrigin::Summoned), ChangeSource::Local)
            .unwrap();
        let change = StatusChange {
            target: RoleId(1),
            caster: RoleId(1_000_123),
            flag: 4,
            duration: Duration::from_secs(3),
            attach: true,
        };
        assert!(world.apply_status(change, ChangeSource::Local));
        assert!(!world.apply_status(StatusChange { target: RoleId(404), ..change }, ChangeSource::Local));
        assert!(world.kill(RoleId(1_000_123)));
        world.kill(RoleId(1));

        clock.advance(Duration::from_secs(3));
        let fields = world.maps().get(FIELDS).unwrap();
        let summary = world.tick_map_roles(&fields);
        assert_eq!(summary, RoleTickSummary { expired_flags: 1, removed_dead: 1 });
        assert!(world.roles().contains(RoleId(1)));
        assert!(!world.roles().contains(RoleId(1_000_123)));

        assert_eq!(*recorder.spawned.lock().unwrap(), vec![RoleId(1_000_123)]);
        assert_eq!(*recorder.despawned.lock().unwrap(), vec![RoleId(1_000_123)]);
        assert_eq!(recorder.statuses.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tick_roles_runs_on_partitions() {
        let world = world(Arc::new(ManualClock::new()));
        world
            .spawn_monster(monster(1_000_001, MonsterOrigin::Summoned), ChangeSource::Local)
            .unwrap();
        world.kill(RoleId(1_000_001));
        world.start();
        assert_eq!(world.tick_roles(), 2);
        world.shutdown().await;
        assert!(world.roles().is_empty());
    }

    #[test]
    fn dynamic_maps_come_and_go() {
        let world = world(Arc::new(ManualClock::new()));
        assert_eq!(
            world.add_dynamic_map(&map_descriptor(MapId(999_999), 10), ChangeSource::Remote).unwrap_err(),
            WorldError::NotDynamic(MapId(999_999))
        );

        let instance = MapId(1_000_005);
        world.add_dynamic_map(&map_descriptor(instance, 10), ChangeSource::Remote).unwrap();
        world.spawn_role(character(8, instance, Cell::new(1, 1), true), ChangeSource::Remote).unwrap();
        let mut spawn = monster(1_000_777, MonsterOrigin::Summoned);
        spawn.map = instance;
        spawn.cell = Cell::new(5, 5);
        world.spawn_monster(spawn, ChangeSource::Remote).unwrap();

        assert_eq!(world.remove_dynamic_map(instance, ChangeSource::Remote).unwrap(), 2);
        assert!(!world.maps().contains(instance));
        assert!(world.roles().is_empty());
        assert_eq!(world.remove_dynamic_map(instance, ChangeSource::Remote).unwrap_err(), WorldError::MapNotFound(instance));
        assert_eq!(world.remove_dynamic_map(FIELDS, ChangeSource::Remote).unwrap_err(), WorldError::NotDynamic(FIELDS));
    }

    #[test]
    fn removing_an_occupied_dynamic_map_evacuates_players() {
        let instance = MapId(1_000_006);
        let stranded = world(Arc::new(ManualClock::new()));
        stranded.add_dynamic_map(&map_descriptor(instance, 10), ChangeSource::Local).unwrap();
        stranded.spawn_role(player(8, instance, Cell::new(1, 1)), ChangeSource::Local).unwrap();
        assert_eq!(
            stranded.remove_dynamic_map(instance, ChangeSource::Local).unwrap_err(),
            WorldError::MapOccupied(instance)
        );
        assert!(stranded.maps().contains(instance));
        assert!(stranded.roles().contains(RoleId(8)));

        let config = WorldConfig {
            partition_count: 2,
            fallback_map: Some(FIELDS),
            fallback_cell: Cell::new(20, 20),
            ..WorldConfig::default()
        };
        let world = Arc::new(World::new(config, ProcessSide::Game, Arc::new(ManualClock::new())));
        world.load_map(&map_descriptor(FIELDS, 36)).unwrap();
        world.add_template(template());
        let recorder = Arc::new(Recorder::default());
        world.set_observer(recorder.clone());

        world.add_dynamic_map(&map_descriptor(instance, 10), ChangeSource::Local).unwrap();
        let p = world.spawn_role(player(8, instance, Cell::new(1, 1)), ChangeSource::Local).unwrap();
        let mut spawn = monster(1_000_778, MonsterOrigin::Summoned);
        spawn.map = instance;
        spawn.cell = Cell::new(5, 5);
        world.spawn_monster(spawn, ChangeSource::Remote).unwrap();

        assert_eq!(world.remove_dynamic_map(instance, ChangeSource::Local).unwrap(), 1);
        assert!(world.roles().contains(RoleId(8)));
        assert!(!world.roles().contains(RoleId(1_000_778)));
        assert_eq!((p.map(), p.cell()), (FIELDS, Cell::new(20, 20)));
        assert!(world.maps().get(FIELDS).unwrap().has_players());
        assert_eq!(*recorder.moved.lock().unwrap(), vec![(RoleId(8), FIELDS, Cell::new(20, 20))]);
        assert!(recorder.despawned.lock().unwrap().contains(&RoleId(1_000_778)));
    }

    #[test]
    fn unusable_fallback_cell_leaves_the_instance_untouched() {
        let instance = MapId(1_000_007);
        let config = WorldConfig {
            partition_count: 2,
            fallback_map: Some(FIELDS),
            fallback_cell: Cell::new(999, 999),
            ..WorldConfig::default()
        };
        let world = Arc::new(World::new(config, ProcessSide::Game, Arc::new(ManualClock::new())));
        world.load_map(&map_descriptor(FIELDS, 36)).unwrap();
        world.add_template(template());
        let recorder = Arc::new(Recorder::default());
        world.set_observer(recorder.clone());

        world.add_dynamic_map(&map_descriptor(instance, 10), ChangeSource::Local).unwrap();
        let p = world.spawn_role(player(8, instance, Cell::new(1, 1)), ChangeSource::Local).unwrap();
        let mut spawn = monster(1_000_779, MonsterOrigin::Summoned);
        spawn.map = instance;
        spawn.cell = Cell::new(5, 5);
        world.spawn_monster(spawn, ChangeSource::Remote).unwrap();

        assert_eq!(
            world.remove_dynamic_map(instance, ChangeSource::Local).unwrap_err(),
            WorldError::UnusableFallback { map: FIELDS, cell: Cell::new(999, 999) }
        );
        assert!(world.maps().contains(instance));
        assert!(world.roles().contains(RoleId(1_000_779)));
        assert_eq!((p.map(), p.cell()), (instance, Cell::new(1, 1)));
        assert_eq!(world.maps().get(instance).unwrap().role_count(), 2);
        assert!(recorder.moved.lock().unwrap().is_empty());
        assert!(recorder.despawned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_and_save_through_repository() {
        let repo = MemoryRepository::new(
            vec![map_descriptor(FIELDS, 36)],
            vec![generator(1, 5), GeneratorDescriptor { template: TemplateId(404), ..generator(2, 5) }],
            vec![template()],
        );
        let world = Arc::new(World::new(
            WorldConfig { partition_count: 1, ..WorldConfig::default() },
            ProcessSide::Game,
            Arc::new(ManualClock::new()),
        ));

        let summary = world.load(&repo).await.unwrap();
        assert_eq!(
            summary,
            LoadSummary { maps: 1, templates: 1, generators: 2, processable_generators: 1 }
        );

        world.spawn_role(player(1, FIELDS, Cell::new(3, 3)), ChangeSource::Local).unwrap();
        world
            .spawn_role(character(2, FIELDS, Cell::new(4, 3), true), ChangeSource::Remote)
            .unwrap();

        assert_eq!(world.save_players(&repo).await, 1);
        assert_eq!(repo.saved()[0].role, RoleId(1));
    }
}
