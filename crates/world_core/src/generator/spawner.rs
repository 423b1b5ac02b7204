use super::descriptor::{GeneratorDescriptor, MonsterTemplate};
use crate::config::WorldConfig;
use crate::role::Role;
use crate::spatial::GameMap;
use crate::types::{Cell, GeneratorId, MapId, PartitionId, Rect, RoleId};
use crate::utils::lock;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A bounded spawn region bound to one monster template.
///
/// Population is everything the generator has a claim on: live monsters,
/// spawns submitted but not yet resolved, and slots cooling down after a
/// monster left. It never exceeds the cap.
#[derive(Debug)]
pub struct Generator {
    id: GeneratorId,
    map_id: MapId,
    bounds: Rect,
    template: Option<MonsterTemplate>,
    map: Weak<GameMap>,
    partition: PartitionId,
    max_per_gen: u32,
    rest: Duration,
    batch_cap: usize,
    processable: bool,
    state: Mutex<SpawnState>,
}

#[derive(Debug, Default)]
struct SpawnState {
    live: HashMap<RoleId, Weak<Role>>,
    pending: usize,
    /// Deadlines after which a vacated slot may be refilled; `None` never expires
    cooling: VecDeque<Option<Instant>>,
    last_spawn_tick: Option<Instant>,
}

impl SpawnState {
    fn expire_cooldowns(&mut self, now: Instant) {
        while self
            .cooling
            .front()
            .is_some_and(|deadline| deadline.is_some_and(|deadline| deadline <= now))
        {
            self.cooling.pop_front();
        }
    }

    fn population(&self) -> usize {
        self.live.len() + self.pending + self.cooling.len()
    }

    fn has_vacancy(&self) -> bool {
        !self.cooling.is_empty()
            || self
                .live
                .values()
                .any(|role| role.upgrade().map_or(true, |role| !role.is_alive()))
    }
}

impl Generator {
    /// Builds a generator. Without a resolved map or template it is marked
    /// non-processable and never ticks.
    pub fn new(
        descriptor: &GeneratorDescriptor,
        map: Option<&Arc<GameMap>>,
        template: Option<MonsterTemplate>,
        config: &WorldConfig,
    ) -> Self {
        let processable = map.is_some() && template.is_some();
        if !processable {
            warn!(
                generator = %descriptor.id,
                map = %descriptor.map,
                template = %descriptor.template,
                map_found = map.is_some(),
                template_found = template.is_some(),
                "⚠️ Generator excluded from ticking: unresolved map or template"
            );
        }

        Self {
            id: descriptor.id,
            map_id: descriptor.map,
            bounds: descriptor.bounds(),
            template,
            map: map.map(Arc::downgrade).unwrap_or_default(),
            partition: map.map(|m| m.partition()).unwrap_or(PartitionId(0)),
            max_per_gen: descriptor.max_per_gen,
            rest: Duration::from_secs(descriptor.rest_secs.max(config.min_rest_secs)),
            batch_cap: config.generator_batch_cap.max(1),
            processable,
            state: Mutex::new(SpawnState::default()),
        }
    }

    pub fn id(&self) -> GeneratorId {
        self.id
    }

    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn template(&self) -> Option<&MonsterTemplate> {
        self.template.as_ref()
    }

    pub fn max_per_gen(&self) -> u32 {
        self.max_per_gen
    }

    /// Effective respawn delay after the minimum floor.
    pub fn rest(&self) -> Duration {
        self.rest
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn is_processable(&self) -> bool {
        self.processable
    }

    /// The owning map, while it is loaded.
    pub fn map(&self) -> Option<Arc<GameMap>> {
        self.map.upgrade()
    }

    fn cap(&self) -> usize {
        if self.max_per_gen == 0 {
            self.batch_cap
        } else {
            self.max_per_gen as usize
        }
    }

    pub fn live_count(&self) -> usize {
        lock(&self.state).live.len()
    }

    pub fn contains(&self, id: RoleId) -> bool {
        lock(&self.state).live.contains_key(&id)
    }

    /// Live plus pending plus cooling slots at `now`.
    pub fn population(&self, now: Instant) -> usize {
        let mut state = lock(&self.state);
        state.expire_cooldowns(now);
        state.population()
    }

    /// Slots a tick at `now` would fill, without reserving them.
    pub fn available_slots(&self, now: Instant) -> usize {
        let mut state = lock(&self.state);
        self.slots(&mut state, now)
    }

    fn slots(&self, state: &mut SpawnState, now: Instant) -> usize {
        if !self.processable {
            return 0;
        }
        let Some(map) = self.map() else {
            return 0;
        };
        if !map.has_players() && !state.has_vacancy() {
            return 0;
        }
        if let Some(last) = state.last_spawn_tick {
            if last.checked_add(self.rest).map_or(true, |ready| now < ready) {
                return 0;
            }
        }

        state.expire_cooldowns(now);
        self.cap()
            .saturating_sub(state.population())
            .min(self.batch_cap)
    }

    /// Reserves the slots for one tick and returns how many spawns to submit.
    /// Every reserved slot must later be resolved with
    /// [`record_spawned`](Self::record_spawned) or [`abort_spawn`](Self::abort_spawn).
    pub fn begin_tick(&self, now: Instant) -> usize {
        let mut state = lock(&self.state);
        let slots = self.slots(&mut state, now);
        if slots > 0 {
            state.pending += slots;
            state.last_spawn_tick = Some(now);
            debug!(generator = %self.id, slots, population = state.population(), "generator tick");
        }
        slots
    }

    /// Resolves a reserved slot with the monster that filled it.
    pub fn record_spawned(&self, role: &Arc<Role>) {
        let mut state = lock(&self.state);
        state.pending = state.pending.saturating_sub(1);
        state.live.insert(role.id(), Arc::downgrade(role));
    }

    /// Gives back a reserved slot that produced no monster.
    pub fn abort_spawn(&self) {
        let mut state = lock(&self.state);
        state.pending = state.pending.saturating_sub(1);
    }

    /// Releases a monster's slot. Capped generators put the slot into a
    /// rest cooldown; uncapped ones free it immediately.
    pub fn remove(&self, id: RoleId, now: Instant) -> bool {
        let mut state = lock(&self.state);
        if state.live.remove(&id).is_none() {
            return false;
        }
        if self.max_per_gen > 0 {
            state.cooling.push_back(now.checked_add(self.rest));
        }
        true
    }

    /// Live monsters owned by the generator.
    pub fn live_roles(&self) -> Vec<Arc<Role>> {
        lock(&self.state)
            .live
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Picks one uniformly random cell inside the bounds. Returns `None` if
    /// that cell cannot take the template's footprint or the map is gone;
    /// the caller decides whether to try again.
    pub fn find_spawn_point<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Cell> {
        if self.bounds.is_empty() {
            return None;
        }
        let map = self.map()?;
        let cell = Cell::new(
            rng.gen_range(self.bounds.x..self.bounds.x + self.bounds.width),
            rng.gen_range(self.bounds.y..self.bounds.y + self.bounds.height),
        );
        let footprint = self.template.as_ref().map_or(1, |t| t.footprint);
        map.is_move_enable(cell, footprint, None).then_some(cell)
    }
}
