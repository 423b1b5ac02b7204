//! Roles: every simulated entity with an identity and a position.
//!
//! A role is data plus a small capability set. The variant is an explicit
//! tag ([`RoleKind`]); behaviour that differs per variant is dispatched on it
//! rather than through an inheritance chain.
//!
//! Position and liveness live in atomics so spatial queries on other
//! partitions can read them without taking a lock.

use crate::types::{AccountId, Cell, GeneratorId, MapId, RoleId, TemplateId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Numeric status-flag identifier (poisoned, invisible, ...).
pub type StatusFlag = u16;

/// An applied status effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusEffect {
    /// Role that applied the effect
    pub caster: RoleId,
    /// When the effect lapses; `None` lasts until explicitly detached
    pub expires_at: Option<Instant>,
}

/// A player character. On the AI process this is a shadow copy kept just
/// current enough to address the player by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub account: AccountId,
    pub name: String,
    pub level: u16,
    pub hp: u32,
    pub max_hp: u32,
    pub guild: Option<String>,
    /// True when this process does not own the character
    pub shadow: bool,
}

/// How a monster came into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonsterOrigin {
    /// Spawned by a generator, which owns its slot
    Generator(GeneratorId),
    /// Created ad hoc outside any generator (called pets and the like)
    Summoned,
}

/// A monster instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterProfile {
    pub template: TemplateId,
    pub name: String,
    pub origin: MonsterOrigin,
    /// Edge length in cells of the square the monster occupies
    pub footprint: u8,
}

/// A non-combat NPC (merchant, guard post, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpcProfile {
    pub name: String,
}

/// Variant tag plus the variant's immutable data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleKind {
    Character(CharacterProfile),
    Monster(MonsterProfile),
    Npc(NpcProfile),
}

/// Typed projection out of a [`RoleKind`], used by
/// [`RoleRegistry::get_as`](crate::registry::RoleRegistry::get_as).
pub trait RoleVariant: Sized {
    fn project(kind: &RoleKind) -> Option<&Self>;
}

impl RoleVariant for CharacterProfile {
    fn project(kind: &RoleKind) -> Option<&Self> {
        match kind {
            RoleKind::Character(profile) => Some(profile),
            _ => None,
        }
    }
}

impl RoleVariant for MonsterProfile {
    fn project(kind: &RoleKind) -> Option<&Self> {
        match kind {
            RoleKind::Monster(profile) => Some(profile),
            _ => None,
        }
    }
}

impl RoleVariant for NpcProfile {
    fn project(kind: &RoleKind) -> Option<&Self> {
        match kind {
            RoleKind::Npc(profile) => Some(profile),
            _ => None,
        }
    }
}

/// Persistable snapshot of a player character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRecord {
    pub role: RoleId,
    pub account: AccountId,
    pub name: String,
    pub map: MapId,
    pub cell: Cell,
    pub level: u16,
    pub hp: u32,
}

/// A live entity.
#[derive(Debug)]
pub struct Role {
    id: RoleId,
    kind: RoleKind,
    map: AtomicU32,
    cell: AtomicU64,
    alive: AtomicBool,
    status: DashMap<StatusFlag, StatusEffect>,
}

impl Role {
    pub fn new(id: RoleId, kind: RoleKind, map: MapId, cell: Cell) -> Self {
        Self {
            id,
            kind,
            map: AtomicU32::new(map.0),
            cell: AtomicU64::new(cell.pack()),
            alive: AtomicBool::new(true),
            status: DashMap::new(),
        }
    }

    pub fn character(id: RoleId, profile: CharacterProfile, map: MapId, cell: Cell) -> Self {
        Self::new(id, RoleKind::Character(profile), map, cell)
    }

    pub fn monster(id: RoleId, profile: MonsterProfile, map: MapId, cell: Cell) -> Self {
        Self::new(id, RoleKind::Monster(profile), map, cell)
    }

    pub fn npc(id: RoleId, profile: NpcProfile, map: MapId, cell: Cell) -> Self {
        Self::new(id, RoleKind::Npc(profile), map, cell)
    }

    pub fn id(&self) -> RoleId {
        self.id
    }

    pub fn kind(&self) -> &RoleKind {
        &self.kind
    }

    /// Typed view of the variant data.
    pub fn variant<V: RoleVariant>(&self) -> Option<&V> {
        V::project(&self.kind)
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            RoleKind::Character(p) => &p.name,
            RoleKind::Monster(p) => &p.name,
            RoleKind::Npc(p) => &p.name,
        }
    }

    pub fn map(&self) -> MapId {
        MapId(self.map.load(Ordering::Acquire))
    }

    pub fn cell(&self) -> Cell {
        Cell::unpack(self.cell.load(Ordering::Acquire))
    }

    /// Updates the stored position. Block membership is the map's job; call
    /// this only through [`GameMap`](crate::spatial::GameMap).
    pub(crate) fn set_cell(&self, cell: Cell) {
        self.cell.store(cell.pack(), Ordering::Release);
    }

    pub(crate) fn set_map(&self, map: MapId) {
        self.map.store(map.0, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Marks the role dead. Returns `false` if it already was.
    pub fn kill(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, RoleKind::Character(_))
    }

    /// A player owned by the peer process.
    pub fn is_shadow(&self) -> bool {
        matches!(&self.kind, RoleKind::Character(profile) if profile.shadow)
    }

    pub fn is_attackable(&self) -> bool {
        match &self.kind {
            RoleKind::Character(_) | RoleKind::Monster(_) => self.is_alive(),
            RoleKind::Npc(_) => false,
        }
    }

    /// Whether the role stops others from standing on its cell.
    /// Players always block; dead monsters do not.
    pub fn blocks_movement(&self) -> bool {
        match &self.kind {
            RoleKind::Character(_) => true,
            RoleKind::Monster(_) | RoleKind::Npc(_) => self.is_alive(),
        }
    }

    pub fn footprint(&self) -> u8 {
        match &self.kind {
            RoleKind::Monster(p) => p.footprint.max(1),
            _ => 1,
        }
    }

    /// Generator owning this role's slot, if any.
    pub fn generator(&self) -> Option<GeneratorId> {
        match &self.kind {
            RoleKind::Monster(MonsterProfile {
                origin: MonsterOrigin::Generator(id),
                ..
            }) => Some(*id),
            _ => None,
        }
    }

    /// Attaches a status flag. A zero duration lasts until detached.
    pub fn attach_status(&self, flag: StatusFlag, caster: RoleId, duration: Duration, now: Instant) {
        let expires_at = (!duration.is_zero()).then(|| now + duration);
        self.status.insert(flag, StatusEffect { caster, expires_at });
    }

    /// Detaches a status flag. Returns whether it was present.
    pub fn detach_status(&self, flag: StatusFlag) -> bool {
        self.status.remove(&flag).is_some()
    }

    pub fn status(&self, flag: StatusFlag) -> Option<StatusEffect> {
        self.status.get(&flag).map(|entry| *entry.value())
    }

    pub fn has_status(&self, flag: StatusFlag) -> bool {
        self.status.contains_key(&flag)
    }

    /// Periodic per-role housekeeping. Returns the number of status flags that lapsed.
    pub fn on_timer(&self, now: Instant) -> usize {
        let before = self.status.len();
        self.status
            .retain(|_, effect| effect.expires_at.map_or(true, |at| at > now));
        before - self.status.len()
    }

    /// Snapshot for persistence. Only players owned by this process are saved.
    pub fn save_record(&self) -> Option<SaveRecord> {
        match &self.kind {
            RoleKind::Character(profile) if !profile.shadow => Some(SaveRecord {
                role: self.id,
                account: profile.account,
                name: profile.name.clone(),
                map: self.map(),
                cell: self.cell(),
                level: profile.level,
                hp: profile.hp,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(shadow: bool) -> Role {
        Role::character(
            RoleId(7),
            CharacterProfile {
                account: AccountId(42),
                name: "Ayla".to_string(),
                level: 12,
                hp: 90,
                max_hp: 100,
                guild: None,
                shadow,
            },
            MapId(1),
            Cell::new(3, 4),
        )
    }

    fn monster(origin: MonsterOrigin) -> Role {
        Role::monster(
            RoleId(1_000_001),
            MonsterProfile {
                template: TemplateId(5),
                name: "Hen".to_string(),
                origin,
                footprint: 0,
            },
            MapId(1),
            Cell::new(0, 0),
        )
    }

    #[test]
    fn dead_monsters_stop_blocking_but_players_never_do() {
        let hen = monster(MonsterOrigin::Summoned);
        assert!(hen.blocks_movement());
        assert!(hen.kill());
        assert!(!hen.kill());
        assert!(!hen.blocks_movement());
        assert!(!hen.is_attackable());

        let player = character(false);
        player.kill();
        assert!(player.blocks_movement());
    }

    #[test]
    fn variant_projection_matches_kind() {
        let player = character(false);
        assert!(player.variant::<CharacterProfile>().is_some());
        assert!(player.variant::<MonsterProfile>().is_none());

        let hen = monster(MonsterOrigin::Generator(GeneratorId(3)));
        assert_eq!(hen.generator(), Some(GeneratorId(3)));
        assert_eq!(hen.footprint(), 1);
    }

    #[test]
    fn status_flags_expire_on_timer() {
        let role = character(false);
        let now = Instant::now();
        role.attach_status(1, RoleId(9), Duration::from_secs(5), now);
        role.attach_status(2, RoleId(9), Duration::ZERO, now);

        assert_eq!(role.on_timer(now + Duration::from_secs(4)), 0);
        assert_eq!(role.on_timer(now + Duration::from_secs(5)), 1);
        assert!(!role.has_status(1));
        assert!(role.has_status(2));
        assert!(role.detach_status(2));
        assert!(!role.detach_status(2));
    }

    #[test]
    fn only_owned_characters_produce_save_records() {
        let record = character(false).save_record().expect("owned player is saved");
        assert_eq!(record.account, AccountId(42));
        assert_eq!(record.cell, Cell::new(3, 4));

        assert!(character(true).save_record().is_none());
        assert!(monster(MonsterOrigin::Summoned).save_record().is_none());
    }
}
