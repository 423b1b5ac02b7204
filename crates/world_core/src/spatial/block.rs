use crate::role::Role;
use crate::types::RoleId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// The set of roles inside one block.
///
/// Members are back-references only: the [`RoleRegistry`](crate::registry::RoleRegistry)
/// owns every role, the block just remembers who is here.
#[derive(Debug, Default)]
pub struct GameBlock {
    members: DashMap<RoleId, Weak<Role>>,
    players: AtomicUsize,
}

impl GameBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a role. Returns `false` if it was already a member.
    pub fn add(&self, role: &Arc<Role>) -> bool {
        let inserted = self
            .members
            .insert(role.id(), Arc::downgrade(role))
            .is_none();
        if inserted && role.is_player() {
            self.players.fetch_add(1, Ordering::AcqRel);
        }
        inserted
    }

    /// Removes a role. Returns `false` if it was not a member.
    pub fn remove(&self, role: &Role) -> bool {
        let removed = self.members.remove(&role.id()).is_some();
        if removed && role.is_player() {
            let _ = self
                .players
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
        removed
    }

    pub fn contains(&self, id: RoleId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of players in the block.
    pub fn player_count(&self) -> usize {
        self.players.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Live members of the block.
    pub fn roles(&self) -> Vec<Arc<Role>> {
        self.members
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    /// Returns true if any live member satisfies `pred`.
    pub fn any(&self, mut pred: impl FnMut(&Role) -> bool) -> bool {
        self.members
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .any(|role| pred(&role))
    }
}
