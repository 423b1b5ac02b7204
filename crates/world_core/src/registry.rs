//! Process-wide directory of live roles.
//!
//! The registry is the single lifetime owner of every role; maps and blocks
//! only hold weak back-references. Players are additionally indexed by
//! account so duplicate logins can be rejected in O(1).
//!
//! Removal must be preceded by removal from the map holding the role.
//! [`World::despawn`](crate::world::World::despawn) performs both in order.

use crate::error::WorldError;
use crate::role::{CharacterProfile, Role, RoleVariant};
use crate::types::{AccountId, MapId, RoleId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default)]
pub struct RoleRegistry {
    roles: DashMap<RoleId, Arc<Role>>,
    accounts: DashMap<AccountId, RoleId>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a role. Fails if its identity, or for players its account,
    /// is already registered; the existing entry is left untouched.
    pub fn add(&self, role: Arc<Role>) -> Result<(), WorldError> {
        let id = role.id();
        match role.variant::<CharacterProfile>().map(|profile| profile.account) {
            Some(account) => match self.accounts.entry(account) {
                Entry::Occupied(_) => Err(WorldError::DuplicateAccount(account)),
                Entry::Vacant(account_slot) => {
                    self.insert_role(role)?;
                    account_slot.insert(id);
                    Ok(())
                }
            },
            None => self.insert_role(role),
        }
    }

    fn insert_role(&self, role: Arc<Role>) -> Result<(), WorldError> {
        match self.roles.entry(role.id()) {
            Entry::Occupied(_) => Err(WorldError::DuplicateRole(role.id())),
            Entry::Vacant(slot) => {
                trace!(role = %role.id(), "role registered");
                slot.insert(role);
                Ok(())
            }
        }
    }

    /// Removes a role and its account index entry.
    pub fn remove(&self, id: RoleId) -> Option<Arc<Role>> {
        let (_, role) = self.roles.remove(&id)?;
        if let Some(profile) = role.variant::<CharacterProfile>() {
            self.accounts.remove_if(&profile.account, |_, owner| *owner == id);
        }
        trace!(role = %id, "role deregistered");
        Some(role)
    }

    pub fn get(&self, id: RoleId) -> Option<Arc<Role>> {
        self.roles.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the role only if it is of variant `V`.
    pub fn get_as<V: RoleVariant>(&self, id: RoleId) -> Option<Arc<Role>> {
        self.get(id).filter(|role| role.variant::<V>().is_some())
    }

    pub fn contains(&self, id: RoleId) -> bool {
        self.roles.contains_key(&id)
    }

    /// Whether the account already has a character online.
    pub fn is_account_online(&self, account: AccountId) -> bool {
        self.accounts.contains_key(&account)
    }

    pub fn character_of(&self, account: AccountId) -> Option<Arc<Role>> {
        let id = *self.accounts.get(&account)?.value();
        self.get(id)
    }

    pub fn query_by_map(&self, map: MapId) -> Vec<Arc<Role>> {
        self.query(|role| role.map() == map)
    }

    pub fn query(&self, mut pred: impl FnMut(&Role) -> bool) -> Vec<Arc<Role>> {
        self.roles
            .iter()
            .filter(|entry| pred(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn player_count(&self) -> usize {
        self.accounts.len()
    }
}
