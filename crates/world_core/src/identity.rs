//! Pooled identity issuance.
//!
//! Each entity category owns an inclusive numeric range. The allocator keeps
//! every free value in a lock-free queue, so two threads can never dequeue the
//! same identity. The Game and AI processes are configured with disjoint
//! ranges and therefore never mint colliding identities, which removes the
//! need for a central identity authority.

use crate::config::CategoryRanges;
use crate::types::RoleId;
use crossbeam::queue::SegQueue;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Entity categories that mint identities from a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityCategory {
    Monster,
    MapItem,
    Furniture,
    Trap,
    Pet,
}

impl IdentityCategory {
    pub const ALL: [IdentityCategory; 5] = [
        IdentityCategory::Monster,
        IdentityCategory::MapItem,
        IdentityCategory::Furniture,
        IdentityCategory::Trap,
        IdentityCategory::Pet,
    ];
}

impl fmt::Display for IdentityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityCategory::Monster => "monster",
            IdentityCategory::MapItem => "map_item",
            IdentityCategory::Furniture => "furniture",
            IdentityCategory::Trap => "trap",
            IdentityCategory::Pet => "pet",
        };
        f.write_str(name)
    }
}

/// Inclusive `[min, max]` identity range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRange {
    pub min: u32,
    pub max: u32,
}

impl IdentityRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, id: u32) -> bool {
        id >= self.min && id <= self.max
    }

    pub fn overlaps(&self, other: &IdentityRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }

    /// Number of identities in the range.
    pub fn len(&self) -> usize {
        if self.min > self.max {
            0
        } else {
            (self.max - self.min) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pool of free identities for one category.
///
/// An identity is either free (queued) or issued. Returning an identity that
/// is already queued, or that lies outside the range, is a no-op.
#[derive(Debug)]
pub struct IdentityAllocator {
    category: IdentityCategory,
    range: IdentityRange,
    free: SegQueue<u32>,
    queued: DashSet<u32>,
}

impl IdentityAllocator {
    /// Creates an allocator pre-filled with every value of `range`.
    pub fn new(category: IdentityCategory, range: IdentityRange) -> Self {
        let free = SegQueue::new();
        let queued = DashSet::with_capacity(range.len());
        if !range.is_empty() {
            for id in range.min..=range.max {
                free.push(id);
                queued.insert(id);
            }
        }
        debug!(%category, min = range.min, max = range.max, "identity pool ready");
        Self {
            category,
            range,
            free,
            queued,
        }
    }

    pub fn category(&self) -> IdentityCategory {
        self.category
    }

    pub fn range(&self) -> IdentityRange {
        self.range
    }

    /// Issues the next free identity, or `None` once the pool is exhausted.
    pub fn next(&self) -> Option<RoleId> {
        let id = self.free.pop()?;
        self.queued.remove(&id);
        trace!(category = %self.category, id, "identity issued");
        Some(RoleId(id))
    }

    /// Returns an identity to the pool.
    ///
    /// Returns `true` if the identity was queued again, `false` if it was
    /// already free or does not belong to this pool.
    pub fn release(&self, id: RoleId) -> bool {
        if !self.range.contains(id.0) {
            return false;
        }
        if !self.queued.insert(id.0) {
            trace!(category = %self.category, id = id.0, "identity already free, ignoring return");
            return false;
        }
        self.free.push(id.0);
        true
    }

    /// Number of identities currently available.
    pub fn remaining(&self) -> usize {
        self.free.len()
    }
}

/// The five per-category allocators of one process.
#[derive(Debug)]
pub struct IdentityPools {
    monster: IdentityAllocator,
    map_item: IdentityAllocator,
    furniture: IdentityAllocator,
    trap: IdentityAllocator,
    pet: IdentityAllocator,
}

impl IdentityPools {
    pub fn new(ranges: &CategoryRanges) -> Self {
        Self {
            monster: IdentityAllocator::new(IdentityCategory::Monster, ranges.monster),
            map_item: IdentityAllocator::new(IdentityCategory::MapItem, ranges.map_item),
            furniture: IdentityAllocator::new(IdentityCategory::Furniture, ranges.furniture),
            trap: IdentityAllocator::new(IdentityCategory::Trap, ranges.trap),
            pet: IdentityAllocator::new(IdentityCategory::Pet, ranges.pet),
        }
    }

    pub fn get(&self, category: IdentityCategory) -> &IdentityAllocator {
        match category {
            IdentityCategory::Monster => &self.monster,
            IdentityCategory::MapItem => &self.map_item,
            IdentityCategory::Furniture => &self.furniture,
            IdentityCategory::Trap => &self.trap,
            IdentityCategory::Pet => &self.pet,
        }
    }

    pub fn next(&self, category: IdentityCategory) -> Option<RoleId> {
        self.get(category).next()
    }

    /// Returns `id` to whichever local pool owns its range.
    ///
    /// Identities minted by the peer process fall outside every local range
    /// and are ignored.
    pub fn release(&self, id: RoleId) -> bool {
        IdentityCategory::ALL
            .iter()
            .map(|category| self.get(*category))
            .find(|allocator| allocator.range().contains(id.0))
            .map(|allocator| allocator.release(id))
            .unwrap_or(false)
    }

    /// Category owning `id` in this process, if any.
    pub fn category_of(&self, id: RoleId) -> Option<IdentityCategory> {
        IdentityCategory::ALL
            .into_iter()
            .find(|category| self.get(*category).range().contains(id.0))
    }
}
