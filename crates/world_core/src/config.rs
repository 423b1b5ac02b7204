//! World configuration types and defaults.
//!
//! These are the knobs surfaced to the core: block size, generator pacing,
//! partition count and the per-category identity ranges of both processes.

use crate::identity::{IdentityCategory, IdentityRange};
use crate::types::{Cell, MapId, ProcessSide};
use serde::{Deserialize, Serialize};

/// Edge length of a spatial block in cells.
pub const DEFAULT_BLOCK_SIZE: i32 = 18;

/// Upper bound on spawn closures one generator submits per tick.
pub const DEFAULT_GENERATOR_BATCH_CAP: usize = 15;

/// Floor applied to every generator's respawn delay.
pub const MIN_REST_SECS: u64 = 10;

/// Map identities above this value are dynamic (instance) maps.
pub const DYNAMIC_MAP_THRESHOLD: u32 = 999_999;

/// Size of each default identity range.
const DEFAULT_RANGE_SPAN: u32 = 50_000;

/// Configuration of the world core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Edge length of a block in cells
    #[serde(default = "default_block_size")]
    pub block_size: i32,

    /// Maximum spawns a single generator submits per tick
    #[serde(default = "default_batch_cap")]
    pub generator_batch_cap: usize,

    /// Minimum respawn delay in seconds; smaller `rest_secs` values are raised to this
    #[serde(default = "default_min_rest_secs")]
    pub min_rest_secs: u64,

    /// Number of processor partitions (0 means one per CPU core)
    #[serde(default)]
    pub partition_count: usize,

    /// Whether this process runs generator ticks
    #[serde(default = "default_true")]
    pub generators_enabled: bool,

    /// Identity ranges for both processes
    #[serde(default)]
    pub identity: IdentitySettings,

    /// Fixed seed for spawn-point selection; drawn from entropy when unset
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Where players go when the dynamic map they stand on is removed
    #[serde(default)]
    pub fallback_map: Option<MapId>,

    #[serde(default = "default_fallback_cell")]
    pub fallback_cell: Cell,
}

/// Identity ranges of both processes. Every range must be disjoint from
/// every other so that independently minted identities never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    pub game: CategoryRanges,
    pub ai: CategoryRanges,
}

/// One inclusive range per identity category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRanges {
    pub monster: IdentityRange,
    pub map_item: IdentityRange,
    pub furniture: IdentityRange,
    pub trap: IdentityRange,
    pub pet: IdentityRange,
}

fn default_block_size() -> i32 {
    DEFAULT_BLOCK_SIZE
}

fn default_batch_cap() -> usize {
    DEFAULT_GENERATOR_BATCH_CAP
}

fn default_min_rest_secs() -> u64 {
    MIN_REST_SECS
}

fn default_true() -> bool {
    true
}

fn default_fallback_cell() -> Cell {
    Cell::new(0, 0)
}

impl CategoryRanges {
    /// Returns the range configured for `category`.
    pub fn get(&self, category: IdentityCategory) -> IdentityRange {
        match category {
            IdentityCategory::Monster => self.monster,
            IdentityCategory::MapItem => self.map_item,
            IdentityCategory::Furniture => self.furniture,
            IdentityCategory::Trap => self.trap,
            IdentityCategory::Pet => self.pet,
        }
    }

    fn stacked(offset: u32) -> Self {
        let range = |base: u32| IdentityRange::new(base + offset, base + offset + DEFAULT_RANGE_SPAN - 1);
        Self {
            monster: range(1_000_000),
            map_item: range(2_000_000),
            furniture: range(3_000_000),
            trap: range(4_000_000),
            pet: range(5_000_000),
        }
    }
}

impl IdentitySettings {
    /// Returns the ranges this process mints from.
    pub fn for_side(&self, side: ProcessSide) -> &CategoryRanges {
        match side {
            ProcessSide::Game => &self.game,
            ProcessSide::Ai => &self.ai,
        }
    }
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            game: CategoryRanges::stacked(0),
            ai: CategoryRanges::stacked(DEFAULT_RANGE_SPAN),
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            generator_batch_cap: DEFAULT_GENERATOR_BATCH_CAP,
            min_rest_secs: MIN_REST_SECS,
            partition_count: 0,
            generators_enabled: true,
            identity: IdentitySettings::default(),
            rng_seed: None,
            fallback_map: None,
            fallback_cell: default_fallback_cell(),
        }
    }
}

impl WorldConfig {
    /// Resolved number of partitions.
    pub fn effective_partition_count(&self) -> usize {
        if self.partition_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.partition_count
        }
    }

    /// Validates block size, pacing and identity range layout.
    pub fn validate(&self) -> Result<(), String> {
        if self.block_size <= 0 {
            return Err("world.block_size must be greater than 0".to_string());
        }
        if self.generator_batch_cap == 0 {
            return Err("world.generator_batch_cap must be greater than 0".to_string());
        }
        if self.min_rest_secs == 0 {
            return Err("world.min_rest_secs must be greater than 0".to_string());
        }
        if self.fallback_map.is_some_and(|map| map.0 > DYNAMIC_MAP_THRESHOLD) {
            return Err("world.fallback_map must be a static map".to_string());
        }

        let mut ranges = Vec::with_capacity(IdentityCategory::ALL.len() * 2);
        for side in [ProcessSide::Game, ProcessSide::Ai] {
            for category in IdentityCategory::ALL {
                let range = self.identity.for_side(side).get(category);
                if range.min > range.max {
                    return Err(format!(
                        "identity range for {side} {category} is empty ({}..={})",
                        range.min, range.max
                    ));
                }
                ranges.push((side, category, range));
            }
        }

        for (i, (side_a, cat_a, a)) in ranges.iter().enumerate() {
            for (side_b, cat_b, b) in &ranges[i + 1..] {
                if a.overlaps(b) {
                    return Err(format!(
                        "identity range {side_a} {cat_a} overlaps {side_b} {cat_b}"
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = WorldConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size, 18);
        assert_eq!(config.generator_batch_cap, 15);
        assert_eq!(config.min_rest_secs, 10);
    }

    #[test]
    fn default_ranges_are_disjoint_between_sides() {
        let identity = IdentitySettings::default();
        for category in IdentityCategory::ALL {
            let game = identity.game.get(category);
            let ai = identity.ai.get(category);
            assert!(!game.overlaps(&ai), "{category} ranges overlap");
        }
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let mut config = WorldConfig::default();
        config.identity.ai.monster = config.identity.game.monster;
        let err = config.validate().unwrap_err();
        assert!(err.contains("overlaps"));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut config = WorldConfig::default();
        config.block_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partition_count_zero_uses_cores() {
        let config = WorldConfig::default();
        assert!(config.effective_partition_count() >= 1);

        let config = WorldConfig { partition_count: 3, ..WorldConfig::default() };
        assert_eq!(config.effective_partition_count(), 3);
    }
}
