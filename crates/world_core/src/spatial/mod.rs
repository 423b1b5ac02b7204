//! Block-partitioned map model.
//!
//! Each map is carved into square blocks (18×18 cells by default). A role is
//! always a member of exactly the block containing its cell, so proximity
//! queries only ever look at the 3×3 blocks around a point instead of the
//! whole map population.

mod block;
mod manager;
mod map;

pub use block::GameBlock;
pub use manager::MapManager;
pub use map::{GameMap, MapDescriptor, NEIGHBOR_OFFSETS};
