//! Monster generators.
//!
//! A generator owns a rectangle on one map and keeps it stocked with
//! monsters of one template. The registry buckets generators by the
//! partition of their map and drives the periodic spawn tick; the actual
//! spawning runs as partition work so spawns on one map never race.

mod descriptor;
mod registry;
mod spawner;

pub use descriptor::{GeneratorDescriptor, MonsterTemplate};
pub use registry::GeneratorRegistry;
pub use spawner::Generator;
