//! # World Core
//!
//! The world-simulation core shared by the Game and AI processes of the
//! server backend.
//!
//! ## Core Features
//!
//! - **Spatial Map**: maps carved into 18×18 blocks so proximity queries only
//!   touch the 3×3 blocks around a point
//! - **Identity Pools**: lock-free per-category identity allocation over
//!   ranges that are disjoint between the two processes
//! - **Generators**: bounded spawn regions with population caps and respawn
//!   cooldowns, skipped entirely on maps nobody is on
//! - **Partitioned Processor**: strictly ordered execution lanes, one per map
//!   group, running in parallel with each other
//! - **Role Registry**: the lifetime owner of every live role, with an
//!   account index for duplicate-login checks
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use world_core::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let world = Arc::new(World::new(
//!         WorldConfig::default(),
//!         ProcessSide::Ai,
//!         Arc::new(SystemClock::new()),
//!     ));
//!     world.load(&JsonRepository::new("data")).await?;
//!     world.start();
//!
//!     let scheduler = Scheduler::new(ShutdownState::new());
//!     let ticking = world.clone();
//!     scheduler.register(scheduler::GENERATOR_TICK, std::time::Duration::from_secs(1), move || {
//!         let world = ticking.clone();
//!         Box::pin(async move {
//!             world.tick_generators();
//!             Ok(())
//!         })
//!     });
//!     scheduler.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.stop().await;
//!     world.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod generator;
pub mod identity;
pub mod persistence;
pub mod processor;
pub mod registry;
pub mod role;
pub mod scheduler;
pub mod shutdown;
pub mod spatial;
pub mod types;
pub mod utils;
pub mod world;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CategoryRanges, IdentitySettings, WorldConfig, DEFAULT_BLOCK_SIZE, DEFAULT_GENERATOR_BATCH_CAP,
    DYNAMIC_MAP_THRESHOLD, MIN_REST_SECS,
};
pub use error::WorldError;
pub use generator::{Generator, GeneratorDescriptor, GeneratorRegistry, MonsterTemplate};
pub use identity::{IdentityAllocator, IdentityCategory, IdentityPools, IdentityRange};
pub use persistence::{JsonRepository, MemoryRepository, WorldRepository};
pub use processor::{PartitionedProcessor, Work};
pub use registry::RoleRegistry;
pub use role::{
    CharacterProfile, MonsterOrigin, MonsterProfile, NpcProfile, Role, RoleKind, RoleVariant,
    SaveRecord, StatusEffect, StatusFlag,
};
pub use scheduler::Scheduler;
pub use shutdown::ShutdownState;
pub use spatial::{GameBlock, GameMap, MapDescriptor, MapManager, NEIGHBOR_OFFSETS};
pub use types::{AccountId, Cell, GeneratorId, MapId, PartitionId, ProcessSide, Rect, RoleId, TemplateId};
pub use world::{
    ChangeSource, LoadSummary, MonsterSpawn, RoleTickSummary, StatusChange, World, WorldObserver,
};
