//! Factory functions wiring a link endpoint to a TCP connection manager.

use crate::ai::{AiLink, NpcBrain};
use crate::config::LinkConfig;
use crate::connection::ConnectionManager;
use crate::game::GameLink;
use std::sync::Arc;
use world_core::World;

/// Creates the Game-process endpoint backed by a fresh connection manager.
///
/// # Example
///
/// ```rust
/// # use std::sync::Arc;
/// # use world_core::{ProcessSide, SystemClock, World, WorldConfig};
/// use sync_link::{create_game_link, LinkConfig};
///
/// let world = Arc::new(World::new(WorldConfig::default(), ProcessSide::Game, Arc::new(SystemClock::new())));
/// let (link, connections) = create_game_link(world, LinkConfig::default());
/// assert!(!link.peer().is_linked());
/// assert_eq!(connections.connection_count(), 0);
/// ```
pub fn create_game_link(world: Arc<World>, config: LinkConfig) -> (Arc<GameLink>, Arc<ConnectionManager>) {
    let connections = Arc::new(ConnectionManager::new());
    let link = GameLink::new(world, config, connections.clone());
    (link, connections)
}

/// Creates the AI-process endpoint backed by a fresh connection manager.
pub fn create_ai_link(
    world: Arc<World>,
    config: LinkConfig,
    brain: Arc<dyn NpcBrain>,
) -> (Arc<AiLink>, Arc<ConnectionManager>) {
    let connections = Arc::new(ConnectionManager::new());
    let link = AiLink::new(world, config, connections.clone(), brain);
    (link, connections)
}
