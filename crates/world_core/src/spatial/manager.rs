use super::map::GameMap;
use crate::error::WorldError;
use crate::types::MapId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Directory of loaded maps, static and dynamic.
#[derive(Debug, Default)]
pub struct MapManager {
    maps: DashMap<MapId, Arc<GameMap>>,
}

impl MapManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a map. Fails if the identity is already taken.
    pub fn insert(&self, map: GameMap) -> Result<Arc<GameMap>, WorldError> {
        match self.maps.entry(map.id()) {
            Entry::Occupied(_) => Err(WorldError::DuplicateMap(map.id())),
            Entry::Vacant(slot) => {
                let map = Arc::new(map);
                info!(
                    map = %map.id(),
                    name = map.name(),
                    width = map.width(),
                    height = map.height(),
                    partition = %map.partition(),
                    "🗺️ Map loaded"
                );
                slot.insert(map.clone());
                Ok(map)
            }
        }
    }

    pub fn get(&self, id: MapId) -> Option<Arc<GameMap>> {
        self.maps.get(&id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: MapId) -> Option<Arc<GameMap>> {
        self.maps.remove(&id).map(|(_, map)| map)
    }

    pub fn contains(&self, id: MapId) -> bool {
        self.maps.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<GameMap>> {
        self.maps.iter().map(|entry| entry.value().clone()).collect()
    }
}
