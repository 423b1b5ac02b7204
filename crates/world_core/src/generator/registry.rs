use super::spawner::Generator;
use crate::processor::{PartitionedProcessor, Work};
use crate::types::{GeneratorId, MapId, PartitionId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Generators keyed by identity and bucketed by the partition of their map.
#[derive(Debug, Default)]
pub struct GeneratorRegistry {
    by_id: DashMap<GeneratorId, Arc<Generator>>,
    by_partition: DashMap<PartitionId, Vec<Arc<Generator>>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a generator. Returns `false` if the identity is already taken.
    pub fn insert(&self, generator: Generator) -> bool {
        let id = generator.id();
        if self.by_id.contains_key(&id) {
            warn!(generator = %id, "duplicate generator ignored");
            return false;
        }
        let generator = Arc::new(generator);
        self.by_id.insert(id, generator.clone());
        self.by_partition
            .entry(generator.partition())
            .or_default()
            .push(generator);
        true
    }

    pub fn get(&self, id: GeneratorId) -> Option<Arc<Generator>> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    /// Drops every generator bound to `map`.
    pub fn remove_map(&self, map: MapId) -> Vec<Arc<Generator>> {
        let removed: Vec<_> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().map_id() == map)
            .map(|entry| entry.value().clone())
            .collect();
        for generator in &removed {
            self.by_id.remove(&generator.id());
            if let Some(mut bucket) = self.by_partition.get_mut(&generator.partition()) {
                bucket.retain(|g| g.id() != generator.id());
            }
        }
        removed
    }

    pub fn in_partition(&self, partition: PartitionId) -> Vec<Arc<Generator>> {
        self.by_partition
            .get(&partition)
            .map(|bucket| bucket.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn processable_count(&self) -> usize {
        self.by_id
            .iter()
            .filter(|entry| entry.value().is_processable())
            .count()
    }

    /// Ticks every generator and submits one spawn closure per reserved
    /// slot to the generator's partition. Returns the number submitted.
    ///
    /// Spawns for one map are serialized on its partition; different maps
    /// spawn in parallel.
    pub fn tick<F>(&self, now: Instant, processor: &PartitionedProcessor, spawn: F) -> usize
    where
        F: Fn(Arc<Generator>) -> Work,
    {
        let buckets: Vec<_> = self
            .by_partition
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut submitted = 0;
        for generator in buckets.into_iter().flatten() {
            if !generator.is_processable() {
                continue;
            }
            let slots = generator.begin_tick(now);
            for _ in 0..slots {
                if processor.queue(generator.partition(), spawn(generator.clone())) {
                    submitted += 1;
                } else {
                    generator.abort_spawn();
                }
            }
        }
        if submitted > 0 {
            debug!(submitted, "generator tick submitted spawns");
        }
        submitted
    }
}
