//! Repository collaborator.
//!
//! The core never talks to a database directly. It loads its static data
//! and saves player snapshots through [`WorldRepository`]. Two
//! implementations ship with the crate: a JSON directory reader for running
//! the servers standalone and an in-memory one for tests.

use crate::error::WorldError;
use crate::generator::{GeneratorDescriptor, MonsterTemplate};
use crate::role::SaveRecord;
use crate::spatial::MapDescriptor;
use crate::utils::lock;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

pub const MAPS_FILE: &str = "maps.json";
pub const GENERATORS_FILE: &str = "generators.json";
pub const MONSTERS_FILE: &str = "monsters.json";
pub const SAVES_DIR: &str = "saves";

/// Load/save capability consumed by the world.
#[async_trait]
pub trait WorldRepository: Send + Sync {
    async fn load_map_list(&self) -> Result<Vec<MapDescriptor>, WorldError>;

    async fn load_generators(&self) -> Result<Vec<GeneratorDescriptor>, WorldError>;

    async fn load_monster_templates(&self) -> Result<Vec<MonsterTemplate>, WorldError>;

    async fn save(&self, record: &SaveRecord) -> Result<(), WorldError>;
}

/// Reads `maps.json`, `generators.json` and `monsters.json` from a data
/// directory and writes player snapshots to `saves/<role>.json`.
///
/// A missing file loads as an empty list.
#[derive(Debug, Clone)]
pub struct JsonRepository {
    root: PathBuf,
}

impl JsonRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn load_list<T: DeserializeOwned>(&self, file: &str) -> Result<Vec<T>, WorldError> {
        let path = self.root.join(file);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "data file missing, loading nothing");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(WorldError::Repository(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let items: Vec<T> = serde_json::from_str(&text).map_err(|e| {
            WorldError::Repository(format!("failed to parse {}: {}", path.display(), e))
        })?;
        info!("📂 Loaded {} entries from {}", items.len(), path.display());
        Ok(items)
    }
}

#[async_trait]
impl WorldRepository for JsonRepository {
    async fn load_map_list(&self) -> Result<Vec<MapDescriptor>, WorldError> {
        self.load_list(MAPS_FILE).await
    }

    async fn load_generators(&self) -> Result<Vec<GeneratorDescriptor>, WorldError> {
        self.load_list(GENERATORS_FILE).await
    }

    async fn load_monster_templates(&self) -> Result<Vec<MonsterTemplate>, WorldError> {
        self.load_list(MONSTERS_FILE).await
    }

    async fn save(&self, record: &SaveRecord) -> Result<(), WorldError> {
        let dir = self.root.join(SAVES_DIR);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorldError::Repository(format!("failed to create {}: {}", dir.display(), e)))?;
        let body = serde_json::to_vec_pretty(record)
            .map_err(|e| WorldError::Repository(format!("failed to encode save record: {e}")))?;
        let path = dir.join(format!("{}.json", record.role));
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| WorldError::Repository(format!("failed to write {}: {}", path.display(), e)))?;
        debug!(role = %record.role, path = %path.display(), "player saved");
        Ok(())
    }
}

/// In-memory repository.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    maps: Vec<MapDescriptor>,
    generators: Vec<GeneratorDescriptor>,
    templates: Vec<MonsterTemplate>,
    saved: Mutex<Vec<SaveRecord>>,
}

impl MemoryRepository {
    pub fn new(
        maps: Vec<MapDescriptor>,
        generators: Vec<GeneratorDescriptor>,
        templates: Vec<MonsterTemplate>,
    ) -> Self {
        Self {
            maps,
            generators,
            templates,
            saved: Mutex::new(Vec::new()),
        }
    }

    /// Every record passed to [`WorldRepository::save`] so far.
    pub fn saved(&self) -> Vec<SaveRecord> {
        lock(&self.saved).clone()
    }
}

#[async_trait]
impl WorldRepository for MemoryRepository {
    async fn load_map_list(&self) -> Result<Vec<MapDescriptor>, WorldError> {
        Ok(self.maps.clone())
    }

    async fn load_generators(&self) -> Result<Vec<GeneratorDescriptor>, WorldError> {
        Ok(self.generators.clone())
    }

    async fn load_monster_templates(&self) -> Result<Vec<MonsterTemplate>, WorldError> {
        Ok(self.templates.clone())
    }

    async fn save(&self, record: &SaveRecord) -> Result<(), WorldError> {
        lock(&self.saved).push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, Cell, MapId, RoleId};
    use tempfile::TempDir;

    #[tokio::test]
    async fn json_repository_reads_data_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(MAPS_FILE),
            r#"[{ "id": 1, "name": "Twin City", "width": 100, "height": 80, "blocked": [{ "x": 2, "y": 3 }] }]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join(GENERATORS_FILE),
            r#"[{ "id": 5, "map": 1, "x": 0, "y": 0, "width": 10, "height": 10,
                  "template": 9, "max_per_gen": 5, "rest_secs": 30 }]"#,
        )
        .unwrap();

        let repo = JsonRepository::new(dir.path());
        let maps = repo.load_map_list().await.unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].id, MapId(1));
        assert_eq!(maps[0].blocked, vec![Cell::new(2, 3)]);

        let generators = repo.load_generators().await.unwrap();
        assert_eq!(generators[0].max_per_gen, 5);

        assert!(repo.load_monster_templates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_a_repository_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MONSTERS_FILE), "{ not json").unwrap();
        let err = JsonRepository::new(dir.path())
            .load_monster_templates()
            .await
            .unwrap_err();
        assert!(matches!(err, WorldError::Repository(_)));
    }

    #[tokio::test]
    async fn json_repository_writes_save_records() {
        let dir = TempDir::new().unwrap();
        let repo = JsonRepository::new(dir.path());
        let record = SaveRecord {
            role: RoleId(7),
            account: AccountId(42),
            name: "Ayla".into(),
            map: MapId(1),
            cell: Cell::new(4, 5),
            level: 3,
            hp: 20,
        };
        repo.save(&record).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join(SAVES_DIR).join("7.json")).unwrap();
        let loaded: SaveRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, record);
    }
}
