use crate::types::{GeneratorId, MapId, Rect, TemplateId};
use serde::{Deserialize, Serialize};

/// Generator definition as loaded from the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorDescriptor {
    pub id: GeneratorId,
    pub map: MapId,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub template: TemplateId,
    /// Population cap; 0 marks an uncapped, decorative generator
    pub max_per_gen: u32,
    /// Respawn delay in seconds, raised to the configured minimum
    pub rest_secs: u64,
}

impl GeneratorDescriptor {
    pub fn bounds(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

/// Static data shared by every monster of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterTemplate {
    pub id: TemplateId,
    pub name: String,
    #[serde(default = "default_footprint")]
    pub footprint: u8,
    #[serde(default = "default_level")]
    pub level: u16,
    #[serde(default)]
    pub hp: u32,
}

fn default_footprint() -> u8 {
    1
}

fn default_level() -> u16 {
    1
}
