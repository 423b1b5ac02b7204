//! Error types for world operations.
//!
//! Resolution failures and protocol-level rejections are represented here.
//! Capacity exhaustion (empty identity pool, generator at its cap) is not an
//! error and never shows up as one.

use crate::types::{AccountId, Cell, GeneratorId, MapId, RoleId, TemplateId};

/// Errors raised by the world model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    /// A referenced map is not loaded
    #[error("map {0} not found")]
    MapNotFound(MapId),

    /// A referenced monster template does not exist
    #[error("monster template {0} not found")]
    TemplateNotFound(TemplateId),

    /// A referenced generator does not exist
    #[error("generator {0} not found")]
    GeneratorNotFound(GeneratorId),

    /// A referenced role is not registered
    #[error("role {0} not found")]
    RoleNotFound(RoleId),

    /// The identity is already present in the role registry
    #[error("role {0} is already registered")]
    DuplicateRole(RoleId),

    /// The account already has a character online
    #[error("account {0} is already online")]
    DuplicateAccount(AccountId),

    /// A map with this identity is already loaded
    #[error("map {0} already exists")]
    DuplicateMap(MapId),

    /// The cell lies outside the map
    #[error("cell {cell} is outside map {map}")]
    OutOfBounds { map: MapId, cell: Cell },

    /// Runtime map operations are only allowed on dynamic maps
    #[error("map {0} is not a dynamic map")]
    NotDynamic(MapId),

    /// Players are on a dynamic map being removed and there is nowhere to put them
    #[error("map {0} still has players and no fallback map is configured")]
    MapOccupied(MapId),

    /// The configured fallback cell cannot take evacuated players
    #[error("fallback cell {cell} on map {map} is not standable")]
    UnusableFallback { map: MapId, cell: Cell },

    /// The repository could not load or store data
    #[error("repository error: {0}")]
    Repository(String),

    /// Anything that should not happen but must not take the process down
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorldError {
    /// Whether the failure comes from an unresolved reference.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            WorldError::MapNotFound(_)
                | WorldError::RoleNotFound(_)
                | WorldError::TemplateNotFound(_)
                | WorldError::GeneratorNotFound(_)
        )
    }
}
