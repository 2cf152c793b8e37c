//! Map catalog interface
//!
//! The veto works with opaque map ids only. Command handlers consult a
//! catalog to resolve user input to ids and to list the pool a veto runs on.

use crate::types::MapId;
use serde::{Deserialize, Serialize};

/// The seven-map competitive pool used when nothing else is configured
pub const DEFAULT_MAP_POOL: [&str; 7] = [
    "ASCENT", "BIND", "HAVEN", "SPLIT", "FRACTURE", "LOTUS", "PEARL",
];

/// A map in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameMap {
    pub id: MapId,
    pub name: String,
}

impl GameMap {
    pub fn new(id: impl Into<MapId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Source of the active map pool
pub trait MapCatalog: Send + Sync {
    /// Maps currently enabled for play
    fn active_maps(&self) -> Vec<GameMap>;

    /// Look a map up by display name, ignoring case
    fn by_name(&self, name: &str) -> Option<GameMap>;
}

/// In-memory catalog with a fixed list of maps
#[derive(Debug, Clone)]
pub struct StaticMapCatalog {
    maps: Vec<GameMap>,
    disabled: Vec<MapId>,
}

impl StaticMapCatalog {
    /// Catalog seeded with [`DEFAULT_MAP_POOL`]
    pub fn new() -> Self {
        let maps = DEFAULT_MAP_POOL
            .iter()
            .map(|id| GameMap::new(*id, title_case(id)))
            .collect();
        Self::with_maps(maps)
    }

    pub fn with_maps(maps: Vec<GameMap>) -> Self {
        Self {
            maps,
            disabled: Vec::new(),
        }
    }

    /// Take a map out of rotation without forgetting it
    pub fn disable(&mut self, map_id: &str) {
        if !self.disabled.iter().any(|id| id == map_id) {
            self.disabled.push(map_id.to_string());
        }
    }
}

impl Default for StaticMapCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MapCatalog for StaticMapCatalog {
    fn active_maps(&self) -> Vec<GameMap> {
        self.maps
            .iter()
            .filter(|m| !self.disabled.contains(&m.id))
            .cloned()
            .collect()
    }

    fn by_name(&self, name: &str) -> Option<GameMap> {
        let needle = name.trim();
        self.maps
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(needle) || m.id.eq_ignore_ascii_case(needle))
            .cloned()
    }
}

pub(crate) fn title_case(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
