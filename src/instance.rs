//! Instance configuration: a named scan strategy bound to geofences and
//! level bounds.
//!
//! Instances are created and edited by an external admin layer; this
//! module only models what the dispatch engine needs to build a live
//! controller from one. Any change to the underlying entity must go
//! through a controller rebuild (`reload` or registry replacement).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::Coordinate;

/// Scan strategy implemented by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    CirclePokemon,
    DynamicRoute,
    CircleRaid,
    SmartRaid,
    AutoQuest,
    PokemonIv,
    Bootstrap,
    FindTth,
    Leveling,
    Custom,
}

/// Quest completion mode for [`InstanceKind::AutoQuest`] instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestMode {
    #[default]
    Normal,
    Alternative,
    /// Scan normal quests first, then switch to alternative.
    Both,
}

/// Free-form per-instance configuration blob.
///
/// Admin layers store this as JSON; unknown knobs are ignored and missing
/// ones take their defaults, so older stored blobs keep deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct InstanceData {
    /// S2 level used to derive scan coordinates from the geofence.
    pub s2_cell_level: Option<u8>,
    /// Upper bound on covering cells per geofence.
    pub max_cells: Option<usize>,
    /// Run the route optimizer over the coordinate set (circle variants).
    pub optimize_route: Option<bool>,
    /// Quest completion mode (auto-quest instances).
    pub quest_mode: Option<QuestMode>,
    /// Spins after which a leveling account is rotated out.
    pub spin_limit: Option<u32>,
    /// Cooldown ceiling override, seconds.
    pub cooldown_limit_secs: Option<u64>,
    /// Per-key history bound for XP tracking (leveling instances).
    pub xp_window: Option<usize>,
    /// Pending-queue bound for IV instances.
    pub iv_queue_limit: Option<usize>,
}

impl InstanceData {
    pub fn s2_cell_level(&self) -> u8 {
        self.s2_cell_level.unwrap_or(15)
    }

    pub fn max_cells(&self) -> usize {
        self.max_cells.unwrap_or(2048)
    }

    pub fn optimize_route(&self) -> bool {
        self.optimize_route.unwrap_or(true)
    }

    pub fn quest_mode(&self) -> QuestMode {
        self.quest_mode.unwrap_or_default()
    }

    pub fn spin_limit(&self) -> u32 {
        self.spin_limit.unwrap_or(1000)
    }

    pub fn xp_window(&self) -> usize {
        self.xp_window.unwrap_or(400)
    }

    pub fn iv_queue_limit(&self) -> usize {
        self.iv_queue_limit.unwrap_or(100)
    }
}

/// A named scan configuration, as supplied by the instance store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub kind: InstanceKind,
    pub min_level: u8,
    pub max_level: u8,
    pub geofence_names: Vec<String>,
    #[serde(default)]
    pub data: InstanceData,
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>, kind: InstanceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            min_level: 0,
            max_level: 50,
            geofence_names: Vec::new(),
            data: InstanceData::default(),
        }
    }
}

/// External geofence repository collaborator: raw polygon vertex lists per
/// named geofence.
pub trait GeofenceStore: Send + Sync {
    /// Polygons for a named geofence; `Ok(None)` when unknown.
    fn polygons(&self, name: &str) -> Result<Option<Vec<Vec<Coordinate>>>>;
}

/// In-memory [`GeofenceStore`] for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryGeofenceStore {
    fences: std::sync::Mutex<std::collections::HashMap<String, Vec<Vec<Coordinate>>>>,
}

impl MemoryGeofenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, polygons: Vec<Vec<Coordinate>>) {
        self.fences
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), polygons);
    }
}

impl GeofenceStore for MemoryGeofenceStore {
    fn polygons(&self, name: &str) -> Result<Option<Vec<Vec<Coordinate>>>> {
        Ok(self
            .fences
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned())
    }
}
