//! Core entity types shared across all modules.
//!
//! Entities are plain immutable snapshots: the store owns the persisted copy,
//! the bus hands out clones, and nobody mutates a delivered value in place.
//! Modifications work on a private working copy and build a fresh value.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// Sector coordinate of a star on the galaxy map.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize, Default)]
pub struct SectorCoord {
    pub x: i64,
    pub y: i64,
}

impl SectorCoord {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl std::fmt::Display for SectorCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Empires
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmpireState {
    #[default]
    Active,
    Inactive,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Empire {
    pub id: i64,
    pub display_name: String,
    #[serde(default)]
    pub state: EmpireState,
}

impl Empire {
    pub fn new(id: i64, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            state: EmpireState::Active,
        }
    }
}

// ---------------------------------------------------------------------------
// Stars and their sub-entities
// ---------------------------------------------------------------------------

/// Share of a colony's output assigned to each sector of its economy.
/// The four values should sum to 1.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Focus {
    pub population: f32,
    pub farming: f32,
    pub mining: f32,
    pub energy: f32,
}

impl Focus {
    pub fn total(&self) -> f32 {
        self.population + self.farming + self.mining + self.energy
    }
}

impl Default for Focus {
    fn default() -> Self {
        Self {
            population: 0.25,
            farming: 0.25,
            mining: 0.25,
            energy: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildRequest {
    pub id: i64,
    pub design: String,
    pub count: u32,
    /// 0.0 – 1.0
    pub progress: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Colony {
    pub empire_id: i64,
    pub population: f32,
    #[serde(default)]
    pub focus: Focus,
    #[serde(default)]
    pub build_requests: Vec<BuildRequest>,
}

/// A planet orbiting a star.  `index` is its stable slot in the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Planet {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colony: Option<Colony>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FleetState {
    #[default]
    Idle,
    Moving,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fleet {
    pub id: i64,
    pub empire_id: i64,
    pub design: String,
    pub num_ships: f32,
    #[serde(default)]
    pub state: FleetState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_star_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EmpireStorage {
    pub empire_id: i64,
    pub total_goods: f32,
    pub total_minerals: f32,
    pub total_energy: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Star {
    pub id: i64,
    pub name: String,
    pub sector: SectorCoord,
    #[serde(default)]
    pub planets: Vec<Planet>,
    #[serde(default)]
    pub fleets: Vec<Fleet>,
    #[serde(default)]
    pub empire_stores: Vec<EmpireStorage>,
    /// Millisecond timestamp of the last simulation pass.  Never decreases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_simulation: Option<i64>,
}

impl Star {
    pub fn planet(&self, index: u32) -> Option<&Planet> {
        self.planets.iter().find(|p| p.index == index)
    }

    pub fn fleet(&self, id: i64) -> Option<&Fleet> {
        self.fleets.iter().find(|f| f.id == id)
    }

    /// Whether the empire has a colony or a fleet at this star.
    pub fn has_presence(&self, empire_id: i64) -> bool {
        self.planets
            .iter()
            .any(|p| p.colony.as_ref().is_some_and(|c| c.empire_id == empire_id))
            || self.fleets.iter().any(|f| f.empire_id == empire_id)
    }
}

// ---------------------------------------------------------------------------
// Modifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModificationKind {
    AdjustFocus { planet_index: u32, focus: Focus },
    AddBuildRequest { planet_index: u32, design: String, count: u32 },
    MoveFleet { fleet_id: i64 },
}

/// A client-authored intent to change one star.
///
/// `empire_id` is stamped by the star synchronizer right before the intent
/// leaves the client; `star_id` optionally names an auxiliary star (the
/// destination of a fleet move, for instance).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StarModification {
    pub kind: ModificationKind,
    #[serde(default)]
    pub empire_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub star_id: Option<i64>,
}

impl StarModification {
    pub fn new(kind: ModificationKind) -> Self {
        Self {
            kind,
            empire_id: 0,
            star_id: None,
        }
    }

    pub fn with_star(mut self, star_id: i64) -> Self {
        self.star_id = Some(star_id);
        self
    }
}

// ---------------------------------------------------------------------------
// Stats & config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub cached_empires: usize,
    pub cached_stars: usize,
    pub owned_stars: usize,
    pub empire_requests_sent: u64,
    pub modifications_sent: u64,
    pub pushes_applied: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long empire lookups are coalesced before one batched request goes out.
    pub empire_request_delay_ms: u64,
    /// Re-simulation period for a watched star.
    pub refresh_interval_ms: u64,
    /// Delay before the first re-simulation of a newly watched star.
    pub initial_refresh_delay_ms: u64,
}

impl SyncConfig {
    pub fn empire_request_delay(&self) -> Duration {
        Duration::from_millis(self.empire_request_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn initial_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.initial_refresh_delay_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            empire_request_delay_ms: 150,
            refresh_interval_ms: 5_000,
            initial_refresh_delay_ms: 100,
        }
    }
}
