//! Simulation and modification transforms.
//!
//! The synchronizers treat both as opaque seams: [`Simulation`] advances a
//! star's derived state to "now", [`StarModifier`] validates and applies
//! client intents.  The `Basic*` implementations are deterministic given
//! their clock, which is what lets the client's optimistic result match the
//! server's eventual push in the common case.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::error::{Result, SyncError};
use crate::types::{BuildRequest, EmpireStorage, FleetState, ModificationKind, Star, StarModification};

/// Millisecond wall clock, injectable for tests.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    })
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait Simulation: Send + Sync {
    /// Advance `star` to the current time.  Must never move
    /// `last_simulation` backwards.
    fn simulate(&self, star: &mut Star);
}

pub trait StarModifier: Send + Sync {
    /// Apply `modifications` to the working copy.  `auxiliary` holds whatever
    /// referenced stars the caller could find locally (possibly none).
    ///
    /// On `Err` the working copy must be discarded by the caller.
    fn modify_star(
        &self,
        star: &mut Star,
        modifications: &[StarModification],
        auxiliary: &[Star],
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// BasicSimulation
// ---------------------------------------------------------------------------

const HOUR_MS: f32 = 3_600_000.0;
const GROWTH_PER_HOUR: f32 = 0.01;
const OUTPUT_PER_HOUR: f32 = 0.1;
const BUILD_PER_HOUR: f32 = 0.1;

pub struct BasicSimulation {
    clock: Clock,
}

impl BasicSimulation {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Clock) -> Self {
        Self { clock }
    }
}

impl Default for BasicSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation for BasicSimulation {
    fn simulate(&self, star: &mut Star) {
        let now = (self.clock)();
        let last = star.last_simulation.unwrap_or(now);
        if now <= last {
            star.last_simulation = Some(last);
            return;
        }
        let Some(elapsed) = now.checked_sub(last) else {
            warn!(
                "Star {} has an out-of-range last simulation {}; not advancing",
                star.id, last
            );
            star.last_simulation = Some(now);
            return;
        };
        let hours = elapsed as f32 / HOUR_MS;

        for planet in &mut star.planets {
            let Some(colony) = planet.colony.as_mut() else {
                continue;
            };
            let pop = colony.population;
            let focus = colony.focus;

            let storage = match star
                .empire_stores
                .iter_mut()
                .position(|s| s.empire_id == colony.empire_id)
            {
                Some(i) => &mut star.empire_stores[i],
                None => {
                    star.empire_stores.push(EmpireStorage {
                        empire_id: colony.empire_id,
                        ..Default::default()
                    });
                    let idx = star.empire_stores.len() - 1;
                    &mut star.empire_stores[idx]
                }
            };
            storage.total_goods += pop * focus.farming * OUTPUT_PER_HOUR * hours;
            storage.total_minerals += pop * focus.mining * OUTPUT_PER_HOUR * hours;
            storage.total_energy += pop * focus.energy * OUTPUT_PER_HOUR * hours;

            colony.population += pop * focus.population * GROWTH_PER_HOUR * hours;

            for build in &mut colony.build_requests {
                let rate = BUILD_PER_HOUR * hours / build.count.max(1) as f32;
                build.progress = (build.progress + rate).min(1.0);
            }
        }

        star.last_simulation = Some(now);
    }
}

// ---------------------------------------------------------------------------
// BasicStarModifier
// ---------------------------------------------------------------------------

/// Client-side modifier.  Build requests it creates carry id 0; the server
/// assigns real ids and its next push replaces the optimistic entry.
#[derive(Debug, Default)]
pub struct BasicStarModifier;

impl BasicStarModifier {
    pub fn new() -> Self {
        Self
    }

    fn apply_one(&self, star: &mut Star, m: &StarModification, auxiliary: &[Star]) -> Result<()> {
        let star_id = star.id;
        let suspicious = |reason: String| SyncError::SuspiciousModification { star_id, reason };

        match &m.kind {
            ModificationKind::AdjustFocus {
                planet_index,
                focus,
            } => {
                let values = [focus.population, focus.farming, focus.mining, focus.energy];
                if values.iter().any(|v| !(0.0..=1.0).contains(v))
                    || (focus.total() - 1.0).abs() > 0.01
                {
                    return Err(suspicious(format!("focus does not sum to 1: {focus:?}")));
                }
                let colony = owned_colony(star, *planet_index, m.empire_id).map_err(suspicious)?;
                colony.focus = *focus;
            }
            ModificationKind::AddBuildRequest {
                planet_index,
                design,
                count,
            } => {
                if *count == 0 {
                    return Err(suspicious("build count of zero".into()));
                }
                let colony = owned_colony(star, *planet_index, m.empire_id).map_err(suspicious)?;
                colony.build_requests.push(BuildRequest {
                    id: 0,
                    design: design.clone(),
                    count: *count,
                    progress: 0.0,
                });
            }
            ModificationKind::MoveFleet { fleet_id } => {
                let Some(destination) = m.star_id else {
                    return Err(suspicious(format!("fleet {fleet_id} move has no destination")));
                };
                if destination == star_id {
                    return Err(suspicious(format!("fleet {fleet_id} already at star {star_id}")));
                }
                let fleet = star
                    .fleets
                    .iter_mut()
                    .find(|f| f.id == *fleet_id)
                    .ok_or_else(|| suspicious(format!("no fleet {fleet_id}")))?;
                if fleet.empire_id != m.empire_id {
                    return Err(suspicious(format!(
                        "fleet {fleet_id} belongs to empire {}",
                        fleet.empire_id
                    )));
                }
                if !auxiliary.iter().any(|s| s.id == destination) {
                    debug!("Destination star {destination} not cached; moving fleet {fleet_id} anyway");
                }
                fleet.state = FleetState::Moving;
                fleet.destination_star_id = Some(destination);
            }
        }
        Ok(())
    }
}

fn owned_colony(
    star: &mut Star,
    planet_index: u32,
    empire_id: i64,
) -> std::result::Result<&mut crate::types::Colony, String> {
    let planet = star
        .planets
        .iter_mut()
        .find(|p| p.index == planet_index)
        .ok_or_else(|| format!("no planet at index {planet_index}"))?;
    match planet.colony.as_mut() {
        Some(c) if c.empire_id == empire_id => Ok(c),
        Some(c) => Err(format!(
            "planet {planet_index} is colonised by empire {}",
            c.empire_id
        )),
        None => Err(format!("planet {planet_index} has no colony")),
    }
}

impl StarModifier for BasicStarModifier {
    fn modify_star(
        &self,
        star: &mut Star,
        modifications: &[StarModification],
        auxiliary: &[Star],
    ) -> Result<()> {
        for m in modifications {
            self.apply_one(star, m, auxiliary)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Colony, Fleet, Focus, Planet, SectorCoord};

    fn star() -> Star {
        Star {
            id: 1,
            name: "Alpha".into(),
            sector: SectorCoord::new(0, 0),
            planets: vec![
                Planet {
                    index: 0,
                    colony: Some(Colony {
                        empire_id: 5,
                        population: 100.0,
                        focus: Focus::default(),
                        build_requests: vec![],
                    }),
                },
                Planet {
                    index: 1,
                    colony: None,
                },
            ],
            fleets: vec![Fleet {
                id: 40,
                empire_id: 5,
                design: "scout".into(),
                num_ships: 1.0,
                state: FleetState::Idle,
                destination_star_id: None,
            }],
            empire_stores: vec![],
            last_simulation: Some(1_000),
        }
    }

    fn fixed(ms: i64) -> Clock {
        Arc::new(move || ms)
    }

    #[test]
    fn simulation_accumulates_over_elapsed_time() {
        let sim = BasicSimulation::with_clock(fixed(1_000 + 3_600_000));
        let mut s = star();
        sim.simulate(&mut s);

        assert_eq!(s.last_simulation, Some(3_601_000));
        let store = &s.empire_stores[0];
        assert_eq!(store.empire_id, 5);
        assert!((store.total_goods - 2.5).abs() < 1e-4);
        let pop = s.planets[0].colony.as_ref().unwrap().population;
        assert!((pop - 100.25).abs() < 1e-4);
    }

    #[test]
    fn simulation_never_rewinds_last_simulation() {
        let sim = BasicSimulation::with_clock(fixed(10));
        let mut s = star();
        let before = s.clone();
        sim.simulate(&mut s);
        assert_eq!(s, before);
    }

    #[test]
    fn out_of_range_timestamp_does_not_advance() {
        let sim = BasicSimulation::with_clock(fixed(10_000));
        let mut s = star();
        s.last_simulation = Some(i64::MIN + 1);
        let before = s.clone();
        sim.simulate(&mut s);

        assert_eq!(s.last_simulation, Some(10_000));
        assert_eq!(s.planets, before.planets);
        assert!(s.empire_stores.is_empty());
    }

    #[test]
    fn simulation_is_deterministic() {
        let sim = BasicSimulation::with_clock(fixed(9_000_000));
        let mut a = star();
        let mut b = star();
        sim.simulate(&mut a);
        sim.simulate(&mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn adjust_focus_on_own_colony() {
        let focus = Focus {
            population: 0.1,
            farming: 0.2,
            mining: 0.3,
            energy: 0.4,
        };
        let mut m = StarModification::new(ModificationKind::AdjustFocus {
            planet_index: 0,
            focus,
        });
        m.empire_id = 5;
        let mut s = star();
        BasicStarModifier::new()
            .modify_star(&mut s, &[m], &[])
            .unwrap();
        assert_eq!(s.planets[0].colony.as_ref().unwrap().focus, focus);
    }

    #[test]
    fn foreign_colony_is_suspicious() {
        let mut m = StarModification::new(ModificationKind::AddBuildRequest {
            planet_index: 0,
            design: "colony_ship".into(),
            count: 1,
        });
        m.empire_id = 6;
        let err = BasicStarModifier::new()
            .modify_star(&mut star(), &[m], &[])
            .unwrap_err();
        assert!(matches!(err, SyncError::SuspiciousModification { star_id: 1, .. }));
    }

    #[test]
    fn empty_planet_and_zero_count_are_suspicious() {
        let modifier = BasicStarModifier::new();
        let mut empty = StarModification::new(ModificationKind::AddBuildRequest {
            planet_index: 1,
            design: "scout".into(),
            count: 1,
        });
        empty.empire_id = 5;
        assert!(modifier.modify_star(&mut star(), &[empty], &[]).is_err());

        let mut zero = StarModification::new(ModificationKind::AddBuildRequest {
            planet_index: 0,
            design: "scout".into(),
            count: 0,
        });
        zero.empire_id = 5;
        assert!(modifier.modify_star(&mut star(), &[zero], &[]).is_err());
    }

    #[test]
    fn move_fleet_without_cached_destination_is_accepted() {
        let mut m = StarModification::new(ModificationKind::MoveFleet { fleet_id: 40 }).with_star(77);
        m.empire_id = 5;
        let mut s = star();
        BasicStarModifier::new().modify_star(&mut s, &[m], &[]).unwrap();
        let fleet = s.fleet(40).unwrap();
        assert_eq!(fleet.state, FleetState::Moving);
        assert_eq!(fleet.destination_star_id, Some(77));
    }

    #[test]
    fn move_fleet_without_destination_is_suspicious() {
        let mut m = StarModification::new(ModificationKind::MoveFleet { fleet_id: 40 });
        m.empire_id = 5;
        assert!(BasicStarModifier::new()
            .modify_star(&mut star(), &[m], &[])
            .is_err());
    }

    #[test]
    fn rejection_midway_reports_error() {
        let mut ok = StarModification::new(ModificationKind::AddBuildRequest {
            planet_index: 0,
            design: "scout".into(),
            count: 2,
        });
        ok.empire_id = 5;
        let mut bad = StarModification::new(ModificationKind::MoveFleet { fleet_id: 99 }).with_star(2);
        bad.empire_id = 5;
        let result = BasicStarModifier::new().modify_star(&mut star(), &[ok, bad], &[]);
        assert!(result.is_err());
    }
}
