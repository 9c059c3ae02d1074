//! Shared fixtures for the synchronizer integration tests.

#![allow(dead_code)]

use galaxy_sync::{
    protocol::{Packet, StarUpdatedPacket, WelcomePacket},
    simulation::{BasicSimulation, BasicStarModifier, Clock, Simulation, StarModifier},
    types::{Colony, Fleet, FleetState, Focus, Planet},
    Empire, MemoryEmpireStore, MemoryStarStore, Result, SectorCoord, Star, SyncConfig, SyncContext,
    SyncError, SyncParts, Transport,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const NOW_MS: i64 = 10_000;

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

/// Keeps every packet it is asked to send.  Can be switched into a failing
/// mode, in which nothing is recorded.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Packet>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().clone()
    }

    pub fn empire_requests(&self) -> Vec<Vec<i64>> {
        self.sent
            .lock()
            .iter()
            .filter_map(|p| match p {
                Packet::RequestEmpire(r) => Some(r.empire_ids.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn modify_count(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|p| matches!(p, Packet::ModifyStar(_)))
            .count()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, packet: Packet) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("link down".into()));
        }
        self.sent.lock().push(packet);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

pub fn fixed_clock(ms: i64) -> Clock {
    Arc::new(move || ms)
}

pub fn context(transport: &Arc<RecordingTransport>) -> SyncContext {
    context_with_modifier(transport, Arc::new(BasicStarModifier::new()))
}

pub fn context_with_modifier(
    transport: &Arc<RecordingTransport>,
    modifier: Arc<dyn StarModifier>,
) -> SyncContext {
    context_with(
        transport,
        Arc::new(BasicSimulation::with_clock(fixed_clock(NOW_MS))),
        modifier,
    )
}

pub fn context_with_simulation(
    transport: &Arc<RecordingTransport>,
    simulation: Arc<dyn Simulation>,
) -> SyncContext {
    context_with(transport, simulation, Arc::new(BasicStarModifier::new()))
}

fn context_with(
    transport: &Arc<RecordingTransport>,
    simulation: Arc<dyn Simulation>,
    modifier: Arc<dyn StarModifier>,
) -> SyncContext {
    let parts = SyncParts {
        empire_store: Arc::new(MemoryEmpireStore::new()),
        star_store: Arc::new(MemoryStarStore::new()),
        simulation,
        modifier,
    };
    SyncContext::with_parts(SyncConfig::default(), transport.clone(), parts).unwrap()
}

pub fn welcome(ctx: &SyncContext, id: i64, name: &str) -> Empire {
    let empire = Empire::new(id, name);
    ctx.handle_packet(Packet::Welcome(WelcomePacket {
        empire: empire.clone(),
    }));
    empire
}

pub fn push_stars(ctx: &SyncContext, stars: Vec<Star>) {
    ctx.handle_packet(Packet::StarUpdated(StarUpdatedPacket { stars }));
}

/// Let queued background work run.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}

// ---------------------------------------------------------------------------
// Stars
// ---------------------------------------------------------------------------

/// A star whose planet 0 is colonised by `owner` and which hosts one of the
/// owner's fleets (id `star_id * 10`).
pub fn star(id: i64, name: &str, owner: i64, last_simulation: i64) -> Star {
    Star {
        id,
        name: name.into(),
        sector: SectorCoord::new(0, 0),
        planets: vec![
            Planet {
                index: 0,
                colony: Some(Colony {
                    empire_id: owner,
                    population: 500.0,
                    focus: Focus::default(),
                    build_requests: vec![],
                }),
            },
            Planet { index: 1, colony: None },
        ],
        fleets: vec![Fleet {
            id: id * 10,
            empire_id: owner,
            design: "scout".into(),
            num_ships: 2.0,
            state: FleetState::Idle,
            destination_star_id: None,
        }],
        empire_stores: vec![],
        last_simulation: Some(last_simulation),
    }
}

pub fn empty_star(id: i64, name: &str, sector: SectorCoord) -> Star {
    Star {
        id,
        name: name.into(),
        sector,
        planets: vec![Planet { index: 0, colony: None }],
        fleets: vec![],
        empire_stores: vec![],
        last_simulation: Some(1_000),
    }
}
