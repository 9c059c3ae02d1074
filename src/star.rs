//! Star synchronizer – cache, optimistic modifications, periodic refresh.
//!
//! ## Write path
//!
//! ```text
//! apply_modification(star, m)          caller thread
//!   stamp m.empire_id = my empire      (SelfEmpireUnknown if no hello yet)
//!   └► background:
//!        auxiliary = store.get(m.star_id)      (missing → empty list)
//!        working   = star.clone()
//!        modifier.modify_star(working, [m], auxiliary)
//!          Err → log, stop.  Nothing written, nothing sent.
//!        store.put(star.id, working, me)
//!        bus.publish(working)
//!        transport.send(modify_star)
//! ```
//!
//! Optimistic and confirmed values share one cache slot.  The server's next
//! `star_updated` push simply overwrites whatever is there, in arrival order.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::bus::{Delivery, EventBus};
use crate::empire::EmpireSynchronizer;
use crate::error::Result;
use crate::protocol::{ModifyStarPacket, Packet, StarUpdatedPacket};
use crate::scheduler::{TaskRunner, Thread};
use crate::simulation::{Simulation, StarModifier};
use crate::store::{StarCursor, StarQuery, StarStore};
use crate::transport::Transport;
use crate::types::{Empire, SectorCoord, Star, StarModification, SyncConfig};

pub struct StarSynchronizer {
    store: Arc<dyn StarStore>,
    bus: Arc<EventBus>,
    runner: Arc<TaskRunner>,
    transport: Arc<dyn Transport>,
    empires: Arc<EmpireSynchronizer>,
    simulation: Arc<dyn Simulation>,
    modifier: Arc<dyn StarModifier>,
    config: SyncConfig,
    modifications_sent: AtomicU64,
    pushes_applied: AtomicU64,
}

impl StarSynchronizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StarStore>,
        bus: Arc<EventBus>,
        runner: Arc<TaskRunner>,
        transport: Arc<dyn Transport>,
        empires: Arc<EmpireSynchronizer>,
        simulation: Arc<dyn Simulation>,
        modifier: Arc<dyn StarModifier>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            bus,
            runner,
            transport,
            empires,
            simulation,
            modifier,
            config,
            modifications_sent: AtomicU64::new(0),
            pushes_applied: AtomicU64::new(0),
        }
    }

    /// Subscribe to server pushes on the background context.
    pub fn register(self: &Arc<Self>) {
        let this: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe::<StarUpdatedPacket, _>(
            Delivery::On(Thread::Background),
            move |pkt| {
                if let Some(this) = this.upgrade() {
                    this.handle_star_updated(pkt);
                }
            },
        );
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Cached star, if any.  Stars are never fetched individually from here.
    pub fn get(&self, id: i64) -> Option<Star> {
        self.store.get(id)
    }

    pub fn search_sector_stars(&self, coord: SectorCoord) -> StarCursor {
        StarCursor::new(self.store.clone(), StarQuery::Sector(coord))
    }

    pub fn my_stars(&self) -> StarCursor {
        StarCursor::new(self.store.clone(), StarQuery::Mine)
    }

    pub fn search_my_stars(&self, search: &str) -> StarCursor {
        StarCursor::new(self.store.clone(), StarQuery::MineMatching(search.to_owned()))
    }

    /// Newest `last_simulation` among our own stars.  Sent in the hello so
    /// the server only replays what changed since.
    pub fn last_simulation_watermark(&self) -> Option<i64> {
        self.store.last_simulation_of_my_star()
    }

    // -----------------------------------------------------------------------
    // Simulation refresh
    // -----------------------------------------------------------------------

    /// Simulate `star` on the background worker and publish the result.
    pub fn queue_simulate(self: &Arc<Self>, star: Star) {
        let this = Arc::clone(self);
        self.runner.run_on(Thread::Background, move || {
            this.simulate_sync(star);
        });
    }

    /// Simulate on the calling thread.  The result is published for display
    /// only; the store keeps the last authoritative/optimistic value.
    pub fn simulate_sync(&self, star: Star) -> Star {
        let mut working = star;
        self.simulation.simulate(&mut working);
        self.bus.publish(working.clone());
        working
    }

    /// Re-simulate the cached copy of `star_id` periodically until the
    /// returned watch is stopped or dropped.
    ///
    /// The first pass runs after `initial_refresh_delay`, then every
    /// `refresh_interval`.  A pass already queued when the watch stops may
    /// still run once.
    #[must_use = "refreshing stops as soon as the watch is dropped"]
    pub fn watch(self: &Arc<Self>, star_id: i64) -> RefreshWatch {
        let alive = Arc::new(AtomicBool::new(true));
        self.schedule_refresh(star_id, alive.clone(), self.config.initial_refresh_delay());
        RefreshWatch { star_id, alive }
    }

    fn schedule_refresh(self: &Arc<Self>, star_id: i64, alive: Arc<AtomicBool>, delay: std::time::Duration) {
        let this = Arc::clone(self);
        self.runner.run_after(Thread::Background, delay, move || {
            // Re-arm first so a pass that panics does not end the watch.
            if alive.load(Ordering::Acquire) {
                let interval = this.config.refresh_interval();
                this.schedule_refresh(star_id, alive, interval);
            } else {
                debug!("Stopped refreshing star {}", star_id);
            }
            match this.store.get(star_id) {
                Some(star) => {
                    this.simulate_sync(star);
                }
                None => debug!("Star {} not cached; skipping refresh", star_id),
            }
        });
    }

    // -----------------------------------------------------------------------
    // Modifications
    // -----------------------------------------------------------------------

    /// Optimistically apply `modification` to `star` and forward it to the
    /// server.  Returns once the work is queued; the new value shows up on
    /// the bus.
    ///
    /// Fails immediately with `SelfEmpireUnknown` before the hello.
    pub fn apply_modification(self: &Arc<Self>, star: Star, modification: StarModification) -> Result<()> {
        let me = self.empires.my_empire()?;
        let modification = StarModification {
            empire_id: me.id,
            ..modification
        };

        let this = Arc::clone(self);
        self.runner.run_on(Thread::Background, move || {
            // Rejections are logged inside; nothing else to do out here.
            let _ = this.apply_stamped(&star, modification, &me);
        });
        Ok(())
    }

    /// Synchronous form of [`apply_modification`] for callers already on a
    /// background thread.  Returns the new cached value.
    ///
    /// [`apply_modification`]: StarSynchronizer::apply_modification
    pub fn apply_modification_sync(&self, star: &Star, modification: StarModification) -> Result<Star> {
        let me = self.empires.my_empire()?;
        let modification = StarModification {
            empire_id: me.id,
            ..modification
        };
        self.apply_stamped(star, modification, &me)
    }

    fn apply_stamped(&self, star: &Star, modification: StarModification, me: &Empire) -> Result<Star> {
        let auxiliary: Vec<Star> = modification
            .star_id
            .and_then(|id| self.store.get(id))
            .into_iter()
            .collect();

        let mut working = star.clone();
        if let Err(e) = self
            .modifier
            .modify_star(&mut working, std::slice::from_ref(&modification), &auxiliary)
        {
            error!("Unexpected suspicious modification: {}", e);
            return Err(e);
        }

        self.store.put(star.id, working.clone(), Some(me));
        self.bus.publish(working.clone());

        let packet = Packet::ModifyStar(ModifyStarPacket {
            star_id: star.id,
            modifications: vec![modification],
        });
        match self.transport.send(packet) {
            Ok(()) => {
                self.modifications_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("Failed to send modification for star {}: {}", star.id, e),
        }
        Ok(working)
    }

    // -----------------------------------------------------------------------
    // Pushes
    // -----------------------------------------------------------------------

    /// Publish each pushed star, then write the whole batch in one go.
    pub fn handle_star_updated(&self, pkt: &StarUpdatedPacket) {
        info!("Stars updating, saving to store.");
        let start = Instant::now();

        let mut values = HashMap::with_capacity(pkt.stars.len());
        for star in &pkt.stars {
            self.bus.publish(star.clone());
            values.insert(star.id, star.clone());
        }

        let me = self.empires.my_empire().ok();
        if me.is_none() {
            warn!("Star push before hello; stored without owner attribution");
        }
        self.store.put_all(values, me.as_ref());
        self.pushes_applied.fetch_add(1, Ordering::Relaxed);

        info!(
            "Updated {} stars in store in {} ms",
            pkt.stars.len(),
            start.elapsed().as_millis()
        );
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn cached_count(&self) -> usize {
        self.store.len()
    }

    pub fn owned_count(&self) -> usize {
        self.store.owned_len()
    }

    pub fn modifications_sent(&self) -> u64 {
        self.modifications_sent.load(Ordering::Relaxed)
    }

    pub fn pushes_applied(&self) -> u64 {
        self.pushes_applied.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// RefreshWatch
// ---------------------------------------------------------------------------

/// Liveness handle for [`StarSynchronizer::watch`].  Refreshing stops when
/// this is stopped or dropped.
#[derive(Debug)]
#[must_use = "refreshing stops as soon as the watch is dropped"]
pub struct RefreshWatch {
    star_id: i64,
    alive: Arc<AtomicBool>,
}

impl RefreshWatch {
    pub fn star_id(&self) -> i64 {
        self.star_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
    }
}

impl Drop for RefreshWatch {
    fn drop(&mut self) {
        self.stop();
    }
}
