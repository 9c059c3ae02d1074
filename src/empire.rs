//! Empire synchronizer – cached empire lookups with coalesced fetches.
//!
//! Misses never block.  The id goes to a batcher task which owns the pending
//! set outright (no shared lock); the first id after an idle period arms a
//! single flush deadline, and every id that arrives before it fires rides the
//! same `request_empire` packet.  At most one request per window, whatever
//! the burst size.
//!
//! ```text
//! get(id) ── miss ──► BatchCommand::Request(id) ──► batcher
//!                                                    │ pending ∪= {id}
//!                                                    │ arm deadline (once)
//!                                      deadline ──►  │ take pending
//!                                                    └► transport.send(request_empire)
//! ```

use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::bus::{Delivery, EventBus};
use crate::error::{Result, SyncError};
use crate::protocol::{EmpireDetailsPacket, Packet, RequestEmpirePacket};
use crate::scheduler::Thread;
use crate::store::EmpireStore;
use crate::transport::Transport;
use crate::types::{Empire, EmpireState};

/// Id reserved for native (unowned) colonies and fleets.
pub const NATIVE_EMPIRE_ID: i64 = 0;

static NATIVE_EMPIRE: Lazy<Empire> = Lazy::new(|| Empire {
    id: NATIVE_EMPIRE_ID,
    display_name: "Native".into(),
    state: EmpireState::Active,
});

/// The placeholder returned for id 0.  Never stored, never fetched.
pub fn native_empire() -> &'static Empire {
    &NATIVE_EMPIRE
}

// ---------------------------------------------------------------------------
// Batcher actor
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum BatchCommand {
    Request(i64),
    FlushNow,
}

struct RequestBatcher {
    rx: mpsc::UnboundedReceiver<BatchCommand>,
    transport: Arc<dyn Transport>,
    delay: Duration,
    requests_sent: Arc<AtomicU64>,
    pending: BTreeSet<i64>,
    flush_at: Option<tokio::time::Instant>,
}

impl RequestBatcher {
    async fn run(mut self) {
        loop {
            let deadline = self.flush_at;
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(BatchCommand::Request(id)) => {
                        self.pending.insert(id);
                        if self.flush_at.is_none() {
                            self.flush_at = Some(tokio::time::Instant::now() + self.delay);
                        }
                    }
                    Some(BatchCommand::FlushNow) => self.flush(),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() => self.flush(),
            }
        }
        debug!("Empire request batcher stopped ({} ids unsent)", self.pending.len());
    }

    fn flush(&mut self) {
        let empire_ids: Vec<i64> = std::mem::take(&mut self.pending).into_iter().collect();
        self.flush_at = None;
        if empire_ids.is_empty() {
            return;
        }

        debug!("Requesting {} empires: {:?}", empire_ids.len(), empire_ids);
        match self
            .transport
            .send(Packet::RequestEmpire(RequestEmpirePacket { empire_ids }))
        {
            Ok(()) => {
                self.requests_sent.fetch_add(1, Ordering::Relaxed);
            }
            // Not retried: a later lookup re-enqueues whatever is still missing.
            Err(e) => warn!("Failed to send empire request: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// EmpireSynchronizer
// ---------------------------------------------------------------------------

pub struct EmpireSynchronizer {
    store: Arc<dyn EmpireStore>,
    bus: Arc<EventBus>,
    my_empire: RwLock<Option<Empire>>,
    batcher: mpsc::UnboundedSender<BatchCommand>,
    requests_sent: Arc<AtomicU64>,
    pushes_applied: AtomicU64,
}

impl EmpireSynchronizer {
    /// Spawns the request batcher on `runtime`.  Call [`register`] once the
    /// value is in an `Arc` to start receiving pushes.
    ///
    /// [`register`]: EmpireSynchronizer::register
    pub fn new(
        store: Arc<dyn EmpireStore>,
        bus: Arc<EventBus>,
        transport: Arc<dyn Transport>,
        runtime: &Handle,
        request_delay: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let requests_sent = Arc::new(AtomicU64::new(0));
        let batcher = RequestBatcher {
            rx,
            transport,
            delay: request_delay,
            requests_sent: requests_sent.clone(),
            pending: BTreeSet::new(),
            flush_at: None,
        };
        runtime.spawn(batcher.run());

        Self {
            store,
            bus,
            my_empire: RwLock::new(None),
            batcher: tx,
            requests_sent,
            pushes_applied: AtomicU64::new(0),
        }
    }

    /// Subscribe to server pushes on the background context.
    pub fn register(self: &Arc<Self>) {
        let this: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe::<EmpireDetailsPacket, _>(
            Delivery::On(Thread::Background),
            move |pkt| {
                if let Some(this) = this.upgrade() {
                    this.handle_empire_details(pkt);
                }
            },
        );
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Cached empire, or `None` if it has to be fetched first.  A miss queues
    /// the id; the answer arrives later as an `Empire` on the bus.
    pub fn get(&self, id: i64) -> Option<Empire> {
        if id == NATIVE_EMPIRE_ID {
            return Some(native_empire().clone());
        }
        if let Some(me) = self.my_empire.read().as_ref() {
            if me.id == id {
                return Some(me.clone());
            }
        }

        let empire = self.store.get(id);
        if empire.is_none() {
            self.request(id);
        }
        empire
    }

    fn request(&self, id: i64) {
        if self.batcher.send(BatchCommand::Request(id)).is_err() {
            warn!("Empire request batcher is gone; dropping request for {}", id);
        }
    }

    /// Send whatever is pending right away instead of waiting for the window.
    pub fn flush_now(&self) {
        if self.batcher.send(BatchCommand::FlushNow).is_err() {
            warn!("Empire request batcher is gone; nothing to flush");
        }
    }

    // -----------------------------------------------------------------------
    // Self empire
    // -----------------------------------------------------------------------

    /// Called when the server greets us with our own empire.
    pub fn on_hello(&self, empire: Empire) {
        self.store.put(empire.id, empire.clone());
        *self.my_empire.write() = Some(empire.clone());
        self.bus.publish(empire);
    }

    pub fn has_my_empire(&self) -> bool {
        self.my_empire.read().is_some()
    }

    /// Our own empire.  Asking before the hello is a caller bug and is
    /// reported as [`SyncError::SelfEmpireUnknown`].
    pub fn my_empire(&self) -> Result<Empire> {
        self.my_empire
            .read()
            .clone()
            .ok_or(SyncError::SelfEmpireUnknown)
    }

    pub fn is_my_empire(&self, empire: Option<&Empire>) -> bool {
        match (empire, self.my_empire.read().as_ref()) {
            (Some(e), Some(me)) => e.id == me.id,
            _ => false,
        }
    }

    /// True for any known empire that isn't ours.  False while we don't know
    /// who we are yet.
    pub fn is_enemy(&self, empire: Option<&Empire>) -> bool {
        match (empire, self.my_empire.read().as_ref()) {
            (Some(e), Some(me)) => e.id != me.id,
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Pushes
    // -----------------------------------------------------------------------

    /// Full overwrite per empire, so re-applying a push is harmless.
    pub fn handle_empire_details(&self, pkt: &EmpireDetailsPacket) {
        for empire in &pkt.empires {
            let start = Instant::now();
            self.store.put(empire.id, empire.clone());
            self.bus.publish(empire.clone());
            debug!(
                "Refreshed empire {} [{}] in {}ms.",
                empire.id,
                empire.display_name,
                start.elapsed().as_millis()
            );
        }
        self.pushes_applied.fetch_add(1, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn cached_count(&self) -> usize {
        self.store.len()
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    pub fn pushes_applied(&self) -> u64 {
        self.pushes_applied.load(Ordering::Relaxed)
    }
}
