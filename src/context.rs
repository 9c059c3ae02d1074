//! Explicit wiring of the whole client core.
//!
//! A [`SyncContext`] owns one scheduler, one bus, both stores and both
//! synchronizers.  Nothing here is global; tests build as many as they like.
//!
//! Inbound traffic enters through [`SyncContext::handle_packet`] (or
//! `handle_bytes` for raw frames) and is routed onto the bus, where the
//! synchronizers pick it up on the background context.

use log::{debug, info, warn};
use std::sync::Arc;

use crate::bus::EventBus;
use crate::empire::EmpireSynchronizer;
use crate::error::Result;
use crate::protocol::{HelloPacket, Packet};
use crate::scheduler::TaskRunner;
use crate::simulation::{BasicSimulation, BasicStarModifier, Simulation, StarModifier};
use crate::star::StarSynchronizer;
use crate::store::{EmpireStore, MemoryEmpireStore, MemoryStarStore, StarStore};
use crate::transport::{decode_frame, Transport};
use crate::types::{SyncConfig, SyncStats};

/// Replaceable pieces of a context.  `Default` gives in-memory stores and
/// the basic transforms.
pub struct SyncParts {
    pub empire_store: Arc<dyn EmpireStore>,
    pub star_store: Arc<dyn StarStore>,
    pub simulation: Arc<dyn Simulation>,
    pub modifier: Arc<dyn StarModifier>,
}

impl Default for SyncParts {
    fn default() -> Self {
        Self {
            empire_store: Arc::new(MemoryEmpireStore::new()),
            star_store: Arc::new(MemoryStarStore::new()),
            simulation: Arc::new(BasicSimulation::new()),
            modifier: Arc::new(BasicStarModifier::new()),
        }
    }
}

pub struct SyncContext {
    config: SyncConfig,
    runner: Arc<TaskRunner>,
    bus: Arc<EventBus>,
    transport: Arc<dyn Transport>,
    empires: Arc<EmpireSynchronizer>,
    stars: Arc<StarSynchronizer>,
}

impl SyncContext {
    /// Build a context with default parts.  Must be called inside a Tokio
    /// runtime.
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_parts(config, transport, SyncParts::default())
    }

    pub fn with_parts(config: SyncConfig, transport: Arc<dyn Transport>, parts: SyncParts) -> Result<Self> {
        let runner = Arc::new(TaskRunner::new()?);
        let bus = Arc::new(EventBus::new(runner.clone()));

        let empires = Arc::new(EmpireSynchronizer::new(
            parts.empire_store,
            bus.clone(),
            transport.clone(),
            runner.handle(),
            config.empire_request_delay(),
        ));
        empires.register();

        let stars = Arc::new(StarSynchronizer::new(
            parts.star_store,
            bus.clone(),
            runner.clone(),
            transport.clone(),
            empires.clone(),
            parts.simulation,
            parts.modifier,
            config.clone(),
        ));
        stars.register();

        debug!("Sync context ready ({:?})", config);
        Ok(Self {
            config,
            runner,
            bus,
            transport,
            empires,
            stars,
        })
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn empires(&self) -> &Arc<EmpireSynchronizer> {
        &self.empires
    }

    pub fn stars(&self) -> &Arc<StarSynchronizer> {
        &self.stars
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    /// Hello carrying the newest simulation time among our own stars.
    pub fn hello_packet(&self) -> Packet {
        Packet::Hello(HelloPacket {
            last_simulation: self.stars.last_simulation_watermark(),
        })
    }

    pub fn send_hello(&self) -> Result<()> {
        let hello = self.hello_packet();
        info!("Sending hello: {:?}", hello);
        self.transport.send(hello)
    }

    /// Route one inbound packet.  Pushes go onto the bus; the welcome sets
    /// our own empire right away.
    pub fn handle_packet(&self, packet: Packet) {
        match packet {
            Packet::EmpireDetails(pkt) => self.bus.publish(pkt),
            Packet::StarUpdated(pkt) => self.bus.publish(pkt),
            Packet::Welcome(pkt) => {
                info!("Welcomed as empire {} [{}]", pkt.empire.id, pkt.empire.display_name);
                self.empires.on_hello(pkt.empire);
            }
            other => warn!("Ignoring unexpected inbound {} packet", other.kind()),
        }
    }

    pub fn handle_bytes(&self, frame: &[u8]) -> Result<()> {
        let packet = decode_frame(frame)?;
        self.handle_packet(packet);
        Ok(())
    }

    /// Drain the presentation-thread queue.  See [`TaskRunner::poll`].
    pub fn poll_ui(&self) -> usize {
        self.runner.poll()
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            cached_empires: self.empires.cached_count(),
            cached_stars: self.stars.cached_count(),
            owned_stars: self.stars.owned_count(),
            empire_requests_sent: self.empires.requests_sent(),
            modifications_sent: self.stars.modifications_sent(),
            pushes_applied: self.empires.pushes_applied() + self.stars.pushes_applied(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::protocol::{EmpireDetailsPacket, RequestEmpirePacket, WelcomePacket};
    use crate::transport::ChannelTransport;
    use crate::types::Empire;
    use std::time::Duration;

    fn context() -> (SyncContext, tokio::sync::mpsc::UnboundedReceiver<bytes::Bytes>) {
        let (transport, rx) = ChannelTransport::new();
        let ctx = SyncContext::new(SyncConfig::default(), Arc::new(transport)).unwrap();
        (ctx, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn welcome_frame_sets_self_empire() {
        let (ctx, _rx) = context();
        let frame = Packet::Welcome(WelcomePacket {
            empire: Empire::new(1, "Terran League"),
        })
        .encode()
        .unwrap();

        ctx.handle_bytes(&frame).unwrap();
        assert_eq!(ctx.empires().my_empire().unwrap().id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_frame_is_a_codec_error() {
        let (ctx, _rx) = context();
        let err = ctx.handle_bytes(b"\x00\x01").unwrap_err();
        assert!(matches!(err, SyncError::Codec(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn client_bound_packets_are_ignored() {
        let (ctx, mut rx) = context();
        ctx.handle_packet(Packet::RequestEmpire(RequestEmpirePacket {
            empire_ids: vec![1],
        }));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.stats(), SyncStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn hello_goes_out_on_the_transport() {
        let (ctx, mut rx) = context();
        ctx.send_hello().unwrap();
        let frame = rx.try_recv().unwrap();
        assert_eq!(&frame[..], br#"{"hello":{}}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_follow_traffic() {
        let (ctx, _rx) = context();
        ctx.empires().get(7);
        ctx.handle_packet(Packet::EmpireDetails(EmpireDetailsPacket {
            empires: vec![Empire::new(9, "Vorlon")],
        }));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = ctx.stats();
        assert_eq!(stats.cached_empires, 1);
        assert_eq!(stats.empire_requests_sent, 1);
        assert_eq!(stats.pushes_applied, 1);
        assert_eq!(stats.cached_stars, 0);
    }
}
