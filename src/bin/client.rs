//! galaxy-sync-client binary
//!
//! Runs the sync core against an in-process loopback server, exercising the
//! hello handshake, coalesced empire lookups, a watched star and one
//! optimistic modification, then prints the final stats.
//!
//! ## Configuration (env / TOML via `config` crate)
//!
//! | Key                               | Default | Description                        |
//! |-----------------------------------|---------|------------------------------------|
//! | `GALAXY_EMPIRE_REQUEST_DELAY_MS`  | `150`   | Empire lookup coalescing window    |
//! | `GALAXY_REFRESH_INTERVAL_MS`      | `5000`  | Watched star re-simulation period  |
//! | `GALAXY_INITIAL_REFRESH_DELAY_MS` | `100`   | Delay before the first refresh     |
//! | `GALAXY_CONFIG`                   | –       | Optional TOML file with the above  |
//! | `GALAXY_RUN_SECS`                 | `3`     | How long the demo runs             |

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use galaxy_sync::{
    protocol::{EmpireDetailsPacket, Packet, StarUpdatedPacket, WelcomePacket},
    simulation::{BasicSimulation, BasicStarModifier, Simulation, StarModifier},
    transport::{decode_frame, encode_frame},
    types::{Colony, Fleet, FleetState, Focus, ModificationKind, Planet},
    ChannelTransport, Delivery, Empire, SectorCoord, Star, StarModification, SyncConfig, SyncContext,
    Thread,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "galaxy-sync-client", about = "Galaxy Sync demo client", version)]
struct Args {
    /// TOML file with sync settings
    #[arg(long, env = "GALAXY_CONFIG")]
    config: Option<String>,

    /// Seconds to run before printing stats
    #[arg(long, env = "GALAXY_RUN_SECS", default_value_t = 3)]
    run_secs: u64,

    /// Override the empire request coalescing window (ms)
    #[arg(long)]
    empire_request_delay_ms: Option<u64>,

    /// Override the watched star refresh period (ms)
    #[arg(long)]
    refresh_interval_ms: Option<u64>,
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(config::File::with_name(path).required(true));
    }
    let mut sync: SyncConfig = builder
        .add_source(config::Environment::with_prefix("GALAXY"))
        .build()?
        .try_deserialize()?;

    if let Some(ms) = args.empire_request_delay_ms {
        sync.empire_request_delay_ms = ms;
    }
    if let Some(ms) = args.refresh_interval_ms {
        sync.refresh_interval_ms = ms;
    }
    Ok(sync)
}

// ---------------------------------------------------------------------------
// Loopback server
// ---------------------------------------------------------------------------

const MY_EMPIRE_ID: i64 = 1;
const HOME_STAR_ID: i64 = 100;

/// Minimal authoritative peer: answers requests and re-validates
/// modifications with the same transforms the client uses.
struct LoopbackServer {
    empires: HashMap<i64, Empire>,
    stars: HashMap<i64, Star>,
    simulation: BasicSimulation,
    modifier: BasicStarModifier,
}

impl LoopbackServer {
    fn new() -> Self {
        let empires = [
            Empire::new(MY_EMPIRE_ID, "Terran League"),
            Empire::new(2, "Krell Dominion"),
            Empire::new(3, "Vorlon Concord"),
        ]
        .into_iter()
        .map(|e| (e.id, e))
        .collect();

        let stars = [
            demo_star(HOME_STAR_ID, "Sol", (0, 0), Some(MY_EMPIRE_ID)),
            demo_star(101, "Krell Prime", (0, 1), Some(2)),
            demo_star(102, "Barnard", (0, 0), None),
        ]
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

        Self {
            empires,
            stars,
            simulation: BasicSimulation::new(),
            modifier: BasicStarModifier::new(),
        }
    }

    fn handle(&mut self, packet: Packet) -> Vec<Packet> {
        match packet {
            Packet::Hello(hello) => {
                let watermark = hello.last_simulation.unwrap_or(i64::MIN);
                let stars = self
                    .stars
                    .values_mut()
                    .map(|s| {
                        self.simulation.simulate(s);
                        s.clone()
                    })
                    .filter(|s| s.last_simulation.unwrap_or(0) > watermark)
                    .collect();
                let mut replies = Vec::with_capacity(2);
                if let Some(empire) = self.empires.get(&MY_EMPIRE_ID).cloned() {
                    replies.push(Packet::Welcome(WelcomePacket { empire }));
                }
                replies.push(Packet::StarUpdated(StarUpdatedPacket { stars }));
                replies
            }
            Packet::RequestEmpire(req) => {
                let empires = req
                    .empire_ids
                    .iter()
                    .filter_map(|id| self.empires.get(id).cloned())
                    .collect();
                vec![Packet::EmpireDetails(EmpireDetailsPacket { empires })]
            }
            Packet::ModifyStar(req) => {
                let auxiliary: Vec<Star> = req
                    .modifications
                    .iter()
                    .filter_map(|m| m.star_id.and_then(|id| self.stars.get(&id).cloned()))
                    .collect();
                let Some(current) = self.stars.get(&req.star_id) else {
                    log::warn!("Server: modify for unknown star {}", req.star_id);
                    return vec![];
                };
                let mut working = current.clone();
                self.simulation.simulate(&mut working);
                if let Err(e) = self.modifier.modify_star(&mut working, &req.modifications, &auxiliary) {
                    log::warn!("Server: rejected modification: {}", e);
                    working = current.clone();
                }
                self.stars.insert(working.id, working.clone());
                vec![Packet::StarUpdated(StarUpdatedPacket { stars: vec![working] })]
            }
            other => {
                log::warn!("Server: unexpected {} from client", other.kind());
                vec![]
            }
        }
    }

    async fn run(mut self, mut outbound: mpsc::UnboundedReceiver<Bytes>, inbound: mpsc::UnboundedSender<Bytes>) {
        while let Some(frame) = outbound.recv().await {
            let packet = match decode_frame(&frame) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Server: bad frame: {}", e);
                    continue;
                }
            };
            log::debug!("Server <- {}", packet.kind());
            for reply in self.handle(packet) {
                match encode_frame(&reply) {
                    Ok(frame) => {
                        if inbound.send(frame).is_err() {
                            return;
                        }
                    }
                    Err(e) => log::warn!("Server: encode failed: {}", e),
                }
            }
        }
    }
}

fn demo_star(id: i64, name: &str, sector: (i64, i64), owner: Option<i64>) -> Star {
    Star {
        id,
        name: name.into(),
        sector: SectorCoord::new(sector.0, sector.1),
        planets: vec![
            Planet {
                index: 0,
                colony: owner.map(|empire_id| Colony {
                    empire_id,
                    population: 1_000.0,
                    focus: Focus::default(),
                    build_requests: vec![],
                }),
            },
            Planet { index: 1, colony: None },
        ],
        fleets: owner
            .map(|empire_id| Fleet {
                id: id * 10,
                empire_id,
                design: "scout".into(),
                num_ships: 3.0,
                state: FleetState::Idle,
                destination_star_id: None,
            })
            .into_iter()
            .collect(),
        empire_stores: vec![],
        last_simulation: None,
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("galaxy_sync=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    log::info!("Starting galaxy-sync-client ({:?}, run={}s)", config, args.run_secs);

    let (transport, outbound) = ChannelTransport::new();
    let (inbound_tx, mut inbound) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(
        LoopbackServer::new()
            .run(outbound, inbound_tx)
            .instrument(tracing::info_span!("loopback_server")),
    );

    let ctx = SyncContext::new(config, Arc::new(transport))?;

    // Presentation-side subscribers.
    ctx.bus().subscribe::<Empire, _>(Delivery::On(Thread::Ui), |e| {
        log::info!("UI: empire {} is \"{}\"", e.id, e.display_name);
    });
    ctx.bus().subscribe::<Star, _>(Delivery::On(Thread::Ui), |s| {
        let pop: f32 = s
            .planets
            .iter()
            .filter_map(|p| p.colony.as_ref())
            .map(|c| c.population)
            .sum();
        log::info!("UI: star {} [{}] population {:.2}", s.id, s.name, pop);
    });

    ctx.send_hello()?;

    let mut ui_tick = tokio::time::interval(Duration::from_millis(50));
    let deadline = tokio::time::sleep(Duration::from_secs(args.run_secs));
    tokio::pin!(deadline);

    let mut watch = None;
    let mut modified = false;

    loop {
        tokio::select! {
            Some(frame) = inbound.recv() => {
                if let Err(e) = ctx.handle_bytes(&frame) {
                    log::warn!("Dropping inbound frame: {}", e);
                }
            }
            _ = ui_tick.tick() => {
                ctx.poll_ui();

                if !ctx.empires().has_my_empire() {
                    continue;
                }
                // A burst of lookups; misses coalesce into one request.
                for id in [0, 2, 3, 2] {
                    let _ = ctx.empires().get(id);
                }

                if watch.is_none() {
                    watch = Some(ctx.stars().watch(HOME_STAR_ID));
                }
                if !modified {
                    if let Some(home) = ctx.stars().get(HOME_STAR_ID) {
                        let focus = Focus { population: 0.4, farming: 0.2, mining: 0.2, energy: 0.2 };
                        let m = StarModification::new(ModificationKind::AdjustFocus { planet_index: 0, focus });
                        ctx.stars().apply_modification(home, m)?;
                        modified = true;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    drop(watch);
    ctx.poll_ui();

    for star in ctx.stars().my_stars().iter() {
        log::info!("Owned star {} [{}] at {}", star.id, star.name, star.sector);
    }
    let stats = ctx.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
