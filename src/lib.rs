//! Galaxy Sync
//!
//! Client-side world-state synchronization for a space-strategy game:
//! cached empires and stars, optimistic star modifications, and
//! reconciliation with authoritative server pushes.
//!
//! ## Architecture
//!
//! ```text
//! SyncContext  (context.rs)          ← wiring, inbound routing, hello
//!   ├── EmpireSynchronizer (empire.rs)  ← lookups, coalesced fetches
//!   ├── StarSynchronizer   (star.rs)    ← optimistic writes, refresh, pushes
//!   │     └── Simulation / StarModifier (simulation.rs)
//!   ├── EmpireStore / StarStore (store.rs)
//!   ├── EventBus    (bus.rs)            ← typed pub/sub
//!   └── TaskRunner  (scheduler.rs)      ← ui / background contexts
//! ```
//!
//! The server is reached only through [`transport::Transport`].

// Protocol types are always available (no runtime feature needed).
pub mod error;
pub mod protocol;
pub mod simulation;
pub mod types;

// Client runtime modules require the `runtime` feature.
#[cfg(feature = "runtime")]
pub mod bus;
#[cfg(feature = "runtime")]
pub mod context;
#[cfg(feature = "runtime")]
pub mod empire;
#[cfg(feature = "runtime")]
pub mod scheduler;
#[cfg(feature = "runtime")]
pub mod star;
#[cfg(feature = "runtime")]
pub mod store;
#[cfg(feature = "runtime")]
pub mod transport;

// Convenience re-exports (runtime only)
#[cfg(feature = "runtime")]
pub use bus::{Delivery, EventBus, SubscriptionId};
#[cfg(feature = "runtime")]
pub use context::{SyncContext, SyncParts};
#[cfg(feature = "runtime")]
pub use empire::{native_empire, EmpireSynchronizer, NATIVE_EMPIRE_ID};
#[cfg(feature = "runtime")]
pub use scheduler::{TaskRunner, Thread};
#[cfg(feature = "runtime")]
pub use star::{RefreshWatch, StarSynchronizer};
#[cfg(feature = "runtime")]
pub use store::{EmpireStore, MemoryEmpireStore, MemoryStarStore, StarCursor, StarQuery, StarStore};
#[cfg(feature = "runtime")]
pub use transport::{ChannelTransport, Transport};
pub use error::{Result, SyncError};
pub use protocol::Packet;
pub use types::{Empire, SectorCoord, Star, StarModification, SyncConfig, SyncStats};
