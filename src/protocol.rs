//! Client ⇄ server wire protocol.
//!
//! This module owns **every message that crosses the transport boundary**.
//! The core treats a [`Packet`] as an opaque tagged union; only the payload
//! shapes below matter.
//!
//! ## Payloads
//!
//! | Variant          | Direction        | Payload                              |
//! |------------------|------------------|--------------------------------------|
//! | `request_empire` | client → server  | `{ empire_ids: [i64] }`              |
//! | `empire_details` | server → client  | `{ empires: [Empire] }`              |
//! | `modify_star`    | client → server  | `{ star_id, modifications: [..] }`   |
//! | `star_updated`   | server → client  | `{ stars: [Star] }`                  |
//! | `hello`          | client → server  | `{ last_simulation: i64? }`          |
//! | `welcome`        | server → client  | `{ empire: Empire }`                 |
//!
//! ## Design rules
//!
//! 1. Every struct is `Serialize + Deserialize` with snake_case JSON.
//! 2. Field order is irrelevant; consumers match by name.
//! 3. Pushes always carry full entity snapshots, never field deltas.

use serde::{Deserialize, Serialize};

use crate::types::{Empire, Star, StarModification};

// ---------------------------------------------------------------------------
// Empire payloads
// ---------------------------------------------------------------------------

/// Batched request for empires the client has no cached copy of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEmpirePacket {
    pub empire_ids: Vec<i64>,
}

/// Authoritative empire snapshots pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmpireDetailsPacket {
    pub empires: Vec<Empire>,
}

// ---------------------------------------------------------------------------
// Star payloads
// ---------------------------------------------------------------------------

/// Forwarded modification intents.  The server re-validates and answers
/// with a [`StarUpdatedPacket`] carrying its authoritative result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModifyStarPacket {
    pub star_id: i64,
    pub modifications: Vec<StarModification>,
}

/// Authoritative star snapshots pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StarUpdatedPacket {
    pub stars: Vec<Star>,
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Sent on connect.  `last_simulation` is the resynchronization watermark:
/// the server replies with every owned star simulated after it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloPacket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_simulation: Option<i64>,
}

/// Server reply to [`HelloPacket`], naming the connected client's empire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WelcomePacket {
    pub empire: Empire,
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Packet {
    RequestEmpire(RequestEmpirePacket),
    EmpireDetails(EmpireDetailsPacket),
    ModifyStar(ModifyStarPacket),
    StarUpdated(StarUpdatedPacket),
    Hello(HelloPacket),
    Welcome(WelcomePacket),
}

impl Packet {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::RequestEmpire(_) => "request_empire",
            Packet::EmpireDetails(_) => "empire_details",
            Packet::ModifyStar(_) => "modify_star",
            Packet::StarUpdated(_) => "star_updated",
            Packet::Hello(_) => "hello",
            Packet::Welcome(_) => "welcome",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
