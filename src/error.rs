//! Error taxonomy for the synchronization core.
//!
//! Cache misses and missing auxiliary stars are *not* errors; they surface as
//! `None` or a shorter auxiliary list.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The connected empire is not known yet (no hello received).
    /// Callers must check `has_my_empire` before authoring anything.
    #[error("self empire is not known yet")]
    SelfEmpireUnknown,

    /// The modification transform refused the change.
    #[error("suspicious modification on star {star_id}: {reason}")]
    SuspiciousModification { star_id: i64, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("packet codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Runtime components must be built inside a Tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, SyncError>;
