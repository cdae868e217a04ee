//! Tracker registry and tracker communication abstractions.
//!
//! The registry is the authoritative, in-memory record of which peers hold
//! which pieces of which files. Peers talk to it through the `TrackerClient`
//! trait so the transport can be swapped between HTTP and in-process.

pub mod client;
pub mod registry;
pub mod types;

pub use client::TrackerClient;
pub use registry::{PeerRecord, TrackerRegistry};
pub use types::{PeerAvailability, RequestContext, TrackerStats, generate_client_id};

use crate::files::FileHash;

/// Errors surfaced by tracker operations.
///
/// Registry failures are always returned to the caller and never retried
/// server-side.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    #[error("File {hash} not known to tracker")]
    FileNotFound { hash: FileHash },

    #[error("Caller did not declare a peer address")]
    MissingPeerAddress,

    #[error("Invalid request metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Tracker unavailable: {reason}")]
    Unavailable { reason: String },
}
