//! Request and response types for tracker operations

use std::collections::BTreeSet;
use std::net::SocketAddr;

use uuid::Uuid;

use super::TrackerError;
use crate::files::PieceIndex;

/// Generates a fresh client id for a peer process.
pub fn generate_client_id() -> String {
    format!("piecewise-{}", Uuid::new_v4().simple())
}

/// Caller identity attached to a tracker request.
///
/// The address is claimed by the caller and is advisory: the transport layer
/// extracts it from request metadata but cannot verify it. The client id is
/// informational only and never used as a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub peer_address: Option<SocketAddr>,
    pub client_id: Option<String>,
}

impl RequestContext {
    /// Creates a context for a caller claiming `peer_address`.
    pub fn new(peer_address: SocketAddr) -> Self {
        Self {
            peer_address: Some(peer_address),
            client_id: None,
        }
    }

    /// Creates a context without any declared identity.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Resolves the caller's declared address.
    ///
    /// # Errors
    ///
    /// - `TrackerError::MissingPeerAddress` - If the caller did not declare one
    pub fn peer_address(&self) -> Result<SocketAddr, TrackerError> {
        self.peer_address.ok_or(TrackerError::MissingPeerAddress)
    }
}

/// Pieces of one file a peer is known to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAvailability {
    pub address: SocketAddr,
    pub pieces: BTreeSet<PieceIndex>,
}

/// Registry size counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// Distinct files announced
    pub files: usize,
    /// Distinct peers that have contacted the tracker
    pub peers: usize,
}
