//! Peer node: local file store, piece serving and multi-source downloads
//!
//! A peer announces files it holds to the tracker, serves their pieces to
//! other peers, and downloads files it lacks by fetching disjoint piece sets
//! from several remote peers concurrently.

pub mod download;
pub mod node;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

pub use download::DownloadPhase;
pub use node::PeerNode;
pub use store::LocalFileStore;

use crate::files::{FileError, FileHash, Piece, PieceIndex};
use crate::tracker::TrackerError;

/// Opens piece-fetching channels to remote peers.
///
/// Dialing is separate from fetching: a peer that cannot be dialed at all
/// fails its whole work list, while a failed fetch only affects one index.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Dials a remote peer.
    ///
    /// # Errors
    ///
    /// - `PeerError::Unreachable` - If the peer cannot be contacted
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn PieceSource>, PeerError>;
}

/// A dialed remote peer that serves pieces.
#[async_trait]
pub trait PieceSource: Send + Sync {
    /// Requests one piece of a file.
    ///
    /// # Errors
    ///
    /// - `PeerError::FileNotFound` - If the remote does not hold the file
    /// - `PeerError::PieceNotFound` - If the remote does not hold the piece
    /// - `PeerError::Unreachable` - If the request could not be completed
    async fn piece(&self, hash: FileHash, index: PieceIndex) -> Result<Piece, PeerError>;

    /// Address of the remote peer.
    fn address(&self) -> SocketAddr;
}

/// Errors raised by peer node operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("File {key} not found")]
    FileNotFound { key: String },

    #[error("Piece {index} of file {hash} not found")]
    PieceNotFound { hash: FileHash, index: PieceIndex },

    #[error("Peer {address} unreachable: {reason}")]
    Unreachable { address: SocketAddr, reason: String },

    #[error("Remote peer error: {reason}")]
    Remote { reason: String },

    #[error("Download incomplete: {collected} of {expected} pieces collected")]
    Incomplete { collected: usize, expected: usize },

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download task failed: {reason}")]
    TaskFailed { reason: String },

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("File error: {0}")]
    File(FileError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FileError> for PeerError {
    fn from(error: FileError) -> Self {
        match error {
            FileError::Incomplete {
                collected,
                expected,
            } => PeerError::Incomplete {
                collected,
                expected,
            },
            FileError::Io(e) => PeerError::Io(e),
            other => PeerError::File(other),
        }
    }
}

impl PeerError {
    /// Checks if this error is a failed integrity check of reassembled content.
    pub fn is_hash_mismatch(&self) -> bool {
        matches!(self, PeerError::File(FileError::HashMismatch { .. }))
    }

    /// Checks if this error means a requested file or piece is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PeerError::FileNotFound { .. }
                | PeerError::PieceNotFound { .. }
                | PeerError::Tracker(TrackerError::FileNotFound { .. })
        )
    }
}
