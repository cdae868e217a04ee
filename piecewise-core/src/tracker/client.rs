//! Peer-side tracker communication interface

use async_trait::async_trait;

use super::TrackerError;
use super::types::PeerAvailability;
use crate::files::{FileHash, FileMetadata, PieceIndex};

/// Abstract tracker communication interface used by peer nodes.
///
/// An implementation is bound to one calling peer: it attaches that peer's
/// declared address and client id to every request, so the tracker can key
/// availability by caller.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Announces a complete local file, registering this peer as holder of
    /// every piece.
    ///
    /// # Errors
    ///
    /// - `TrackerError::MissingPeerAddress` - If the tracker could not resolve the caller
    /// - `TrackerError::Unavailable` - If the tracker could not be reached
    async fn upload(&self, metadata: &FileMetadata) -> Result<(), TrackerError>;

    /// Fetches announced metadata for a file.
    ///
    /// # Errors
    ///
    /// - `TrackerError::FileNotFound` - If the hash is unknown
    /// - `TrackerError::Unavailable` - If the tracker could not be reached
    async fn file_info(&self, hash: FileHash) -> Result<FileMetadata, TrackerError>;

    /// Lists peers holding pieces of a file, registering this peer as known.
    ///
    /// # Errors
    ///
    /// - `TrackerError::Unavailable` - If the tracker could not be reached
    async fn peers(&self, hash: FileHash) -> Result<Vec<PeerAvailability>, TrackerError>;

    /// Reports that this peer now holds `index` of a file.
    ///
    /// # Errors
    ///
    /// - `TrackerError::FileNotFound` - If the hash is unknown
    /// - `TrackerError::Unavailable` - If the tracker could not be reached
    async fn post_piece_info(&self, hash: FileHash, index: PieceIndex)
    -> Result<(), TrackerError>;

    /// Returns tracker location for debugging and logging purposes.
    fn tracker_url(&self) -> &str;
}
