//! Peer-local file store indexed by name and by content hash

use std::collections::HashMap;

use parking_lot::RwLock;

use super::PeerError;
use crate::files::{FileHash, FileMetadata, FileRecord, Piece, PieceIndex};

/// A record plus whether its content has been verified against its hash.
///
/// Only records registered through `insert_complete` are verified; a
/// download's record holds every piece before merge checks it.
#[derive(Debug)]
struct StoredFile {
    record: FileRecord,
    verified: bool,
}

/// Files a peer holds, complete or in progress.
///
/// The by-hash index serves pieces to other peers; the by-name index is
/// populated only for verified files. Locks are always taken by-name first
/// when both are needed.
#[derive(Debug, Default)]
pub struct LocalFileStore {
    by_hash: RwLock<HashMap<FileHash, StoredFile>>,
    by_name: RwLock<HashMap<String, FileHash>>,
}

impl LocalFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a complete, verified file under both its name and its hash.
    ///
    /// Replaces any unverified record for the same hash. A later file with the
    /// same name shadows an earlier one in the by-name index only.
    pub fn insert_complete(&self, record: FileRecord) {
        let hash = record.hash();
        let name = record.name().to_string();

        let mut by_name = self.by_name.write();
        let mut by_hash = self.by_hash.write();
        by_hash.insert(
            hash,
            StoredFile {
                record,
                verified: true,
            },
        );
        match by_name.insert(name.clone(), hash) {
            Some(previous) if previous != hash => {
                tracing::debug!(%name, %previous, current = %hash, "Name now refers to a different file");
            }
            _ => {}
        }
    }

    /// Prepares the store for an incoming download.
    ///
    /// Returns a snapshot of whatever is already held for the hash, or a new
    /// empty record that is also registered so acquired pieces can be served
    /// while the download runs.
    pub fn begin_download(&self, metadata: &FileMetadata) -> FileRecord {
        let mut by_hash = self.by_hash.write();
        by_hash
            .entry(metadata.hash)
            .or_insert_with(|| StoredFile {
                record: FileRecord::partial(metadata.clone()),
                verified: false,
            })
            .record
            .clone()
    }

    /// Makes one acquired piece available to other peers.
    ///
    /// Has no effect when the hash is not held or the piece is already
    /// present.
    pub fn publish_piece(&self, hash: FileHash, piece: Piece) -> bool {
        self.by_hash
            .write()
            .get_mut(&hash)
            .is_some_and(|stored| stored.record.insert_piece(piece))
    }

    /// Drops a downloaded record that failed verification.
    ///
    /// The record is removed even when every piece is present, so the
    /// pieces stop being served and the next download starts empty.
    /// Verified files are left untouched.
    pub fn discard(&self, hash: FileHash) {
        let mut by_hash = self.by_hash.write();
        if by_hash.get(&hash).is_some_and(|stored| !stored.verified) {
            by_hash.remove(&hash);
            tracing::debug!(%hash, "Discarded unverified file");
        }
    }

    /// Looks up one piece for serving.
    ///
    /// # Errors
    ///
    /// - `PeerError::FileNotFound` - If no record exists for the hash
    /// - `PeerError::PieceNotFound` - If the record lacks the piece
    pub fn piece(&self, hash: FileHash, index: PieceIndex) -> Result<Piece, PeerError> {
        let by_hash = self.by_hash.read();
        let stored = by_hash.get(&hash).ok_or_else(|| PeerError::FileNotFound {
            key: hash.to_string(),
        })?;
        stored
            .record
            .piece(index)
            .cloned()
            .ok_or(PeerError::PieceNotFound { hash, index })
    }

    /// Metadata of a complete file known by name.
    pub fn metadata_by_name(&self, name: &str) -> Option<FileMetadata> {
        let by_name = self.by_name.read();
        let hash = by_name.get(name)?;
        self.by_hash
            .read()
            .get(hash)
            .map(|stored| stored.record.metadata().clone())
    }

    /// Metadata of any file held by hash, complete or not.
    pub fn metadata_by_hash(&self, hash: FileHash) -> Option<FileMetadata> {
        self.by_hash
            .read()
            .get(&hash)
            .map(|stored| stored.record.metadata().clone())
    }

    /// Checks whether the file is held with every piece present.
    pub fn is_complete(&self, hash: FileHash) -> bool {
        self.by_hash
            .read()
            .get(&hash)
            .is_some_and(|stored| stored.record.is_complete())
    }

    /// Number of files held, including partial ones.
    pub fn file_count(&self) -> usize {
        self.by_hash.read().len()
    }
}
