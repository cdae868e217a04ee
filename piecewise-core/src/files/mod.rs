//! Content-addressed file pieces
//!
//! Splits raw file content into ordered, immutable pieces, identifies files by
//! the SHA-1 digest of their full content, and reassembles pieces back into the
//! original bytes with whole-file integrity checking.

pub mod record;
pub mod split;

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use record::{FileMetadata, FileRecord};
pub use split::{
    MAX_PIECE_SIZE, SplitContent, content_hash, merge_pieces, piece_count_for,
    piece_size_for_length, split_content,
};

/// SHA-1 digest of a file's full content.
///
/// The lowercase hex rendering is the canonical file identifier used as the
/// key in tracker and peer maps and on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileHash([u8; 20]);

impl FileHash {
    /// Creates FileHash from a raw 20-byte digest.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte digest.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for FileHash {
    type Err = FileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s).map_err(|e| FileError::InvalidHash {
            value: s.to_string(),
            reason: e.to_string(),
        })?;

        let bytes: [u8; 20] = decoded
            .try_into()
            .map_err(|_| FileError::InvalidHash {
                value: s.to_string(),
                reason: "expected 20 bytes".to_string(),
            })?;

        Ok(Self(bytes))
    }
}

impl Serialize for FileHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FileHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Zero-based serial number of a piece within a file.
///
/// Assigned densely in split order. The only ordering key used when pieces
/// are reassembled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contiguous slice of a file identified by its serial number.
///
/// Payloads are reference-counted, so cloning a piece never copies file data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub index: PieceIndex,
    pub payload: Bytes,
}

impl Piece {
    pub fn new(index: PieceIndex, payload: Bytes) -> Self {
        Self { index, payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Errors raised while splitting, identifying or reassembling files.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: FileHash, actual: FileHash },

    #[error("File incomplete: {collected} of {expected} pieces collected")]
    Incomplete { collected: usize, expected: usize },

    #[error("Invalid file hash '{value}': {reason}")]
    InvalidHash { value: String, reason: String },

    #[error("Invalid file path: {reason}")]
    InvalidPath { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_hash_display_and_parse() {
        let hash = FileHash::new([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef, 0x01, 0x23, 0x45, 0x67,
        ]);
        let rendered = hash.to_string();
        assert_eq!(rendered, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(rendered.parse::<FileHash>().unwrap(), hash);
    }

    #[test]
    fn test_file_hash_rejects_bad_input() {
        assert!(matches!(
            "not-hex".parse::<FileHash>(),
            Err(FileError::InvalidHash { .. })
        ));
        assert!(matches!(
            "abcd".parse::<FileHash>(),
            Err(FileError::InvalidHash { .. })
        ));
    }

    #[test]
    fn test_file_hash_serializes_as_hex_string() {
        let hash = FileHash::new([0xff; 20]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "ff".repeat(20)));

        let back: FileHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_piece_index_ordering() {
        let piece1 = PieceIndex::new(5);
        let piece2 = PieceIndex::new(10);
        assert!(piece1 < piece2);
        assert_eq!(piece1.as_u32(), 5);
        assert_eq!(piece2.to_string(), "10");
    }
}
