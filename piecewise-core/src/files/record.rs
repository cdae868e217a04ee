//! In-memory file representation shared by trackers and peers

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::split::{content_hash, merge_pieces, piece_count_for, split_content};
use super::{FileError, FileHash, Piece, PieceIndex};

/// Descriptive metadata announced to the tracker for a file.
///
/// Everything a downloader needs to know before fetching pieces: how many
/// pieces to expect, how long each is, and the digest the reassembled content
/// must match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Base file name, without directories
    pub name: String,
    /// Digest of the complete content
    pub hash: FileHash,
    /// Size of every piece except possibly the last
    pub piece_size: u64,
    /// Number of pieces, `ceil(length / piece_size)`
    pub piece_count: u32,
    /// Total content length in bytes
    pub length: u64,
}

impl FileMetadata {
    /// Iterates every index a complete copy of the file holds.
    pub fn expected_indices(&self) -> impl Iterator<Item = PieceIndex> + use<> {
        (0..self.piece_count).map(PieceIndex::new)
    }

    /// Checks whether `index` falls within the file's piece range.
    pub fn contains_index(&self, index: PieceIndex) -> bool {
        index.as_u32() < self.piece_count
    }

    /// Returns the exact payload length of the piece at `index`.
    ///
    /// `None` when the index is out of range or lies past the end of the
    /// content, which only happens for inconsistent metadata.
    pub fn piece_length(&self, index: PieceIndex) -> Option<u64> {
        if !self.contains_index(index) {
            return None;
        }
        let start = u64::from(index.as_u32()).checked_mul(self.piece_size)?;
        Some(self.length.checked_sub(start)?.min(self.piece_size))
    }
}

/// A file's pieces together with its metadata.
///
/// Completeness is derived from the pieces present: a record is complete
/// exactly when every index in `0..piece_count` is held.
#[derive(Debug, Clone)]
pub struct FileRecord {
    metadata: FileMetadata,
    pieces: BTreeMap<PieceIndex, Piece>,
}

impl FileRecord {
    /// Splits content into a complete record.
    pub fn from_content(name: impl Into<String>, content: Bytes) -> Self {
        let hash = content_hash(&content);
        let split = split_content(&content);
        let length = content.len() as u64;

        let metadata = FileMetadata {
            name: name.into(),
            hash,
            piece_size: split.piece_size,
            piece_count: piece_count_for(length, split.piece_size),
            length,
        };

        Self {
            metadata,
            pieces: split.pieces,
        }
    }

    /// Reads a local file and splits it into a complete record.
    ///
    /// The record is named after the file's base name.
    ///
    /// # Errors
    ///
    /// - `FileError::InvalidPath` - If the path has no usable file name
    /// - `FileError::Io` - If the file cannot be read
    pub async fn from_path(path: &Path) -> Result<Self, FileError> {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| FileError::InvalidPath {
                reason: format!("no file name in {}", path.display()),
            })?
            .to_string();

        let content = tokio::fs::read(path).await?;
        Ok(Self::from_content(name, Bytes::from(content)))
    }

    /// Creates an empty record to be filled piece by piece.
    pub fn partial(metadata: FileMetadata) -> Self {
        Self {
            metadata,
            pieces: BTreeMap::new(),
        }
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn hash(&self) -> FileHash {
        self.metadata.hash
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn piece(&self, index: PieceIndex) -> Option<&Piece> {
        self.pieces.get(&index)
    }

    pub fn has_piece(&self, index: PieceIndex) -> bool {
        self.pieces.contains_key(&index)
    }

    /// Adds a piece to the record.
    ///
    /// Returns false without modifying the record when the index is already
    /// held or lies outside the file's piece range.
    pub fn insert_piece(&mut self, piece: Piece) -> bool {
        if !self.metadata.contains_index(piece.index) || self.pieces.contains_key(&piece.index) {
            return false;
        }
        self.pieces.insert(piece.index, piece);
        true
    }

    /// Number of distinct pieces held.
    pub fn collected(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.len() == self.metadata.piece_count as usize
    }

    pub fn held_indices(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        self.pieces.keys().copied()
    }

    pub fn missing_indices(&self) -> Vec<PieceIndex> {
        self.metadata
            .expected_indices()
            .filter(|index| !self.pieces.contains_key(index))
            .collect()
    }

    /// Reassembles the file content.
    ///
    /// Refuses to produce output for an incomplete record rather than
    /// returning truncated content.
    ///
    /// # Errors
    ///
    /// - `FileError::Incomplete` - If any expected piece is missing
    /// - `FileError::HashMismatch` - If the reassembled content fails verification
    pub fn merge(&self) -> Result<Bytes, FileError> {
        if !self.is_complete() {
            return Err(FileError::Incomplete {
                collected: self.collected(),
                expected: self.metadata.piece_count as usize,
            });
        }

        merge_pieces(self.pieces.values(), self.metadata.hash)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_record_from_content_is_complete() {
        let content = Bytes::from(vec![9u8; 700]);
        let record = FileRecord::from_content("data.bin", content.clone());

        let metadata = record.metadata();
        assert_eq!(metadata.name, "data.bin");
        assert_eq!(metadata.length, 700);
        assert_eq!(metadata.piece_size, 256);
        assert_eq!(metadata.piece_count, 3);
        assert!(record.is_complete());
        assert!(record.missing_indices().is_empty());
        assert_eq!(record.merge().unwrap(), content);
    }

    #[test]
    fn test_piece_length_accounts_for_short_tail() {
        let record = FileRecord::from_content("tail", Bytes::from(vec![0u8; 700]));
        let metadata = record.metadata();

        assert_eq!(metadata.piece_length(PieceIndex::new(0)), Some(256));
        assert_eq!(metadata.piece_length(PieceIndex::new(2)), Some(188));
        assert_eq!(metadata.piece_length(PieceIndex::new(3)), None);
    }

    #[test]
    fn test_piece_length_past_content_end_is_none() {
        let record = FileRecord::from_content("short", Bytes::from(vec![0u8; 700]));
        let inflated = FileMetadata {
            piece_count: 5,
            ..record.metadata().clone()
        };

        assert_eq!(inflated.piece_length(PieceIndex::new(2)), Some(188));
        assert_eq!(inflated.piece_length(PieceIndex::new(3)), None);
        assert_eq!(inflated.piece_length(PieceIndex::new(4)), None);
    }

    #[test]
    fn test_partial_record_refuses_merge() {
        let full = FileRecord::from_content("partial", Bytes::from(vec![4u8; 600]));
        let mut partial = FileRecord::partial(full.metadata().clone());

        let first = full.piece(PieceIndex::new(0)).unwrap().clone();
        assert!(partial.insert_piece(first.clone()));
        assert!(!partial.insert_piece(first), "duplicate insert must be rejected");

        assert!(!partial.is_complete());
        assert_eq!(
            partial.missing_indices(),
            vec![PieceIndex::new(1), PieceIndex::new(2)]
        );
        assert!(matches!(
            partial.merge(),
            Err(FileError::Incomplete {
                collected: 1,
                expected: 3
            })
        ));
    }

    #[test]
    fn test_insert_rejects_out_of_range_piece() {
        let full = FileRecord::from_content("range", Bytes::from(vec![1u8; 300]));
        let mut partial = FileRecord::partial(full.metadata().clone());

        let stray = Piece::new(PieceIndex::new(99), Bytes::from_static(b"x"));
        assert!(!partial.insert_piece(stray));
        assert_eq!(partial.collected(), 0);
    }

    #[test]
    fn test_empty_file_is_trivially_complete() {
        let record = FileRecord::from_content("empty", Bytes::new());
        assert_eq!(record.metadata().piece_count, 0);
        assert!(record.is_complete());
        assert!(record.merge().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_from_path_uses_base_name() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let test_data = b"Hello, swarm! This is test data for piece splitting.";
        temp_file.write_all(test_data).unwrap();

        let record = FileRecord::from_path(temp_file.path()).await.unwrap();
        let expected_name = temp_file
            .path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        assert_eq!(record.name(), expected_name);
        assert_eq!(record.metadata().length, test_data.len() as u64);
        assert_eq!(record.hash(), content_hash(test_data));
    }

    #[tokio::test]
    async fn test_record_from_missing_path_fails() {
        let result = FileRecord::from_path(Path::new("/nonexistent/file.txt")).await;
        assert!(matches!(result, Err(FileError::Io(_))));
    }
}
