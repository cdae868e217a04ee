//! Piece splitting, content hashing and order-preserving reassembly

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};

use super::{FileError, FileHash, Piece, PieceIndex};

/// Largest piece size, used for any file above the last tier.
pub const MAX_PIECE_SIZE: u64 = 256 * 1024 * 1024; // 256 MiB

/// Inclusive upper bound of file length mapped to the piece size used for it.
///
/// Every tier compares with `<=`, so a file of exactly 256 bytes uses 1-byte
/// pieces and a file of exactly 1 MiB uses 1 KiB pieces.
const PIECE_SIZE_TIERS: [(u64, u64); 4] = [
    (256, 1),
    // 1 KiB -> 256 B
    (1024, 256),
    // 1 MiB -> 1 KiB
    (1024 * 1024, 1024),
    // 256 MiB -> 1 MiB
    (256 * 1024 * 1024, 1024 * 1024),
];

/// Pieces produced from one file's content.
#[derive(Debug, Clone)]
pub struct SplitContent {
    pub pieces: BTreeMap<PieceIndex, Piece>,
    pub piece_size: u64,
}

/// Returns the piece size used for content of the given total length.
pub fn piece_size_for_length(length: u64) -> u64 {
    PIECE_SIZE_TIERS
        .iter()
        .find(|(limit, _)| length <= *limit)
        .map(|(_, size)| *size)
        .unwrap_or(MAX_PIECE_SIZE)
}

/// Number of pieces a file of `length` bytes splits into.
pub fn piece_count_for(length: u64, piece_size: u64) -> u32 {
    if piece_size == 0 {
        return 0;
    }
    length.div_ceil(piece_size) as u32
}

/// Splits content into fixed-size pieces with dense zero-based serial numbers.
///
/// The final piece is shorter when the length does not divide evenly. Piece
/// payloads share the input buffer.
pub fn split_content(content: &Bytes) -> SplitContent {
    let piece_size = piece_size_for_length(content.len() as u64);
    let stride = piece_size as usize;

    let pieces = (0..content.len())
        .step_by(stride)
        .enumerate()
        .map(|(serial, start)| {
            let end = (start + stride).min(content.len());
            let index = PieceIndex::new(serial as u32);
            (index, Piece::new(index, content.slice(start..end)))
        })
        .collect();

    SplitContent { pieces, piece_size }
}

/// Computes the SHA-1 digest identifying the given content.
pub fn content_hash(content: &[u8]) -> FileHash {
    let digest = Sha1::digest(content);

    let mut hash_array = [0u8; 20];
    hash_array.copy_from_slice(&digest[..20]);
    FileHash::new(hash_array)
}

/// Concatenates pieces in serial order and verifies the result.
///
/// Pieces are stably sorted by serial number first, so the input order does
/// not matter. Callers are responsible for passing a complete piece set.
///
/// # Errors
///
/// - `FileError::HashMismatch` - If the reassembled content does not hash to `expected`
pub fn merge_pieces<'a, I>(pieces: I, expected: FileHash) -> Result<Bytes, FileError>
where
    I: IntoIterator<Item = &'a Piece>,
{
    let mut ordered: Vec<&Piece> = pieces.into_iter().collect();
    ordered.sort_by_key(|piece| piece.index);

    let total: usize = ordered.iter().map(|piece| piece.len()).sum();
    let mut buffer = BytesMut::with_capacity(total);
    for piece in ordered {
        buffer.extend_from_slice(&piece.payload);
    }

    let content = buffer.freeze();
    let actual = content_hash(&content);
    if actual != expected {
        return Err(FileError::HashMismatch { expected, actual });
    }

    Ok(content)
}
