//! Authoritative in-memory registry of files, peers and piece availability

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;

use parking_lot::RwLock;

use super::types::{PeerAvailability, RequestContext, TrackerStats};
use super::TrackerError;
use crate::files::{FileHash, FileMetadata, PieceIndex};

/// Tracker-side record of a peer.
///
/// Keyed by network address. Created on first contact and never removed.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub address: SocketAddr,
    /// Last client id the peer declared; advisory only
    pub client_id: Option<String>,
    /// Held piece indices per file
    pub availability: HashMap<FileHash, BTreeSet<PieceIndex>>,
}

impl PeerRecord {
    fn new(address: SocketAddr) -> Self {
        Self {
            address,
            client_id: None,
            availability: HashMap::new(),
        }
    }
}

/// All registry state, guarded as one unit.
///
/// Invariants maintained under the write lock:
/// - every address in `file_peers[hash]` has a non-empty
///   `peers[address].availability[hash]`
/// - `file_peers[hash]` is a set, so a peer is listed at most once per file
/// - `files[hash]` is written once and never replaced
#[derive(Debug, Default)]
struct RegistryState {
    files: HashMap<FileHash, FileMetadata>,
    file_peers: HashMap<FileHash, BTreeSet<SocketAddr>>,
    peers: HashMap<SocketAddr, PeerRecord>,
}

impl RegistryState {
    fn peer_entry(&mut self, context: &RequestContext, address: SocketAddr) -> &mut PeerRecord {
        let peer = self
            .peers
            .entry(address)
            .or_insert_with(|| PeerRecord::new(address));
        if let Some(client_id) = &context.client_id {
            peer.client_id = Some(client_id.clone());
        }
        peer
    }

    fn record_pieces<I>(
        &mut self,
        context: &RequestContext,
        address: SocketAddr,
        hash: FileHash,
        indices: I,
    ) where
        I: IntoIterator<Item = PieceIndex>,
    {
        let held = self
            .peer_entry(context, address)
            .availability
            .entry(hash)
            .or_default();
        held.extend(indices);

        if !held.is_empty() {
            self.file_peers.entry(hash).or_default().insert(address);
        }
    }
}

/// Tracker registry shared by all concurrent tracker requests.
///
/// A single readers-writer lock covers the whole registry, so every
/// operation observes and preserves the invariants on `RegistryState`.
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    state: RwLock<RegistryState>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the caller as a holder of every piece of a file.
    ///
    /// Metadata is stored on first upload only; later uploads of the same
    /// hash leave it untouched but still record the caller's availability.
    ///
    /// # Errors
    ///
    /// - `TrackerError::MissingPeerAddress` - If the caller declared no address
    pub fn upload(
        &self,
        context: &RequestContext,
        metadata: FileMetadata,
    ) -> Result<(), TrackerError> {
        let address = context.peer_address()?;
        let hash = metadata.hash;

        let mut state = self.state.write();
        let stored = state.files.entry(hash).or_insert(metadata);
        let piece_count = stored.piece_count;
        let name = stored.name.clone();

        state.record_pieces(
            context,
            address,
            hash,
            (0..piece_count).map(PieceIndex::new),
        );

        tracing::info!(
            %hash,
            peer = %address,
            name = %name,
            pieces = piece_count,
            "Registered upload"
        );
        Ok(())
    }

    /// Returns the metadata announced for a file.
    ///
    /// # Errors
    ///
    /// - `TrackerError::FileNotFound` - If no peer has uploaded this hash
    pub fn file_info(&self, hash: FileHash) -> Result<FileMetadata, TrackerError> {
        self.state
            .read()
            .files
            .get(&hash)
            .cloned()
            .ok_or(TrackerError::FileNotFound { hash })
    }

    /// Lists peers holding pieces of a file along with the indices they hold.
    ///
    /// Registers the requester as a known peer even if it holds nothing yet,
    /// so it can later announce pieces as it acquires them. An unknown hash
    /// yields an empty list.
    ///
    /// # Errors
    ///
    /// - `TrackerError::MissingPeerAddress` - If the caller declared no address
    pub fn peers(
        &self,
        context: &RequestContext,
        hash: FileHash,
    ) -> Result<Vec<PeerAvailability>, TrackerError> {
        let address = context.peer_address()?;

        let mut state = self.state.write();
        state.peer_entry(context, address);

        let Some(holders) = state.file_peers.get(&hash) else {
            tracing::debug!(%hash, requester = %address, "No peers hold file");
            return Ok(Vec::new());
        };

        let peers: Vec<PeerAvailability> = holders
            .iter()
            .filter_map(|holder| {
                let pieces = state.peers.get(holder)?.availability.get(&hash)?;
                Some(PeerAvailability {
                    address: *holder,
                    pieces: pieces.clone(),
                })
            })
            .collect();

        tracing::debug!(%hash, requester = %address, holders = peers.len(), "Served peer list");
        Ok(peers)
    }

    /// Records that the caller now holds one more piece of a file.
    ///
    /// Indices are unioned into the caller's holdings, never replacing them.
    /// The index is not checked against the file's piece count.
    ///
    /// # Errors
    ///
    /// - `TrackerError::MissingPeerAddress` - If the caller declared no address
    /// - `TrackerError::FileNotFound` - If the hash was never uploaded
    pub fn post_piece_info(
        &self,
        context: &RequestContext,
        hash: FileHash,
        index: PieceIndex,
    ) -> Result<(), TrackerError> {
        let address = context.peer_address()?;

        let mut state = self.state.write();
        if !state.files.contains_key(&hash) {
            return Err(TrackerError::FileNotFound { hash });
        }

        state.record_pieces(context, address, hash, [index]);
        tracing::trace!(%hash, peer = %address, %index, "Recorded piece availability");
        Ok(())
    }

    /// Returns a snapshot of the tracker's record for `address`.
    pub fn peer_record(&self, address: SocketAddr) -> Option<PeerRecord> {
        self.state.read().peers.get(&address).cloned()
    }

    pub fn stats(&self) -> TrackerStats {
        let state = self.state.read();
        TrackerStats {
            files: state.files.len(),
            peers: state.peers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::files::FileRecord;

    fn address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn test_metadata() -> FileMetadata {
        FileRecord::from_content("movie.bin", Bytes::from(vec![5u8; 700]))
            .metadata()
            .clone()
    }

    fn all_indices(count: u32) -> BTreeSet<PieceIndex> {
        (0..count).map(PieceIndex::new).collect()
    }

    #[test]
    fn test_upload_then_peers_returns_full_holder() {
        let registry = TrackerRegistry::new();
        let metadata = test_metadata();
        let uploader = RequestContext::new(address(9001)).with_client_id("seed");

        registry.upload(&uploader, metadata.clone()).unwrap();

        let downloader = RequestContext::new(address(9002));
        let peers = registry.peers(&downloader, metadata.hash).unwrap();

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address, address(9001));
        assert_eq!(peers[0].pieces, all_indices(metadata.piece_count));
    }

    #[test]
    fn test_repeated_upload_does_not_duplicate_peer() {
        let registry = TrackerRegistry::new();
        let metadata = test_metadata();
        let uploader = RequestContext::new(address(9001));

        registry.upload(&uploader, metadata.clone()).unwrap();
        registry.upload(&uploader, metadata.clone()).unwrap();

        let peers = registry
            .peers(&RequestContext::new(address(9002)), metadata.hash)
            .unwrap();
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_metadata_is_first_writer_wins() {
        let registry = TrackerRegistry::new();
        let original = test_metadata();
        let mut renamed = original.clone();
        renamed.name = "renamed.bin".to_string();

        registry
            .upload(&RequestContext::new(address(9001)), original.clone())
            .unwrap();
        registry
            .upload(&RequestContext::new(address(9003)), renamed)
            .unwrap();

        assert_eq!(registry.file_info(original.hash).unwrap().name, "movie.bin");

        let peers = registry
            .peers(&RequestContext::new(address(9002)), original.hash)
            .unwrap();
        assert_eq!(peers.len(), 2, "second uploader still gains availability");
    }

    #[test]
    fn test_upload_requires_peer_address() {
        let registry = TrackerRegistry::new();
        let result = registry.upload(&RequestContext::anonymous(), test_metadata());
        assert!(matches!(result, Err(TrackerError::MissingPeerAddress)));
        assert_eq!(registry.stats(), TrackerStats::default());
    }

    #[test]
    fn test_file_info_unknown_hash() {
        let registry = TrackerRegistry::new();
        let hash = test_metadata().hash;
        assert!(matches!(
            registry.file_info(hash),
            Err(TrackerError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_peers_registers_requester_without_listing_it() {
        let registry = TrackerRegistry::new();
        let metadata = test_metadata();
        registry
            .upload(&RequestContext::new(address(9001)), metadata.clone())
            .unwrap();

        let requester = address(9002);
        registry
            .peers(&RequestContext::new(requester), metadata.hash)
            .unwrap();

        let record = registry.peer_record(requester).expect("requester registered");
        assert!(record.availability.is_empty());
        assert_eq!(registry.stats().peers, 2);

        let peers = registry
            .peers(&RequestContext::new(address(9003)), metadata.hash)
            .unwrap();
        assert!(peers.iter().all(|peer| peer.address != requester));
    }

    #[test]
    fn test_peers_for_unknown_hash_is_empty() {
        let registry = TrackerRegistry::new();
        let peers = registry
            .peers(&RequestContext::new(address(9002)), test_metadata().hash)
            .unwrap();
        assert!(peers.is_empty());
    }

    #[test]
    fn test_post_piece_info_unknown_hash_fails() {
        let registry = TrackerRegistry::new();
        let result = registry.post_piece_info(
            &RequestContext::new(address(9002)),
            test_metadata().hash,
            PieceIndex::new(0),
        );
        assert!(matches!(result, Err(TrackerError::FileNotFound { .. })));
    }

    #[test]
    fn test_post_piece_info_unions_indices() {
        let registry = TrackerRegistry::new();
        let metadata = test_metadata();
        registry
            .upload(&RequestContext::new(address(9001)), metadata.clone())
            .unwrap();

        let leecher = RequestContext::new(address(9002));
        registry
            .post_piece_info(&leecher, metadata.hash, PieceIndex::new(2))
            .unwrap();
        registry
            .post_piece_info(&leecher, metadata.hash, PieceIndex::new(0))
            .unwrap();
        registry
            .post_piece_info(&leecher, metadata.hash, PieceIndex::new(2))
            .unwrap();

        let peers = registry
            .peers(&RequestContext::new(address(9003)), metadata.hash)
            .unwrap();
        let leecher_entry = peers
            .iter()
            .find(|peer| peer.address == address(9002))
            .expect("leecher listed after announcing");
        let expected: BTreeSet<PieceIndex> =
            [PieceIndex::new(0), PieceIndex::new(2)].into_iter().collect();
        assert_eq!(leecher_entry.pieces, expected);
    }

    #[test]
    fn test_post_piece_info_accepts_out_of_range_index() {
        let registry = TrackerRegistry::new();
        let metadata = test_metadata();
        registry
            .upload(&RequestContext::new(address(9001)), metadata.clone())
            .unwrap();

        let beyond = PieceIndex::new(metadata.piece_count + 10);
        registry
            .post_piece_info(&RequestContext::new(address(9002)), metadata.hash, beyond)
            .unwrap();

        let record = registry.peer_record(address(9002)).unwrap();
        assert!(record.availability[&metadata.hash].contains(&beyond));
    }

    #[test]
    fn test_client_id_is_recorded_but_not_a_key() {
        let registry = TrackerRegistry::new();
        let metadata = test_metadata();

        registry
            .upload(
                &RequestContext::new(address(9001)).with_client_id("first"),
                metadata.clone(),
            )
            .unwrap();
        registry
            .upload(
                &RequestContext::new(address(9001)).with_client_id("second"),
                metadata,
            )
            .unwrap();

        let record = registry.peer_record(address(9001)).unwrap();
        assert_eq!(record.client_id.as_deref(), Some("second"));
        assert_eq!(registry.stats().peers, 1);
    }

    #[test]
    fn test_concurrent_announcements_preserve_invariants() {
        let registry = std::sync::Arc::new(TrackerRegistry::new());
        let metadata = test_metadata();
        registry
            .upload(&RequestContext::new(address(9001)), metadata.clone())
            .unwrap();

        let handles: Vec<_> = (0..8u16)
            .map(|worker| {
                let registry = registry.clone();
                let hash = metadata.hash;
                std::thread::spawn(move || {
                    let context = RequestContext::new(address(9100 + worker));
                    for index in 0..3 {
                        registry
                            .post_piece_info(&context, hash, PieceIndex::new(index))
                            .unwrap();
                        registry.peers(&context, hash).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let peers = registry
            .peers(&RequestContext::new(address(9999)), metadata.hash)
            .unwrap();
        assert_eq!(peers.len(), 9);
        assert!(peers.iter().all(|peer| !peer.pieces.is_empty()));
    }
}
