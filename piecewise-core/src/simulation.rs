//! In-process swarm for deterministic testing
//!
//! Peers talk to a shared `TrackerRegistry` directly and reach each other's
//! stores without networking. Faults (unreachable peers, failing or
//! corrupted pieces, an unavailable tracker) are injected per address.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::config::{PeerConfig, PiecewiseConfig};
use crate::files::{FileHash, FileMetadata, FileRecord, Piece, PieceIndex};
use crate::peer::{LocalFileStore, PeerConnector, PeerError, PeerNode, PieceSource};
use crate::tracker::{
    PeerAvailability, RequestContext, TrackerClient, TrackerError, TrackerRegistry,
};

/// Tracker client that calls a shared registry in-process.
///
/// Bound to one caller context, like a real client bound to one peer.
pub struct SimulatedTrackerClient {
    registry: Arc<TrackerRegistry>,
    context: RequestContext,
    unavailable: AtomicBool,
}

impl SimulatedTrackerClient {
    pub fn new(registry: Arc<TrackerRegistry>, context: RequestContext) -> Self {
        Self {
            registry,
            context,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with `TrackerError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), TrackerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TrackerError::Unavailable {
                reason: "simulated tracker outage".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrackerClient for SimulatedTrackerClient {
    async fn upload(&self, metadata: &FileMetadata) -> Result<(), TrackerError> {
        self.check_available()?;
        self.registry.upload(&self.context, metadata.clone())
    }

    async fn file_info(&self, hash: FileHash) -> Result<FileMetadata, TrackerError> {
        self.check_available()?;
        self.registry.file_info(hash)
    }

    async fn peers(&self, hash: FileHash) -> Result<Vec<PeerAvailability>, TrackerError> {
        self.check_available()?;
        self.registry.peers(&self.context, hash)
    }

    async fn post_piece_info(
        &self,
        hash: FileHash,
        index: PieceIndex,
    ) -> Result<(), TrackerError> {
        self.check_available()?;
        self.registry.post_piece_info(&self.context, hash, index)
    }

    fn tracker_url(&self) -> &str {
        "sim://tracker"
    }
}

#[derive(Default)]
struct SwarmState {
    stores: HashMap<SocketAddr, Arc<LocalFileStore>>,
    unreachable: HashSet<SocketAddr>,
    failing: HashMap<(SocketAddr, PieceIndex), usize>,
    corrupt: HashSet<(SocketAddr, PieceIndex)>,
    served: HashMap<SocketAddr, usize>,
}

/// A set of in-process peers sharing one tracker registry.
///
/// Also acts as every node's `PeerConnector`, routing piece requests to the
/// target node's store.
#[derive(Clone)]
pub struct SimulatedSwarm {
    registry: Arc<TrackerRegistry>,
    state: Arc<RwLock<SwarmState>>,
}

impl SimulatedSwarm {
    pub fn new(registry: Arc<TrackerRegistry>) -> Self {
        Self {
            registry,
            state: Arc::new(RwLock::new(SwarmState::default())),
        }
    }

    pub fn registry(&self) -> &Arc<TrackerRegistry> {
        &self.registry
    }

    /// Creates a node at `address` writing downloads into `download_dir`.
    ///
    /// Uses the testing preset, so fetches are not paced.
    pub fn spawn_node(&self, address: SocketAddr, download_dir: &Path) -> Arc<PeerNode> {
        let config = PeerConfig {
            listen_address: address,
            download_dir: download_dir.to_path_buf(),
            ..PiecewiseConfig::for_testing().peer
        };
        self.spawn_node_with_config(config)
    }

    /// Creates a node from an explicit peer configuration.
    pub fn spawn_node_with_config(&self, config: PeerConfig) -> Arc<PeerNode> {
        let address = config.listen_address;
        let tracker = Arc::new(SimulatedTrackerClient::new(
            self.registry.clone(),
            RequestContext::new(address).with_client_id(format!("sim-{}", address.port())),
        ));
        let node = Arc::new(PeerNode::new(
            address,
            config,
            tracker,
            Arc::new(self.clone()),
        ));
        self.state
            .write()
            .stores
            .insert(address, node.store().clone());
        node
    }

    /// Stores a complete file on `node` and announces it through the node's
    /// tracker client.
    ///
    /// # Errors
    ///
    /// - `PeerError::Tracker` - If the announcement is rejected
    pub async fn seed(
        &self,
        node: &PeerNode,
        record: FileRecord,
    ) -> Result<FileMetadata, PeerError> {
        let metadata = record.metadata().clone();
        node.store().insert_complete(record);
        node.tracker().upload(&metadata).await?;
        Ok(metadata)
    }

    /// Makes the peer refuse every connection and request.
    pub fn set_unreachable(&self, address: SocketAddr) {
        self.state.write().unreachable.insert(address);
    }

    pub fn set_reachable(&self, address: SocketAddr) {
        self.state.write().unreachable.remove(&address);
    }

    /// Makes the next `times` requests for one piece from one peer fail.
    pub fn fail_piece(&self, address: SocketAddr, index: PieceIndex, times: usize) {
        self.state.write().failing.insert((address, index), times);
    }

    /// Makes one peer serve one piece with its first byte flipped.
    pub fn corrupt_piece(&self, address: SocketAddr, index: PieceIndex) {
        self.state.write().corrupt.insert((address, index));
    }

    /// Number of pieces a peer has successfully served.
    pub fn pieces_served(&self, address: SocketAddr) -> usize {
        self.state.read().served.get(&address).copied().unwrap_or(0)
    }

    fn unreachable(address: SocketAddr) -> PeerError {
        PeerError::Unreachable {
            address,
            reason: "simulated peer offline".to_string(),
        }
    }

    fn serve(
        &self,
        address: SocketAddr,
        hash: FileHash,
        index: PieceIndex,
    ) -> Result<Piece, PeerError> {
        let mut state = self.state.write();
        if state.unreachable.contains(&address) {
            return Err(Self::unreachable(address));
        }
        match state.failing.get_mut(&(address, index)) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                return Err(PeerError::Remote {
                    reason: format!("simulated failure serving piece {index}"),
                });
            }
            _ => {}
        }

        let store = state
            .stores
            .get(&address)
            .cloned()
            .ok_or_else(|| Self::unreachable(address))?;
        let mut piece = store.piece(hash, index)?;

        if state.corrupt.contains(&(address, index)) {
            piece.payload = flip_first_byte(&piece.payload);
        }
        *state.served.entry(address).or_default() += 1;
        Ok(piece)
    }
}

fn flip_first_byte(payload: &Bytes) -> Bytes {
    let mut corrupted = BytesMut::from(payload.as_ref());
    if let Some(first) = corrupted.first_mut() {
        *first ^= 0xff;
    }
    corrupted.freeze()
}

#[async_trait]
impl PeerConnector for SimulatedSwarm {
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn PieceSource>, PeerError> {
        let state = self.state.read();
        if state.unreachable.contains(&address) || !state.stores.contains_key(&address) {
            return Err(Self::unreachable(address));
        }
        Ok(Arc::new(SimulatedSource {
            swarm: self.clone(),
            address,
        }))
    }
}

struct SimulatedSource {
    swarm: SimulatedSwarm,
    address: SocketAddr,
}

#[async_trait]
impl PieceSource for SimulatedSource {
    async fn piece(&self, hash: FileHash, index: PieceIndex) -> Result<Piece, PeerError> {
        tokio::task::yield_now().await;
        self.swarm.serve(self.address, hash, index)
    }

    fn address(&self) -> SocketAddr {
        self.address
    }
}
