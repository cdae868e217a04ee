//! Peer node: the operations a peer exposes to its owner and to other peers

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::download;
use super::store::LocalFileStore;
use super::{PeerConnector, PeerError};
use crate::config::PeerConfig;
use crate::files::{FileHash, FileMetadata, FileRecord, Piece, PieceIndex};
use crate::tracker::{TrackerClient, TrackerError};

/// A peer in the swarm.
///
/// Holds its local store and the handles it needs to reach the tracker and
/// other peers. Cheap to share behind an `Arc`; every operation takes
/// `&self` and the store synchronises internally, so piece serving runs
/// concurrently with downloads into the same file.
pub struct PeerNode {
    address: SocketAddr,
    config: PeerConfig,
    tracker: Arc<dyn TrackerClient>,
    connector: Arc<dyn PeerConnector>,
    store: Arc<LocalFileStore>,
}

impl PeerNode {
    /// Creates a peer node advertising `address` to other peers.
    pub fn new(
        address: SocketAddr,
        config: PeerConfig,
        tracker: Arc<dyn TrackerClient>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            address,
            config,
            tracker,
            connector,
            store: Arc::new(LocalFileStore::new()),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocalFileStore> {
        &self.store
    }

    pub(crate) fn tracker(&self) -> &Arc<dyn TrackerClient> {
        &self.tracker
    }

    pub(crate) fn connector(&self) -> &Arc<dyn PeerConnector> {
        &self.connector
    }

    /// Splits a local file, stores it, and announces it to the tracker.
    ///
    /// The file is stored before the announcement so it can be served as
    /// soon as the tracker starts listing this peer.
    ///
    /// # Errors
    ///
    /// - `PeerError::File` - If the path has no usable file name
    /// - `PeerError::Io` - If the file cannot be read
    /// - `PeerError::Tracker` - If the tracker rejects or cannot be reached
    pub async fn upload_file(&self, path: &Path) -> Result<FileMetadata, PeerError> {
        let record = FileRecord::from_path(path).await?;
        let metadata = record.metadata().clone();
        self.store.insert_complete(record);

        self.tracker.upload(&metadata).await?;

        tracing::info!(
            hash = %metadata.hash,
            name = %metadata.name,
            pieces = metadata.piece_count,
            piece_size = metadata.piece_size,
            "Uploaded file"
        );
        Ok(metadata)
    }

    /// Looks up metadata for a file by name, or by hash when given one.
    ///
    /// Local copies are consulted first by name, then by hash. A key that
    /// parses as a hash is then looked up on the tracker. Nothing derives a
    /// hash from a name.
    ///
    /// # Errors
    ///
    /// - `PeerError::FileNotFound` - If neither the store nor the tracker knows the file
    /// - `PeerError::Tracker` - If the tracker cannot be reached
    pub async fn file_info(&self, key: &str) -> Result<FileMetadata, PeerError> {
        if let Some(metadata) = self.store.metadata_by_name(key) {
            return Ok(metadata);
        }

        let Ok(hash) = key.parse::<FileHash>() else {
            return Err(PeerError::FileNotFound {
                key: key.to_string(),
            });
        };

        if let Some(metadata) = self.store.metadata_by_hash(hash) {
            return Ok(metadata);
        }

        match self.tracker.file_info(hash).await {
            Ok(metadata) => Ok(metadata),
            Err(TrackerError::FileNotFound { .. }) => Err(PeerError::FileNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Serves one piece of a held file to another peer.
    ///
    /// # Errors
    ///
    /// - `PeerError::FileNotFound` - If the file is not held at all
    /// - `PeerError::PieceNotFound` - If the piece has not been acquired
    pub fn piece(&self, hash: FileHash, index: PieceIndex) -> Result<Piece, PeerError> {
        self.store.piece(hash, index)
    }

    /// Downloads a file from the swarm and writes it to the download
    /// directory.
    ///
    /// # Errors
    ///
    /// See [`PeerNode::download_with_cancel`].
    pub async fn download(&self, hash: FileHash) -> Result<PathBuf, PeerError> {
        self.download_with_cancel(hash, CancellationToken::new())
            .await
    }

    /// Downloads a file, stopping early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// - `PeerError::Tracker` - If metadata or the peer list cannot be resolved
    /// - `PeerError::Incomplete` - If some pieces could not be collected from any holder
    /// - `PeerError::File` - If the reassembled content fails hash verification
    /// - `PeerError::Cancelled` - If `cancel` fired before completion
    /// - `PeerError::TaskFailed` - If a fetch task panicked
    /// - `PeerError::Io` - If the output file cannot be written
    pub async fn download_with_cancel(
        &self,
        hash: FileHash,
        cancel: CancellationToken,
    ) -> Result<PathBuf, PeerError> {
        download::run(self, hash, cancel).await
    }
}

impl std::fmt::Debug for PeerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerNode")
            .field("address", &self.address)
            .field("tracker", &self.tracker.tracker_url())
            .field("files", &self.store.file_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;
    use tempfile::{NamedTempFile, TempDir};

    use super::*;
    use crate::simulation::SimulatedSwarm;
    use crate::tracker::{RequestContext, TrackerRegistry};

    fn address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn write_temp(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[tokio::test]
    async fn test_upload_stores_locally_and_announces() {
        let registry = Arc::new(TrackerRegistry::new());
        let swarm = SimulatedSwarm::new(registry.clone());
        let dir = TempDir::new().unwrap();
        let node = swarm.spawn_node(address(9101), dir.path());

        let file = write_temp(&[7u8; 900]);
        let metadata = node.upload_file(file.path()).await.unwrap();

        assert_eq!(metadata.piece_count, 4);
        assert!(node.store().is_complete(metadata.hash));
        assert_eq!(registry.file_info(metadata.hash).unwrap(), metadata);

        let holders = registry
            .peers(&RequestContext::new(address(9999)), metadata.hash)
            .unwrap();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].address, address(9101));
    }

    #[tokio::test]
    async fn test_upload_missing_file_fails_without_announcing() {
        let registry = Arc::new(TrackerRegistry::new());
        let swarm = SimulatedSwarm::new(registry.clone());
        let dir = TempDir::new().unwrap();
        let node = swarm.spawn_node(address(9102), dir.path());

        let result = node.upload_file(Path::new("/nonexistent/input.bin")).await;
        assert!(matches!(result, Err(PeerError::Io(_))));
        assert_eq!(registry.stats().files, 0);
    }

    #[tokio::test]
    async fn test_file_info_lookup_order() {
        let registry = Arc::new(TrackerRegistry::new());
        let swarm = SimulatedSwarm::new(registry.clone());
        let dir = TempDir::new().unwrap();
        let seeder = swarm.spawn_node(address(9103), dir.path());
        let other = swarm.spawn_node(address(9104), dir.path());

        let file = write_temp(b"lookup order content");
        let metadata = seeder.upload_file(file.path()).await.unwrap();

        assert_eq!(seeder.file_info(&metadata.name).await.unwrap(), metadata);
        assert_eq!(
            seeder.file_info(&metadata.hash.to_string()).await.unwrap(),
            metadata
        );
        assert_eq!(
            other.file_info(&metadata.hash.to_string()).await.unwrap(),
            metadata,
            "unknown locally, resolved through the tracker"
        );
        assert!(matches!(
            other.file_info(&metadata.name).await,
            Err(PeerError::FileNotFound { .. })
        ));

        let unknown = FileRecord::from_content("x", Bytes::from_static(b"never uploaded")).hash();
        assert!(matches!(
            other.file_info(&unknown.to_string()).await,
            Err(PeerError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_piece_serving_distinguishes_not_found() {
        let registry = Arc::new(TrackerRegistry::new());
        let swarm = SimulatedSwarm::new(registry);
        let dir = TempDir::new().unwrap();
        let node = swarm.spawn_node(address(9105), dir.path());

        let file = write_temp(&[3u8; 300]);
        let metadata = node.upload_file(file.path()).await.unwrap();

        assert_eq!(
            node.piece(metadata.hash, PieceIndex::new(1)).unwrap().len(),
            44
        );
        assert!(matches!(
            node.piece(metadata.hash, PieceIndex::new(5)),
            Err(PeerError::PieceNotFound { .. })
        ));

        let other = FileRecord::from_content("y", Bytes::from_static(b"other")).hash();
        assert!(matches!(
            node.piece(other, PieceIndex::new(0)),
            Err(PeerError::FileNotFound { .. })
        ));
    }
}
