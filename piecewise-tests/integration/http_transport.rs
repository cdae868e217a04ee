//! End-to-end flows over real HTTP on loopback

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use piecewise_core::config::{PeerConfig, PiecewiseConfig};
use piecewise_core::tracker::{RequestContext, generate_client_id};
use piecewise_core::{FileRecord, Piece, PeerError, PeerNode, PieceIndex, TrackerRegistry};
use piecewise_rpc::{
    HttpPeerConnector, HttpTrackerClient, PeerControlClient, base_url, serve_peer, serve_tracker,
};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct HttpPeer {
    node: Arc<PeerNode>,
    control: PeerControlClient,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<std::io::Result<()>>,
}

impl HttpPeer {
    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.server.await.unwrap().unwrap();
    }
}

async fn spawn_tracker() -> (SocketAddr, Arc<TrackerRegistry>) {
    let registry = Arc::new(TrackerRegistry::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(serve_tracker(
        listener,
        registry.clone(),
        std::future::pending(),
    ));
    (address, registry)
}

async fn spawn_peer(tracker: SocketAddr, download_dir: &Path) -> HttpPeer {
    let config = PiecewiseConfig::for_testing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let tracker_client = HttpTrackerClient::new(
        base_url(tracker).unwrap(),
        address,
        generate_client_id(),
        &config.network,
    )
    .unwrap();
    let connector = HttpPeerConnector::new(&config.network).unwrap();
    let node = Arc::new(PeerNode::new(
        address,
        PeerConfig {
            listen_address: address,
            download_dir: download_dir.to_path_buf(),
            ..config.peer
        },
        Arc::new(tracker_client),
        Arc::new(connector),
    ));

    let (shutdown, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_peer(listener, node.clone(), async move {
        let _ = stopped.await;
    }));
    let control = PeerControlClient::new(address, &config.network).unwrap();

    HttpPeer {
        node,
        control,
        shutdown: Some(shutdown),
        server,
    }
}

fn patterned(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i % 241) as u8).collect()
}

#[tokio::test]
async fn test_download_and_reshare_over_http() {
    let (tracker, registry) = spawn_tracker().await;
    let dir = TempDir::new().unwrap();

    let content = patterned(5000);
    let source = dir.path().join("report.pdf");
    tokio::fs::write(&source, &content).await.unwrap();

    let seeder = spawn_peer(tracker, &dir.path().join("seeder")).await;
    seeder.control.health().await.unwrap();
    let hash = seeder.control.upload(&source).await.unwrap();

    let leecher = spawn_peer(tracker, &dir.path().join("leecher")).await;
    let metadata = leecher.control.file_info(&hash.to_string()).await.unwrap();
    assert_eq!(metadata.name, "report.pdf");
    assert_eq!(metadata.length, 5000);

    let path = leecher.control.download(hash).await.unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), content);
    assert_eq!(
        leecher.control.file_info("report.pdf").await.unwrap(),
        metadata
    );

    let announced = registry.peer_record(leecher.node.address()).unwrap();
    assert_eq!(
        announced.availability[&hash].len(),
        metadata.piece_count as usize
    );

    // With the seeder gone, the leecher's copy is enough for a third peer.
    seeder.stop().await;
    let third = spawn_peer(tracker, &dir.path().join("third")).await;
    let path = third.control.download(hash).await.unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), content);
}

#[tokio::test]
async fn test_incomplete_download_reported_over_http() {
    let (tracker, _registry) = spawn_tracker().await;
    let dir = TempDir::new().unwrap();

    let source = dir.path().join("gone.bin");
    tokio::fs::write(&source, patterned(700)).await.unwrap();

    let seeder = spawn_peer(tracker, &dir.path().join("seeder")).await;
    let hash = seeder.control.upload(&source).await.unwrap();
    seeder.stop().await;

    let leecher = spawn_peer(tracker, &dir.path().join("leecher")).await;
    let result = leecher.control.download(hash).await;

    assert!(
        matches!(
            result,
            Err(PeerError::Incomplete {
                collected: 0,
                expected: 3
            })
        ),
        "unexpected result: {result:?}"
    );
    assert!(!dir.path().join("leecher").join("gone.bin").exists());
}

#[tokio::test]
async fn test_unknown_keys_are_not_found_over_http() {
    let (tracker, _registry) = spawn_tracker().await;
    let dir = TempDir::new().unwrap();
    let peer = spawn_peer(tracker, dir.path()).await;

    let by_name = peer.control.file_info("missing.bin").await;
    assert!(matches!(by_name, Err(PeerError::FileNotFound { .. })));

    let unknown = piecewise_core::files::split::content_hash(b"never uploaded");
    let by_hash = peer.control.file_info(&unknown.to_string()).await;
    assert!(matches!(by_hash, Err(ref e) if e.is_not_found()));

    assert!(peer.node.piece(unknown, PieceIndex::new(0)).is_err());
}

#[tokio::test]
async fn test_verification_failure_reported_over_http() {
    let (tracker, registry) = spawn_tracker().await;
    let dir = TempDir::new().unwrap();

    let record = FileRecord::from_content("forged.bin", Bytes::from(patterned(900)));
    let metadata = record.metadata().clone();

    // The seeder holds every piece, but piece 1 does not match the content hash.
    let seeder = spawn_peer(tracker, &dir.path().join("seeder")).await;
    seeder.node.store().begin_download(&metadata);
    for index in metadata.expected_indices() {
        let mut payload = record.piece(index).unwrap().payload.to_vec();
        if index == PieceIndex::new(1) {
            payload[0] ^= 0xff;
        }
        seeder
            .node
            .store()
            .publish_piece(metadata.hash, Piece::new(index, Bytes::from(payload)));
    }
    registry
        .upload(&RequestContext::new(seeder.node.address()), metadata.clone())
        .unwrap();

    let leecher = spawn_peer(tracker, &dir.path().join("leecher")).await;
    let error = leecher.control.download(metadata.hash).await.unwrap_err();

    assert!(error.is_hash_mismatch(), "unexpected error: {error:?}");
    assert!(!dir.path().join("leecher").join("forged.bin").exists());
    assert!(leecher.node.store().metadata_by_hash(metadata.hash).is_none());
}
