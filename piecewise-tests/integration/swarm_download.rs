//! Multi-peer downloads over the simulated swarm

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use piecewise_core::config::{PeerConfig, PiecewiseConfig};
use piecewise_core::simulation::{SimulatedSwarm, SimulatedTrackerClient};
use piecewise_core::tracker::RequestContext;
use piecewise_core::{FileRecord, PeerError, PeerNode, PieceIndex, TrackerError, TrackerRegistry};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn address(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn patterned(length: usize) -> Bytes {
    Bytes::from((0..length).map(|i| (i % 239) as u8).collect::<Vec<_>>())
}

fn swarm() -> SimulatedSwarm {
    SimulatedSwarm::new(Arc::new(TrackerRegistry::new()))
}

#[tokio::test]
async fn test_three_mib_file_round_trips_through_swarm() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();

    let content = patterned(3 * 1024 * 1024);
    let source = dir.path().join("video.bin");
    tokio::fs::write(&source, &content).await.unwrap();

    let seeder = swarm.spawn_node(address(10001), &dir.path().join("seeder"));
    let metadata = seeder.upload_file(&source).await.unwrap();
    assert_eq!(metadata.piece_size, 1024 * 1024);
    assert_eq!(metadata.piece_count, 3);

    let leecher = swarm.spawn_node(address(10002), &dir.path().join("leecher"));
    let path = leecher.download(metadata.hash).await.unwrap();

    assert_eq!(path, dir.path().join("leecher").join("video.bin"));
    assert_eq!(tokio::fs::read(&path).await.unwrap(), content.to_vec());
    assert_eq!(swarm.pieces_served(address(10001)), 3);
}

#[tokio::test]
async fn test_disjoint_holders_each_serve_their_pieces() {
    let swarm = swarm();
    let registry = swarm.registry().clone();
    let dir = TempDir::new().unwrap();

    let record = FileRecord::from_content("split.bin", patterned(1000));
    let hash = record.hash();
    assert_eq!(record.metadata().piece_count, 4);

    // The original uploader goes offline, leaving two partial holders.
    let origin = swarm.spawn_node(address(10011), dir.path());
    swarm.seed(&origin, record.clone()).await.unwrap();
    swarm.set_unreachable(address(10011));

    let holdings = [(address(10012), vec![0, 1]), (address(10013), vec![2, 3])];
    for (holder, indices) in &holdings {
        let node = swarm.spawn_node(*holder, dir.path());
        node.store().begin_download(record.metadata());
        let context = RequestContext::new(*holder);
        for index in indices.iter().copied().map(PieceIndex::new) {
            let piece = record.piece(index).unwrap().clone();
            assert!(node.store().publish_piece(hash, piece));
            registry.post_piece_info(&context, hash, index).unwrap();
        }
    }

    let leecher = swarm.spawn_node(address(10014), &dir.path().join("leecher"));
    let path = leecher.download(hash).await.unwrap();

    assert_eq!(
        tokio::fs::read(&path).await.unwrap(),
        patterned(1000).to_vec()
    );
    assert_eq!(swarm.pieces_served(address(10012)), 2);
    assert_eq!(swarm.pieces_served(address(10013)), 2);
    assert_eq!(swarm.pieces_served(address(10011)), 0);
}

#[tokio::test]
async fn test_corrupted_piece_fails_verification() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();

    let seeder = swarm.spawn_node(address(10021), dir.path());
    let metadata = swarm
        .seed(&seeder, FileRecord::from_content("tampered.bin", patterned(900)))
        .await
        .unwrap();
    swarm.corrupt_piece(address(10021), PieceIndex::new(1));

    let out = dir.path().join("leecher");
    let leecher = swarm.spawn_node(address(10022), &out);
    let error = leecher.download(metadata.hash).await.unwrap_err();

    assert!(error.is_hash_mismatch(), "unexpected error: {error}");
    assert!(!out.join("tampered.bin").exists());
    assert!(leecher.store().metadata_by_hash(metadata.hash).is_none());
}

#[tokio::test]
async fn test_redownload_after_verification_failure_uses_healthy_holder() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();
    let record = FileRecord::from_content("retry.bin", patterned(900));
    let hash = record.hash();

    let tampering = swarm.spawn_node(address(10024), dir.path());
    swarm.seed(&tampering, record.clone()).await.unwrap();
    swarm.corrupt_piece(address(10024), PieceIndex::new(1));

    let out = dir.path().join("leecher");
    let leecher = swarm.spawn_node(address(10025), &out);
    let error = leecher.download(hash).await.unwrap_err();
    assert!(error.is_hash_mismatch(), "unexpected error: {error}");
    assert!(!leecher.store().is_complete(hash));
    assert!(leecher.piece(hash, PieceIndex::new(1)).is_err());

    let healthy = swarm.spawn_node(address(10026), dir.path());
    swarm.seed(&healthy, record).await.unwrap();
    swarm.set_unreachable(address(10024));

    let path = leecher.download(hash).await.unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), patterned(900).to_vec());
    assert!(leecher.store().is_complete(hash));
    assert_eq!(swarm.pieces_served(address(10026)), 4);
}

#[tokio::test]
async fn test_transient_failure_recovered_by_fallback() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();

    let seeder = swarm.spawn_node(address(10031), dir.path());
    let content = patterned(1000);
    let metadata = swarm
        .seed(&seeder, FileRecord::from_content("flaky.bin", content.clone()))
        .await
        .unwrap();
    swarm.fail_piece(address(10031), PieceIndex::new(2), 1);

    let leecher = swarm.spawn_node(address(10032), &dir.path().join("leecher"));
    let path = leecher.download(metadata.hash).await.unwrap();

    assert_eq!(tokio::fs::read(&path).await.unwrap(), content.to_vec());
    assert_eq!(swarm.pieces_served(address(10031)), 4);
}

#[tokio::test]
async fn test_failing_piece_moves_to_second_holder() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();
    let record = FileRecord::from_content("mirrored.bin", patterned(1000));

    for port in [10041, 10042] {
        let seeder = swarm.spawn_node(address(port), dir.path());
        swarm.seed(&seeder, record.clone()).await.unwrap();
    }
    swarm.fail_piece(address(10041), PieceIndex::new(0), usize::MAX);

    let leecher = swarm.spawn_node(address(10043), &dir.path().join("leecher"));
    let path = leecher.download(record.hash()).await.unwrap();

    assert_eq!(
        tokio::fs::read(&path).await.unwrap(),
        patterned(1000).to_vec()
    );
    assert!(swarm.pieces_served(address(10042)) >= 1);
    assert!(swarm.pieces_served(address(10041)) <= 3);
}

#[tokio::test]
async fn test_permanent_failure_reports_incomplete() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();

    let seeder = swarm.spawn_node(address(10051), dir.path());
    let metadata = swarm
        .seed(&seeder, FileRecord::from_content("broken.bin", patterned(1000)))
        .await
        .unwrap();
    swarm.fail_piece(address(10051), PieceIndex::new(3), usize::MAX);

    let out = dir.path().join("leecher");
    let leecher = swarm.spawn_node(address(10052), &out);
    let result = leecher.download(metadata.hash).await;

    assert!(matches!(
        result,
        Err(PeerError::Incomplete {
            collected: 3,
            expected: 4
        })
    ));
    assert!(!out.join("broken.bin").exists());

    // Pieces acquired before the failure are already shareable.
    assert!(leecher.piece(metadata.hash, PieceIndex::new(0)).is_ok());
    assert!(!leecher.store().is_complete(metadata.hash));
}

#[tokio::test]
async fn test_cancelled_download_stops_fetching() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();

    let seeder = swarm.spawn_node(address(10061), dir.path());
    let metadata = swarm
        .seed(&seeder, FileRecord::from_content("slow.bin", patterned(1000)))
        .await
        .unwrap();

    let out = dir.path().join("leecher");
    let leecher = swarm.spawn_node_with_config(PeerConfig {
        listen_address: address(10062),
        download_dir: out.clone(),
        fetch_pause: Duration::from_secs(5),
        ..PiecewiseConfig::for_testing().peer
    });

    let cancel = CancellationToken::new();
    let download = {
        let leecher = leecher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { leecher.download_with_cancel(metadata.hash, cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), download)
        .await
        .expect("download did not observe cancellation")
        .unwrap();
    assert!(matches!(result, Err(PeerError::Cancelled)));
    assert!(swarm.pieces_served(address(10061)) < 4);
    assert!(!out.join("slow.bin").exists());
}

#[tokio::test]
async fn test_tracker_outage_fails_resolution() {
    let swarm = swarm();
    let dir = TempDir::new().unwrap();

    let seeder = swarm.spawn_node(address(10071), dir.path());
    let metadata = swarm
        .seed(&seeder, FileRecord::from_content("orphan.bin", patterned(500)))
        .await
        .unwrap();

    let tracker = Arc::new(SimulatedTrackerClient::new(
        swarm.registry().clone(),
        RequestContext::new(address(10072)),
    ));
    let leecher = PeerNode::new(
        address(10072),
        PeerConfig {
            listen_address: address(10072),
            download_dir: dir.path().join("leecher"),
            ..PiecewiseConfig::for_testing().peer
        },
        tracker.clone(),
        Arc::new(swarm.clone()),
    );

    tracker.set_unavailable(true);
    assert!(matches!(
        leecher.download(metadata.hash).await,
        Err(PeerError::Tracker(TrackerError::Unavailable { .. }))
    ));

    tracker.set_unavailable(false);
    let path = leecher.download(metadata.hash).await.unwrap();
    assert_eq!(tokio::fs::read(&path).await.unwrap(), patterned(500).to_vec());
}
