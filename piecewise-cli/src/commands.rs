//! CLI command implementations

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use piecewise_core::tracker::generate_client_id;
use piecewise_core::{FileHash, PeerNode, PiecewiseConfig, PiecewiseError, TrackerRegistry};
use piecewise_rpc::{
    HttpPeerConnector, HttpTrackerClient, PeerControlClient, base_url, serve_peer, serve_tracker,
};
use tokio::net::TcpListener;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the tracker service
    Tracker {
        /// Address to listen on
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Run a peer daemon that serves pieces and accepts control requests
    Peer {
        /// Address to listen on and announce to the tracker
        #[arg(long)]
        listen: Option<SocketAddr>,
        /// Tracker address
        #[arg(long)]
        tracker: Option<SocketAddr>,
        /// Directory downloads are written to
        #[arg(long)]
        download_dir: Option<PathBuf>,
        /// Files to upload once the peer is listening
        #[arg(long = "seed")]
        seeds: Vec<PathBuf>,
    },
    /// Ask a running peer to upload one of its local files
    Upload {
        /// Peer daemon address
        #[arg(long)]
        peer: Option<SocketAddr>,
        /// File to upload
        path: PathBuf,
    },
    /// Look up file metadata through a running peer
    Info {
        /// Peer daemon address
        #[arg(long)]
        peer: Option<SocketAddr>,
        /// File name or content hash
        key: String,
    },
    /// Ask a running peer to download a file
    Download {
        /// Peer daemon address
        #[arg(long)]
        peer: Option<SocketAddr>,
        /// Content hash of the file
        hash: String,
    },
}

/// Handle the CLI command
///
/// # Errors
///
/// Returns the failure of the command that ran, with context.
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = PiecewiseConfig::from_env();

    match command {
        Commands::Tracker { listen } => run_tracker(config, listen).await,
        Commands::Peer {
            listen,
            tracker,
            download_dir,
            seeds,
        } => run_peer(config, listen, tracker, download_dir, seeds).await,
        Commands::Upload { peer, path } => upload(&config, peer, &path).await,
        Commands::Info { peer, key } => info(&config, peer, &key).await,
        Commands::Download { peer, hash } => download(&config, peer, &hash).await,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Runs the tracker until interrupted.
///
/// # Errors
///
/// - If the listen address cannot be bound or the server fails
pub async fn run_tracker(
    mut config: PiecewiseConfig,
    listen: Option<SocketAddr>,
) -> anyhow::Result<()> {
    if let Some(address) = listen {
        config.tracker.listen_address = address;
    }

    let listener = TcpListener::bind(config.tracker.listen_address)
        .await
        .with_context(|| format!("binding tracker to {}", config.tracker.listen_address))?;

    let registry = Arc::new(TrackerRegistry::new());
    serve_tracker(listener, registry, shutdown_signal())
        .await
        .context("tracker server failed")
}

/// Runs a peer daemon until interrupted, seeding `seeds` at start-up.
///
/// # Errors
///
/// - If the listen address cannot be bound or the server fails
pub async fn run_peer(
    mut config: PiecewiseConfig,
    listen: Option<SocketAddr>,
    tracker: Option<SocketAddr>,
    download_dir: Option<PathBuf>,
    seeds: Vec<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(address) = listen {
        config.peer.listen_address = address;
    }
    if let Some(address) = tracker {
        config.tracker.listen_address = address;
    }
    if let Some(dir) = download_dir {
        config.peer.download_dir = dir;
    }

    let listener = TcpListener::bind(config.peer.listen_address)
        .await
        .with_context(|| format!("binding peer to {}", config.peer.listen_address))?;
    let address = listener.local_addr()?;
    config.peer.listen_address = address;

    let tracker_url = base_url(config.tracker.listen_address)?;
    let client_id = generate_client_id();
    tracing::info!(peer = %address, tracker = %tracker_url, %client_id, "Starting peer");

    let tracker_client =
        HttpTrackerClient::new(tracker_url, address, client_id, &config.network)
            .map_err(PiecewiseError::from)?;
    let connector = HttpPeerConnector::new(&config.network).map_err(PiecewiseError::from)?;
    let node = Arc::new(PeerNode::new(
        address,
        config.peer.clone(),
        Arc::new(tracker_client),
        Arc::new(connector),
    ));

    let server = tokio::spawn(serve_peer(listener, node.clone(), shutdown_signal()));

    for path in seeds {
        match node.upload_file(&path).await {
            Ok(metadata) => println!("Seeding {} as {}", metadata.name, metadata.hash),
            Err(e) => {
                let error = PiecewiseError::from(e);
                tracing::error!(path = %path.display(), error = %error, "Failed to seed file");
                eprintln!("Could not seed {}: {}", path.display(), error.user_message());
            }
        }
    }

    server.await.context("peer server task failed")??;
    Ok(())
}

fn control_client(
    config: &PiecewiseConfig,
    peer: Option<SocketAddr>,
) -> anyhow::Result<PeerControlClient> {
    let address = peer.unwrap_or(config.peer.listen_address);
    let client = PeerControlClient::new(address, &config.network).map_err(PiecewiseError::from)?;
    Ok(client)
}

fn user_facing(error: piecewise_core::PeerError) -> anyhow::Error {
    let error = PiecewiseError::from(error);
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}

/// Uploads a file through a running peer.
///
/// Relative paths are resolved against this process's working directory
/// before being sent to the daemon.
///
/// # Errors
///
/// - If the path cannot be resolved or the peer rejects the upload
pub async fn upload(
    config: &PiecewiseConfig,
    peer: Option<SocketAddr>,
    path: &Path,
) -> anyhow::Result<()> {
    let path = std::path::absolute(path)
        .with_context(|| format!("resolving {}", path.display()))?;
    let client = control_client(config, peer)?;

    let hash = client.upload(&path).await.map_err(user_facing)?;
    println!("Uploaded {}", path.display());
    println!("  Hash: {hash}");
    Ok(())
}

/// Prints file metadata resolved through a running peer.
///
/// # Errors
///
/// - If the file is unknown or the peer cannot be reached
pub async fn info(
    config: &PiecewiseConfig,
    peer: Option<SocketAddr>,
    key: &str,
) -> anyhow::Result<()> {
    let client = control_client(config, peer)?;
    let metadata = client.file_info(key).await.map_err(user_facing)?;

    println!("Name:        {}", metadata.name);
    println!("Hash:        {}", metadata.hash);
    println!("Length:      {} bytes", metadata.length);
    println!("Piece size:  {} bytes", metadata.piece_size);
    println!("Pieces:      {}", metadata.piece_count);
    Ok(())
}

/// Downloads a file through a running peer.
///
/// # Errors
///
/// - If the hash is malformed or the download fails
pub async fn download(
    config: &PiecewiseConfig,
    peer: Option<SocketAddr>,
    hash: &str,
) -> anyhow::Result<()> {
    let hash: FileHash = hash
        .parse()
        .map_err(PiecewiseError::from)
        .context("invalid content hash")?;
    let client = control_client(config, peer)?;

    println!("Downloading {hash}...");
    let path = client.download(hash).await.map_err(user_facing)?;
    println!("Saved to {}", path.display());
    Ok(())
}
