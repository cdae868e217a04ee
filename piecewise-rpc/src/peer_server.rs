//! HTTP front end for a peer node
//!
//! Serves pieces to other peers and accepts control requests (upload,
//! lookup, download) from the node's owner.

use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use piecewise_core::{PeerNode, PieceIndex};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::tracker_server::parse_hash;
use crate::wire::{
    DownloadRequest, DownloadResponse, FileInfo, PeerUploadRequest, PeerUploadResponse,
    PieceResponse,
};

/// Builds the peer router over a shared node.
pub fn peer_router(node: Arc<PeerNode>) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/download", post(download))
        .route("/files/{key}", get(file_info))
        .route("/files/{key}/pieces/{serial}", get(piece))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(node)
}

/// Serves the peer on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// - `std::io::Error` - If the server fails while accepting connections
pub async fn serve_peer<F>(
    listener: TcpListener,
    node: Arc<PeerNode>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!(address = %node.address(), "Peer listening");
    axum::serve(listener, peer_router(node))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn upload(
    State(node): State<Arc<PeerNode>>,
    Json(request): Json<PeerUploadRequest>,
) -> Result<Json<PeerUploadResponse>, ApiError> {
    let metadata = node.upload_file(&request.path).await?;
    Ok(Json(PeerUploadResponse {
        hash: metadata.hash,
    }))
}

async fn file_info(
    State(node): State<Arc<PeerNode>>,
    Path(key): Path<String>,
) -> Result<Json<FileInfo>, ApiError> {
    Ok(Json(node.file_info(&key).await?.into()))
}

async fn download(
    State(node): State<Arc<PeerNode>>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let file_path = node.download(request.hash).await?;
    Ok(Json(DownloadResponse { file_path }))
}

async fn piece(
    State(node): State<Arc<PeerNode>>,
    Path((key, serial)): Path<(String, u32)>,
) -> Result<Json<PieceResponse>, ApiError> {
    let hash = parse_hash(&key)?;
    let piece = node.piece(hash, PieceIndex::new(serial))?;
    Ok(Json(PieceResponse::from(&piece)))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::net::SocketAddr;

    use piecewise_core::simulation::SimulatedSwarm;
    use piecewise_core::TrackerRegistry;
    use tempfile::{NamedTempFile, TempDir};

    use super::*;
    use crate::error::{ErrorBody, ErrorKind};

    async fn spawn_peer(node: Arc<PeerNode>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(serve_peer(listener, node, std::future::pending()));
        address
    }

    #[tokio::test]
    async fn test_serves_pieces_and_metadata() {
        let swarm = SimulatedSwarm::new(Arc::new(TrackerRegistry::new()));
        let dir = TempDir::new().unwrap();
        let node = swarm.spawn_node(SocketAddr::from(([127, 0, 0, 1], 7201)), dir.path());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xab; 300]).unwrap();
        let metadata = node.upload_file(file.path()).await.unwrap();

        let address = spawn_peer(node).await;
        let http = reqwest::Client::new();

        let health = http
            .get(format!("http://{address}/health"))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::NO_CONTENT);

        let info: FileInfo = http
            .get(format!("http://{address}/files/{}", metadata.name))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(info.pieces, 2);

        let piece: PieceResponse = http
            .get(format!("http://{address}/files/{}/pieces/1", metadata.hash))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(piece.serial_number, 1);
        assert_eq!(piece.into_piece().unwrap().len(), 44);

        let missing = http
            .get(format!("http://{address}/files/{}/pieces/9", metadata.hash))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let body: ErrorBody = missing.json().await.unwrap();
        assert_eq!(body.kind, ErrorKind::PieceNotFound);
    }

    #[tokio::test]
    async fn test_rejects_malformed_hash() {
        let swarm = SimulatedSwarm::new(Arc::new(TrackerRegistry::new()));
        let dir = TempDir::new().unwrap();
        let node = swarm.spawn_node(SocketAddr::from(([127, 0, 0, 1], 7202)), dir.path());
        let address = spawn_peer(node).await;

        let response = reqwest::get(format!("http://{address}/files/nothex/pieces/0"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
