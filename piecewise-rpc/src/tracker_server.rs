//! HTTP front end for the tracker registry

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use piecewise_core::files::piece_count_for;
use piecewise_core::tracker::RequestContext;
use piecewise_core::{FileHash, PieceIndex, TrackerRegistry};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::wire::{
    CLIENT_ID_HEADER, FileInfo, PEER_ADDRESS_HEADER, PeersQuery, PeersResponse, PieceInfoRequest,
    StatusResponse, UploadRequest,
};

/// Caller identity read from request headers.
///
/// A missing address header yields an anonymous context, which the
/// registry rejects on operations that need one. A malformed header is
/// rejected here.
pub struct CallerContext(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for CallerContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .map(|value| value.to_str().map(str::trim))
        };

        let peer_address = match header(PEER_ADDRESS_HEADER) {
            None => None,
            Some(Ok(raw)) => Some(raw.parse::<SocketAddr>().map_err(|e| {
                ApiError::invalid_metadata(format!("malformed {PEER_ADDRESS_HEADER} '{raw}': {e}"))
            })?),
            Some(Err(_)) => {
                return Err(ApiError::invalid_metadata(format!(
                    "{PEER_ADDRESS_HEADER} is not valid text"
                )));
            }
        };

        let client_id = match header(CLIENT_ID_HEADER) {
            Some(Ok(raw)) if !raw.is_empty() => Some(raw.to_string()),
            _ => None,
        };

        Ok(Self(RequestContext {
            peer_address,
            client_id,
        }))
    }
}

pub(crate) fn parse_hash(raw: &str) -> Result<FileHash, ApiError> {
    raw.parse()
        .map_err(|e: piecewise_core::FileError| ApiError::invalid_metadata(e.to_string()))
}

/// Builds the tracker router over a shared registry.
pub fn tracker_router(registry: Arc<TrackerRegistry>) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/files/{hash}", get(file_info))
        .route("/files/{hash}/peers", get(peers))
        .route("/files/{hash}/pieces", post(post_piece_info))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Serves the tracker on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// - `std::io::Error` - If the server fails while accepting connections
pub async fn serve_tracker<F>(
    listener: TcpListener,
    registry: Arc<TrackerRegistry>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(address) = listener.local_addr() {
        tracing::info!(%address, "Tracker listening");
    }
    axum::serve(listener, tracker_router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn upload(
    State(registry): State<Arc<TrackerRegistry>>,
    CallerContext(mut context): CallerContext,
    Json(request): Json<UploadRequest>,
) -> Result<StatusCode, ApiError> {
    if context.client_id.is_none() {
        context.client_id = request.client_id.clone();
    }

    let metadata = request.into_metadata();
    if metadata.name.is_empty() {
        return Err(ApiError::invalid_metadata("file name is empty"));
    }
    if metadata.length > 0 && metadata.piece_size == 0 {
        return Err(ApiError::invalid_metadata("piece length is zero"));
    }
    let expected_pieces = piece_count_for(metadata.length, metadata.piece_size);
    if metadata.piece_count != expected_pieces {
        return Err(ApiError::invalid_metadata(format!(
            "{} pieces declared, {expected_pieces} implied by length",
            metadata.piece_count
        )));
    }

    registry.upload(&context, metadata)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn file_info(
    State(registry): State<Arc<TrackerRegistry>>,
    Path(hash): Path<String>,
) -> Result<Json<FileInfo>, ApiError> {
    let hash = parse_hash(&hash)?;
    Ok(Json(registry.file_info(hash)?.into()))
}

async fn peers(
    State(registry): State<Arc<TrackerRegistry>>,
    CallerContext(mut context): CallerContext,
    Path(hash): Path<String>,
    Query(query): Query<PeersQuery>,
) -> Result<Json<PeersResponse>, ApiError> {
    let hash = parse_hash(&hash)?;
    if context.client_id.is_none() {
        context.client_id = query.peer_id;
    }
    Ok(Json(registry.peers(&context, hash)?.into()))
}

async fn post_piece_info(
    State(registry): State<Arc<TrackerRegistry>>,
    CallerContext(context): CallerContext,
    Path(hash): Path<String>,
    Json(request): Json<PieceInfoRequest>,
) -> Result<StatusCode, ApiError> {
    let hash = parse_hash(&hash)?;
    registry.post_piece_info(&context, hash, PieceIndex::new(request.serial))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status(State(registry): State<Arc<TrackerRegistry>>) -> Json<StatusResponse> {
    Json(registry.stats().into())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use piecewise_core::config::NetworkConfig;
    use piecewise_core::{FileRecord, TrackerClient, TrackerError};

    use super::*;
    use crate::tracker_client::HttpTrackerClient;
    use crate::wire::base_url;

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

    fn client(tracker: SocketAddr, port: u16) -> HttpTrackerClient {
        HttpTrackerClient::new(
            base_url(tracker).unwrap(),
            SocketAddr::from(([127, 0, 0, 1], port)),
            format!("test-{port}"),
            &NetworkConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_discover_over_http() {
        let (tracker, registry) = spawn_tracker().await;
        let seeder = client(tracker, 7001);
        let leecher = client(tracker, 7002);

        let record = FileRecord::from_content("http.bin", Bytes::from(vec![6u8; 2000]));
        let metadata = record.metadata().clone();

        seeder.upload(&metadata).await.unwrap();
        assert_eq!(leecher.file_info(metadata.hash).await.unwrap(), metadata);

        let peers = leecher.peers(metadata.hash).await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].address.port(), 7001);
        assert_eq!(peers[0].pieces.len(), metadata.piece_count as usize);

        leecher
            .post_piece_info(metadata.hash, PieceIndex::new(1))
            .await
            .unwrap();
        let peers = seeder.peers(metadata.hash).await.unwrap();
        assert_eq!(peers.len(), 2);

        let record = registry
            .peer_record(SocketAddr::from(([127, 0, 0, 1], 7001)))
            .unwrap();
        assert_eq!(record.client_id.as_deref(), Some("test-7001"));
        assert_eq!(registry.stats().files, 1);
    }

    #[tokio::test]
    async fn test_errors_map_back_to_tracker_taxonomy() {
        let (tracker, _registry) = spawn_tracker().await;
        let leecher = client(tracker, 7003);
        let unknown = FileRecord::from_content("u", Bytes::from_static(b"unknown")).hash();

        assert!(matches!(
            leecher.file_info(unknown).await,
            Err(TrackerError::FileNotFound { hash }) if hash == unknown
        ));
        assert!(matches!(
            leecher.post_piece_info(unknown, PieceIndex::new(0)).await,
            Err(TrackerError::FileNotFound { .. })
        ));
        assert!(leecher.peers(unknown).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_malformed_address_headers() {
        let (tracker, _registry) = spawn_tracker().await;
        let record = FileRecord::from_content("h.bin", Bytes::from(vec![1u8; 10]));
        let body = UploadRequest::new(None, record.metadata());
        let http = reqwest::Client::new();
        let url = format!("http://{tracker}/upload");

        let missing = http.post(&url).json(&body).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::BAD_REQUEST);
        let error: crate::error::ErrorBody = missing.json().await.unwrap();
        assert_eq!(error.kind, crate::error::ErrorKind::MissingPeerAddress);

        let malformed = http
            .post(&url)
            .header(PEER_ADDRESS_HEADER, "not-an-address")
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_inconsistent_metadata_rejected() {
        let (tracker, registry) = spawn_tracker().await;
        let record = FileRecord::from_content("bad.bin", Bytes::from(vec![1u8; 600]));
        let mut body = UploadRequest::new(None, record.metadata());
        body.pieces = 99;

        let response = reqwest::Client::new()
            .post(format!("http://{tracker}/upload"))
            .header(PEER_ADDRESS_HEADER, "127.0.0.1:7004")
            .json(&body)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(registry.stats().files, 0);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (tracker, _registry) = spawn_tracker().await;
        let seeder = client(tracker, 7005);
        let record = FileRecord::from_content("s.bin", Bytes::from(vec![2u8; 50]));
        seeder.upload(record.metadata()).await.unwrap();

        let status: StatusResponse = reqwest::get(format!("http://{tracker}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status, StatusResponse { files: 1, peers: 1 });
    }
}
