//! HTTP implementation of the core `TrackerClient`

use std::net::SocketAddr;

use async_trait::async_trait;
use piecewise_core::config::NetworkConfig;
use piecewise_core::tracker::PeerAvailability;
use piecewise_core::{FileHash, FileMetadata, PieceIndex, TrackerClient, TrackerError};
use reqwest::{RequestBuilder, Response};
use url::Url;

use crate::error::ErrorBody;
use crate::wire::{
    CLIENT_ID_HEADER, FileInfo, PEER_ADDRESS_HEADER, PeersResponse, PieceInfoRequest,
    UploadRequest, endpoint,
};

/// Tracker client bound to one peer's declared identity.
pub struct HttpTrackerClient {
    base: Url,
    client: reqwest::Client,
    peer_address: SocketAddr,
    client_id: String,
}

impl HttpTrackerClient {
    /// Creates a client for the tracker at `base`, identifying as
    /// `peer_address`.
    ///
    /// # Errors
    ///
    /// - `TrackerError::Unavailable` - If the HTTP client cannot be built
    pub fn new(
        base: Url,
        peer_address: SocketAddr,
        client_id: String,
        config: &NetworkConfig,
    ) -> Result<Self, TrackerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| TrackerError::Unavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            base,
            client,
            peer_address,
            client_id,
        })
    }

    pub fn peer_address(&self) -> SocketAddr {
        self.peer_address
    }

    /// Attaches identity headers, sends, and maps failures.
    async fn send(
        &self,
        request: RequestBuilder,
        hash: Option<FileHash>,
    ) -> Result<Response, TrackerError> {
        let response = request
            .header(PEER_ADDRESS_HEADER, self.peer_address.to_string())
            .header(CLIENT_ID_HEADER, &self.client_id)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(tracker = %self.base, error = %e, "Tracker request failed");
                TrackerError::Unavailable {
                    reason: if e.is_timeout() {
                        format!("request to {} timed out", self.base)
                    } else {
                        e.to_string()
                    },
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = match response.json::<ErrorBody>().await {
            Ok(body) => body,
            Err(_) => ErrorBody::from_status(status, format!("tracker returned {status}")),
        };
        tracing::debug!(tracker = %self.base, %status, kind = ?body.kind, "Tracker rejected request");
        Err(body.into_tracker_error(hash))
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, TrackerError> {
        response
            .json::<T>()
            .await
            .map_err(|e| TrackerError::Unavailable {
                reason: format!("malformed tracker response: {e}"),
            })
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn upload(&self, metadata: &FileMetadata) -> Result<(), TrackerError> {
        let body = UploadRequest::new(Some(self.client_id.clone()), metadata);
        let url = endpoint(&self.base, &["upload"]);
        self.send(self.client.post(url).json(&body), Some(metadata.hash))
            .await?;
        Ok(())
    }

    async fn file_info(&self, hash: FileHash) -> Result<FileMetadata, TrackerError> {
        let url = endpoint(&self.base, &["files", &hash.to_string()]);
        let response = self.send(self.client.get(url), Some(hash)).await?;
        Ok(Self::decode::<FileInfo>(response).await?.into())
    }

    async fn peers(&self, hash: FileHash) -> Result<Vec<PeerAvailability>, TrackerError> {
        let mut url = endpoint(&self.base, &["files", &hash.to_string(), "peers"]);
        url.query_pairs_mut()
            .append_pair("peer_id", &self.client_id);
        let response = self.send(self.client.get(url), Some(hash)).await?;
        Ok(Self::decode::<PeersResponse>(response).await?.into())
    }

    async fn post_piece_info(
        &self,
        hash: FileHash,
        index: PieceIndex,
    ) -> Result<(), TrackerError> {
        let url = endpoint(&self.base, &["files", &hash.to_string(), "pieces"]);
        let body = PieceInfoRequest {
            serial: index.as_u32(),
        };
        self.send(self.client.post(url).json(&body), Some(hash))
            .await?;
        Ok(())
    }

    fn tracker_url(&self) -> &str {
        self.base.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::base_url;

    #[tokio::test]
    async fn test_unreachable_tracker_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpTrackerClient::new(
            base_url(address).unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 7100)),
            "offline".to_string(),
            &NetworkConfig::default(),
        )
        .unwrap();

        let hash = piecewise_core::FileRecord::from_content("o", bytes::Bytes::from_static(b"o")).hash();
        assert!(matches!(
            client.file_info(hash).await,
            Err(TrackerError::Unavailable { .. })
        ));
        assert_eq!(client.tracker_url(), format!("http://{address}/"));
    }
}
