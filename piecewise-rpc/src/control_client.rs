//! Client for driving a running peer daemon

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use piecewise_core::config::NetworkConfig;
use piecewise_core::{FileHash, FileMetadata, PeerError};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ErrorBody;
use crate::wire::{
    DownloadRequest, DownloadResponse, FileInfo, PeerUploadRequest, PeerUploadResponse, base_url,
    endpoint,
};

/// Remote control for a peer's upload, lookup and download operations.
pub struct PeerControlClient {
    address: SocketAddr,
    base: Url,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl PeerControlClient {
    /// # Errors
    ///
    /// - `PeerError::Unreachable` - If the address cannot form a URL
    /// - `PeerError::Io` - If the HTTP client cannot be built
    pub fn new(address: SocketAddr, config: &NetworkConfig) -> Result<Self, PeerError> {
        let base = base_url(address).map_err(|e| PeerError::Unreachable {
            address,
            reason: e.to_string(),
        })?;
        // Timeouts are per call; downloads have none.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| PeerError::Io(std::io::Error::other(e)))?;

        Ok(Self {
            address,
            base,
            client,
            request_timeout: config.request_timeout,
        })
    }

    /// Asks the peer to split and announce a file on its own filesystem.
    ///
    /// # Errors
    ///
    /// - `PeerError::Unreachable` - If the peer cannot be contacted
    /// - `PeerError::Remote` - If the peer failed to read or announce the file
    pub async fn upload(&self, path: &Path) -> Result<FileHash, PeerError> {
        let body = PeerUploadRequest {
            path: path.to_path_buf(),
        };
        let request = self
            .client
            .post(endpoint(&self.base, &["upload"]))
            .timeout(self.request_timeout)
            .json(&body);
        let response: PeerUploadResponse = self.call(request, &path.display().to_string()).await?;
        Ok(response.hash)
    }

    /// Looks up file metadata by name or hash through the peer.
    ///
    /// # Errors
    ///
    /// - `PeerError::FileNotFound` - If neither the peer nor its tracker knows the file
    /// - `PeerError::Unreachable` - If the peer cannot be contacted
    pub async fn file_info(&self, key: &str) -> Result<FileMetadata, PeerError> {
        let request = self
            .client
            .get(endpoint(&self.base, &["files", key]))
            .timeout(self.request_timeout);
        let info: FileInfo = self.call(request, key).await?;
        Ok(info.into())
    }

    /// Asks the peer to download a file and returns where it was written.
    ///
    /// # Errors
    ///
    /// - `PeerError::Incomplete` - If the swarm could not supply every piece
    /// - `PeerError::File` - If the reassembled content failed verification
    /// - `PeerError::Remote` - If the download failed on the peer
    /// - `PeerError::Unreachable` - If the peer cannot be contacted
    pub async fn download(&self, hash: FileHash) -> Result<PathBuf, PeerError> {
        let request = self
            .client
            .post(endpoint(&self.base, &["download"]))
            .json(&DownloadRequest { hash });
        let response: DownloadResponse = self.call(request, &hash.to_string()).await?;
        Ok(response.file_path)
    }

    /// # Errors
    ///
    /// - `PeerError::Unreachable` - If the peer does not answer
    pub async fn health(&self) -> Result<(), PeerError> {
        let request = self
            .client
            .get(endpoint(&self.base, &["health"]))
            .timeout(self.request_timeout);
        self.send(request, "health").await.map(|_| ())
    }

    async fn send(&self, request: RequestBuilder, key: &str) -> Result<Response, PeerError> {
        let response = request.send().await.map_err(|e| PeerError::Unreachable {
            address: self.address,
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = match response.json::<ErrorBody>().await {
            Ok(body) => body,
            Err(_) => ErrorBody::from_status(status, format!("peer returned {status}")),
        };
        Err(body.into_peer_error(key, None))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        key: &str,
    ) -> Result<T, PeerError> {
        self.send(request, key)
            .await?
            .json::<T>()
            .await
            .map_err(|e| PeerError::Remote {
                reason: format!("malformed peer response: {e}"),
            })
    }
}
