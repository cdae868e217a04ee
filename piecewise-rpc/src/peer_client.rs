//! HTTP implementation of the core `PeerConnector`

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use piecewise_core::config::NetworkConfig;
use piecewise_core::{FileHash, PeerConnector, PeerError, Piece, PieceIndex, PieceSource};
use url::Url;

use crate::error::ErrorBody;
use crate::wire::{PieceResponse, base_url, endpoint};

/// Dials peers over HTTP.
///
/// Dialing probes `GET /health`, so a peer that is down fails at connect
/// time rather than on its first piece.
#[derive(Clone)]
pub struct HttpPeerConnector {
    client: reqwest::Client,
}

impl HttpPeerConnector {
    /// # Errors
    ///
    /// - `PeerError::Io` - If the HTTP client cannot be built
    pub fn new(config: &NetworkConfig) -> Result<Self, PeerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| PeerError::Io(std::io::Error::other(e)))?;
        Ok(Self { client })
    }
}

fn unreachable(address: SocketAddr, reason: impl std::fmt::Display) -> PeerError {
    PeerError::Unreachable {
        address,
        reason: reason.to_string(),
    }
}

#[async_trait]
impl PeerConnector for HttpPeerConnector {
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn PieceSource>, PeerError> {
        let base = base_url(address).map_err(|e| unreachable(address, e))?;

        let response = self
            .client
            .get(endpoint(&base, &["health"]))
            .send()
            .await
            .map_err(|e| unreachable(address, e))?;
        if !response.status().is_success() {
            return Err(unreachable(
                address,
                format!("health check returned {}", response.status()),
            ));
        }

        tracing::trace!(peer = %address, "Dialed peer");
        Ok(Arc::new(HttpPieceSource {
            client: self.client.clone(),
            base,
            address,
        }))
    }
}

struct HttpPieceSource {
    client: reqwest::Client,
    base: Url,
    address: SocketAddr,
}

#[async_trait]
impl PieceSource for HttpPieceSource {
    async fn piece(&self, hash: FileHash, index: PieceIndex) -> Result<Piece, PeerError> {
        let key = hash.to_string();
        let url = endpoint(&self.base, &["files", &key, "pieces", &index.to_string()]);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unreachable(self.address, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.json::<ErrorBody>().await {
                Ok(body) => body,
                Err(_) => ErrorBody::from_status(status, format!("peer returned {status}")),
            };
            return Err(body.into_peer_error(&key, Some(index)));
        }

        let body: PieceResponse = response.json().await.map_err(|e| PeerError::Remote {
            reason: format!("malformed piece response: {e}"),
        })?;
        body.into_piece().map_err(|e| PeerError::Remote {
            reason: format!("piece payload is not hex: {e}"),
        })
    }

    fn address(&self) -> SocketAddr {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dialing_closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let connector = HttpPeerConnector::new(&NetworkConfig::default()).unwrap();
        let result = connector.connect(address).await;
        assert!(matches!(result, Err(PeerError::Unreachable { address: a, .. }) if a == address));
    }
}
