//! JSON bodies and header names exchanged over HTTP

use std::net::SocketAddr;
use std::path::PathBuf;

use bytes::Bytes;
use piecewise_core::tracker::{PeerAvailability, TrackerStats};
use piecewise_core::{FileHash, FileMetadata, Piece, PieceIndex};
use serde::{Deserialize, Serialize};
use url::Url;

/// Header carrying the caller's self-declared serving address.
///
/// Advisory only: the tracker keys availability by it but cannot verify it.
pub const PEER_ADDRESS_HEADER: &str = "x-peer-address";

/// Header carrying the caller's informational client id.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Tracker `POST /upload` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub name: String,
    pub piece_length: u64,
    pub pieces: u32,
    pub length: u64,
    pub hash: FileHash,
}

impl UploadRequest {
    pub fn new(client_id: Option<String>, metadata: &FileMetadata) -> Self {
        Self {
            client_id,
            name: metadata.name.clone(),
            piece_length: metadata.piece_size,
            pieces: metadata.piece_count,
            length: metadata.length,
            hash: metadata.hash,
        }
    }

    pub fn into_metadata(self) -> FileMetadata {
        FileMetadata {
            name: self.name,
            hash: self.hash,
            piece_size: self.piece_length,
            piece_count: self.pieces,
            length: self.length,
        }
    }
}

/// File metadata as returned by `GET /files/{key}` on trackers and peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub piece_length: u64,
    pub pieces: u32,
    pub length: u64,
    pub hash: FileHash,
}

impl From<FileMetadata> for FileInfo {
    fn from(metadata: FileMetadata) -> Self {
        Self {
            name: metadata.name,
            piece_length: metadata.piece_size,
            pieces: metadata.piece_count,
            length: metadata.length,
            hash: metadata.hash,
        }
    }
}

impl From<FileInfo> for FileMetadata {
    fn from(info: FileInfo) -> Self {
        FileMetadata {
            name: info.name,
            hash: info.hash,
            piece_size: info.piece_length,
            piece_count: info.pieces,
            length: info.length,
        }
    }
}

/// Query string of `GET /files/{hash}/peers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeersQuery {
    pub peer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub address: SocketAddr,
    pub serial_pieces: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerEntry>,
}

impl From<Vec<PeerAvailability>> for PeersResponse {
    fn from(peers: Vec<PeerAvailability>) -> Self {
        Self {
            peers: peers
                .into_iter()
                .map(|peer| PeerEntry {
                    address: peer.address,
                    serial_pieces: peer.pieces.iter().map(|index| index.as_u32()).collect(),
                })
                .collect(),
        }
    }
}

impl From<PeersResponse> for Vec<PeerAvailability> {
    fn from(response: PeersResponse) -> Self {
        response
            .peers
            .into_iter()
            .map(|entry| PeerAvailability {
                address: entry.address,
                pieces: entry
                    .serial_pieces
                    .into_iter()
                    .map(PieceIndex::new)
                    .collect(),
            })
            .collect()
    }
}

/// Tracker `POST /files/{hash}/pieces` body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PieceInfoRequest {
    pub serial: u32,
}

/// Tracker `GET /status` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub files: usize,
    pub peers: usize,
}

impl From<TrackerStats> for StatusResponse {
    fn from(stats: TrackerStats) -> Self {
        Self {
            files: stats.files,
            peers: stats.peers,
        }
    }
}

/// Peer `POST /upload` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerUploadRequest {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerUploadResponse {
    pub hash: FileHash,
}

/// Peer `POST /download` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub hash: FileHash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub file_path: PathBuf,
}

/// Peer `GET /files/{hash}/pieces/{serial}` body; the payload is hex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PieceResponse {
    pub serial_number: u32,
    pub payload: String,
}

impl From<&Piece> for PieceResponse {
    fn from(piece: &Piece) -> Self {
        Self {
            serial_number: piece.index.as_u32(),
            payload: hex::encode(&piece.payload),
        }
    }
}

impl PieceResponse {
    /// Decodes the hex payload back into a piece.
    ///
    /// # Errors
    ///
    /// - `hex::FromHexError` - If the payload is not valid hex
    pub fn into_piece(self) -> Result<Piece, hex::FromHexError> {
        let payload = hex::decode(&self.payload)?;
        Ok(Piece::new(
            PieceIndex::new(self.serial_number),
            Bytes::from(payload),
        ))
    }
}

/// Base URL of a service listening at `address`.
///
/// # Errors
///
/// - `url::ParseError` - If the address cannot form a URL
pub fn base_url(address: SocketAddr) -> Result<Url, url::ParseError> {
    Url::parse(&format!("http://{address}/"))
}

/// Appends percent-encoded path segments to a base URL.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use piecewise_core::FileRecord;

    use super::*;

    #[test]
    fn test_upload_request_uses_wire_field_names() {
        let record = FileRecord::from_content("wire.bin", Bytes::from(vec![1u8; 300]));
        let request = UploadRequest::new(Some("client-1".to_string()), record.metadata());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["piece_length"], 256);
        assert_eq!(json["pieces"], 2);
        assert_eq!(json["length"], 300);
        assert_eq!(json["hash"], record.hash().to_string());
        assert_eq!(request.into_metadata(), *record.metadata());
    }

    #[test]
    fn test_peers_response_carries_serials() {
        let availability = vec![PeerAvailability {
            address: SocketAddr::from(([127, 0, 0, 1], 9001)),
            pieces: [2, 0].into_iter().map(PieceIndex::new).collect::<BTreeSet<_>>(),
        }];
        let response = PeersResponse::from(availability.clone());
        assert_eq!(response.peers[0].serial_pieces, vec![0, 2]);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"serial_pieces\":[0,2]"));
        assert_eq!(Vec::<PeerAvailability>::from(response), availability);
    }

    #[test]
    fn test_piece_payload_is_hex() {
        let piece = Piece::new(PieceIndex::new(4), Bytes::from_static(&[0xde, 0xad]));
        let response = PieceResponse::from(&piece);
        assert_eq!(response.payload, "dead");
        assert_eq!(response.serial_number, 4);
        assert_eq!(response.into_piece().unwrap(), piece);

        let broken = PieceResponse {
            serial_number: 0,
            payload: "xyz".to_string(),
        };
        assert!(broken.into_piece().is_err());
    }

    #[test]
    fn test_endpoint_encodes_segments() {
        let base = base_url(SocketAddr::from(([127, 0, 0, 1], 9000))).unwrap();
        let url = endpoint(&base, &["files", "my file.bin"]);
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/files/my%20file.bin");
    }
}
