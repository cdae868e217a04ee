//! Error bodies and the mapping between core errors and HTTP statuses

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use piecewise_core::{FileError, FileHash, PeerError, PieceIndex, TrackerError};
use serde::{Deserialize, Serialize};

/// Machine-readable failure category carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileNotFound,
    PieceNotFound,
    MissingPeerAddress,
    InvalidMetadata,
    InvalidHash,
    InvalidPath,
    HashMismatch,
    Incomplete,
    Unavailable,
    Cancelled,
    Internal,
}

/// JSON body of every non-success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collected: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<FileHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hash: Option<FileHash>,
}

impl ErrorBody {
    /// Fallback body for responses that carried no parseable error.
    pub fn from_status(status: StatusCode, message: String) -> Self {
        let kind = match status {
            StatusCode::NOT_FOUND => ErrorKind::FileNotFound,
            StatusCode::BAD_REQUEST => ErrorKind::InvalidMetadata,
            StatusCode::UNPROCESSABLE_ENTITY => ErrorKind::HashMismatch,
            StatusCode::CONFLICT => ErrorKind::Incomplete,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => ErrorKind::Unavailable,
            _ => ErrorKind::Internal,
        };
        Self::new(kind, message)
    }

    fn new(kind: ErrorKind, message: String) -> Self {
        Self {
            kind,
            message,
            collected: None,
            expected: None,
            expected_hash: None,
            actual_hash: None,
        }
    }

    /// Maps a tracker response back into the tracker error taxonomy.
    pub fn into_tracker_error(self, hash: Option<FileHash>) -> TrackerError {
        match (self.kind, hash) {
            (ErrorKind::FileNotFound, Some(hash)) => TrackerError::FileNotFound { hash },
            (ErrorKind::MissingPeerAddress, _) => TrackerError::MissingPeerAddress,
            (ErrorKind::InvalidMetadata, _) => TrackerError::InvalidMetadata {
                reason: self.message,
            },
            _ => TrackerError::Unavailable {
                reason: self.message,
            },
        }
    }

    /// Maps a peer response back into the peer error taxonomy.
    pub fn into_peer_error(self, key: &str, index: Option<PieceIndex>) -> PeerError {
        match self.kind {
            ErrorKind::FileNotFound => PeerError::FileNotFound {
                key: key.to_string(),
            },
            ErrorKind::PieceNotFound => match (key.parse::<FileHash>(), index) {
                (Ok(hash), Some(index)) => PeerError::PieceNotFound { hash, index },
                _ => PeerError::Remote {
                    reason: self.message,
                },
            },
            ErrorKind::Incomplete => PeerError::Incomplete {
                collected: self.collected.unwrap_or(0),
                expected: self.expected.unwrap_or(0),
            },
            ErrorKind::HashMismatch => match (self.expected_hash, self.actual_hash) {
                (Some(expected), Some(actual)) => {
                    PeerError::File(FileError::HashMismatch { expected, actual })
                }
                _ => PeerError::Remote {
                    reason: self.message,
                },
            },
            ErrorKind::InvalidHash => PeerError::File(FileError::InvalidHash {
                value: key.to_string(),
                reason: self.message,
            }),
            ErrorKind::InvalidPath => PeerError::File(FileError::InvalidPath {
                reason: self.message,
            }),
            ErrorKind::InvalidMetadata => PeerError::Tracker(TrackerError::InvalidMetadata {
                reason: self.message,
            }),
            ErrorKind::MissingPeerAddress => PeerError::Tracker(TrackerError::MissingPeerAddress),
            ErrorKind::Cancelled => PeerError::Cancelled,
            _ => PeerError::Remote {
                reason: self.message,
            },
        }
    }
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::new(kind, message.into()),
        }
    }

    /// Rejects malformed caller input.
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidMetadata, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn kind(&self) -> ErrorKind {
        self.body.kind
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, kind = ?self.body.kind, message = %self.body.message, "Request failed");
        } else {
            tracing::debug!(status = %self.status, kind = ?self.body.kind, message = %self.body.message, "Request rejected");
        }
        (self.status, Json(self.body)).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(error: TrackerError) -> Self {
        let (status, kind) = match &error {
            TrackerError::FileNotFound { .. } => (StatusCode::NOT_FOUND, ErrorKind::FileNotFound),
            TrackerError::MissingPeerAddress => {
                (StatusCode::BAD_REQUEST, ErrorKind::MissingPeerAddress)
            }
            TrackerError::InvalidMetadata { .. } => {
                (StatusCode::BAD_REQUEST, ErrorKind::InvalidMetadata)
            }
            TrackerError::Unavailable { .. } => (StatusCode::BAD_GATEWAY, ErrorKind::Unavailable),
        };
        Self::new(status, kind, error.to_string())
    }
}

impl From<PeerError> for ApiError {
    fn from(error: PeerError) -> Self {
        let message = error.to_string();
        match error {
            PeerError::Tracker(tracker) => tracker.into(),
            PeerError::FileNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, ErrorKind::FileNotFound, message)
            }
            PeerError::PieceNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, ErrorKind::PieceNotFound, message)
            }
            PeerError::Incomplete {
                collected,
                expected,
            } => {
                let mut api = Self::new(StatusCode::CONFLICT, ErrorKind::Incomplete, message);
                api.body.collected = Some(collected);
                api.body.expected = Some(expected);
                api
            }
            PeerError::File(FileError::HashMismatch { expected, actual }) => {
                let mut api = Self::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::HashMismatch,
                    message,
                );
                api.body.expected_hash = Some(expected);
                api.body.actual_hash = Some(actual);
                api
            }
            PeerError::File(FileError::InvalidHash { reason, .. }) => {
                Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidHash, reason)
            }
            PeerError::File(FileError::InvalidPath { reason }) => {
                Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidPath, reason)
            }
            PeerError::Unreachable { .. } | PeerError::Remote { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, ErrorKind::Unavailable, message)
            }
            PeerError::Cancelled => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Cancelled,
                message,
            ),
            PeerError::File(_) | PeerError::TaskFailed { .. } | PeerError::Io(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Internal,
                message,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use piecewise_core::FileRecord;

    use super::*;

    fn sample_hash() -> FileHash {
        FileRecord::from_content("e", Bytes::from_static(b"error mapping")).hash()
    }

    #[test]
    fn test_status_mapping() {
        let hash = sample_hash();
        let cases = [
            (
                ApiError::from(TrackerError::FileNotFound { hash }),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(TrackerError::MissingPeerAddress),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(PeerError::Incomplete {
                    collected: 1,
                    expected: 2,
                }),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(PeerError::File(FileError::HashMismatch {
                    expected: hash,
                    actual: hash,
                })),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::from(PeerError::Tracker(TrackerError::Unavailable {
                    reason: "down".to_string(),
                })),
                StatusCode::BAD_GATEWAY,
            ),
        ];

        for (error, status) in cases {
            assert_eq!(error.status(), status, "{:?}", error.kind());
        }
    }

    #[test]
    fn test_incomplete_round_trips_counts() {
        let api = ApiError::from(PeerError::Incomplete {
            collected: 3,
            expected: 5,
        });
        let json = serde_json::to_string(&api.body).unwrap();
        let body: ErrorBody = serde_json::from_str(&json).unwrap();

        assert!(matches!(
            body.into_peer_error("x", None),
            PeerError::Incomplete {
                collected: 3,
                expected: 5
            }
        ));
    }

    #[test]
    fn test_piece_not_found_round_trips() {
        let hash = sample_hash();
        let api = ApiError::from(PeerError::PieceNotFound {
            hash,
            index: PieceIndex::new(7),
        });
        let error = api
            .body
            .into_peer_error(&hash.to_string(), Some(PieceIndex::new(7)));
        assert!(matches!(error, PeerError::PieceNotFound { index, .. } if index.as_u32() == 7));
    }

    #[test]
    fn test_tracker_error_from_status_fallback() {
        let body = ErrorBody::from_status(StatusCode::NOT_FOUND, "gone".to_string());
        assert!(matches!(
            body.into_tracker_error(Some(sample_hash())),
            TrackerError::FileNotFound { .. }
        ));
    }

    #[test]
    fn test_hash_mismatch_round_trips_digests() {
        let expected = sample_hash();
        let actual = FileRecord::from_content("e", Bytes::from_static(b"tampered")).hash();
        let api = ApiError::from(PeerError::File(FileError::HashMismatch { expected, actual }));
        let json = serde_json::to_string(&api.body).unwrap();
        let body: ErrorBody = serde_json::from_str(&json).unwrap();

        let error = body.into_peer_error(&expected.to_string(), None);
        assert!(error.is_hash_mismatch());
        assert!(matches!(
            error,
            PeerError::File(FileError::HashMismatch { expected: e, actual: a })
                if e == expected && a == actual
        ));
    }

    #[test]
    fn test_invalid_input_keeps_its_category() {
        let api = ApiError::from(PeerError::File(FileError::InvalidPath {
            reason: "no base name".to_string(),
        }));
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert!(matches!(
            api.body.into_peer_error("..", None),
            PeerError::File(FileError::InvalidPath { reason }) if reason == "no base name"
        ));

        let body = ErrorBody::from_status(StatusCode::BAD_REQUEST, "bad".to_string());
        assert!(matches!(
            body.into_peer_error("k", None),
            PeerError::Tracker(TrackerError::InvalidMetadata { .. })
        ));
    }
}
