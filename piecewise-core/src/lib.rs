//! Piecewise Core - content-addressed file distribution across a peer swarm
//!
//! Splits files into ordered pieces identified by a content hash, keeps the
//! tracker's registry of which peers hold which pieces, and downloads files
//! from many peers concurrently. Transport is abstracted behind the
//! `TrackerClient` and `PeerConnector` traits.

pub mod config;
pub mod files;
pub mod peer;
pub mod tracing_setup;
pub mod tracker;

#[cfg(any(test, feature = "test-utils"))]
pub mod simulation;

pub use config::PiecewiseConfig;
pub use files::{FileError, FileHash, FileMetadata, FileRecord, Piece, PieceIndex};
pub use peer::{DownloadPhase, LocalFileStore, PeerConnector, PeerError, PeerNode, PieceSource};
pub use tracker::{TrackerClient, TrackerError, TrackerRegistry};

/// Errors that can bubble up from any Piecewise subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PiecewiseError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PiecewiseError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            PiecewiseError::File(FileError::HashMismatch { .. })
            | PiecewiseError::Peer(PeerError::File(FileError::HashMismatch { .. })) => {
                "Downloaded content failed verification and was discarded".to_string()
            }
            PiecewiseError::File(FileError::InvalidPath { reason }) => {
                format!("Invalid file path: {reason}")
            }
            PiecewiseError::File(_) => "File error occurred".to_string(),
            PiecewiseError::Tracker(TrackerError::FileNotFound { hash })
            | PiecewiseError::Peer(PeerError::Tracker(TrackerError::FileNotFound { hash })) => {
                format!("File {hash} is not known to the tracker")
            }
            PiecewiseError::Tracker(TrackerError::Unavailable { .. })
            | PiecewiseError::Peer(PeerError::Tracker(TrackerError::Unavailable { .. })) => {
                "Could not reach the tracker".to_string()
            }
            PiecewiseError::Tracker(_) => "Tracker rejected the request".to_string(),
            PiecewiseError::Peer(PeerError::FileNotFound { key }) => {
                format!("File {key} not found")
            }
            PiecewiseError::Peer(PeerError::Incomplete {
                collected,
                expected,
            }) => {
                format!("Download incomplete: only {collected} of {expected} pieces available")
            }
            PiecewiseError::Peer(PeerError::Unreachable { address, .. }) => {
                format!("Could not reach peer {address}")
            }
            PiecewiseError::Peer(PeerError::Cancelled) => "Download cancelled".to_string(),
            PiecewiseError::Peer(_) => "Peer error occurred".to_string(),
            PiecewiseError::Configuration { reason } => format!("Configuration error: {reason}"),
            PiecewiseError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            PiecewiseError::Configuration { .. }
                | PiecewiseError::File(FileError::InvalidPath { .. })
                | PiecewiseError::File(FileError::InvalidHash { .. })
                | PiecewiseError::Peer(PeerError::FileNotFound { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, PiecewiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let error = PiecewiseError::from(PeerError::Incomplete {
            collected: 2,
            expected: 3,
        });
        assert_eq!(
            error.user_message(),
            "Download incomplete: only 2 of 3 pieces available"
        );
        assert!(!error.is_user_error());

        let error = PiecewiseError::Configuration {
            reason: "bad address".to_string(),
        };
        assert!(error.is_user_error());
    }

    #[test]
    fn test_invalid_hash_is_user_error() {
        let error: PiecewiseError = "zz".parse::<FileHash>().unwrap_err().into();
        assert!(error.is_user_error());
    }
}
