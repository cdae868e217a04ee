//! Piecewise RPC - HTTP/JSON binding for trackers and peers
//!
//! Servers are axum routers over the core registry and peer node; clients
//! are reqwest implementations of the core's `TrackerClient` and
//! `PeerConnector` traits. Caller identity travels in request headers.

pub mod control_client;
pub mod error;
pub mod peer_client;
pub mod peer_server;
pub mod tracker_client;
pub mod tracker_server;
pub mod wire;

pub use control_client::PeerControlClient;
pub use error::{ApiError, ErrorBody, ErrorKind};
pub use peer_client::HttpPeerConnector;
pub use peer_server::{peer_router, serve_peer};
pub use tracker_client::HttpTrackerClient;
pub use tracker_server::{serve_tracker, tracker_router};
pub use wire::base_url;
