//! Centralized configuration for Piecewise.
//!
//! Listen addresses, directories and timing knobs for trackers and peers
//! live here instead of being scattered through the services.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Piecewise components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct PiecewiseConfig {
    pub tracker: TrackerConfig,
    pub peer: PeerConfig,
    pub network: NetworkConfig,
}

/// Tracker service configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Address the tracker listens on and peers dial
    pub listen_address: SocketAddr,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9000)),
        }
    }
}

/// Peer node configuration.
///
/// Controls where reassembled files land and how fetch tasks pace and
/// re-route their requests.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Address the peer serves pieces on and announces to the tracker
    pub listen_address: SocketAddr,
    /// Directory reassembled downloads are written to
    pub download_dir: PathBuf,
    /// Pause after each successful piece fetch
    pub fetch_pause: Duration,
    /// Alternate holders tried per index missing after the first pass
    pub fallback_attempts: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9001)),
            download_dir: PathBuf::from("downloaded"),
            fetch_pause: Duration::from_millis(100),
            fallback_attempts: 3,
        }
    }
}

/// HTTP transport configuration shared by tracker and peer clients.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// User agent for HTTP requests
    pub user_agent: &'static str,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            user_agent: "piecewise/0.1.0",
        }
    }
}

impl PiecewiseConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(address) = env_parse::<SocketAddr>("PIECEWISE_TRACKER_ADDR") {
            config.tracker.listen_address = address;
        }

        if let Some(address) = env_parse::<SocketAddr>("PIECEWISE_PEER_ADDR") {
            config.peer.listen_address = address;
        }

        if let Ok(dir) = std::env::var("PIECEWISE_DOWNLOAD_DIR") {
            config.peer.download_dir = PathBuf::from(dir);
        }

        if let Some(millis) = env_parse::<u64>("PIECEWISE_FETCH_PAUSE_MS") {
            config.peer.fetch_pause = Duration::from_millis(millis);
        }

        if let Some(seconds) = env_parse::<u64>("PIECEWISE_REQUEST_TIMEOUT") {
            config.network.request_timeout = Duration::from_secs(seconds);
        }

        config
    }

    /// Creates a configuration for fast in-process tests.
    pub fn for_testing() -> Self {
        Self {
            peer: PeerConfig {
                fetch_pause: Duration::ZERO,
                ..PeerConfig::default()
            },
            network: NetworkConfig {
                request_timeout: Duration::from_secs(5),
                connect_timeout: Duration::from_secs(1),
                ..NetworkConfig::default()
            },
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}
