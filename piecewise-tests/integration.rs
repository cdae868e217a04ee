//! Integration tests for Piecewise
//!
//! Exercise whole download flows across several peers, both over the
//! in-process simulated swarm and over real HTTP on loopback.

#[path = "integration/swarm_download.rs"]
mod swarm_download;

#[path = "integration/http_transport.rs"]
mod http_transport;
