//! Configuration for capture inspection and replay.
//!
//! Configuration is built from command-line arguments and validated before
//! use. The capture-side settings describe which endpoint in the trace is
//! the PostgreSQL server; the replay settings describe the live target.
//!
//! # Example
//!
//! ```rust
//! use pg_replay::config::{CaptureConfig, ReplayConfig};
//!
//! let capture = CaptureConfig {
//!     pcap_path: "trace.pcap".into(),
//!     server_host: "::1".to_string(),
//!     server_port: 5432,
//! };
//! let endpoint = capture.endpoint().expect("valid capture host");
//!
//! let replay = ReplayConfig {
//!     target_host: "127.0.0.1".to_string(),
//!     target_port: 5432,
//!     rate: 2.0,
//!     max_retries: 3,
//!     print_query: false,
//! };
//! replay.validate().expect("valid replay settings");
//! # let _ = endpoint;
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Default server host looked for in the capture.
pub const DEFAULT_CAPTURE_HOST: &str = "::1";

/// Default server port looked for in the capture.
pub const DEFAULT_CAPTURE_PORT: u16 = 5432;

/// Default replay rate; 1.0 preserves the original message spacing.
pub const DEFAULT_RATE: f64 = 1.0;

/// Settings that locate the PostgreSQL conversation inside a capture file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Path to the pcap file to read.
    pub pcap_path: PathBuf,
    /// Server address in the capture. Empty or `0.0.0.0` matches any
    /// address, filtering by port alone.
    pub server_host: String,
    /// Server port in the capture.
    pub server_port: u16,
}

impl CaptureConfig {
    /// Builds the endpoint matcher used for packet filtering and flow
    /// direction detection.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `server_host` is neither empty, `0.0.0.0`, nor a
    /// parseable IP address.
    pub fn endpoint(&self) -> Result<ServerEndpoint> {
        ServerEndpoint::new(&self.server_host, self.server_port)
    }
}

/// Settings for replaying collected messages against a live server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReplayConfig {
    /// Host to replay against.
    pub target_host: String,
    /// Port to replay against.
    pub target_port: u16,
    /// Rate scale applied to inter-message gaps: 1.0 keeps the original
    /// spacing, 2.0 halves it.
    pub rate: f64,
    /// Total write attempts per message before it is counted as failed.
    pub max_retries: u32,
    /// Print the query text of simple queries in per-message progress
    /// records.
    pub print_query: bool,
}

impl ReplayConfig {
    /// Checks that the settings can drive a replay.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the rate is not strictly positive or if no write
    /// attempts are allowed.
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(Error::Config(format!(
                "replay rate must be a positive number, got {}",
                self.rate
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Config(
                "max retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identifies the server side of the captured conversation.
///
/// The same matcher is used to filter packets at ingest and to decide the
/// direction of each packet inside a flow, so the two can never disagree.
///
/// # Example
///
/// ```rust
/// use pg_replay::config::ServerEndpoint;
///
/// let endpoint = ServerEndpoint::new("::1", 5432).unwrap();
/// assert!(endpoint.matches("[::1]:5432".parse().unwrap()));
/// assert!(!endpoint.matches("[::1]:9999".parse().unwrap()));
///
/// // Wildcard host: the port alone decides.
/// let any = ServerEndpoint::new("0.0.0.0", 5432).unwrap();
/// assert!(any.matches("10.0.0.7:5432".parse().unwrap()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEndpoint {
    host: Option<IpAddr>,
    port: u16,
}

impl ServerEndpoint {
    /// Parses a host string and port into an endpoint matcher. An empty
    /// host or `0.0.0.0` matches any address.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let host = match host {
            "" | "0.0.0.0" => None,
            other => Some(other.parse::<IpAddr>().map_err(|_| {
                Error::Config(format!("invalid capture host address: {other}"))
            })?),
        };
        Ok(Self { host, port })
    }

    /// True if `addr` is the server side of the conversation.
    pub fn matches(&self, addr: SocketAddr) -> bool {
        addr.port() == self.port && self.host.map_or(true, |host| host == addr.ip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_exact_match() {
        let endpoint = ServerEndpoint::new("192.168.1.10", 5432).unwrap();
        assert!(endpoint.matches("192.168.1.10:5432".parse().unwrap()));
        assert!(!endpoint.matches("192.168.1.11:5432".parse().unwrap()));
        assert!(!endpoint.matches("192.168.1.10:5433".parse().unwrap()));
    }

    #[test]
    fn endpoint_wildcard_host_matches_port_only() {
        for host in ["", "0.0.0.0"] {
            let endpoint = ServerEndpoint::new(host, 5432).unwrap();
            assert!(endpoint.matches("10.1.2.3:5432".parse().unwrap()));
            assert!(endpoint.matches("[2001:db8::1]:5432".parse().unwrap()));
            assert!(!endpoint.matches("10.1.2.3:5433".parse().unwrap()));
        }
    }

    #[test]
    fn endpoint_rejects_garbage_host() {
        assert!(ServerEndpoint::new("not-an-ip", 5432).is_err());
    }

    #[test]
    fn replay_config_validation() {
        let mut config = ReplayConfig {
            target_host: "127.0.0.1".to_string(),
            target_port: 5432,
            rate: 1.0,
            max_retries: 3,
            print_query: false,
        };
        assert!(config.validate().is_ok());

        config.rate = 0.0;
        assert!(config.validate().is_err());
        config.rate = -1.0;
        assert!(config.validate().is_err());
        config.rate = f64::NAN;
        assert!(config.validate().is_err());

        config.rate = 1.0;
        config.max_retries = 0;
        assert!(config.validate().is_err());
    }
}
