//! # pg-replay
//!
//! Reconstructs a PostgreSQL client/server dialogue from a packet capture
//! and replays the client half against a live PostgreSQL instance,
//! correlating server responses so that completion timings attach to each
//! replayed request. The capture file is the ground truth; the live server
//! is the target.
//!
//! ## Overview
//!
//! Three subsystems do the work:
//!
//! - **Reassembly**: captured TCP segments are routed per conversation and
//!   direction, and concatenated in timestamp order while a segment log
//!   remembers which packet delivered which byte.
//! - **Framing**: the per-direction byte streams are cut into PostgreSQL
//!   v3 wire messages (typed and length-only), tolerating arbitrary
//!   segmentation. Server `CommandComplete` / `ReadyForQuery` frames stamp
//!   completion timestamps onto the simple queries awaiting them.
//! - **Replay**: collected client messages are re-sent in capture order,
//!   paced by the original gaps scaled by a rate factor, waiting for the
//!   server's `ReadyForQuery` between messages.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pg_replay::capture::read_capture_file;
//! use pg_replay::config::{CaptureConfig, ReplayConfig};
//! use pg_replay::replay::Replayer;
//! use pg_replay::stream::FlowTable;
//!
//! #[tokio::main]
//! async fn main() -> pg_replay::Result<()> {
//!     let capture = CaptureConfig {
//!         pcap_path: "trace.pcap".into(),
//!         server_host: "::1".to_string(),
//!         server_port: 5432,
//!     };
//!     let endpoint = capture.endpoint()?;
//!
//!     let mut table = FlowTable::new(endpoint);
//!     for packet in read_capture_file(&capture.pcap_path, &endpoint)? {
//!         let _ = table.route(&packet);
//!     }
//!     let messages = table.collect();
//!
//!     let config = ReplayConfig {
//!         target_host: "127.0.0.1".to_string(),
//!         target_port: 5432,
//!         rate: 1.0,
//!         max_retries: 3,
//!         print_query: false,
//!     };
//!     let summary = Replayer::new(config, messages).run().await?;
//!     println!("replayed {}/{} messages", summary.succeeded, summary.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`capture`] - pcap reading, TCP slicing, endpoint filtering
//! - [`stream`] - reassembly, framing, and response correlation
//! - [`replay`] - the paced, response-synchronized replay driver
//! - [`config`] - configuration structures and validation
//! - [`error`] - error types and handling
//!
//! TLS-encrypted sessions are not parseable (the engine reads cleartext
//! frames only), and no TCP stack emulation is attempted: the capture is
//! trusted to contain each direction's bytes in order once sorted by
//! timestamp.

/// Offline capture ingest: pcap reading and TCP payload extraction
pub mod capture;

/// Configuration structures and validation
pub mod config;

/// Error types and result handling
pub mod error;

/// Paced, response-synchronized replay against a live server
pub mod replay;

/// TCP reassembly, PostgreSQL v3 framing, and response correlation
pub mod stream;

pub use config::{CaptureConfig, ReplayConfig, ServerEndpoint};
pub use error::{Error, Result};
pub use replay::{Replayer, ReplaySummary};
