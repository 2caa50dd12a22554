//! Timed, response-synchronized replay of collected client messages.
//!
//! Messages are written to the live target in capture order, paced by the
//! original inter-message gaps scaled by the configured rate. After every
//! message but the last, the driver blocks until the server's
//! `ReadyForQuery` so that each request observes its own completion before
//! the next one is sent. Failures are per-message: the connection is
//! recycled and the run continues.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{info, warn};

use crate::config::ReplayConfig;
use crate::stream::{is_ascii_type, ClientMessage, MAX_FRAME_LEN};
use crate::{Error, Result};

/// Total time to wait for `ReadyForQuery` after each message.
pub const READY_FOR_QUERY_TIMEOUT: Duration = Duration::from_secs(40);

/// Per-read poll deadline inside the ready wait; keeps the total deadline
/// checked while the socket is quiet.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause between a failed write and the next attempt.
const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Outcome counters for one replay run.
#[derive(Debug, Clone, Copy)]
pub struct ReplaySummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

/// Drives one replay run against a live server.
///
/// # Example
///
/// ```rust,no_run
/// use pg_replay::config::ReplayConfig;
/// use pg_replay::replay::Replayer;
///
/// # async fn example(messages: Vec<pg_replay::stream::ClientMessage>) -> pg_replay::Result<()> {
/// let config = ReplayConfig {
///     target_host: "127.0.0.1".to_string(),
///     target_port: 5432,
///     rate: 1.0,
///     max_retries: 3,
///     print_query: false,
/// };
/// let summary = Replayer::new(config, messages).run().await?;
/// println!("replayed {} messages", summary.succeeded);
/// # Ok(())
/// # }
/// ```
pub struct Replayer {
    config: ReplayConfig,
    messages: Vec<ClientMessage>,
    conn: Option<TcpStream>,
}

impl Replayer {
    pub fn new(config: ReplayConfig, messages: Vec<ClientMessage>) -> Self {
        Self {
            config,
            messages,
            conn: None,
        }
    }

    /// Replays every message once, in first-byte-timestamp order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`] with the error and total counts if any
    /// message failed; individual failures never abort the run.
    pub async fn run(mut self) -> Result<ReplaySummary> {
        self.config.validate()?;
        self.messages.sort_by_key(|message| message.first_ts);

        let total = self.messages.len();
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let started = Instant::now();

        if total == 0 {
            return Ok(ReplaySummary {
                total,
                succeeded,
                failed,
                elapsed: started.elapsed(),
            });
        }

        info!(
            total,
            target_host = %self.config.target_host,
            target_port = self.config.target_port,
            rate = self.config.rate,
            "starting replay"
        );

        let base_ts = self.messages[0].first_ts;

        match self.connect().await {
            Ok(conn) => self.conn = Some(conn),
            Err(error) => {
                warn!(%error, "initial connection failed, will reconnect before first send");
            }
        }

        let messages = std::mem::take(&mut self.messages);
        for (index, message) in messages.iter().enumerate() {
            let offset = (message.first_ts - base_ts).to_std().unwrap_or_default();
            sleep_until(started + offset.div_f64(self.config.rate)).await;

            if self.conn.is_none() {
                match self.connect().await {
                    Ok(conn) => self.conn = Some(conn),
                    Err(error) => {
                        failed += 1;
                        warn!(seq = index + 1, total, %error, "could not connect before sending");
                        continue;
                    }
                }
            }

            let wire = message.to_wire();
            if let Err(error) = self.write_with_retries(&wire, index).await {
                failed += 1;
                warn!(seq = index + 1, total, %error, "send failed");
                continue;
            }

            if index + 1 != total {
                if let Some(conn) = self.conn.as_mut() {
                    if let Err(error) =
                        await_ready_for_query(conn, READY_FOR_QUERY_TIMEOUT).await
                    {
                        failed += 1;
                        warn!(seq = index + 1, total, %error, "ReadyForQuery wait failed");
                        self.conn = None;
                        continue;
                    }
                }
            }

            succeeded += 1;
            let query = self
                .config
                .print_query
                .then(|| message.query_text())
                .flatten();
            match query {
                Some(query) => info!(
                    seq = index + 1,
                    total,
                    bytes = wire.len(),
                    kind = %message.kind_label(),
                    %query,
                    "message replayed"
                ),
                None => info!(
                    seq = index + 1,
                    total,
                    bytes = wire.len(),
                    kind = %message.kind_label(),
                    "message replayed"
                ),
            }
        }

        self.conn = None;
        let elapsed = started.elapsed();
        info!(total, succeeded, failed, ?elapsed, "replay completed");

        if failed > 0 {
            return Err(Error::Replay {
                errors: failed,
                total,
            });
        }
        Ok(ReplaySummary {
            total,
            succeeded,
            failed,
            elapsed,
        })
    }

    async fn connect(&self) -> std::io::Result<TcpStream> {
        TcpStream::connect((self.config.target_host.as_str(), self.config.target_port)).await
    }

    /// Writes one serialized message, reconnecting between attempts. The
    /// connection is dropped on every failed write so a later attempt (or
    /// the next message) starts from a clean socket.
    async fn write_with_retries(&mut self, wire: &[u8], index: usize) -> Result<()> {
        let mut last_error: Option<std::io::Error> = None;

        for attempt in 1..=self.config.max_retries {
            if self.conn.is_none() {
                match self.connect().await {
                    Ok(conn) => self.conn = Some(conn),
                    Err(error) => {
                        warn!(
                            attempt,
                            max_retries = self.config.max_retries,
                            seq = index + 1,
                            %error,
                            "reconnect failed"
                        );
                        last_error = Some(error);
                        sleep(RECONNECT_DELAY).await;
                        continue;
                    }
                }
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };
            match conn.write_all(wire).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        seq = index + 1,
                        %error,
                        "write attempt failed, reconnecting"
                    );
                    last_error = Some(error);
                    self.conn = None;
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }

        Err(Error::Io(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "no write attempt made")
        })))
    }
}

/// Reads from `conn` until a complete `ReadyForQuery` frame is seen,
/// bounded by `total_deadline`.
///
/// Accumulated bytes are framed with the same rule the reassembly side
/// uses, without retaining payloads. A declared length that cannot be a
/// frame is a hard error here — unlike offline parsing there is no value
/// in conservatively keeping a wait that can never finish.
pub async fn await_ready_for_query(conn: &mut TcpStream, total_deadline: Duration) -> Result<()> {
    let deadline = Instant::now() + total_deadline;
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if Instant::now() >= deadline {
            return Err(Error::Timeout {
                message: "timed out waiting for ReadyForQuery".to_string(),
            });
        }

        match timeout(READ_POLL_TIMEOUT, conn.read(&mut chunk)).await {
            // Poll deadline hit; the total deadline is re-checked above.
            Err(_) => continue,
            Ok(Ok(0)) => return Err(Error::RemoteClosed),
            Ok(Ok(read)) => buf.extend_from_slice(&chunk[..read]),
            Ok(Err(error)) => return Err(Error::Io(error)),
        }

        loop {
            let Some(&first) = buf.first() else {
                break;
            };
            if is_ascii_type(first) {
                if buf.len() < 5 {
                    break;
                }
                let declared = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
                if declared < 4 || declared as usize > MAX_FRAME_LEN {
                    return Err(Error::MalformedFrame { len: declared });
                }
                let total = 1 + declared as usize;
                if buf.len() < total {
                    break;
                }
                if first == b'Z' {
                    return Ok(());
                }
                buf.drain(..total);
            } else {
                if buf.len() < 4 {
                    break;
                }
                let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                if declared < 4 || declared as usize > MAX_FRAME_LEN {
                    return Err(Error::MalformedFrame { len: declared });
                }
                let total = declared as usize;
                if buf.len() < total {
                    break;
                }
                buf.drain(..total);
            }
        }
    }
}
