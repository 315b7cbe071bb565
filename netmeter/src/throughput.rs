//! One-way throughput meter.
//!
//! The client writes messages back to back; the server drains them as fast
//! as it can and never answers, so the client's timing reflects the path
//! rather than the server.

use crate::{
    error::{Error, Result},
    nanos,
    net::Listener,
    options::Options,
    wire::write_msg,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tracing::*;

/// Results of a throughput run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputResult {
    /// Size of each message in bytes.
    pub msg_size: usize,
    /// Messages written.
    pub num_msg: usize,
    /// `num_msg * msg_size`.
    pub total_data: u64,
    /// Wall-clock time of the whole exchange.
    #[serde(with = "nanos")]
    pub elapsed: Duration,
    /// Decimal megabytes per second.
    #[serde(rename = "throughputMBPerSec")]
    pub throughput_mb_per_sec: f64,
    /// Messages per second.
    pub throughput_msg_per_sec: f64,
}

impl ThroughputResult {
    /// Derives the rates for `num_msg` messages of `msg_size` bytes.
    ///
    /// Fails with [`Error::NoProgress`] when no message was sent and with
    /// [`Error::ZeroElapsed`] when the clock did not move.
    pub fn new(
        msg_size: usize,
        num_msg: usize,
        elapsed: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        if num_msg == 0 {
            return Err(Error::NoProgress { timeout });
        }
        let nanos = elapsed.as_nanos();
        if nanos == 0 {
            return Err(Error::ZeroElapsed);
        }
        let total_data = num_msg as u64 * msg_size as u64;
        Ok(ThroughputResult {
            msg_size,
            num_msg,
            total_data,
            elapsed,
            throughput_mb_per_sec: total_data as f64 * 1e3 / nanos as f64,
            throughput_msg_per_sec: num_msg as f64 * 1e9 / nanos as f64,
        })
    }
}

impl fmt::Display for ThroughputResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} bytes in {:?}, {:.2} MB/s, {:.2} msg/s",
            self.num_msg,
            self.msg_size,
            self.elapsed,
            self.throughput_mb_per_sec,
            self.throughput_msg_per_sec
        )
    }
}

/// Runs throughput clients and servers.
///
/// Each server or client call uses exactly one connection.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    options: Options,
}

impl ThroughputMeter {
    /// Creates a meter after validating `options`.
    pub fn new(options: Options) -> Result<Self> {
        options.validate()?;
        Ok(ThroughputMeter { options })
    }

    /// Returns the options of this meter.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Listens on the configured address and drains one client.
    ///
    /// Returns the number of bytes received.
    pub async fn server(&self) -> Result<u64> {
        let listener = self.options.endpoint().listen().await?;
        self.serve_on(listener).await
    }

    /// Accepts one connection from `listener` and drains it.
    pub async fn serve_on(&self, listener: Listener) -> Result<u64> {
        let (conn, peer) = listener.accept().await.map_err(Error::Accept)?;
        trace!(%peer, "throughput client accepted");
        self.serve_conn(conn).await
    }

    /// Reads from `conn` until the client closes it.
    ///
    /// There is no message accounting here; reads of any size are accepted.
    pub async fn serve_conn<S>(&self, mut conn: S) -> Result<u64>
    where
        S: AsyncRead + Unpin,
    {
        debug!(msg_size = self.options.msg_size, "throughput server exchanging");
        let mut buf = vec![0u8; self.options.msg_size];
        let mut received = 0u64;
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            received += n as u64;
        }
        debug!(received, "throughput server completed");
        Ok(received)
    }

    /// Dials the configured address and measures throughput.
    pub async fn client(&self) -> Result<ThroughputResult> {
        let conn = self.options.endpoint().dial().await?;
        self.client_conn(conn).await
    }

    /// Measures throughput over a connection the caller established.
    ///
    /// The loop ends after `num_msg` messages or after the first message
    /// written past the deadline. The write side is shut down afterwards so
    /// the server sees the end of the stream.
    pub async fn client_conn<S>(&self, mut conn: S) -> Result<ThroughputResult>
    where
        S: AsyncWrite + Unpin,
    {
        let Options {
            msg_size, num_msg, ..
        } = self.options;
        let timeout = self.options.timeout();
        debug!(msg_size, num_msg, ?timeout, "throughput client exchanging");

        let buf = vec![0u8; msg_size];
        let start = Instant::now();
        let deadline = start + timeout;
        let mut msg_sent = 0;
        for _ in 0..num_msg {
            write_msg(&mut conn, &buf).await?;
            msg_sent += 1;
            if Instant::now() > deadline {
                warn!(msg_sent, num_msg, "throughput client hit the deadline");
                break;
            }
        }
        conn.flush().await?;
        let elapsed = start.elapsed();
        conn.shutdown().await?;

        let result = ThroughputResult::new(msg_size, msg_sent, elapsed, timeout)?;
        debug!(%result, "throughput client completed");
        Ok(result)
    }
}
