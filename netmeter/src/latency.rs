//! Round-trip latency meter.
//!
//! The client writes a message, waits for the server to echo it back, and
//! repeats. Average latency is the elapsed time spread over every leg of
//! every completed ping-pong.

use crate::{
    error::{Error, Result},
    nanos,
    net::Listener,
    options::Options,
    wire::{read_msg, write_msg},
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::Instant,
};
use tracing::*;

/// Results of a latency run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyResult {
    /// Wall-clock time of the whole exchange.
    #[serde(with = "nanos")]
    pub elapsed_time: Duration,
    /// Round-trip legs completed, two per ping-pong.
    pub num_pings: usize,
    /// `elapsed_time / num_pings`.
    #[serde(with = "nanos")]
    pub avg_latency: Duration,
}

impl LatencyResult {
    /// Builds a result from the number of ping-pongs that completed.
    ///
    /// Fails with [`Error::NoProgress`] when none did.
    pub fn new(elapsed_time: Duration, pings_completed: usize, timeout: Duration) -> Result<Self> {
        if pings_completed == 0 {
            return Err(Error::NoProgress { timeout });
        }
        let num_pings = pings_completed * 2;
        let avg_nanos = elapsed_time.as_nanos() / num_pings as u128;
        let avg_latency = Duration::from_nanos(avg_nanos as u64);
        Ok(LatencyResult {
            elapsed_time,
            num_pings,
            avg_latency,
        })
    }
}

impl fmt::Display for LatencyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} legs in {:?}, average latency {:?}",
            self.num_pings, self.elapsed_time, self.avg_latency
        )
    }
}

/// Runs latency clients and servers.
///
/// Each server or client call uses exactly one connection. The meter itself
/// holds nothing but its options, so it can be reused for further runs.
#[derive(Debug, Clone)]
pub struct LatencyMeter {
    options: Options,
}

impl LatencyMeter {
    /// Creates a meter after validating `options`.
    pub fn new(options: Options) -> Result<Self> {
        options.validate()?;
        Ok(LatencyMeter { options })
    }

    /// Returns the options of this meter.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Listens on the configured address and echoes one client.
    pub async fn server(&self) -> Result<()> {
        let listener = self.options.endpoint().listen().await?;
        self.serve_on(listener).await
    }

    /// Accepts one connection from `listener` and echoes it.
    pub async fn serve_on(&self, listener: Listener) -> Result<()> {
        let (conn, peer) = listener.accept().await.map_err(Error::Accept)?;
        trace!(%peer, "latency client accepted");
        self.serve_conn(conn).await
    }

    /// Echoes exactly `num_msg` messages back on `conn`.
    ///
    /// A client that disconnects early is an error: the server expects every
    /// round to happen.
    pub async fn serve_conn<S>(&self, mut conn: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Options {
            msg_size, num_msg, ..
        } = self.options;
        debug!(msg_size, num_msg, "latency server exchanging");
        let mut buf = vec![0u8; msg_size];
        for _ in 0..num_msg {
            read_msg(&mut conn, &mut buf).await?;
            write_msg(&mut conn, &buf).await?;
            conn.flush().await?;
        }
        debug!(num_msg, "latency server completed");
        Ok(())
    }

    /// Dials the configured address and measures latency.
    pub async fn client(&self) -> Result<LatencyResult> {
        let conn = self.options.endpoint().dial().await?;
        self.client_conn(conn).await
    }

    /// Measures latency over a connection the caller established, such as
    /// one through a tunnel.
    ///
    /// The loop ends after `num_msg` ping-pongs or after the first ping-pong
    /// that finishes past the deadline, whichever comes first. A run cut
    /// short by the deadline still yields a result.
    pub async fn client_conn<S>(&self, mut conn: S) -> Result<LatencyResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Options {
            msg_size, num_msg, ..
        } = self.options;
        let timeout = self.options.timeout();
        debug!(msg_size, num_msg, ?timeout, "latency client exchanging");

        let mut buf = vec![0u8; msg_size];
        let start = Instant::now();
        let deadline = start + timeout;
        let mut pings_sent = 0;
        for _ in 0..num_msg {
            write_msg(&mut conn, &buf).await?;
            conn.flush().await?;
            read_msg(&mut conn, &mut buf).await?;
            pings_sent += 1;
            if Instant::now() > deadline {
                warn!(pings_sent, num_msg, "latency client hit the deadline");
                break;
            }
        }
        let elapsed = start.elapsed();

        let result = LatencyResult::new(elapsed, pings_sent, timeout)?;
        debug!(%result, "latency client completed");
        Ok(result)
    }
}
