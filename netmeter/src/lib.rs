//! Latency and throughput meters for a single network connection.
//!
//! A [`LatencyMeter`] times fixed-size ping-pongs; a [`ThroughputMeter`]
//! times a one-way bulk transfer. Both are configured by [`Options`], run
//! either side of the exchange, and take their connection from the
//! [`net`] provisioner or from the caller.
//!
//! # Examples
//!
//! ```no_run
//! use netmeter::{LatencyMeter, Options};
//!
//! # async fn run() -> netmeter::Result<()> {
//! let meter = LatencyMeter::new(Options::latency())?;
//! // on one host
//! meter.server().await?;
//! // on the other, with `addr` pointing at the server
//! let result = meter.client().await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```
//!
//! Any `AsyncRead + AsyncWrite` stream can be measured, for instance one
//! opened through a proxy:
//!
//! ```no_run
//! use netmeter::{Options, ThroughputMeter};
//!
//! # async fn run(tunnel: tokio::net::TcpStream) -> netmeter::Result<()> {
//! let result = ThroughputMeter::new(Options::throughput())?
//!     .client_conn(tunnel)
//!     .await?;
//! println!("{} MB/s", result.throughput_mb_per_sec);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub use self::error::{Error, Phase, Result};
pub use self::latency::{LatencyMeter, LatencyResult};
pub use self::net::{Endpoint, Listener, Stream, Transport};
pub use self::options::{Options, MAX_MSG_SIZE};
pub use self::throughput::{ThroughputMeter, ThroughputResult};

mod error;
pub mod latency;
mod nanos;
pub mod net;
mod options;
pub mod relay;
pub mod throughput;
mod wire;
