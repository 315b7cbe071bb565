//! A one-connection byte relay between two endpoints.
//!
//! Put a relay in front of a meter server to measure a path that crosses a
//! different transport, for example a Unix socket forwarded to TCP.

use crate::{
    error::{Error, Result},
    net::{Endpoint, Listener, Stream},
};
use tokio::io::copy_bidirectional;
use tracing::*;

/// Bytes moved by a relay, per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayStats {
    /// Bytes copied from the inbound connection to the upstream one.
    pub to_upstream: u64,
    /// Bytes copied from upstream back to the inbound connection.
    pub to_inbound: u64,
}

/// Listens on `from`, dials `to`, and relays the first inbound connection
/// until both directions close.
///
/// The upstream connection is established before accepting, so a dead
/// upstream is reported without waiting for a client.
pub async fn relay(from: &Endpoint, to: &Endpoint) -> Result<RelayStats> {
    let listener = from.listen().await?;
    let upstream = to.dial().await?;
    info!(%from, %to, "relay ready");
    relay_on(listener, upstream).await
}

/// Accepts one connection from `listener` and relays it to `upstream`.
pub async fn relay_on(listener: Listener, mut upstream: Stream) -> Result<RelayStats> {
    let (mut inbound, peer) = listener.accept().await.map_err(Error::Accept)?;
    trace!(%peer, "relay accepted");
    let (to_upstream, to_inbound) = copy_bidirectional(&mut inbound, &mut upstream).await?;
    debug!(to_upstream, to_inbound, "relay closed");
    Ok(RelayStats {
        to_upstream,
        to_inbound,
    })
}
