//! Meter configuration.
//!
//! One [`Options`] shape drives both meters. The two profiles,
//! [`Options::latency`] and [`Options::throughput`], differ only in their
//! defaults.

use crate::{
    error::{Error, Result},
    net::{Endpoint, Transport},
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, str::FromStr, time::Duration};

/// Largest accepted `msgSize`, 64 MiB. Each side allocates one message
/// buffer of this size up front.
pub const MAX_MSG_SIZE: usize = 64 << 20;

/// Configuration for clients and servers of both meters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Size of each message in bytes.
    pub msg_size: usize,
    /// Number of messages (pings) to send.
    pub num_msg: usize,
    /// Listen address of the server, dial target of the client.
    pub addr: String,
    /// Socket family.
    pub network: Transport,
    /// Local port the client binds before dialing. `0` lets the OS pick.
    pub client_port: u16,
    /// Wall-clock budget of the client loop, in milliseconds.
    pub timeout: u64,
}

impl Default for Options {
    fn default() -> Self {
        Options::latency()
    }
}

impl Options {
    /// Defaults for latency runs: small messages, many round trips.
    pub fn latency() -> Self {
        Options {
            msg_size: 128,
            num_msg: 1000,
            addr: ":13501".into(),
            network: Transport::Tcp,
            client_port: 0,
            timeout: 120_000,
        }
    }

    /// Defaults for throughput runs: large messages.
    pub fn throughput() -> Self {
        Options {
            msg_size: 256 * 1024,
            num_msg: 10_000,
            addr: ":13500".into(),
            network: Transport::Tcp,
            client_port: 0,
            timeout: 120_000,
        }
    }

    /// Checks the invariants every meter relies on.
    pub fn validate(&self) -> Result<()> {
        if self.msg_size == 0 {
            return Err(Error::InvalidOptions("msgSize must be positive".into()));
        }
        if self.msg_size > MAX_MSG_SIZE {
            return Err(Error::InvalidOptions(format!(
                "msgSize {} exceeds the limit of {MAX_MSG_SIZE} bytes",
                self.msg_size
            )));
        }
        if self.num_msg == 0 {
            return Err(Error::InvalidOptions("numMsg must be positive".into()));
        }
        if self.timeout == 0 {
            return Err(Error::InvalidOptions("timeout must be positive".into()));
        }
        self.endpoint().validate()
    }

    /// Returns the client budget as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Returns the address pair the provisioner works from.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.network, self.addr.clone()).with_client_port(self.client_port)
    }

    /// Applies the fields present in a JSON document onto `self`.
    ///
    /// Missing fields keep their current value and unknown fields are
    /// ignored, so a document can carry extra keys such as `client`.
    pub fn overlay_json(self, json: &[u8]) -> Result<Self> {
        let overlay: Overlay = serde_json::from_slice(json)?;
        Ok(overlay.apply(self))
    }

    /// Like [`overlay_json`](Options::overlay_json), for TOML documents.
    pub fn overlay_toml(self, s: &str) -> Result<Self> {
        let overlay: Overlay = toml::from_str(s)?;
        Ok(overlay.apply(self))
    }

    /// Reads an options file and overlays it onto `base`.
    ///
    /// Files ending in `.toml` are decoded as TOML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>, base: Options) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|source| Error::ReadOptions {
            path: path.to_path_buf(),
            source,
        })?;
        let options = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let s = std::str::from_utf8(&content).map_err(|e| {
                    Error::InvalidOptions(format!("{} is not valid UTF-8: {e}", path.display()))
                })?;
                base.overlay_toml(s)?
            }
            _ => base.overlay_json(&content)?,
        };
        Ok(options)
    }
}

/// Parse options from JSON on top of the latency profile.
impl FromStr for Options {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Options::default().overlay_json(s.as_bytes())
    }
}

/// Print the options as pretty JSON.
impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string_pretty(self).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

/// A partially specified [`Options`].
///
/// Also accepts the field names of older option files: `tcpAddress`,
/// `unixAddress`, `unixDomain` and `numPings`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Overlay {
    msg_size: Option<usize>,
    #[serde(alias = "numPings")]
    num_msg: Option<usize>,
    #[serde(alias = "tcpAddress")]
    addr: Option<String>,
    unix_address: Option<String>,
    #[serde(alias = "unixDomain")]
    network: Option<Transport>,
    client_port: Option<u16>,
    timeout: Option<u64>,
}

impl Overlay {
    fn apply(self, mut options: Options) -> Options {
        if let Some(msg_size) = self.msg_size {
            options.msg_size = msg_size;
        }
        if let Some(num_msg) = self.num_msg {
            options.num_msg = num_msg;
        }
        if let Some(network) = self.network {
            options.network = network;
        }
        match (options.network, self.unix_address, self.addr) {
            (Transport::Unix, Some(path), _) => options.addr = path,
            (_, _, Some(addr)) => options.addr = addr,
            _ => {}
        }
        if let Some(client_port) = self.client_port {
            options.client_port = client_port;
        }
        if let Some(timeout) = self.timeout {
            options.timeout = timeout;
        }
        options
    }
}
