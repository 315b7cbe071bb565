//! Connection provisioning.
//!
//! An [`Endpoint`] names a transport and an address. The server side turns it
//! into a [`Listener`], the client side dials it into a [`Stream`]. Both
//! meters only ever see these two types (or any stream a caller built
//! itself), so TCP and Unix sockets share one code path.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    fmt, io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{lookup_host, TcpListener, TcpSocket, TcpStream},
};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::*;

/// Socket family used by a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "TransportRepr")]
pub enum Transport {
    /// Reliable, ordered network stream.
    Tcp,
    /// Local inter-process stream socket, addressed by a filesystem path.
    Unix,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Unix => f.write_str("unix"),
        }
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "unix" => Ok(Transport::Unix),
            other => Err(Error::InvalidOptions(format!(
                "unsupported network {other:?}, expected \"tcp\" or \"unix\""
            ))),
        }
    }
}

/// Either a network name or the older `unixDomain` flag.
#[derive(Deserialize)]
#[serde(untagged)]
enum TransportRepr {
    Name(String),
    UnixDomain(bool),
}

impl TryFrom<TransportRepr> for Transport {
    type Error = Error;

    fn try_from(repr: TransportRepr) -> Result<Self> {
        match repr {
            TransportRepr::Name(name) => name.parse(),
            TransportRepr::UnixDomain(true) => Ok(Transport::Unix),
            TransportRepr::UnixDomain(false) => Ok(Transport::Tcp),
        }
    }
}

/// Where to listen or what to dial.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Socket family.
    pub network: Transport,
    /// `host:port` for TCP, a socket path for Unix.
    pub addr: String,
    /// Local port a TCP client binds before connecting. Ignored for Unix.
    pub client_port: u16,
}

impl Endpoint {
    /// Creates an endpoint that lets the OS choose the client port.
    pub fn new(network: Transport, addr: impl Into<String>) -> Self {
        Endpoint {
            network,
            addr: addr.into(),
            client_port: 0,
        }
    }

    /// Sets the local port a TCP client originates from.
    pub fn with_client_port(mut self, port: u16) -> Self {
        self.client_port = port;
        self
    }

    /// Checks the address is usable for the transport.
    pub fn validate(&self) -> Result<()> {
        if self.addr.is_empty() {
            return Err(Error::InvalidOptions("address must not be empty".into()));
        }
        #[cfg(not(unix))]
        if self.network == Transport::Unix {
            return Err(Error::InvalidOptions(
                "unix sockets are not supported on this platform".into(),
            ));
        }
        Ok(())
    }

    /// Returns the transport and address a server binds.
    ///
    /// A TCP address without a host (`":13500"`) binds every IPv4 interface.
    pub fn listen_target(&self) -> (Transport, String) {
        let addr = match self.network {
            Transport::Tcp if self.addr.starts_with(':') => format!("0.0.0.0{}", self.addr),
            _ => self.addr.clone(),
        };
        (self.network, addr)
    }

    /// Returns the transport and address a client dials.
    ///
    /// A TCP address without a host (`":13500"`) targets the loopback host.
    pub fn dial_target(&self) -> (Transport, String) {
        let addr = match self.network {
            Transport::Tcp if self.addr.starts_with(':') => format!("127.0.0.1{}", self.addr),
            _ => self.addr.clone(),
        };
        (self.network, addr)
    }

    /// Binds a listener.
    ///
    /// For Unix sockets a stale socket file left at the path is removed
    /// first, and the file is removed again when the listener is dropped.
    pub async fn listen(&self) -> Result<Listener> {
        self.validate()?;
        let (network, addr) = self.listen_target();
        let listen_err = |source| Error::Listen {
            addr: addr.clone(),
            source,
        };
        let listener = match network {
            Transport::Tcp => {
                let listener = TcpListener::bind(addr.as_str()).await.map_err(listen_err)?;
                Listener::Tcp(listener)
            }
            #[cfg(unix)]
            Transport::Unix => {
                if remove_socket_file(std::path::Path::new(&addr)).map_err(listen_err)? {
                    debug!("removed stale socket {addr}");
                }
                let inner = UnixListener::bind(&addr).map_err(listen_err)?;
                Listener::Unix {
                    inner,
                    path: Some(addr.clone().into()),
                }
            }
            #[cfg(not(unix))]
            Transport::Unix => unreachable!("rejected by validate"),
        };
        debug!(%network, %addr, "listening");
        Ok(listener)
    }

    /// Dials the endpoint. No retries.
    pub async fn dial(&self) -> Result<Stream> {
        self.validate()?;
        let (network, addr) = self.dial_target();
        let dial_err = |source| Error::Dial {
            addr: addr.clone(),
            source,
        };
        let stream = match network {
            Transport::Tcp => Stream::Tcp(self.dial_tcp(&addr).await.map_err(dial_err)?),
            #[cfg(unix)]
            Transport::Unix => Stream::Unix(UnixStream::connect(&addr).await.map_err(dial_err)?),
            #[cfg(not(unix))]
            Transport::Unix => unreachable!("rejected by validate"),
        };
        debug!(%network, %addr, client_port = self.client_port, "connected");
        Ok(stream)
    }

    /// Tries every resolved address in turn and returns the last error if
    /// none accepts.
    async fn dial_tcp(&self, addr: &str) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in lookup_host(addr).await? {
            match self.connect1(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "could not resolve to any addresses",
            )
        }))
    }

    /// Connects to one address.
    async fn connect1(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        trace!("connecting to {addr}");
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        if self.client_port != 0 {
            // a fixed port is reused across runs, don't wait out TIME_WAIT
            socket.set_reuseaddr(true)?;
            let local = match addr {
                SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.client_port)),
                SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, self.client_port)),
            };
            socket.bind(local)?;
        }
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.network, self.addr)
    }
}

/// A bound server socket.
#[derive(Debug)]
pub enum Listener {
    /// TCP listener.
    Tcp(TcpListener),
    /// Unix listener. `path` is removed on drop when set.
    #[cfg(unix)]
    Unix {
        /// The listener.
        inner: UnixListener,
        /// Socket file owned by this listener.
        path: Option<std::path::PathBuf>,
    },
}

impl Listener {
    /// Accepts one inbound connection.
    pub async fn accept(&self) -> io::Result<(Stream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Stream::Tcp(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix { inner, .. } => {
                let (stream, peer) = inner.accept().await?;
                let peer = match peer.as_pathname() {
                    Some(path) => path.display().to_string(),
                    None => "(unnamed)".into(),
                };
                Ok((Stream::Unix(stream), peer))
            }
        }
    }

    /// Returns the bound address in printable form.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            #[cfg(unix)]
            Listener::Unix { inner, .. } => Ok(inner
                .local_addr()?
                .as_pathname()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "(unnamed)".into())),
        }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Listener::Tcp(listener)
    }
}

#[cfg(unix)]
impl From<UnixListener> for Listener {
    fn from(inner: UnixListener) -> Self {
        Listener::Unix { inner, path: None }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Listener::Unix {
            path: Some(path), ..
        } = self
        {
            if let Err(e) = remove_socket_file(path.as_path()) {
                debug!("failed to remove socket {}: {e}", path.display());
            }
        }
    }
}

/// Removes the socket file at `path`, returning whether there was one.
///
/// Anything at the path that is not a socket is left alone and reported as
/// `AlreadyExists`.
#[cfg(unix)]
fn remove_socket_file(path: &std::path::Path) -> io::Result<bool> {
    use std::os::unix::fs::FileTypeExt;

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        ));
    }
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// A connected stream of either transport.
#[derive(Debug)]
pub enum Stream {
    /// TCP stream.
    Tcp(TcpStream),
    /// Unix stream.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Returns the local address in printable form.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            Stream::Tcp(stream) => Ok(stream.local_addr()?.to_string()),
            #[cfg(unix)]
            Stream::Unix(stream) => Ok(stream
                .local_addr()?
                .as_pathname()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "(unnamed)".into())),
        }
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}
