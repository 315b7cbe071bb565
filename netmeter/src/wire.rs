//! Whole-message reads and writes.
//!
//! A message is exactly `buf.len()` bytes. Stopping short of that is a
//! protocol violation, reported with how far the transfer got.

use crate::error::{Error, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one full message into `buf`.
pub(crate) async fn read_msg<S>(stream: &mut S, buf: &mut [u8]) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let expected = buf.len();
    let short = |actual| Error::ShortRead { expected, actual };
    let mut filled = 0;
    while filled < expected {
        match stream.read(&mut buf[filled..]).await {
            Ok(0) => return Err(short(filled)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if peer_gone(&e) => return Err(short(filled)),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Writes one full message from `buf`.
pub(crate) async fn write_msg<S>(stream: &mut S, buf: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let expected = buf.len();
    let short = |actual| Error::ShortWrite { expected, actual };
    let mut written = 0;
    while written < expected {
        match stream.write(&buf[written..]).await {
            Ok(0) => return Err(short(written)),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if peer_gone(&e) => return Err(short(written)),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// The peer closed or reset the connection.
fn peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero
    )
}
