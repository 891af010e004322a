//! TCP transport.
//!
//! Thin wrapper over a Tokio listener plus the newline-delimited reader used
//! by every connection. Frames longer than the protocol limit are detected
//! without buffering more than one byte past it.

use std::net::SocketAddr;

use hushline_proto::limits::MAX_FRAME_SIZE;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt},
    net::{TcpListener, TcpStream},
};

use crate::error::ServerError;

/// Listening TCP endpoint.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind to `address` (e.g. `"0.0.0.0:7878"`).
    pub async fn bind(address: &str) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| ServerError::Config(format!("cannot bind {address}: {e}")))?;
        Ok(Self { listener })
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    /// Local address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Outcome of reading one line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineRead {
    /// A complete line is in the buffer
    Line,
    /// The line exceeded the frame limit; the stream is unusable
    TooLarge,
    /// Peer closed the stream
    Eof,
}

/// Read one `\n`-terminated line into `buf`, capped at the frame limit.
///
/// A final line without terminator is still returned as [`LineRead::Line`].
pub(crate) async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<LineRead, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let cap = MAX_FRAME_SIZE as u64 + 1;
    let read = (&mut *reader).take(cap).read_until(b'\n', buf).await?;

    if read == 0 {
        return Ok(LineRead::Eof);
    }

    let body = buf.strip_suffix(b"\n").unwrap_or(buf);
    if body.len() > MAX_FRAME_SIZE {
        return Ok(LineRead::TooLarge);
    }

    Ok(LineRead::Line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_lines_in_order() {
        let mut input: &[u8] = b"{\"a\":1}\n{\"b\":2}\nlast";
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut input, &mut buf).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"{\"a\":1}\n");
        assert_eq!(read_line(&mut input, &mut buf).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"{\"b\":2}\n");
        assert_eq!(read_line(&mut input, &mut buf).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"last");
        assert_eq!(read_line(&mut input, &mut buf).await.unwrap(), LineRead::Eof);
    }

    #[tokio::test]
    async fn oversized_line_is_detected() {
        let mut data = vec![b'x'; MAX_FRAME_SIZE + 10];
        data.push(b'\n');
        let mut input: &[u8] = &data;
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut input, &mut buf).await.unwrap(), LineRead::TooLarge);
        assert_eq!(buf.len(), MAX_FRAME_SIZE + 1);
    }

    #[tokio::test]
    async fn line_at_limit_is_accepted() {
        let mut data = vec![b'x'; MAX_FRAME_SIZE];
        data.push(b'\n');
        let mut input: &[u8] = &data;
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut input, &mut buf).await.unwrap(), LineRead::Line);
    }
}
