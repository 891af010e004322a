//! TCP transport for the client.
//!
//! Provides [`ConnectedClient`] which bridges channels of frames to a
//! newline-delimited JSON connection. Protocol logic remains in the Sans-IO
//! [`Client`](crate::Client).

use hushline_proto::{
    ClientFrame, ServerFrame, decode_server_frame, encode_line, limits::MAX_FRAME_SIZE,
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
};

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Handle to a connected client with TCP transport.
///
/// Frames are sent and received via the channels; internal tasks handle the
/// socket I/O. Dropping `to_server` closes the write half.
pub struct ConnectedClient {
    /// Send frames to the relay.
    pub to_server: mpsc::Sender<ClientFrame>,
    /// Receive frames from the relay.
    pub from_server: mpsc::Receiver<ServerFrame>,
    /// Abort handle to stop the reader task.
    abort_handle: tokio::task::AbortHandle,
}

impl ConnectedClient {
    /// Stop the connection.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

/// Connect to a Hushline relay.
pub async fn connect(server_addr: &str) -> Result<ConnectedClient, TransportError> {
    let stream = TcpStream::connect(server_addr)
        .await
        .map_err(|e| TransportError::Connection(format!("connect to {server_addr} failed: {e}")))?;
    stream.set_nodelay(true).map_err(|e| TransportError::Connection(e.to_string()))?;

    let (reader, writer) = stream.into_split();
    let (to_server_tx, to_server_rx) = mpsc::channel::<ClientFrame>(32);
    let (from_server_tx, from_server_rx) = mpsc::channel::<ServerFrame>(32);

    tokio::spawn(async move {
        if let Err(e) = write_frames(writer, to_server_rx).await {
            tracing::debug!("client writer stopped: {e}");
        }
    });

    let handle = tokio::spawn(async move {
        if let Err(e) = read_frames(reader, from_server_tx).await {
            tracing::debug!("client reader stopped: {e}");
        }
    });

    Ok(ConnectedClient {
        to_server: to_server_tx,
        from_server: from_server_rx,
        abort_handle: handle.abort_handle(),
    })
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    mut to_server: mpsc::Receiver<ClientFrame>,
) -> Result<(), TransportError> {
    while let Some(frame) = to_server.recv().await {
        let line = encode_line(&frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        writer.write_all(&line).await.map_err(|e| TransportError::Stream(e.to_string()))?;
    }

    writer.shutdown().await.map_err(|e| TransportError::Stream(e.to_string()))
}

async fn read_frames(
    reader: OwnedReadHalf,
    from_server: mpsc::Sender<ServerFrame>,
) -> Result<(), TransportError> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_FRAME_SIZE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| TransportError::Stream(e.to_string()))?;

        if read == 0 {
            return Ok(());
        }
        if line.len() > MAX_FRAME_SIZE {
            return Err(TransportError::Protocol("frame too large".to_string()));
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match decode_server_frame(&line) {
            Ok(frame) => {
                if from_server.send(frame).await.is_err() {
                    return Ok(());
                }
            },
            Err(e) => tracing::warn!("dropping undecodable frame from relay: {e}"),
        }
    }
}
