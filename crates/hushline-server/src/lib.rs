//! Hushline relay server.
//!
//! Stores and forwards opaque envelopes between users and serves the public
//! key directory. The relay never sees plaintext and never decodes envelope
//! fields.
//!
//! # Architecture
//!
//! [`ServerDriver`] is a Sans-IO state machine: it consumes [`ServerEvent`]s
//! and returns [`ServerAction`]s. [`Server`] is the production runtime that
//! feeds it from Tokio TCP connections and executes its actions.
//!
//! ```text
//!  TcpStream ──► reader task ──► ServerEvent ──► ServerDriver
//!                                                   │
//!  TcpStream ◄── writer task ◄── mpsc ◄── ServerAction
//! ```
//!
//! # Components
//!
//! - [`ServerDriver`]: request handling, push routing (pure logic, no I/O)
//! - [`KeyDirectory`]: canonical public key storage and fingerprints
//! - [`ConnectionRegistry`]: live session ↔ user mapping
//! - [`Storage`]: envelope and key persistence ([`MemoryStorage`],
//!   [`RedbStorage`], [`ChaoticStorage`])
//! - [`Server`]: Tokio runtime that executes driver actions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod error;
mod key_directory;
mod registry;
mod server_error;
pub mod storage;
mod transport;

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

pub use driver::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};
pub use error::ServerError;
use hushline_core::{Environment, SystemEnv};
use hushline_proto::{decode_client_frame, encode_line};
pub use key_directory::{KeyDirectory, KeyDirectoryError, KeyUpload};
pub use registry::{ConnectionRegistry, SessionInfo};
pub use server_error::DriverError;
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{Mutex, RwLock, mpsc},
};
pub use transport::TcpTransport;
use transport::{LineRead, read_line};

/// Bytes queued for one connection's writer task.
enum Outbound {
    /// Encoded frame, newline included
    Frame(Vec<u8>),
    /// Flush and close the connection
    Close,
}

/// Shared state for all connections.
struct SharedState {
    /// Session ID → outbound queue of that connection's writer task.
    ///
    /// All frames to a client go through this single queue, preserving order.
    outbound: RwLock<HashMap<u64, mpsc::UnboundedSender<Outbound>>>,
}

type SharedDriver<S> = Arc<Mutex<ServerDriver<SystemEnv, S>>>;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:7878")
    pub bind_address: String,
    /// Driver configuration (limits)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:7878".to_string(), driver: DriverConfig::default() }
    }
}

/// Production Hushline relay.
///
/// Wraps [`ServerDriver`] with a TCP listener and the system environment.
pub struct Server<S: Storage> {
    /// The action-based server driver
    driver: ServerDriver<SystemEnv, S>,
    /// TCP listener
    transport: TcpTransport,
    /// Environment
    env: SystemEnv,
}

impl<S: Storage> Server<S> {
    /// Create and bind a new server over `storage`.
    pub async fn bind(config: ServerRuntimeConfig, storage: S) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let driver = ServerDriver::new(env, storage, config.driver);
        let transport = TcpTransport::bind(&config.bind_address).await?;

        Ok(Self { driver, transport, env })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server, accepting connections until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!("relay listening on {}", self.transport.local_addr()?);

        let env = self.env;
        let driver = Arc::new(Mutex::new(self.driver));
        let shared = Arc::new(SharedState { outbound: RwLock::new(HashMap::new()) });

        loop {
            match self.transport.accept().await {
                Ok((stream, peer)) => {
                    let driver = Arc::clone(&driver);
                    let shared = Arc::clone(&shared);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, driver, shared, env).await {
                            tracing::error!("connection from {peer} failed: {e}");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {e}");
                },
            }
        }
    }
}

/// Handle one TCP connection from accept to close.
async fn handle_connection<S: Storage>(
    stream: TcpStream,
    driver: SharedDriver<S>,
    shared: Arc<SharedState>,
    env: SystemEnv,
) -> Result<(), ServerError> {
    let session_id = env.random_u64();
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    shared.outbound.write().await.insert(session_id, tx);

    let writer_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Frame(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::debug!("write to session {session_id} failed: {e}");
                        break;
                    }
                },
                Outbound::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    });

    if let Err(e) = process(&driver, &shared, ServerEvent::ConnectionAccepted { session_id }).await
    {
        shared.outbound.write().await.remove(&session_id);
        return Err(e);
    }

    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    let reason = loop {
        // CloseConnection removes the queue; stop reading for that session
        if !shared.outbound.read().await.contains_key(&session_id) {
            break "closed by server".to_string();
        }

        match read_line(&mut reader, &mut line).await {
            Ok(LineRead::Line) => {},
            Ok(LineRead::Eof) => break "peer closed".to_string(),
            Ok(LineRead::TooLarge) => {
                let event = ServerEvent::MalformedFrame {
                    session_id,
                    reason: "frame too large".to_string(),
                };
                process(&driver, &shared, event).await?;
                break "frame too large".to_string();
            },
            Err(e) => break e.to_string(),
        }

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let event = match decode_client_frame(&line) {
            Ok(frame) => ServerEvent::FrameReceived { session_id, frame },
            Err(e) => ServerEvent::MalformedFrame { session_id, reason: e.to_string() },
        };

        if let Err(e) = process(&driver, &shared, event).await {
            tracing::warn!("frame processing error: {e}");
        }
    };

    if let Some(tx) = shared.outbound.write().await.remove(&session_id) {
        let _ = tx.send(Outbound::Close);
    }
    let _ = writer_task.await;

    process(&driver, &shared, ServerEvent::ConnectionClosed { session_id, reason }).await?;

    Ok(())
}

/// Feed one event to the driver and execute the resulting actions.
///
/// Actions are executed under the driver lock so pushes keep the order in
/// which the driver produced them.
async fn process<S: Storage>(
    driver: &SharedDriver<S>,
    shared: &SharedState,
    event: ServerEvent,
) -> Result<(), ServerError> {
    let mut driver = driver.lock().await;
    let actions = driver.process_event(event)?;
    execute_actions(actions, shared).await
}

/// Execute server actions.
async fn execute_actions(
    actions: Vec<ServerAction>,
    shared: &SharedState,
) -> Result<(), ServerError> {
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, frame } => {
                let bytes = encode_line(&frame).map_err(|e| ServerError::Protocol(e.to_string()))?;

                let outbound = shared.outbound.read().await;
                match outbound.get(&session_id) {
                    Some(tx) => {
                        if tx.send(Outbound::Frame(bytes)).is_err() {
                            tracing::debug!("session {session_id} writer already gone");
                        }
                    },
                    None => tracing::warn!("SendToSession: session {session_id} not found"),
                }
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!("closing connection {session_id}: {reason}");
                if let Some(tx) = shared.outbound.write().await.remove(&session_id) {
                    let _ = tx.send(Outbound::Close);
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }

    Ok(())
}
