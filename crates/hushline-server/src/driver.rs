//! Server driver.
//!
//! Ties together the connection registry (session ↔ user), the key directory
//! and envelope storage. Pure state machine: the runtime feeds
//! [`ServerEvent`]s in and executes the returned [`ServerAction`]s.
//!
//! Envelope fields are never decoded here. The only checks applied to them
//! are size limits.

use hushline_core::env::Environment;
use hushline_proto::{
    ClientFrame, EnvelopeRecord, ErrorCode, ErrorPayload, MessageId, Page, Push, Receipt,
    Request, Response, ServerFrame, UserId, WireEnvelope,
    limits::MAX_ENVELOPE_FIELD,
};

use crate::{
    key_directory::{KeyDirectory, KeyDirectoryError},
    registry::{ConnectionRegistry, SessionInfo},
    server_error::DriverError,
    storage::{MarkOutcome, NewEnvelope, Storage, StorageError},
};

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Largest accepted envelope field, in encoded characters
    pub max_envelope_field: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self { max_connections: 10_000, max_envelope_field: MAX_ENVELOPE_FIELD }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the runtime (TCP server or an in-process test).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        session_id: u64,
    },

    /// A frame was received from a connection
    FrameReceived {
        /// Connection that sent the frame
        session_id: u64,
        /// The decoded frame
        frame: ClientFrame,
    },

    /// A line arrived that could not be decoded as a frame
    MalformedFrame {
        /// Connection that sent it
        session_id: u64,
        /// Decoder error
        reason: String,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        session_id: u64,
        /// Reason for closure
        reason: String,
    },
}

/// Actions that the server driver produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Send a frame to a specific session
    SendToSession {
        /// Target session ID
        session_id: u64,
        /// Frame to send
        frame: ServerFrame,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// A request that could not be served.
#[derive(Debug)]
struct Rejection {
    code: ErrorCode,
    message: String,
}

impl Rejection {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl From<StorageError> for Rejection {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EnvelopeNotFound { message_id } => {
                Self::new(ErrorCode::NotFound, format!("message {message_id} not found"))
            },
            other => Self::new(ErrorCode::StorageError, other.to_string()),
        }
    }
}

impl From<KeyDirectoryError> for Rejection {
    fn from(err: KeyDirectoryError) -> Self {
        match err {
            KeyDirectoryError::InvalidKey { reason } => Self::new(ErrorCode::InvalidKey, reason),
            KeyDirectoryError::Storage(err) => err.into(),
        }
    }
}

/// Action-based relay driver.
pub struct ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Session/user registry
    pub(crate) registry: ConnectionRegistry,
    /// Public key directory
    directory: KeyDirectory<S>,
    /// Envelope storage
    storage: S,
    /// Environment (time, RNG)
    env: E,
    /// Driver configuration
    config: DriverConfig,
}

impl<E, S> ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create a new server driver.
    pub fn new(env: E, storage: S, config: DriverConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            directory: KeyDirectory::new(storage.clone()),
            storage,
            env,
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// Request failures are answered with `error` responses and do not
    /// surface as `Err`.
    ///
    /// # Errors
    ///
    /// - `SessionAlreadyExists` if a session id is accepted twice
    /// - `SessionNotFound` if a frame arrives for an unknown session
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::FrameReceived { session_id, frame } => {
                self.handle_frame_received(session_id, frame)
            },
            ServerEvent::MalformedFrame { session_id, reason } => {
                self.handle_malformed_frame(session_id, reason)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                Ok(self.handle_connection_closed(session_id, &reason))
            },
        }
    }

    fn handle_connection_accepted(
        &mut self,
        session_id: u64,
    ) -> Result<Vec<ServerAction>, DriverError> {
        if self.registry.session_count() >= self.config.max_connections {
            return Ok(vec![ServerAction::CloseConnection {
                session_id,
                reason: "max connections exceeded".to_string(),
            }]);
        }

        if !self.registry.register_session(session_id, SessionInfo::new()) {
            return Err(DriverError::SessionAlreadyExists(session_id));
        }

        Ok(vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection accepted, session_id={session_id}"),
        }])
    }

    fn handle_malformed_frame(
        &mut self,
        session_id: u64,
        reason: String,
    ) -> Result<Vec<ServerAction>, DriverError> {
        if !self.registry.has_session(session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        Ok(vec![
            respond(session_id, 0, Response::Error(ErrorPayload::new(ErrorCode::BadRequest, &reason))),
            ServerAction::Log {
                level: LogLevel::Warn,
                message: format!("malformed frame from session {session_id}: {reason}"),
            },
        ])
    }

    fn handle_frame_received(
        &mut self,
        session_id: u64,
        frame: ClientFrame,
    ) -> Result<Vec<ServerAction>, DriverError> {
        let info = self
            .registry
            .sessions(session_id)
            .cloned()
            .ok_or(DriverError::SessionNotFound(session_id))?;

        let ClientFrame { request_id, request } = frame;
        let name = request.name();
        let mut actions = Vec::new();

        let result = match (info.authenticated_user(), request) {
            (_, Request::Ping) => Ok(Response::Pong),
            (bound, Request::Hello { user_id }) => {
                self.hello(session_id, bound, user_id, &mut actions)
            },
            (None, _) => Err(Rejection::new(ErrorCode::Unauthenticated, "hello required")),
            (Some(user), request) => self.dispatch(user, request, &mut actions),
        };

        let response = match result {
            Ok(response) => response,
            Err(rejection) => {
                let level = if rejection.code == ErrorCode::StorageError {
                    LogLevel::Warn
                } else {
                    LogLevel::Debug
                };
                actions.push(ServerAction::Log {
                    level,
                    message: format!(
                        "{name} from session {session_id} rejected: {:?} {}",
                        rejection.code, rejection.message
                    ),
                });
                Response::Error(ErrorPayload::new(rejection.code, rejection.message))
            },
        };

        // Response first, then any pushes and logs the handler produced
        actions.insert(0, respond(session_id, request_id, response));
        Ok(actions)
    }

    fn handle_connection_closed(&mut self, session_id: u64, reason: &str) -> Vec<ServerAction> {
        match self.registry.unregister_session(session_id) {
            Some(info) => vec![ServerAction::Log {
                level: LogLevel::Info,
                message: match info.authenticated_user() {
                    Some(user) => format!("session {session_id} (user {user}) closed: {reason}"),
                    None => format!("session {session_id} closed: {reason}"),
                },
            }],
            None => Vec::new(),
        }
    }

    fn hello(
        &mut self,
        session_id: u64,
        bound: Option<UserId>,
        user_id: UserId,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Response, Rejection> {
        match bound {
            Some(current) if current == user_id => return Ok(Response::Welcome { user_id }),
            Some(current) => {
                return Err(Rejection::new(
                    ErrorCode::Conflict,
                    format!("session already bound to user {current}"),
                ));
            },
            None => {},
        }

        if !self.registry.update_session_info(session_id, SessionInfo::authenticated(user_id)) {
            return Err(Rejection::new(
                ErrorCode::Conflict,
                format!("user {user_id} already has a live session"),
            ));
        }

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("session {session_id} bound to user {user_id}"),
        });
        Ok(Response::Welcome { user_id })
    }

    fn dispatch(
        &mut self,
        user: UserId,
        request: Request,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Response, Rejection> {
        match request {
            Request::UploadKey { public_key, algorithm } => {
                self.upload_key(user, &public_key, &algorithm, actions)
            },
            Request::FetchKey { user_id } => self.fetch_key(user_id),
            Request::FetchOwnKey => self.fetch_key(user),
            Request::SendMessage { recipient, envelope } => {
                self.send_message(user, recipient, envelope, actions)
            },
            Request::Inbox { limit, offset } => {
                messages(self.storage.inbox(user, Page::new(limit, offset))?)
            },
            Request::Sent { limit, offset } => {
                messages(self.storage.sent(user, Page::new(limit, offset))?)
            },
            Request::Conversation { peer, limit, offset } => {
                messages(self.storage.conversation(user, peer, Page::new(limit, offset))?)
            },
            Request::MarkDelivered { message_id } => {
                let at = self.env.wall_clock_millis();
                self.acknowledge(user, message_id, actions, |s| s.mark_delivered(message_id, at))
            },
            Request::MarkRead { message_id } => {
                let at = self.env.wall_clock_millis();
                self.acknowledge(user, message_id, actions, |s| s.mark_read(message_id, at))
            },
            Request::ClearConversation { peer } => self.clear_conversation(user, peer, actions),
            Request::Hello { .. } | Request::Ping => {
                Err(Rejection::new(ErrorCode::BadRequest, "unexpected session request"))
            },
        }
    }

    fn upload_key(
        &mut self,
        user: UserId,
        public_key: &str,
        algorithm: &str,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Response, Rejection> {
        let now = self.env.wall_clock_millis();
        let upload = self.directory.upload(user, public_key, algorithm, now)?;

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!(
                "public key {} for user {user}, fingerprint {}",
                if upload.created { "stored" } else { "replaced" },
                upload.record.fingerprint
            ),
        });

        Ok(Response::KeyUploaded {
            fingerprint: upload.record.fingerprint,
            algorithm: upload.record.algorithm,
            created: upload.created,
        })
    }

    fn fetch_key(&self, user_id: UserId) -> Result<Response, Rejection> {
        Ok(match self.directory.lookup(user_id)? {
            Some(record) => Response::Key(record),
            None => Response::KeyNotFound { user_id },
        })
    }

    fn send_message(
        &mut self,
        sender: UserId,
        recipient: UserId,
        envelope: WireEnvelope,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Response, Rejection> {
        if recipient == sender {
            return Err(Rejection::new(ErrorCode::BadRequest, "cannot message yourself"));
        }
        if envelope.ciphertext.is_empty() {
            return Err(Rejection::new(ErrorCode::BadRequest, "empty ciphertext"));
        }
        if envelope.largest_field() > self.config.max_envelope_field {
            return Err(Rejection::new(
                ErrorCode::BadRequest,
                format!("envelope field exceeds {} characters", self.config.max_envelope_field),
            ));
        }

        let record = self.storage.append_envelope(NewEnvelope {
            sender,
            recipient,
            envelope,
            created_at: self.env.wall_clock_millis(),
        })?;

        let response = Response::MessageAccepted {
            message_id: record.message_id,
            created_at: record.created_at,
        };

        let message_id = record.message_id;
        if !self.push_to_user(recipient, Push::NewEnvelope(record), actions) {
            actions.push(ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("recipient {recipient} offline, message {message_id} stored only"),
            });
        }

        Ok(response)
    }

    fn acknowledge(
        &mut self,
        user: UserId,
        message_id: MessageId,
        actions: &mut Vec<ServerAction>,
        mark: impl FnOnce(&S) -> Result<MarkOutcome, StorageError>,
    ) -> Result<Response, Rejection> {
        let Some(record) = self.storage.load_envelope(message_id)? else {
            return Err(Rejection::new(
                ErrorCode::NotFound,
                format!("message {message_id} not found"),
            ));
        };

        if record.recipient != user {
            return Err(Rejection::new(
                ErrorCode::Forbidden,
                "only the recipient may acknowledge a message",
            ));
        }

        let outcome = mark(&self.storage)?;
        let receipt = receipt_of(outcome.record());

        if outcome.changed() {
            self.push_to_user(record.sender, Push::Receipt(receipt), actions);
        }

        Ok(Response::Receipt(receipt))
    }

    fn clear_conversation(
        &mut self,
        user: UserId,
        peer: UserId,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Response, Rejection> {
        let deleted = self.storage.clear_conversation(user, peer)?;

        actions.push(ServerAction::Log {
            level: LogLevel::Info,
            message: format!("user {user} cleared conversation with {peer}, {deleted} removed"),
        });
        self.push_to_user(peer, Push::ConversationCleared { peer: user }, actions);

        Ok(Response::ConversationCleared { peer, deleted })
    }

    /// Queue a push to `user`'s live session. Returns false if offline.
    fn push_to_user(&self, user: UserId, push: Push, actions: &mut Vec<ServerAction>) -> bool {
        match self.registry.session_id_for_user(user) {
            Some(session_id) => {
                actions.push(ServerAction::SendToSession { session_id, frame: ServerFrame::Push(push) });
                true
            },
            None => false,
        }
    }

    /// Number of live sessions.
    pub fn connection_count(&self) -> usize {
        self.registry.session_count()
    }

    /// Live session of `user`, if any.
    pub fn session_for_user(&self, user: UserId) -> Option<u64> {
        self.registry.session_id_for_user(user)
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }
}

impl<E, S> std::fmt::Debug for ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerDriver")
            .field("session_count", &self.registry.session_count())
            .field("config", &self.config)
            .finish()
    }
}

fn respond(session_id: u64, request_id: u64, response: Response) -> ServerAction {
    ServerAction::SendToSession { session_id, frame: ServerFrame::Response { request_id, response } }
}

fn messages(records: Vec<EnvelopeRecord>) -> Result<Response, Rejection> {
    Ok(Response::Messages { count: records.len(), messages: records })
}

fn receipt_of(record: &EnvelopeRecord) -> Receipt {
    Receipt {
        message_id: record.message_id,
        delivered_at: record.delivered_at,
        read_at: record.read_at,
    }
}
