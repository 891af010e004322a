//! Client state machine.
//!
//! The `Client` owns the session's key material, the per-peer resilience
//! state and the rendered conversations. It turns application intents and
//! relay frames into outgoing frames and application notifications.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use hushline_core::Environment;
use hushline_crypto::{Fingerprint, MessageCipher, MessageEntropy, import_public_key};
use hushline_proto::{
    ClientFrame, EnvelopeRecord, ErrorPayload, KeyRecord, MessageId, Push, Receipt, Request,
    Response, ServerFrame, UserId,
    limits::{DEFAULT_PAGE_SIZE, MAX_PLAINTEXT_CHARS},
};

use crate::{
    conversation::{Conversation, MessageBody, RenderedMessage},
    error::ClientError,
    event::{ClientAction, ClientEvent},
    key_session::KeySession,
    refresh::{DEFAULT_REFRESH_INTERVAL, RefreshDecision, RefreshGate},
    resilience::{FallbackPolicy, FetchDecision, KeyState, ResilienceLayer},
};

/// Client tuning.
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Message encryption parameters
    pub cipher: MessageCipher,
    /// When to offer the unencrypted fallback
    pub fallback: FallbackPolicy,
    /// Minimum spacing between refreshes of one conversation
    pub refresh_interval: Duration,
    /// Page size for inbox and conversation queries
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cipher: MessageCipher::default(),
            fallback: FallbackPolicy::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// What an outstanding request was for.
#[derive(Debug, Clone)]
enum Pending {
    Hello,
    UploadKey { regenerated: bool },
    FetchKey { peer: UserId },
    FetchOwnKey,
    SendMessage { recipient: UserId, text: String, fallback: bool },
    Inbox,
    Conversation { peer: UserId },
    MarkDelivered,
    MarkRead,
    ClearConversation { peer: UserId },
}

impl Pending {
    fn name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::UploadKey { .. } => "upload_key",
            Self::FetchKey { .. } => "fetch_key",
            Self::FetchOwnKey => "fetch_own_key",
            Self::SendMessage { .. } => "send_message",
            Self::Inbox => "inbox",
            Self::Conversation { .. } => "conversation",
            Self::MarkDelivered => "mark_delivered",
            Self::MarkRead => "mark_read",
            Self::ClearConversation { .. } => "clear_conversation",
        }
    }
}

/// Client for one user session against a Hushline relay.
pub struct Client<E: Environment> {
    /// Environment for randomness and timing.
    env: E,

    /// Identity asserted on `Connect`.
    user_id: UserId,

    /// True once the relay answered `hello`.
    connected: bool,

    config: ClientConfig,

    /// Key pair and peer key cache.
    session: KeySession,

    resilience: ResilienceLayer,

    /// Rendered conversations by peer.
    conversations: HashMap<UserId, Conversation>,

    gate: RefreshGate<E::Instant>,

    /// Envelopes rendered as `KeyMissing`, by counterpart.
    held: HashMap<UserId, Vec<EnvelopeRecord>>,

    /// Messages waiting for a peer key, by recipient.
    outbox: HashMap<UserId, Vec<String>>,

    /// Messages we already acknowledged as delivered.
    acknowledged: HashSet<MessageId>,

    /// Outstanding requests by request id.
    pending: HashMap<u64, Pending>,

    next_request_id: u64,
}

impl<E: Environment> Client<E> {
    /// Create a client for `user_id` with a fresh key pair.
    pub fn new(env: E, user_id: UserId, config: ClientConfig) -> Self {
        let session = KeySession::new(env.random_array(), config.cipher);

        Self {
            env,
            user_id,
            connected: false,
            config,
            session,
            resilience: ResilienceLayer::new(config.fallback),
            conversations: HashMap::new(),
            gate: RefreshGate::new(config.refresh_interval),
            held: HashMap::new(),
            outbox: HashMap::new(),
            acknowledged: HashSet::new(),
            pending: HashMap::new(),
            next_request_id: 1,
        }
    }

    /// Our user id.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// True once the relay accepted `hello`.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Fingerprint of our current public key.
    pub fn fingerprint(&self) -> Fingerprint {
        self.session.fingerprint()
    }

    /// Key pair generation, starting at 1.
    pub fn key_generation(&self) -> u32 {
        self.session.generation()
    }

    /// Our public key as PEM.
    pub fn public_key_pem(&self) -> String {
        self.session.public_pem()
    }

    /// Conversation with `peer`, if any message has been seen.
    pub fn conversation(&self, peer: UserId) -> Option<&Conversation> {
        self.conversations.get(&peer)
    }

    /// Key acquisition state for `peer`.
    pub fn key_state(&self, peer: UserId) -> KeyState {
        self.resilience.state(peer)
    }

    /// True if messages to `peer` are sent unencrypted.
    pub fn is_fallback(&self, peer: UserId) -> bool {
        self.resilience.is_fallback(peer)
    }

    /// Number of requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Number of envelopes held until `peer`'s key arrives.
    pub fn held_envelopes(&self, peer: UserId) -> usize {
        self.held.get(&peer).map_or(0, Vec::len)
    }

    /// Number of delivery acknowledgements remembered for deduplication.
    pub fn acknowledged_count(&self) -> usize {
        self.acknowledged.len()
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Connect => Ok(self.handle_connect()),
            ClientEvent::ConfirmFallback { peer } => {
                self.resilience.confirm_fallback(peer)?;
                Ok(vec![ClientAction::FallbackEnabled { peer }])
            },
            ClientEvent::DisableFallback { peer } => {
                let mut actions = Vec::new();
                if self.resilience.disable_fallback(peer) {
                    actions.push(ClientAction::FallbackDisabled { peer });
                }
                Ok(actions)
            },
            ClientEvent::FrameReceived(frame) => Ok(self.handle_frame(frame)),
            event => {
                if !self.connected {
                    return Err(ClientError::NotConnected);
                }
                self.handle_connected(event)
            },
        }
    }

    fn handle_connected(&mut self, event: ClientEvent) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::PublishKey => Ok(vec![self.upload_key(false)]),
            ClientEvent::VerifyOwnKey => {
                Ok(vec![self.request(Request::FetchOwnKey, Pending::FetchOwnKey)])
            },
            ClientEvent::SendMessage { recipient, text } => self.handle_send(recipient, text),
            ClientEvent::OpenConversation { peer } => Ok(self.handle_open(peer)),
            ClientEvent::RefreshConversation { peer } => Ok(self.handle_refresh(peer)),
            ClientEvent::FetchInbox => {
                let request = Request::Inbox { limit: self.config.page_size, offset: 0 };
                Ok(vec![self.request(request, Pending::Inbox)])
            },
            ClientEvent::MarkRead { message_id } => {
                Ok(vec![self.request(Request::MarkRead { message_id }, Pending::MarkRead)])
            },
            ClientEvent::ClearConversation { peer } => Ok(vec![self.request(
                Request::ClearConversation { peer },
                Pending::ClearConversation { peer },
            )]),
            ClientEvent::RetryKeyFetch { peer } => {
                Ok(self.fetch_peer_key(peer, true).into_iter().collect())
            },
            ClientEvent::Connect
            | ClientEvent::ConfirmFallback { .. }
            | ClientEvent::DisableFallback { .. }
            | ClientEvent::FrameReceived(_) => Ok(Vec::new()),
        }
    }

    fn handle_connect(&mut self) -> Vec<ClientAction> {
        vec![self.request(Request::Hello { user_id: self.user_id }, Pending::Hello)]
    }

    fn handle_send(
        &mut self,
        recipient: UserId,
        text: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if recipient == self.user_id {
            return Err(ClientError::InvalidMessage { reason: "cannot message yourself".into() });
        }
        if text.trim().is_empty() {
            return Err(ClientError::InvalidMessage { reason: "empty message".into() });
        }
        if text.chars().count() > MAX_PLAINTEXT_CHARS {
            return Err(ClientError::InvalidMessage {
                reason: format!("message exceeds {MAX_PLAINTEXT_CHARS} characters"),
            });
        }

        if self.resilience.is_fallback(recipient) || self.session.has_peer_key(recipient) {
            return Ok(vec![self.send_now(recipient, text)?]);
        }

        match self.resilience.begin_fetch(recipient, false) {
            FetchDecision::Suppressed => Err(ClientError::KeyUnavailable { peer: recipient }),
            FetchDecision::AlreadyPending => {
                self.outbox.entry(recipient).or_default().push(text);
                Ok(Vec::new())
            },
            FetchDecision::Fetch => {
                self.outbox.entry(recipient).or_default().push(text);
                let request = Request::FetchKey { user_id: recipient };
                Ok(vec![self.request(request, Pending::FetchKey { peer: recipient })])
            },
        }
    }

    /// Seal (or, in fallback, wrap) and send one message.
    fn send_now(&mut self, recipient: UserId, text: String) -> Result<ClientAction, ClientError> {
        let fallback = self.resilience.is_fallback(recipient);

        let envelope = if fallback {
            KeySession::seal_fallback(&text)
        } else {
            let entropy = MessageEntropy::from_random_bytes(self.env.random_array());
            self.session.seal(recipient, &text, entropy)?
        };

        Ok(self.request(
            Request::SendMessage { recipient, envelope },
            Pending::SendMessage { recipient, text, fallback },
        ))
    }

    fn handle_open(&mut self, peer: UserId) -> Vec<ClientAction> {
        self.gate.set_active(Some(peer));
        self.conversations.entry(peer).or_insert_with(|| Conversation::new(peer));

        let mut actions = Vec::new();
        if !self.session.has_peer_key(peer) {
            actions.extend(self.fetch_peer_key(peer, false));
        }
        actions.extend(self.handle_refresh(peer));
        actions
    }

    fn handle_refresh(&mut self, peer: UserId) -> Vec<ClientAction> {
        match self.gate.try_begin(peer, self.env.now()) {
            RefreshDecision::Start => {
                let request = Request::Conversation { peer, limit: self.config.page_size, offset: 0 };
                vec![self.request(request, Pending::Conversation { peer })]
            },
            decision => vec![ClientAction::Log {
                message: format!("refresh of conversation {peer} skipped: {decision:?}"),
            }],
        }
    }

    fn fetch_peer_key(&mut self, peer: UserId, forced: bool) -> Option<ClientAction> {
        match self.resilience.begin_fetch(peer, forced) {
            FetchDecision::Fetch => {
                Some(self.request(Request::FetchKey { user_id: peer }, Pending::FetchKey { peer }))
            },
            FetchDecision::AlreadyPending | FetchDecision::Suppressed => None,
        }
    }

    fn upload_key(&mut self, regenerated: bool) -> ClientAction {
        let request = Request::UploadKey {
            public_key: self.session.public_pem(),
            algorithm: self.session.algorithm().as_str().to_string(),
        };
        self.request(request, Pending::UploadKey { regenerated })
    }

    fn request(&mut self, request: Request, pending: Pending) -> ClientAction {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.insert(request_id, pending);
        ClientAction::Send(ClientFrame { request_id, request })
    }

    fn handle_frame(&mut self, frame: ServerFrame) -> Vec<ClientAction> {
        match frame {
            ServerFrame::Response { request_id, response } => {
                match self.pending.remove(&request_id) {
                    Some(pending) => self.handle_response(pending, response),
                    None => vec![ClientAction::Log {
                        message: format!("response for unknown request {request_id}"),
                    }],
                }
            },
            ServerFrame::Push(push) => self.handle_push(push),
        }
    }

    fn handle_push(&mut self, push: Push) -> Vec<ClientAction> {
        match push {
            Push::NewEnvelope(record) => self.ingest(record),
            Push::Receipt(receipt) => self.apply_receipt(receipt).into_iter().collect(),
            Push::ConversationCleared { peer } => {
                let deleted = self.clear_local(peer);
                vec![ClientAction::ConversationCleared { peer, by_peer: true, deleted }]
            },
        }
    }

    fn handle_response(&mut self, pending: Pending, response: Response) -> Vec<ClientAction> {
        match (pending, response) {
            (Pending::FetchKey { peer }, Response::Error(error)) => {
                self.key_failure(peer, format!("{:?}: {}", error.code, error.message))
            },
            (Pending::SendMessage { recipient, text, .. }, Response::Error(error)) => {
                vec![ClientAction::MessageFailed { recipient, text, reason: error.message }]
            },
            (pending, Response::Error(ErrorPayload { code, message })) => {
                if let Pending::Conversation { peer } = &pending {
                    self.gate.complete(*peer);
                }
                vec![ClientAction::RequestFailed { request: pending.name(), code, message }]
            },

            (Pending::Hello, Response::Welcome { user_id }) => {
                self.connected = true;
                vec![ClientAction::Connected { user_id }]
            },

            (Pending::UploadKey { regenerated }, Response::KeyUploaded { fingerprint, created, .. }) => {
                let mut actions = Vec::new();
                if fingerprint != self.session.fingerprint().as_str() {
                    actions.push(ClientAction::Log {
                        message: format!("relay fingerprint {fingerprint} differs from local key"),
                    });
                }
                actions.push(if regenerated {
                    ClientAction::KeyRegenerated { generation: self.session.generation(), fingerprint }
                } else {
                    ClientAction::KeyPublished { fingerprint, created }
                });
                actions
            },

            (Pending::FetchOwnKey, Response::Key(record)) => self.verify_own_key(Some(&record)),
            (Pending::FetchOwnKey, Response::KeyNotFound { .. }) => self.verify_own_key(None),

            (Pending::FetchKey { peer }, Response::Key(record)) => self.learn_peer_key(peer, &record),
            (Pending::FetchKey { peer }, Response::KeyNotFound { .. }) => {
                self.key_failure(peer, "no key published".to_string())
            },

            (Pending::SendMessage { recipient, text, fallback }, Response::MessageAccepted {
                message_id,
                created_at,
            }) => {
                let body = if fallback {
                    MessageBody::Unencrypted(text)
                } else {
                    MessageBody::Plaintext(text)
                };
                let message = RenderedMessage {
                    message_id,
                    sender: self.user_id,
                    recipient,
                    body,
                    created_at,
                    delivered_at: None,
                    read_at: None,
                };

                let mut actions =
                    vec![ClientAction::MessageSent { recipient, message_id, created_at, fallback }];
                if self.conversation_mut(recipient).insert(message.clone()) {
                    actions.push(ClientAction::MessageRendered { peer: recipient, message });
                }
                actions
            },

            (Pending::Inbox, Response::Messages { messages, .. }) => {
                messages.into_iter().flat_map(|record| self.ingest(record)).collect()
            },

            (Pending::Conversation { peer }, Response::Messages { messages, .. }) => {
                if !self.gate.complete(peer) {
                    return vec![ClientAction::Log {
                        message: format!("discarding stale refresh of conversation {peer}"),
                    }];
                }
                messages.into_iter().flat_map(|record| self.ingest(record)).collect()
            },

            (Pending::MarkDelivered | Pending::MarkRead, Response::Receipt(receipt)) => {
                self.apply_receipt(receipt).into_iter().collect()
            },

            (Pending::ClearConversation { peer }, Response::ConversationCleared { deleted, .. }) => {
                self.clear_local(peer);
                vec![ClientAction::ConversationCleared { peer, by_peer: false, deleted }]
            },

            (pending, response) => vec![ClientAction::Log {
                message: format!("unexpected response to {}: {response:?}", pending.name()),
            }],
        }
    }

    /// Compare the directory's copy of our key with the local pair.
    fn verify_own_key(&mut self, record: Option<&KeyRecord>) -> Vec<ClientAction> {
        let local = self.session.fingerprint();

        let problem = match record {
            None => Some("no key stored".to_string()),
            Some(record) => match import_public_key(&record.public_key) {
                Err(e) => Some(format!("stored key unreadable: {e}")),
                Ok(stored) if Fingerprint::of(&stored) != local => {
                    Some("stored key does not match local key".to_string())
                },
                Ok(_) => None,
            },
        };

        match problem {
            None => vec![ClientAction::KeyVerified { fingerprint: local }],
            Some(reason) => {
                tracing::warn!(reason = %reason, "own key invalid, regenerating key pair");
                self.session.regenerate(self.env.random_array());
                vec![
                    ClientAction::Log { message: format!("regenerating key pair: {reason}") },
                    self.upload_key(true),
                ]
            },
        }
    }

    fn learn_peer_key(&mut self, peer: UserId, record: &KeyRecord) -> Vec<ClientAction> {
        let previous = self.session.peer_fingerprint(peer).cloned();

        let fingerprint = match self.session.learn_peer_key(peer, &record.public_key) {
            Ok(fingerprint) => fingerprint,
            Err(e) => return self.key_failure(peer, e.to_string()),
        };

        let mut actions = Vec::new();
        if fingerprint.as_str() != record.fingerprint {
            actions.push(ClientAction::Log {
                message: format!("relay fingerprint for {peer} differs from imported key"),
            });
        }

        if self.resilience.key_available(peer) {
            actions.push(ClientAction::FallbackDisabled { peer });
        }

        let changed = previous.is_some_and(|p| p != fingerprint);
        actions.push(ClientAction::PeerKeyAvailable { peer, fingerprint, changed });

        for text in self.outbox.remove(&peer).unwrap_or_default() {
            match self.send_now(peer, text.clone()) {
                Ok(action) => actions.push(action),
                Err(e) => {
                    actions.push(ClientAction::MessageFailed {
                        recipient: peer,
                        text,
                        reason: e.to_string(),
                    });
                },
            }
        }

        for record in self.held.remove(&peer).unwrap_or_default() {
            let body = self.session.open(peer, &record.wire());
            if self.conversation_mut(peer).rerender(record.message_id, body.clone()) {
                let message = RenderedMessage::from_record(&record, body);
                actions.push(ClientAction::MessageRendered { peer, message });
                actions.extend(self.acknowledge(&record));
            }
        }

        actions
    }

    fn key_failure(&mut self, peer: UserId, reason: String) -> Vec<ClientAction> {
        let offer = self.resilience.key_unavailable(peer);
        let failures = self.resilience.failures(peer);

        let mut actions = vec![ClientAction::PeerKeyUnavailable {
            peer,
            failures,
            reason: reason.clone(),
        }];
        if offer {
            actions.push(ClientAction::FallbackAvailable { peer, failures });
        }

        for text in self.outbox.remove(&peer).unwrap_or_default() {
            actions.push(ClientAction::MessageFailed {
                recipient: peer,
                text,
                reason: ClientError::KeyUnavailable { peer }.to_string(),
            });
        }
        actions
    }

    /// Render one envelope into its conversation.
    fn ingest(&mut self, record: EnvelopeRecord) -> Vec<ClientAction> {
        let peer = record.counterpart(self.user_id);
        let body = self.session.open(peer, &record.wire());
        let mut actions = Vec::new();

        if body == MessageBody::KeyMissing {
            let held = self.held.entry(peer).or_default();
            if !held.iter().any(|h| h.message_id == record.message_id) {
                held.push(record.clone());
            }
            actions.extend(self.fetch_peer_key(peer, false));
        }

        if let MessageBody::Unencrypted(_) = body
            && record.recipient == self.user_id
        {
            tracing::warn!(
                target: "hushline::fallback",
                peer,
                message_id = record.message_id,
                "received unencrypted message"
            );
        }

        let message = RenderedMessage::from_record(&record, body);
        let rendered = message.body != MessageBody::KeyMissing;
        let conversation = self.conversation_mut(peer);
        if conversation.insert(message.clone())
            || (rendered && conversation.rerender(message.message_id, message.body.clone()))
        {
            actions.push(ClientAction::MessageRendered { peer, message });
        }
        if rendered {
            self.release_held(peer, record.message_id);
        }

        if rendered {
            actions.extend(self.acknowledge(&record));
        }
        actions
    }

    /// Acknowledge delivery of an envelope addressed to us, once.
    fn acknowledge(&mut self, record: &EnvelopeRecord) -> Option<ClientAction> {
        if record.recipient != self.user_id
            || record.delivered_at.is_some()
            || !self.acknowledged.insert(record.message_id)
        {
            return None;
        }
        let request = Request::MarkDelivered { message_id: record.message_id };
        Some(self.request(request, Pending::MarkDelivered))
    }

    fn apply_receipt(&mut self, receipt: Receipt) -> Option<ClientAction> {
        self.conversations.iter_mut().find_map(|(peer, conversation)| {
            conversation
                .apply_receipt(receipt)
                .map(|_| ClientAction::ReceiptUpdated { peer: *peer, receipt })
        })
    }

    /// Drop a held envelope once it has rendered.
    fn release_held(&mut self, peer: UserId, message_id: MessageId) {
        if let Some(held) = self.held.get_mut(&peer) {
            held.retain(|h| h.message_id != message_id);
            if held.is_empty() {
                self.held.remove(&peer);
            }
        }
    }

    fn clear_local(&mut self, peer: UserId) -> u64 {
        self.held.remove(&peer);
        let Some(conversation) = self.conversations.get_mut(&peer) else {
            return 0;
        };
        for message in conversation.messages() {
            self.acknowledged.remove(&message.message_id);
        }
        u64::try_from(conversation.clear()).unwrap_or(u64::MAX)
    }

    fn conversation_mut(&mut self, peer: UserId) -> &mut Conversation {
        self.conversations.entry(peer).or_insert_with(|| Conversation::new(peer))
    }
}
