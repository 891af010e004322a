//! Client
//!
//! Action-based client state machine for the Hushline relay. Owns the
//! session's key pair, encrypts and decrypts envelopes, and decides when a
//! peer's channel may fall back to unencrypted delivery.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO pattern as the relay driver. It
//! receives events ([`ClientEvent`]), processes them through pure state
//! machine logic, and returns actions ([`ClientAction`]) for the caller to
//! execute.
//!
//! # Components
//!
//! - [`Client`]: Top-level state machine
//! - [`KeySession`]: Key pair, cipher parameters and peer key cache
//! - [`ResilienceLayer`]: Per-peer key acquisition and fallback policy
//! - [`Conversation`]: Rendered messages, deduplicated by id
//! - [`RefreshGate`]: Conversation refresh debouncing
//!
//! # Fallback
//!
//! Repeated key failures for a peer only produce
//! [`ClientAction::FallbackAvailable`]. Messages go out unencrypted only after
//! the application feeds [`ClientEvent::ConfirmFallback`]; the switch is
//! logged on the `hushline::fallback` tracing target.
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ConnectedClient`]: Client with TCP transport
//! - [`transport::connect`]: Connect to a relay

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod conversation;
mod error;
mod event;
mod key_session;
mod refresh;
mod resilience;

#[cfg(feature = "transport")]
pub mod transport;

pub use client::{Client, ClientConfig};
pub use conversation::{Conversation, MessageBody, RenderedMessage};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use hushline_core::Environment;
pub use key_session::KeySession;
pub use refresh::{DEFAULT_REFRESH_INTERVAL, RefreshDecision, RefreshGate};
pub use resilience::{FallbackPolicy, FetchDecision, KeyState, ResilienceLayer};
