//! Hushline Wire Protocol
//!
//! Structural (de)serialization of everything that crosses the wire between
//! a client and the relay. No cryptography lives here: envelopes are packed
//! and unpacked as opaque byte fields.
//!
//! # Framing
//!
//! Newline-delimited JSON, one frame per line, at most
//! [`MAX_FRAME_SIZE`](limits::MAX_FRAME_SIZE) bytes.
//!
//! ```text
//! client ── {"request_id":1,"request":{"op":"send_message",...}} ──► relay
//! client ◄── {"kind":"response","body":{"request_id":1,...}} ─────── relay
//! peer   ◄── {"kind":"push","body":{"event":"new_envelope",...}} ─── relay
//! ```
//!
//! # Envelopes
//!
//! [`WireEnvelope`] is `{ciphertext, nonce, salt, type}` with unpadded
//! base64url fields. [`Envelope::pack`] is total; [`Envelope::unpack`] returns
//! a [`ProtocolError`] instead of panicking on malformed input.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod limits;
pub mod messages;

pub use codec::{decode_client_frame, decode_server_frame, encode_line};
pub use envelope::{Envelope, EnvelopeKind, FALLBACK_MARKER, WireEnvelope};
pub use errors::{ProtocolError, Result};
pub use messages::{
    ClientFrame, EnvelopeRecord, ErrorCode, ErrorPayload, KeyRecord, MessageId, Page, Push,
    Receipt, Request, Response, ServerFrame, Timestamp, UserId,
};
