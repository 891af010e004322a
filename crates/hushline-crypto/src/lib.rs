//! Hushline Cryptographic Primitives
//!
//! Everything the client needs to turn a plaintext into an envelope only the
//! intended recipient can open. Pure functions with deterministic outputs:
//! callers provide random bytes, so tests can replay exact sequences.
//!
//! # Message Pipeline
//!
//! ```text
//! Local KeyPair ──┐
//!                 ├─ X25519 ──► Shared Secret
//! Peer PublicKey ─┘                 │
//!                                   ▼
//!              random salt ──► PBKDF2-HMAC-SHA256 ──► Message Key
//!                                                        │
//!                                                        ▼
//!              random nonce ──► ChaCha20-Poly1305 ──► Ciphertext
//! ```
//!
//! Decryption needs the *sender's* public key: the recipient combines it with
//! its own private key to reach the same shared secret.
//!
//! # Key Transport
//!
//! Public keys travel as PEM-armored X25519 `SubjectPublicKeyInfo`. Incoming
//! key text is first [`sanitize`]d (lossy, never fails) and then [`decode`]d
//! (strict, the only stage that rejects). See [`codec`] for details.
//!
//! # Security
//!
//! - Secret scalars, shared secrets and derived message keys are zeroized
//!   when dropped
//! - Salt and nonce are drawn together into a single-use [`MessageEntropy`]
//! - [`CryptoError::Decrypt`] does not say why decryption failed
//! - The shared secret never rotates, so there is no forward secrecy

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod agreement;
mod cipher;
pub mod codec;
mod error;
mod fingerprint;
mod keypair;

pub use agreement::{SHARED_SECRET_SIZE, SharedSecret, derive_shared_secret};
pub use cipher::{
    ENTROPY_SIZE, KDF_ITERATIONS, KEY_SIZE, MessageCipher, MessageEntropy, NONCE_SIZE, SALT_SIZE,
    SealedMessage,
};
pub use codec::{Sanitized, decode, encode_pem, import_public_key, sanitize};
pub use error::CryptoError;
pub use fingerprint::Fingerprint;
pub use keypair::{Algorithm, KeyPair, KeyPairStore, PUBLIC_KEY_SIZE, PublicKey, SPKI_DER_SIZE};
