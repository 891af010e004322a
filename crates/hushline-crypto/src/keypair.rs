//! Local key pair ownership.
//!
//! The private half never leaves this crate: [`KeyPair`] exposes the public
//! component and an export, and only [`crate::derive_shared_secret`] reads the
//! secret scalar.

use std::fmt;

use x25519_dalek::StaticSecret;
use zeroize::Zeroize;

use crate::{codec, error::CryptoError};

/// Length of the raw X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// DER prefix of an X25519 `SubjectPublicKeyInfo` (RFC 8410).
pub(crate) const SPKI_PREFIX: [u8; 12] =
    [0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x6e, 0x03, 0x21, 0x00];

/// Length of the canonical DER encoding of a public key.
pub const SPKI_DER_SIZE: usize = SPKI_PREFIX.len() + PUBLIC_KEY_SIZE;

/// Key agreement algorithm. Fixed system-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Curve25519 Diffie-Hellman
    X25519,
}

impl Algorithm {
    /// Tag used on the wire and in the key directory.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X25519 => "X25519",
        }
    }

    /// Parse an algorithm tag (ASCII case-insensitive).
    ///
    /// An unknown tag is an agreement failure: a key for another curve can
    /// never be combined with ours.
    pub fn parse(tag: &str) -> Result<Self, CryptoError> {
        if tag.trim().eq_ignore_ascii_case("x25519") {
            Ok(Self::X25519)
        } else {
            Err(CryptoError::Agreement { reason: format!("unsupported algorithm {tag:?}") })
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public half of a key pair, tagged with its algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    algorithm: Algorithm,
    inner: x25519_dalek::PublicKey,
}

impl PublicKey {
    /// Wrap raw X25519 public key bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self { algorithm: Algorithm::X25519, inner: x25519_dalek::PublicKey::from(bytes) }
    }

    /// Algorithm this key belongs to.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.inner.as_bytes()
    }

    /// Canonical algorithm-tagged encoding (`SubjectPublicKeyInfo` DER).
    pub fn to_spki_der(&self) -> [u8; SPKI_DER_SIZE] {
        let mut der = [0u8; SPKI_DER_SIZE];
        der[..SPKI_PREFIX.len()].copy_from_slice(&SPKI_PREFIX);
        der[SPKI_PREFIX.len()..].copy_from_slice(self.inner.as_bytes());
        der
    }

    /// PEM transport form of [`to_spki_der`](Self::to_spki_der).
    pub fn to_pem(&self) -> String {
        codec::encode_pem(self)
    }

    pub(crate) fn inner(&self) -> &x25519_dalek::PublicKey {
        &self.inner
    }
}

/// An X25519 key pair.
///
/// Not `Clone`: there is exactly one owner of the secret scalar. The secret is
/// zeroized when the pair is dropped.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Build a key pair from 32 bytes of caller-provided entropy.
    ///
    /// The seed is clamped by X25519, so any 32 bytes form a valid scalar.
    pub fn from_seed(mut seed: [u8; 32]) -> Self {
        let secret = StaticSecret::from(seed);
        seed.zeroize();

        let public = PublicKey {
            algorithm: Algorithm::X25519,
            inner: x25519_dalek::PublicKey::from(&secret),
        };

        Self { secret, public }
    }

    /// Public component.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("algorithm", &self.public.algorithm)
            .field("public", &hex::encode(self.public.as_bytes()))
            .finish_non_exhaustive()
    }
}

/// Holder of the session's key pair.
///
/// The key pair is replaced only through [`regenerate`](Self::regenerate),
/// which callers invoke when their published key is found to be corrupted.
/// `generation` starts at 1 and counts up on every replacement so callers
/// can tell keys apart.
#[derive(Debug)]
pub struct KeyPairStore {
    pair: KeyPair,
    generation: u32,
}

impl KeyPairStore {
    /// Create a store holding a freshly generated pair.
    pub fn generate(seed: [u8; 32]) -> Self {
        Self { pair: KeyPair::from_seed(seed), generation: 1 }
    }

    /// Replace the key pair. The old secret is zeroized.
    pub fn regenerate(&mut self, seed: [u8; 32]) {
        self.pair = KeyPair::from_seed(seed);
        self.generation = self.generation.saturating_add(1);
    }

    /// Generation of the held pair, starting at 1.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Algorithm of the held pair.
    pub fn algorithm(&self) -> Algorithm {
        self.pair.public.algorithm
    }

    /// Public component of the held pair.
    pub fn public_key(&self) -> PublicKey {
        self.pair.public_key()
    }

    /// Canonical DER export of the public component.
    pub fn export_public(&self) -> [u8; SPKI_DER_SIZE] {
        self.pair.public.to_spki_der()
    }

    /// PEM export of the public component.
    pub fn export_public_pem(&self) -> String {
        self.pair.public.to_pem()
    }

    pub(crate) fn pair(&self) -> &KeyPair {
        &self.pair
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_public_key() {
        let a = KeyPair::from_seed([7u8; 32]);
        let b = KeyPair::from_seed([7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn different_seeds_different_public_keys() {
        let a = KeyPair::from_seed([1u8; 32]);
        let b = KeyPair::from_seed([2u8; 32]);
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn spki_der_has_prefix_and_key() {
        let pair = KeyPair::from_seed([3u8; 32]);
        let der = pair.public_key().to_spki_der();

        assert_eq!(der.len(), 44);
        assert_eq!(&der[..12], &SPKI_PREFIX);
        assert_eq!(&der[12..], pair.public_key().as_bytes());
    }

    #[test]
    fn debug_hides_secret() {
        let pair = KeyPair::from_seed([9u8; 32]);
        let rendered = format!("{pair:?}");

        assert!(rendered.contains("public"));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn regenerate_replaces_key_and_counts() {
        let mut store = KeyPairStore::generate([1u8; 32]);
        let before = store.public_key();
        assert_eq!(store.generation(), 1);

        store.regenerate([2u8; 32]);

        assert_ne!(store.public_key(), before);
        assert_eq!(store.generation(), 2);

        store.regenerate([3u8; 32]);
        assert_eq!(store.generation(), 3);
    }

    #[test]
    fn algorithm_tag_parsing() {
        assert_eq!(Algorithm::parse("X25519").unwrap(), Algorithm::X25519);
        assert_eq!(Algorithm::parse("x25519").unwrap(), Algorithm::X25519);

        let err = Algorithm::parse("P-256").unwrap_err();
        assert!(matches!(err, CryptoError::Agreement { .. }));
    }
}
