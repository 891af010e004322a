//! Per-session cryptographic context.
//!
//! Owns the local key pair, the cipher parameters and the cache of peer
//! public keys. Passed explicitly to every crypto operation; nothing here is
//! global. The private key never leaves this type: callers get envelopes and
//! plaintext, never secrets.

use std::collections::HashMap;

use hushline_crypto::{
    Algorithm, CryptoError, Fingerprint, KeyPairStore, MessageCipher, MessageEntropy, PublicKey,
    SealedMessage, derive_shared_secret, import_public_key,
};
use hushline_proto::{Envelope, UserId, WireEnvelope};

use crate::{conversation::MessageBody, error::ClientError};

/// Cached peer key with its fingerprint.
#[derive(Debug, Clone)]
struct PeerKey {
    key: PublicKey,
    fingerprint: Fingerprint,
}

/// Explicit crypto context for one client session.
#[derive(Debug)]
pub struct KeySession {
    keys: KeyPairStore,
    cipher: MessageCipher,
    peers: HashMap<UserId, PeerKey>,
}

impl KeySession {
    /// Create a session with a fresh key pair from `seed`.
    pub fn new(seed: [u8; 32], cipher: MessageCipher) -> Self {
        Self { keys: KeyPairStore::generate(seed), cipher, peers: HashMap::new() }
    }

    /// Replace the local key pair.
    ///
    /// Envelopes sealed with the previous pair can no longer be opened.
    pub fn regenerate(&mut self, seed: [u8; 32]) {
        self.keys.regenerate(seed);
    }

    /// Number of key pairs this session has generated, starting at 1.
    pub fn generation(&self) -> u32 {
        self.keys.generation()
    }

    /// Algorithm of the local key pair.
    pub fn algorithm(&self) -> Algorithm {
        self.keys.algorithm()
    }

    /// Local public key in PEM form, ready for upload.
    pub fn public_pem(&self) -> String {
        self.keys.export_public_pem()
    }

    /// Fingerprint of the local public key.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.keys.public_key())
    }

    /// Cipher parameters.
    pub fn cipher(&self) -> MessageCipher {
        self.cipher
    }

    /// Validate and cache a peer's key from untrusted text.
    ///
    /// The key is rejected unless agreement with it succeeds, so a cached key
    /// is always usable. On failure any previously cached key for the peer
    /// is dropped.
    pub fn learn_peer_key(&mut self, peer: UserId, text: &str) -> Result<Fingerprint, CryptoError> {
        let imported = import_public_key(text).and_then(|key| {
            derive_shared_secret(&self.keys, &key)?;
            Ok(key)
        });

        match imported {
            Ok(key) => {
                let fingerprint = Fingerprint::of(&key);
                self.peers.insert(peer, PeerKey { key, fingerprint: fingerprint.clone() });
                Ok(fingerprint)
            },
            Err(e) => {
                self.peers.remove(&peer);
                Err(e)
            },
        }
    }

    /// True if a usable key for `peer` is cached.
    pub fn has_peer_key(&self, peer: UserId) -> bool {
        self.peers.contains_key(&peer)
    }

    /// Fingerprint of the cached key for `peer`.
    pub fn peer_fingerprint(&self, peer: UserId) -> Option<&Fingerprint> {
        self.peers.get(&peer).map(|p| &p.fingerprint)
    }

    /// Encrypt `plaintext` for `peer`.
    ///
    /// # Errors
    ///
    /// - `KeyUnavailable` if no key for `peer` is cached
    pub fn seal(
        &self,
        peer: UserId,
        plaintext: &str,
        entropy: MessageEntropy,
    ) -> Result<WireEnvelope, ClientError> {
        let remote = self.peers.get(&peer).ok_or(ClientError::KeyUnavailable { peer })?;
        let secret = derive_shared_secret(&self.keys, &remote.key)?;
        let sealed = self.cipher.encrypt(plaintext.as_bytes(), &secret, entropy)?;

        Ok(Envelope::Sealed {
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce.to_vec(),
            salt: sealed.salt.to_vec(),
        }
        .pack())
    }

    /// Unencrypted envelope for fallback mode.
    pub fn seal_fallback(plaintext: &str) -> WireEnvelope {
        Envelope::Fallback { plaintext: plaintext.to_string() }.pack()
    }

    /// Decrypt an envelope exchanged with `counterpart`.
    ///
    /// `counterpart` is the other party: the sender for received envelopes,
    /// the recipient for our own. Never fails; every problem is a rendering
    /// state.
    pub fn open(&self, counterpart: UserId, wire: &WireEnvelope) -> MessageBody {
        let (ciphertext, nonce, salt) = match Envelope::unpack(wire) {
            Ok(Envelope::Sealed { ciphertext, nonce, salt }) => (ciphertext, nonce, salt),
            Ok(Envelope::Fallback { plaintext }) => return MessageBody::Unencrypted(plaintext),
            Err(_) => return MessageBody::Undecipherable,
        };

        let Some(remote) = self.peers.get(&counterpart) else {
            return MessageBody::KeyMissing;
        };

        let plaintext = derive_shared_secret(&self.keys, &remote.key).and_then(|secret| {
            let sealed = SealedMessage::from_parts(ciphertext, &nonce, &salt)?;
            self.cipher.decrypt(&sealed, &secret)
        });

        match plaintext.map(String::from_utf8) {
            Ok(Ok(text)) => MessageBody::Plaintext(text),
            _ => MessageBody::Undecipherable,
        }
    }
}

#[cfg(test)]
mod tests {
    use hushline_crypto::ENTROPY_SIZE;

    use super::*;

    const FAST: u32 = 1_000;

    fn session(seed: u8) -> KeySession {
        KeySession::new([seed; 32], MessageCipher::with_iterations(FAST))
    }

    fn entropy(byte: u8) -> MessageEntropy {
        MessageEntropy::from_random_bytes([byte; ENTROPY_SIZE])
    }

    #[test]
    fn seal_open_between_sessions() {
        let mut alice = session(1);
        let mut bob = session(2);
        alice.learn_peer_key(2, &bob.public_pem()).unwrap();
        bob.learn_peer_key(1, &alice.public_pem()).unwrap();

        let wire = bob.seal(1, "hello", entropy(7)).unwrap();
        assert_eq!(alice.open(2, &wire), MessageBody::Plaintext("hello".to_string()));

        // Sender can reopen its own envelope with the recipient's key
        assert_eq!(bob.open(1, &wire), MessageBody::Plaintext("hello".to_string()));
    }

    #[test]
    fn seal_without_peer_key_is_key_unavailable() {
        let alice = session(1);
        assert_eq!(alice.seal(9, "hi", entropy(1)), Err(ClientError::KeyUnavailable { peer: 9 }));
    }

    #[test]
    fn open_states() {
        let mut alice = session(1);
        let mut bob = session(2);
        let wire = {
            bob.learn_peer_key(1, &alice.public_pem()).unwrap();
            bob.seal(1, "secret", entropy(3)).unwrap()
        };

        assert_eq!(alice.open(2, &wire), MessageBody::KeyMissing);

        // Wrong key for the counterpart
        alice.learn_peer_key(2, &session(3).public_pem()).unwrap();
        assert_eq!(alice.open(2, &wire), MessageBody::Undecipherable);

        let fallback = KeySession::seal_fallback("plain");
        assert_eq!(alice.open(2, &fallback), MessageBody::Unencrypted("plain".to_string()));

        let mut broken = wire;
        broken.nonce = "!!".to_string();
        assert_eq!(alice.open(2, &broken), MessageBody::Undecipherable);
    }

    #[test]
    fn bad_peer_key_evicts_cached_key() {
        let mut alice = session(1);
        let bob = session(2);

        let fingerprint = alice.learn_peer_key(2, &bob.public_pem()).unwrap();
        assert_eq!(alice.peer_fingerprint(2), Some(&fingerprint));

        assert!(alice.learn_peer_key(2, "garbage").is_err());
        assert!(!alice.has_peer_key(2));
    }

    #[test]
    fn regenerate_changes_identity() {
        let mut alice = session(1);
        let before = alice.fingerprint();
        assert_eq!(alice.generation(), 1);

        alice.regenerate([9; 32]);
        assert_ne!(alice.fingerprint(), before);
        assert_eq!(alice.generation(), 2);
    }
}
