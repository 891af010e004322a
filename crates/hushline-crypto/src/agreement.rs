//! X25519 shared secret derivation.

use std::fmt;

use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    keypair::{KeyPairStore, PublicKey},
};

/// Size of the agreed secret.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Secret agreed between a local private key and a peer public key.
///
/// Identical on both sides of a conversation. Zeroized on drop.
#[derive(Clone)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Wrap existing secret bytes.
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Secret bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(<redacted>)")
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        // Not constant time; only used by tests and diagnostics
        self.0 == other.0
    }
}

impl Eq for SharedSecret {}

/// Derive the shared secret between our key pair and a peer's public key.
///
/// Pure function of its inputs. Not cached.
///
/// # Errors
///
/// - `Agreement` if the peer key uses a different algorithm, or is a low-order
///   point that would force an all-zero (non-contributory) secret
pub fn derive_shared_secret(
    local: &KeyPairStore,
    remote: &PublicKey,
) -> Result<SharedSecret, CryptoError> {
    if remote.algorithm() != local.algorithm() {
        return Err(CryptoError::Agreement {
            reason: format!(
                "peer key is {}, local key is {}",
                remote.algorithm(),
                local.algorithm()
            ),
        });
    }

    let agreed = local.pair().secret().diffie_hellman(remote.inner());
    if !agreed.was_contributory() {
        return Err(CryptoError::Agreement { reason: "peer key is a low-order point".to_string() });
    }

    Ok(SharedSecret(agreed.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_agree() {
        let alice = KeyPairStore::generate([1u8; 32]);
        let bob = KeyPairStore::generate([2u8; 32]);

        let ab = derive_shared_secret(&alice, &bob.public_key()).unwrap();
        let ba = derive_shared_secret(&bob, &alice.public_key()).unwrap();

        assert_eq!(ab, ba);
    }

    #[test]
    fn different_peers_different_secrets() {
        let alice = KeyPairStore::generate([1u8; 32]);
        let bob = KeyPairStore::generate([2u8; 32]);
        let carol = KeyPairStore::generate([3u8; 32]);

        let with_bob = derive_shared_secret(&alice, &bob.public_key()).unwrap();
        let with_carol = derive_shared_secret(&alice, &carol.public_key()).unwrap();

        assert_ne!(with_bob, with_carol);
    }

    #[test]
    fn low_order_point_rejected() {
        let alice = KeyPairStore::generate([1u8; 32]);
        let identity = PublicKey::from_bytes([0u8; 32]);

        let err = derive_shared_secret(&alice, &identity).unwrap_err();
        assert!(matches!(err, CryptoError::Agreement { .. }));
    }

    #[test]
    fn debug_is_redacted() {
        let secret = SharedSecret::from_bytes([0xAA; 32]);
        assert_eq!(format!("{secret:?}"), "SharedSecret(<redacted>)");
    }
}
