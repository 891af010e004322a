//! Per-message key derivation and authenticated encryption.
//!
//! Every message gets its own symmetric key: PBKDF2-HMAC-SHA256 over the
//! shared secret with a fresh random salt. The message is then sealed with
//! ChaCha20-Poly1305 under a fresh random nonce.
//!
//! All functions are pure. Random bytes come from the caller as a
//! [`MessageEntropy`], which is consumed by [`MessageCipher::encrypt`] and
//! cannot be cloned, so a salt/nonce pair is never used twice.
//!
//! # Security
//!
//! A leaked per-message key exposes one message only. The shared secret is
//! static, however: if a long-term private key leaks, every past message
//! between the two parties can be decrypted. There is no forward secrecy.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{agreement::SharedSecret, error::CryptoError};

/// Salt length for the per-message KDF.
pub const SALT_SIZE: usize = 16;

/// ChaCha20-Poly1305 nonce length.
pub const NONCE_SIZE: usize = 12;

/// Derived message key length.
pub const KEY_SIZE: usize = 32;

/// Default PBKDF2 iteration count. Both parties must use the same value.
pub const KDF_ITERATIONS: u32 = 100_000;

/// Random bytes consumed by one encryption (salt followed by nonce).
pub const ENTROPY_SIZE: usize = SALT_SIZE + NONCE_SIZE;

/// Poly1305 tag size (16 bytes)
const TAG_SIZE: usize = 16;

/// Single-use randomness for one encryption.
///
/// Deliberately neither `Clone` nor `Copy`.
#[derive(Debug)]
pub struct MessageEntropy {
    salt: [u8; SALT_SIZE],
    nonce: [u8; NONCE_SIZE],
}

impl MessageEntropy {
    /// Split caller-provided random bytes into salt and nonce.
    ///
    /// Callers MUST fill `bytes` from a cryptographically secure RNG.
    pub fn from_random_bytes(bytes: [u8; ENTROPY_SIZE]) -> Self {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        salt.copy_from_slice(&bytes[..SALT_SIZE]);
        nonce.copy_from_slice(&bytes[SALT_SIZE..]);
        Self { salt, nonce }
    }
}

/// Ciphertext plus the parameters needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// Ciphertext including the 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
    /// AEAD nonce
    pub nonce: [u8; NONCE_SIZE],
    /// KDF salt
    pub salt: [u8; SALT_SIZE],
}

impl SealedMessage {
    /// Rebuild from decoded wire fields.
    ///
    /// # Errors
    ///
    /// - `Decrypt` if the nonce or salt has the wrong length. A malformed
    ///   envelope is reported exactly like a failed authentication.
    pub fn from_parts(
        ciphertext: Vec<u8>,
        nonce: &[u8],
        salt: &[u8],
    ) -> Result<Self, CryptoError> {
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| CryptoError::Decrypt)?;
        let salt: [u8; SALT_SIZE] = salt.try_into().map_err(|_| CryptoError::Decrypt)?;
        Ok(Self { ciphertext, nonce, salt })
    }

    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(TAG_SIZE)
    }
}

/// Message encryption with a fixed KDF cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCipher {
    iterations: u32,
}

impl Default for MessageCipher {
    fn default() -> Self {
        Self { iterations: KDF_ITERATIONS }
    }
}

impl MessageCipher {
    /// Cipher with a custom PBKDF2 iteration count (at least 1).
    pub fn with_iterations(iterations: u32) -> Self {
        Self { iterations: iterations.max(1) }
    }

    /// PBKDF2 iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Encrypt `plaintext` under a key derived from `secret` and the salt in
    /// `entropy`.
    ///
    /// # Errors
    ///
    /// - `Encrypt` if the AEAD rejects the input (plaintext beyond the
    ///   ChaCha20-Poly1305 length limit)
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        secret: &SharedSecret,
        entropy: MessageEntropy,
    ) -> Result<SealedMessage, CryptoError> {
        let MessageEntropy { salt, nonce } = entropy;
        let key = self.derive_key(secret, &salt);
        let cipher = ChaCha20Poly1305::new((&*key).into());

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(SealedMessage { ciphertext, nonce, salt })
    }

    /// Re-derive the message key and decrypt.
    ///
    /// # Errors
    ///
    /// - `Decrypt` on any authentication failure (wrong secret, tampered
    ///   ciphertext, nonce or salt, truncated tag)
    pub fn decrypt(
        &self,
        sealed: &SealedMessage,
        secret: &SharedSecret,
    ) -> Result<Vec<u8>, CryptoError> {
        let key = self.derive_key(secret, &sealed.salt);
        let cipher = ChaCha20Poly1305::new((&*key).into());

        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_slice())
            .map_err(|_| CryptoError::Decrypt)
    }

    fn derive_key(
        &self,
        secret: &SharedSecret,
        salt: &[u8; SALT_SIZE],
    ) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, self.iterations, &mut *key);
        key
    }
}
