//! Public key text codec.
//!
//! Key material crosses text transports that mangle bytes: whitespace gets
//! injected, line endings change, padding goes missing. Importing is split in
//! two stages so that this noise never looks like a cryptographic failure:
//!
//! 1. [`sanitize`] is lossy cleanup. Total and idempotent, it strips PEM armor,
//!    drops every character outside the base64 alphabet and re-pads.
//! 2. [`decode`] is strict structural validation. It is the only stage that
//!    can reject a key.

use base64::{
    Engine,
    alphabet,
    engine::{
        GeneralPurpose, GeneralPurposeConfig,
        general_purpose::STANDARD,
    },
};

use crate::{
    error::CryptoError,
    keypair::{PUBLIC_KEY_SIZE, PublicKey, SPKI_DER_SIZE, SPKI_PREFIX},
};

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";
const PEM_LINE_WIDTH: usize = 64;
const ARMOR_DASHES: &[u8] = b"-----";

/// Standard alphabet, tolerant of non-zero trailing bits left behind by
/// corrupted input.
const TOLERANT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Result of [`sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    /// Cleaned, correctly padded base64 text
    Key(String),
    /// Nothing usable was left after cleanup
    Empty,
}

impl Sanitized {
    /// Cleaned text, or `None` for [`Sanitized::Empty`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Key(text) => Some(text),
            Self::Empty => None,
        }
    }

    /// True if cleanup left nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Best-effort cleanup of untrusted key text.
///
/// Removes `-----BEGIN …-----` and `-----END …-----` armor, drops every
/// character outside `[A-Za-z0-9+/]`, discards a dangling final character that
/// cannot encode a full byte, and re-pads with `=`. Never fails.
pub fn sanitize(text: &str) -> Sanitized {
    let mut body = strip_armor_and_filter(text.as_bytes());

    // A single leftover sextet carries no complete byte
    if body.len() % 4 == 1 {
        body.pop();
    }

    if body.is_empty() {
        return Sanitized::Empty;
    }

    while body.len() % 4 != 0 {
        body.push('=');
    }

    Sanitized::Key(body)
}

/// Import a sanitized key.
///
/// # Errors
///
/// - `Encoding` if the base64 text cannot be decoded
/// - `Import` if nothing was left after sanitizing, the decoded length is not
///   that of an X25519 `SubjectPublicKeyInfo`, or the DER prefix is wrong
pub fn decode(sanitized: &Sanitized) -> Result<PublicKey, CryptoError> {
    let Sanitized::Key(text) = sanitized else {
        return Err(CryptoError::Import { reason: "no key material".to_string() });
    };

    let der = TOLERANT
        .decode(text)
        .map_err(|e| CryptoError::Encoding { reason: e.to_string() })?;

    if der.len() != SPKI_DER_SIZE {
        return Err(CryptoError::Import {
            reason: format!("decoded key is {} bytes, expected {SPKI_DER_SIZE}", der.len()),
        });
    }

    let (prefix, raw) = der.split_at(SPKI_PREFIX.len());
    if prefix != SPKI_PREFIX {
        return Err(CryptoError::Import {
            reason: "not an X25519 SubjectPublicKeyInfo".to_string(),
        });
    }

    let mut bytes = [0u8; PUBLIC_KEY_SIZE];
    bytes.copy_from_slice(raw);
    Ok(PublicKey::from_bytes(bytes))
}

/// Sanitize then decode untrusted key text.
pub fn import_public_key(text: &str) -> Result<PublicKey, CryptoError> {
    decode(&sanitize(text))
}

/// Canonical PEM encoding: standard base64 DER wrapped at 64 columns.
pub fn encode_pem(key: &PublicKey) -> String {
    let body = STANDARD.encode(key.to_spki_der());

    let mut pem = String::with_capacity(body.len() + PEM_HEADER.len() + PEM_FOOTER.len() + 4);
    pem.push_str(PEM_HEADER);
    pem.push('\n');
    for (i, c) in body.chars().enumerate() {
        if i > 0 && i % PEM_LINE_WIDTH == 0 {
            pem.push('\n');
        }
        pem.push(c);
    }
    pem.push('\n');
    pem.push_str(PEM_FOOTER);
    pem.push('\n');
    pem
}

fn strip_armor_and_filter(bytes: &[u8]) -> String {
    let mut body = String::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if let Some(len) = armor_len(&bytes[i..]) {
            i += len;
            continue;
        }

        let b = bytes[i];
        if b.is_ascii_alphanumeric() || b == b'+' || b == b'/' {
            body.push(char::from(b));
        }
        i += 1;
    }

    body
}

/// Length of an armor line starting at `rest`, if there is one.
///
/// Matches `-----BEGIN` or `-----END` (any case), a label without dashes, and
/// a closing `-----`.
fn armor_len(rest: &[u8]) -> Option<usize> {
    let after_dashes = rest.strip_prefix(ARMOR_DASHES)?;

    let keyword_len = if starts_with_ignore_case(after_dashes, b"BEGIN") {
        5
    } else if starts_with_ignore_case(after_dashes, b"END") {
        3
    } else {
        return None;
    };

    let label = &after_dashes[keyword_len..];
    let label_len = label.iter().position(|&b| b == b'-')?;

    label[label_len..]
        .starts_with(ARMOR_DASHES)
        .then_some(ARMOR_DASHES.len() + keyword_len + label_len + ARMOR_DASHES.len())
}

fn starts_with_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    fn sample_key() -> PublicKey {
        KeyPair::from_seed([0x42; 32]).public_key()
    }

    #[test]
    fn pem_roundtrip() {
        let key = sample_key();
        let pem = encode_pem(&key);

        assert!(pem.starts_with(PEM_HEADER));
        assert!(pem.trim_end().ends_with(PEM_FOOTER));
        assert_eq!(import_public_key(&pem).unwrap(), key);
    }

    #[test]
    fn sanitize_strips_armor() {
        let key = sample_key();
        let body = STANDARD.encode(key.to_spki_der());

        assert_eq!(sanitize(&encode_pem(&key)), Sanitized::Key(body));
    }

    #[test]
    fn sanitize_tolerates_lowercase_armor_and_crlf() {
        let key = sample_key();
        let mangled = encode_pem(&key)
            .replace('\n', "\r\n")
            .replace("BEGIN PUBLIC KEY", "begin public key");

        assert_eq!(import_public_key(&mangled).unwrap(), key);
    }

    #[test]
    fn sanitize_repads_missing_padding() {
        let key = sample_key();
        let body = STANDARD.encode(key.to_spki_der());
        let unpadded = body.trim_end_matches('=');

        assert_ne!(unpadded.len(), body.len());
        assert_eq!(sanitize(unpadded), Sanitized::Key(body));
    }

    #[test]
    fn sanitize_garbage_is_empty() {
        assert_eq!(sanitize(""), Sanitized::Empty);
        assert_eq!(sanitize("   \n\t  "), Sanitized::Empty);
        assert_eq!(sanitize("-----BEGIN PUBLIC KEY----------END PUBLIC KEY-----"), Sanitized::Empty);
        assert_eq!(sanitize("é"), Sanitized::Empty);
        assert_eq!(sanitize("A"), Sanitized::Empty);
    }

    #[test]
    fn sanitize_drops_dangling_character() {
        assert_eq!(sanitize("AAAAA"), Sanitized::Key("AAAA".to_string()));
    }

    #[test]
    fn decode_empty_is_import_error() {
        let err = decode(&Sanitized::Empty).unwrap_err();
        assert!(matches!(err, CryptoError::Import { .. }));
    }

    #[test]
    fn decode_rejects_truncated_key() {
        let key = sample_key();
        let body = STANDARD.encode(&key.to_spki_der()[..40]);

        let err = import_public_key(&body).unwrap_err();
        assert!(matches!(err, CryptoError::Import { .. }));
    }

    #[test]
    fn decode_rejects_foreign_spki() {
        let mut der = sample_key().to_spki_der();
        // Ed25519 OID instead of X25519
        der[8] = 0x70;

        let err = import_public_key(&STANDARD.encode(der)).unwrap_err();
        assert!(matches!(err, CryptoError::Import { .. }));
    }
}
