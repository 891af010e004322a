//! Envelope codec.
//!
//! An envelope is the four-field record the relay stores and forwards:
//! ciphertext, nonce, salt and a type tag. Binary fields travel as unpadded
//! base64url. The relay never looks inside; only clients call [`Envelope::unpack`].
//!
//! A fallback envelope carries plaintext instead of ciphertext. It is tagged
//! twice so a receiver cannot mistake it for a sealed message: the type tag is
//! `"fallback"` and both `nonce` and `salt` hold [`FALLBACK_MARKER`].

use base64::{
    Engine, alphabet,
    engine::{
        DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::URL_SAFE_NO_PAD,
    },
};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Value of `nonce` and `salt` in a fallback envelope.
pub const FALLBACK_MARKER: &str = "unencrypted";

/// URL-safe alphabet that accepts both padded and unpadded input.
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Envelope type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// AEAD-sealed text message
    Text,
    /// Unencrypted fallback payload
    Fallback,
}

/// Envelope as it appears on the wire and in storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// base64url ciphertext (or UTF-8 plaintext for fallback)
    pub ciphertext: String,
    /// base64url nonce, or [`FALLBACK_MARKER`]
    pub nonce: String,
    /// base64url salt, or [`FALLBACK_MARKER`]
    pub salt: String,
    /// Type tag
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
}

impl WireEnvelope {
    /// Length of the longest encoded field.
    pub fn largest_field(&self) -> usize {
        self.ciphertext.len().max(self.nonce.len()).max(self.salt.len())
    }

    /// True if this envelope claims to be a fallback payload.
    pub fn is_fallback(&self) -> bool {
        self.kind == EnvelopeKind::Fallback
    }
}

/// Decoded envelope contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Sealed message fields, still encrypted
    Sealed {
        /// Ciphertext including the authentication tag
        ciphertext: Vec<u8>,
        /// AEAD nonce
        nonce: Vec<u8>,
        /// KDF salt
        salt: Vec<u8>,
    },
    /// Plaintext sent in fallback mode
    Fallback {
        /// Message text
        plaintext: String,
    },
}

impl Envelope {
    /// Encode for the wire. Total.
    pub fn pack(&self) -> WireEnvelope {
        match self {
            Self::Sealed { ciphertext, nonce, salt } => WireEnvelope {
                ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
                nonce: URL_SAFE_NO_PAD.encode(nonce),
                salt: URL_SAFE_NO_PAD.encode(salt),
                kind: EnvelopeKind::Text,
            },
            Self::Fallback { plaintext } => WireEnvelope {
                ciphertext: URL_SAFE_NO_PAD.encode(plaintext.as_bytes()),
                nonce: FALLBACK_MARKER.to_string(),
                salt: FALLBACK_MARKER.to_string(),
                kind: EnvelopeKind::Fallback,
            },
        }
    }

    /// Decode wire fields.
    ///
    /// # Errors
    ///
    /// - `Base64` if a binary field is not base64url (padded or not)
    /// - `InconsistentEnvelope` if the type tag and the fallback markers
    ///   disagree, or a fallback payload is not UTF-8
    pub fn unpack(wire: &WireEnvelope) -> Result<Self> {
        let marked = wire.nonce == FALLBACK_MARKER || wire.salt == FALLBACK_MARKER;

        match wire.kind {
            EnvelopeKind::Text => {
                if marked {
                    return Err(ProtocolError::InconsistentEnvelope {
                        reason: "text envelope carries fallback marker".to_string(),
                    });
                }

                Ok(Self::Sealed {
                    ciphertext: decode_field(&wire.ciphertext, "ciphertext")?,
                    nonce: decode_field(&wire.nonce, "nonce")?,
                    salt: decode_field(&wire.salt, "salt")?,
                })
            },
            EnvelopeKind::Fallback => {
                if wire.nonce != FALLBACK_MARKER || wire.salt != FALLBACK_MARKER {
                    return Err(ProtocolError::InconsistentEnvelope {
                        reason: "fallback envelope without fallback marker".to_string(),
                    });
                }

                let bytes = decode_field(&wire.ciphertext, "ciphertext")?;
                let plaintext = String::from_utf8(bytes).map_err(|_| {
                    ProtocolError::InconsistentEnvelope {
                        reason: "fallback payload is not UTF-8".to_string(),
                    }
                })?;

                Ok(Self::Fallback { plaintext })
            },
        }
    }

    /// True for [`Envelope::Fallback`].
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

fn decode_field(value: &str, field: &'static str) -> Result<Vec<u8>> {
    LENIENT_URL_SAFE.decode(value).map_err(|_| ProtocolError::Base64 { field })
}
