//! Property-based tests for the message pipeline and key codec.

use hushline_crypto::{
    CryptoError, ENTROPY_SIZE, Fingerprint, KeyPairStore, MessageCipher, MessageEntropy,
    SharedSecret, derive_shared_secret, encode_pem, import_public_key, sanitize,
};
use proptest::prelude::*;

/// Low iteration count keeps the suite fast; the KDF cost does not change any
/// of the properties below.
fn cipher() -> MessageCipher {
    MessageCipher::with_iterations(64)
}

fn arbitrary_secret() -> impl Strategy<Value = SharedSecret> {
    any::<[u8; 32]>().prop_map(SharedSecret::from_bytes)
}

fn arbitrary_entropy() -> impl Strategy<Value = [u8; ENTROPY_SIZE]> {
    prop::collection::vec(any::<u8>(), ENTROPY_SIZE).prop_map(|bytes| {
        let mut out = [0u8; ENTROPY_SIZE];
        out.copy_from_slice(&bytes);
        out
    })
}

/// Whitespace a text transport might inject into a key block
fn arbitrary_noise() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof![Just(' '), Just('\n'), Just('\r'), Just('\t')], 0..4)
        .prop_map(|chars| chars.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_encrypt_decrypt_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..512),
        secret in arbitrary_secret(),
        entropy in arbitrary_entropy(),
    ) {
        let sealed = cipher()
            .encrypt(&plaintext, &secret, MessageEntropy::from_random_bytes(entropy))
            .unwrap();
        let opened = cipher().decrypt(&sealed, &secret).expect("roundtrip must succeed");

        // PROPERTY: decrypt(encrypt(P, S), S) == P
        prop_assert_eq!(opened, plaintext);
    }

    #[test]
    fn prop_fresh_entropy_gives_fresh_salt_and_nonce(
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        secret in arbitrary_secret(),
        first in arbitrary_entropy(),
        second in arbitrary_entropy(),
    ) {
        prop_assume!(first[..16] != second[..16] && first[16..] != second[16..]);

        let a = cipher()
            .encrypt(&plaintext, &secret, MessageEntropy::from_random_bytes(first))
            .unwrap();
        let b = cipher()
            .encrypt(&plaintext, &secret, MessageEntropy::from_random_bytes(second))
            .unwrap();

        prop_assert_ne!(a.salt, b.salt);
        prop_assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn prop_tampered_ciphertext_fails(
        plaintext in prop::collection::vec(any::<u8>(), 0..128),
        secret in arbitrary_secret(),
        entropy in arbitrary_entropy(),
        flip_index in any::<prop::sample::Index>(),
        flip_bits in 1u8..=255,
    ) {
        let mut sealed = cipher()
            .encrypt(&plaintext, &secret, MessageEntropy::from_random_bytes(entropy))
            .unwrap();
        let i = flip_index.index(sealed.ciphertext.len());
        sealed.ciphertext[i] ^= flip_bits;

        // PROPERTY: tampering is always detected, never yields altered plaintext
        prop_assert_eq!(cipher().decrypt(&sealed, &secret), Err(CryptoError::Decrypt));
    }

    #[test]
    fn prop_wrong_secret_fails(
        plaintext in prop::collection::vec(any::<u8>(), 0..128),
        secret in arbitrary_secret(),
        other in arbitrary_secret(),
        entropy in arbitrary_entropy(),
    ) {
        prop_assume!(secret != other);

        let sealed = cipher()
            .encrypt(&plaintext, &secret, MessageEntropy::from_random_bytes(entropy))
            .unwrap();
        prop_assert_eq!(cipher().decrypt(&sealed, &other), Err(CryptoError::Decrypt));
    }

    #[test]
    fn prop_sanitize_is_idempotent(text in ".*") {
        let once = sanitize(&text);
        let twice = match once.as_str() {
            Some(cleaned) => sanitize(cleaned),
            None => sanitize(""),
        };

        // PROPERTY: sanitize(sanitize(x)) == sanitize(x)
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn prop_sanitize_never_panics_on_bytes(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let text = String::from_utf8_lossy(&bytes);
        let _ = sanitize(&text);
        let _ = import_public_key(&text);
    }

    #[test]
    fn prop_whitespace_mangled_key_imports_identically(
        seed in any::<[u8; 32]>(),
        peer_seed in any::<[u8; 32]>(),
        noise in prop::collection::vec(arbitrary_noise(), 1..8),
        positions in prop::collection::vec(any::<prop::sample::Index>(), 1..8),
    ) {
        let owner = KeyPairStore::generate(seed);
        let peer = KeyPairStore::generate(peer_seed);
        let pem = encode_pem(&owner.public_key());

        // Inject whitespace into the base64 body only
        let header_end = pem.find('\n').expect("pem has header line") + 1;
        let footer_start = pem.rfind("-----END").expect("pem has footer");
        let mut body: Vec<char> = pem[header_end..footer_start].chars().collect();
        for (chunk, at) in noise.iter().zip(positions.iter()) {
            let i = at.index(body.len() + 1);
            for (offset, c) in chunk.chars().enumerate() {
                body.insert(i + offset, c);
            }
        }
        let mangled: String = format!(
            "{}{}{}",
            &pem[..header_end],
            body.into_iter().collect::<String>(),
            &pem[footer_start..]
        );

        let imported = import_public_key(&mangled).expect("mangled key must import");
        prop_assert_eq!(imported, owner.public_key());
        prop_assert_eq!(Fingerprint::of(&imported), Fingerprint::of(&owner.public_key()));

        let clean = derive_shared_secret(&peer, &owner.public_key());
        let mangled_secret = derive_shared_secret(&peer, &imported);
        prop_assert_eq!(clean, mangled_secret);
    }
}

#[test]
fn alice_and_bob_exchange_hello() {
    let alice = KeyPairStore::generate([0xA1; 32]);
    let bob = KeyPairStore::generate([0xB0; 32]);

    // Bob only ever sees Alice's key as PEM text
    let alice_public = import_public_key(&alice.export_public_pem()).unwrap();
    let bob_secret = derive_shared_secret(&bob, &alice_public).unwrap();
    let sealed = cipher().encrypt(
        b"hello",
        &bob_secret,
        MessageEntropy::from_random_bytes([0x5A; ENTROPY_SIZE]),
    )
    .unwrap();

    let bob_public = import_public_key(&bob.export_public_pem()).unwrap();
    let alice_secret = derive_shared_secret(&alice, &bob_public).unwrap();

    assert_eq!(cipher().decrypt(&sealed, &alice_secret).unwrap(), b"hello");
}
