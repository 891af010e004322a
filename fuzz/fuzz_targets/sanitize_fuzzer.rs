//! Fuzz target for public key sanitization and import
//!
//! Checks, for arbitrary text:
//! - `sanitize` never panics and is idempotent
//! - `decode` only ever returns an error for bad input
//! - A key that imports re-exports to PEM that imports to the same key

#![no_main]

use hushline_crypto::{decode, encode_pem, import_public_key, sanitize};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    let once = sanitize(text);
    if let Some(cleaned) = once.as_str() {
        assert_eq!(sanitize(cleaned), once, "sanitize is not idempotent");
    }

    if let Ok(key) = decode(&once) {
        let again = import_public_key(&encode_pem(&key)).expect("canonical PEM must import");
        assert_eq!(again, key);
    }
});
