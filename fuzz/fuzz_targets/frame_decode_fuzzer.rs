//! Fuzz target for NDJSON frame decoding
//!
//! Both directions are decoded from the same arbitrary line. Decoding should
//! NEVER panic; a frame that decodes must re-encode to a single line.

#![no_main]

use hushline_proto::{decode_client_frame, decode_server_frame, encode_line};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = decode_client_frame(data) {
        let line = encode_line(&frame).expect("decoded frame must encode");
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(decode_client_frame(&line).ok(), Some(frame));
    }

    let _ = decode_server_frame(data);
});
