//! Size and paging limits shared by client and server.

/// Maximum encoded frame size (5 MiB).
pub const MAX_FRAME_SIZE: usize = 5 * 1024 * 1024;

/// Page size used when a request does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Largest page a single query may return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Longest plaintext message, in characters.
pub const MAX_PLAINTEXT_CHARS: usize = 10_000;

/// Longest encoded envelope field the relay accepts.
pub const MAX_ENVELOPE_FIELD: usize = 64 * 1024;
