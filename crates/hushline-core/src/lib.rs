//! Hushline Core
//!
//! The [`Environment`] seam shared by the client and relay state machines.
//! Protocol logic never reads the clock or the RNG directly, so tests can
//! replay exact sequences with a manual clock and a seeded RNG.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
mod system_env;

pub use env::Environment;
pub use system_env::SystemEnv;
