//! `sentinel` crate (library surface).
//!
//! The binary is the primary entrypoint. This library holds the argument types and the
//! wiring from environment + flags to a ready [`ChatHandler`](sentinel_pipeline::ChatHandler),
//! so both can be tested without spawning the binary.

pub use sentinel_core as core;
pub use sentinel_local as local;
pub use sentinel_pipeline as pipeline;

pub mod args;
pub mod wiring;
