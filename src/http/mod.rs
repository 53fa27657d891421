//! Transport and retry primitives used by the registry client.

pub mod client;
pub mod retry;
