// Protocol definitions for the OpenAI-compatible surface
// Request types are what callers send; response types are what the gateway
// returns after normalizing whatever the backend produced.

/// User id recorded when the caller did not identify themselves.
pub const UNKNOWN_USER_ID: &str = "unknown";

pub mod audio;
pub mod chat;
pub mod embeddings;
pub mod models;
pub mod responses;
