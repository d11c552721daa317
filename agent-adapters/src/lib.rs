//! Service adapters used by guarded agent pipelines.
//!
//! Provider modules implement the trait-based interfaces defined in
//! [`traits`]; [`http_client`] holds the shared HTTP(S) transport.

#![warn(missing_docs, clippy::pedantic)]

pub mod http_client;
pub mod openai;
pub mod traits;
