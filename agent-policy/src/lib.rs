//! Content-safety gate for guarded agent outputs.
//!
//! [`SafetyGate`] asks a [`ModerationClient`](agent_adapters::traits::ModerationClient)
//! to classify text and combines the service verdict with a local score
//! threshold. The gate fails open: configuration gaps and service errors
//! yield an unflagged [`ModerationResult`] carrying the reason.

#![warn(missing_docs, clippy::pedantic)]

pub mod gate;
pub mod moderation;

pub use gate::{ModerationRequest, SafetyGate};
pub use moderation::ModerationResult;
