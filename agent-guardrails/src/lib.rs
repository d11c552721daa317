//! Output validation and bounded self-correction for agent replies.
//!
//! [`OutputValidator`] turns raw text into an
//! [`AgentOutput`](agent_primitives::AgentOutput) or explains why it cannot.
//! [`CorrectionLoop`] chains the safety gate and the validator and asks a
//! [`Corrector`] to regenerate rejected output, up to a fixed number of
//! attempts.

#![warn(missing_docs, clippy::pedantic)]

pub mod correction;
pub mod validator;

pub use correction::{CorrectionLoop, CorrectionRequest, Corrector, NoCorrection};
pub use validator::{
    OutputValidator, ValidationError, ValidationOutcome, ValidationRequest, ValidationStatus,
    quality_score,
};
