// =============================================================================
// Ingestion Module
// =============================================================================
//
// Accepts structured signal candidates from the upstream parsing collaborator
// and gates them through the admission validator. Rejections are normal
// control flow, never errors.

pub mod candidate;
pub mod validator;

pub use candidate::SignalCandidate;
pub use validator::{RejectReason, SignalValidator};
