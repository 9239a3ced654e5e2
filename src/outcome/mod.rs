// =============================================================================
// Outcome Module
// =============================================================================
//
// The verification core: a pure outcome evaluator (deadline, stop-loss,
// target precedence) and the price-observation monitor that drives it on
// every scheduler tick.

pub mod evaluator;
pub mod monitor;

pub use evaluator::{evaluate, realized_return, Verdict};
