// =============================================================================
// Reporting Module
// =============================================================================
//
// Weekly accountability pipeline over the window's terminal signals:
// per-channel reliability aggregation, the 0-100 weekly score, and the
// immutable report object handed to the rendering collaborator.

pub mod aggregator;
pub mod assembler;
pub mod score;

pub use assembler::{assemble, latest_boundary, WeeklyReport};
pub use score::weekly_score;
