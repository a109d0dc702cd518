//! Numeric helpers, the per-series frame and batch orchestration.

pub mod aggregator;
pub mod correlation;
pub mod runner;
pub mod stats;
