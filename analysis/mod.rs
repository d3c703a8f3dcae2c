//! Downstream analyses: clock scoring, prediction deltas, coefficient
//! distributions and mutation enrichment.

pub mod clocks;
pub mod delta;
pub mod enrichment;
pub mod scorer;
pub mod stats;
