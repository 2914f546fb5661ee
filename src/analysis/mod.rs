//! Analysis modules.
//!
//! Batch aggregation and the majority-vote tally live here.

pub mod aggregator;

pub use aggregator::*;
