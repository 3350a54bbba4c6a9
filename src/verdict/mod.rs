//! Verdict classification
//!
//! Derives run status as a pure function over the evidence of a run.

pub mod verdict;
