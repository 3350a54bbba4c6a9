//! Execution control
//!
//! Drives one snippet from context validation to a classified result.

pub mod executor;
