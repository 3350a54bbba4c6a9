//! Utilities
//!
//! Output collection and HTML sanitizing.

pub mod html;
pub mod output;
