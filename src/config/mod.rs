//! Configuration
//!
//! Settings, validation and shared types.

pub mod settings;
pub mod types;
pub mod validator;
