//! TypeScript front end
//!
//! Parse, strip types and print JavaScript for the execution engine.

pub mod typescript;
