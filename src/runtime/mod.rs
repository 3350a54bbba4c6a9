//! Script runtime
//!
//! Embedded QuickJS engine, the restricted global environment installed into
//! every realm, host timers and value conversion.

pub mod convert;
pub mod engine;
pub mod globals;
pub mod timers;
