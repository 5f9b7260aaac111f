//! Core definitions (error type, result alias, argument checks) shared by the fanout-* crates.

pub mod error;
pub mod result;

pub use result::Result;
