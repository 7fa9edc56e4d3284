//! Core type definitions for the evidence pipeline
//!
//! Serialized field names are camelCase, matching the manifest format
//! consumed by third-party verifiers.

pub mod audit;
mod bundle;
mod job;
mod record;

pub use audit::*;
pub use bundle::*;
pub use job::*;
pub use record::*;
