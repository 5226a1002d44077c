//! Shared scalar types for the `pesit-rs` workspace.
//!
//! This crate has no I/O and no protocol logic; it exists so that
//! `pesit-msg` (the wire codec) and `pesit` (the engine) can share
//! diagnostic codes, EBCDIC translation, and small identifier newtypes
//! without a dependency cycle.

#![forbid(unsafe_code)]

pub mod diagnostic;
pub mod ebcdic;
pub mod ids;

pub use diagnostic::DiagnosticCode;
pub use ids::{ConnectionId, SyncPointNumber, TransferId};
