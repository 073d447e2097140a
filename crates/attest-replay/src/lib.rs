//! Attest Replay - deviation filtering and session narrative reconstruction.
//!
//! Consumes the external session/event store strictly read-only: the
//! [`SessionSource`] capability exposes no write surface, so nothing built
//! on it can mutate or delete source events. Protected fields pass through
//! the [`FieldDecryptor`] capability when one is authorized.

#![deny(unsafe_code)]

pub mod filter;
pub mod memory;
pub mod reconstruct;
pub mod source;

pub use filter::{filter_deviations, DeviationReport};
pub use memory::InMemorySessionSource;
pub use reconstruct::{reconstruct, SessionReplayer};
pub use source::{decrypt_safe, FieldDecryptor, NoopDecryptor, ReplayError, SessionSource};
