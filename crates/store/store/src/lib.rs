//! Repository contract for Vigil's three durable record types.
//!
//! The repository is the single durable source of truth: every publish on
//! the bus is mirrored here first, and dashboards read from here. Saves are
//! idempotent on the record's primary key, which is what makes bus replays
//! harmless.

pub mod error;
pub mod repository;

pub use error::StoreError;
pub use repository::{Page, Repository, StoreStats};
