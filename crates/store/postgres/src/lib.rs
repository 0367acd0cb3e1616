//! PostgreSQL [`Repository`] backend.
//!
//! One table per record type, primary key = the record id, the full record
//! stored as JSONB next to the columns the listing queries need. The schema
//! is created on startup if absent; an unreachable database is a fatal
//! startup error.

mod repository;
mod schema;

pub use repository::PostgresRepository;
