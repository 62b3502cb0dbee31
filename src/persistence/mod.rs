//! Persistence layer modules.
//!
//! A single key-path record table holds local state such as share
//! records; see [`record_repo::RecordRepo`].

pub mod db;
pub mod record_repo;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
