//! Repository implementations.
//!
//! - `local`: in-memory store used by unit tests and dry runs
//! - `postgres`: PostgreSQL store built on Diesel (feature `postgres-repo`)
pub mod local;
#[cfg(feature = "postgres-repo")]
pub mod postgres;

pub use local::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use postgres::{PoolStats, PostgresConfig, PostgresRepository};
