//! Storage layer for TAD, DV and FC records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Binaries and tools (shift-apertures, ...)              │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │ run_in_transaction
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  CRUD façades (crate::crud) - dedup, supplemental merge │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  Repository traits (repository) + typed queries (query) │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────┴──────────────────┐
//!     │  LocalRepository │ PostgresRepository │
//!     │   (in-memory)    │   (Diesel + r2d2)  │
//!     └──────────────────────────────────┘
//! ```
//!
//! - `repository`: trait definitions and [`RepositoryError`]
//! - `query`: filter structs and join rows shared by every backend
//! - `repositories::local`: in-memory implementation for tests and dry runs
//! - `repositories::postgres`: Postgres implementation with Diesel
//! - `factory` / `repo_config`: backend selection from the environment or
//!   `repository.toml`

// Feature flag priority: postgres > local
#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod query;
pub mod repo_config;
pub mod repositories;
pub mod repository;

#[cfg(feature = "postgres-repo")]
pub use repositories::postgres::{PoolStats, PostgresConfig};
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    _private: (),
}
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    _private: (),
}

pub use factory::{RepositoryBuilder, RepositoryFactory, RepositoryType};
pub use repo_config::RepositoryConfig;
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::PostgresRepository;
pub use repository::{
    DvRepository, ErrorContext, FcRepository, FullRepository, PipelineRepository,
    PixelLogRepository, RepositoryError, RepositoryResult, TargetRepository,
    TargetSelectionRepository, TransactionRepository,
};

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::{Arc, OnceLock};

/// Global repository instance initialized once per process.
static REPOSITORY: OnceLock<Arc<dyn FullRepository>> = OnceLock::new();

/// Initialize the global repository from `repository.toml` when one exists,
/// otherwise from the environment.
pub async fn init_repository() -> Result<&'static Arc<dyn FullRepository>> {
    if let Some(repo) = REPOSITORY.get() {
        return Ok(repo);
    }

    let repo = match RepositoryConfig::from_default_location() {
        Ok(config) => {
            let repo_type = config
                .repository_type()
                .map_err(anyhow::Error::msg)
                .context("Invalid repository.toml")?;
            let pg_config = config.to_postgres_config()?;
            RepositoryFactory::create(repo_type, pg_config.as_ref()).await?
        }
        Err(_) => RepositoryFactory::from_env()
            .await
            .context("Failed to create repository from environment")?,
    };

    Ok(REPOSITORY.get_or_init(|| repo))
}

/// The repository set by [`init_repository`].
pub fn get_repository() -> Result<&'static Arc<dyn FullRepository>> {
    REPOSITORY
        .get()
        .context("Database not initialized. Call init_repository() first.")
}

/// Run `work` inside one transaction.
///
/// Commits when `work` succeeds and rolls back when it fails; the work's
/// error is returned even if the rollback itself fails.
pub async fn run_in_transaction<T, E, F, Fut>(repo: &dyn FullRepository, work: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<RepositoryError>,
{
    repo.begin_transaction().await?;
    match work().await {
        Ok(value) => {
            repo.commit_transaction().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = repo.rollback_transaction().await {
                log::error!("Rollback failed: {}", rollback);
            }
            Err(err)
        }
    }
}
