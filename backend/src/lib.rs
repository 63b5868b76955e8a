//! # Kepler TAD persistence layer
//!
//! Storage and query layer for the Kepler target management subsystem (TAD,
//! Target and Aperture Definitions) together with the data access objects for
//! data validation (DV) transit results and focal plane characterization (FC)
//! flat fields.
//!
//! ## Architecture
//!
//! - [`models`]: entity records, enums, the supplemental override wrapper and
//!   derived views such as [`models::UnifiedObservedTarget`]
//! - [`db`]: repository traits, the in-memory and Postgres backends, the
//!   repository factory and configuration
//! - [`crud`]: query façades ([`crud::TargetCrud`], [`crud::DvCrud`],
//!   [`crud::FcCrud`], [`crud::UnifiedObservedTargetCrud`])
//! - [`tools`]: one-shot batch operations behind the command line binaries
//! - [`cli`]: argument parsing and logging setup for those binaries
//!
//! ## Example
//!
//! ```no_run
//! use kepler_tad::crud::TargetCrud;
//! use kepler_tad::db::RepositoryFactory;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let repo = RepositoryFactory::create_local();
//! let crud = TargetCrud::new(repo);
//! let tables = crud
//!     .retrieve_uplinked_target_tables(kepler_tad::models::TargetType::LongCadence)
//!     .await?;
//! println!("{} uplinked long cadence tables", tables.len());
//! # Ok(())
//! # }
//! ```

// Allow large error types - RepositoryError contains rich context for debugging
#![allow(clippy::result_large_err)]

pub mod cli;
pub mod crud;
pub mod db;
pub mod models;
pub mod tools;
