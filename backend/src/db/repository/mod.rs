//! Repository trait definitions.
//!
//! Storage access is split into focused traits, one per concern:
//!
//! - [`target`]: target tables, mask tables, masks, observed targets, target
//!   definitions, apertures and images
//! - [`selection`]: target list sets, planned targets, sky groups and pixel logs
//! - [`pipeline`]: pipeline instances and tasks
//! - [`dv`]: data validation results
//! - [`fc`]: flat field models
//! - [`transaction`]: begin/commit/rollback
//!
//! Façades take an `Arc<dyn FullRepository>` so the same code runs against
//! the in-memory store and Postgres.

pub mod dv;
pub mod error;
pub mod fc;
pub mod pipeline;
pub mod selection;
pub mod target;
pub mod transaction;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};

pub use dv::DvRepository;
pub use fc::FcRepository;
pub use pipeline::PipelineRepository;
pub use selection::{PixelLogRepository, TargetSelectionRepository};
pub use target::TargetRepository;
pub use transaction::TransactionRepository;

/// Every repository capability a batch tool may need.
///
/// Implemented automatically for any type that implements all of the
/// focused traits.
pub trait FullRepository:
    TargetRepository
    + TargetSelectionRepository
    + PixelLogRepository
    + PipelineRepository
    + DvRepository
    + FcRepository
    + TransactionRepository
{
}

impl<T> FullRepository for T where
    T: TargetRepository
        + TargetSelectionRepository
        + PixelLogRepository
        + PipelineRepository
        + DvRepository
        + FcRepository
        + TransactionRepository
{
}
