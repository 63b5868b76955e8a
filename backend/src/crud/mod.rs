//! Query façades over the repository layer.
//!
//! The repositories return raw rows; the types here assemble them into
//! domain views, merge supplemental TAD runs over the originals they revise,
//! drop join duplicates and apply the pipeline selection rules for DV
//! results.
//!
//! Every façade holds an `Arc<dyn FullRepository>` and is cheap to clone.

pub mod clip;
pub mod dv;
pub mod error;
pub mod fc;
pub mod target;
pub mod unified;

pub use clip::{ClipReport, ClipReportFactory, MaskCoverageClipReportFactory};
pub use dv::{DvCrud, DvRecord};
pub use error::{TadError, TadResult};
pub use fc::FcCrud;
pub use target::TargetCrud;
pub use unified::UnifiedObservedTargetCrud;
