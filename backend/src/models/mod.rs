pub mod dv;
pub mod fc;
pub mod macros;
pub mod pipeline;
pub mod projections;
pub mod selection;
pub mod supplemental;
pub mod tad;
pub mod unified;

pub use dv::*;
pub use fc::*;
pub use pipeline::*;
pub use projections::*;
pub use selection::*;
pub use supplemental::*;
pub use tad::*;
pub use unified::*;
