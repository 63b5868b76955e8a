//! One-shot batch operations on TAD data.
//!
//! Each tool backs a command line binary and expects to be run inside a
//! transaction opened with [`crate::db::run_in_transaction`].

pub mod aperture_shifter;
pub mod comparator;
pub mod supplemental_setter;

pub use aperture_shifter::ApertureShifter;
pub use comparator::{ComparisonReport, TargetTableComparator};
pub use supplemental_setter::SupplementalTargetListSetSetter;

use crate::crud::error::{at_most_one, TadError, TadResult};
use crate::crud::TargetCrud;
use crate::db::TargetSelectionRepository;
use crate::models::{TargetListSet, TargetTable};

/// The target list set named `name`.
pub(crate) async fn target_list_set_named(
    crud: &TargetCrud,
    name: &str,
) -> TadResult<TargetListSet> {
    let found = crud.repository().find_target_list_sets_by_name(name).await?;
    at_most_one(found, "target list set")?
        .ok_or_else(|| TadError::not_found(format!("target list set {}", name)))
}

/// The target table a target list set was turned into.
pub(crate) async fn target_table_of(
    crud: &TargetCrud,
    tls: &TargetListSet,
) -> TadResult<TargetTable> {
    let id = tls.target_table_id.ok_or_else(|| {
        TadError::not_found(format!("target table for target list set {}", tls.name))
    })?;
    crud.retrieve_target_table(id).await?.ok_or_else(|| {
        TadError::not_found(format!(
            "target table {} for target list set {}",
            id, tls.name
        ))
    })
}
