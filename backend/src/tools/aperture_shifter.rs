//! Moves every aperture of a target list set's table by a fixed pixel amount.

use std::sync::Arc;

use log::info;

use super::{target_list_set_named, target_table_of};
use crate::crud::target::saved_id;
use crate::crud::{TadResult, TargetCrud};
use crate::db::query::ObservedTargetQuery;
use crate::db::FullRepository;

pub struct ApertureShifter {
    target_crud: TargetCrud,
}

impl ApertureShifter {
    pub fn new(repo: Arc<dyn FullRepository>) -> Self {
        Self {
            target_crud: TargetCrud::new(repo),
        }
    }

    /// Shifts the reference row and column of every aperture in the target
    /// table of `tls_name`, rejected targets included. Returns the number of
    /// apertures shifted.
    pub async fn shift(&self, tls_name: &str, shift_amount: i32) -> TadResult<usize> {
        let tls = target_list_set_named(&self.target_crud, tls_name).await?;
        let table = target_table_of(&self.target_crud, &tls).await?;

        let query = ObservedTargetQuery::for_table(saved_id(&table)?).plus_rejected();
        let mut targets = self
            .target_crud
            .retrieve_original_observed_targets(&query)
            .await?;
        for aperture in targets.iter_mut().filter_map(|t| t.aperture.as_mut()) {
            aperture.shift(shift_amount, shift_amount);
        }

        let shifted = self.target_crud.update_apertures(&targets).await?;
        info!(
            "Shifted {} apertures of {} by {} pixels",
            shifted,
            table.label(),
            shift_amount
        );
        Ok(shifted)
    }
}
