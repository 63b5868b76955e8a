//! Links a supplemental TAD run to the original run it revises.

use std::sync::Arc;

use log::info;

use super::{target_list_set_named, target_table_of};
use crate::crud::target::check_same_season;
use crate::crud::{TadError, TadResult, TargetCrud};
use crate::db::{FullRepository, TargetSelectionRepository};
use crate::models::TargetListSet;

pub struct SupplementalTargetListSetSetter {
    target_crud: TargetCrud,
}

impl SupplementalTargetListSetSetter {
    pub fn new(repo: Arc<dyn FullRepository>) -> Self {
        Self {
            target_crud: TargetCrud::new(repo),
        }
    }

    /// Records `supp_tls_name` as the supplemental target list set of
    /// `orig_tls_name`. Both sets need stored target tables of the same
    /// observing season.
    pub async fn set(&self, orig_tls_name: &str, supp_tls_name: &str) -> TadResult<TargetListSet> {
        let mut orig_tls = target_list_set_named(&self.target_crud, orig_tls_name).await?;
        let supp_tls = target_list_set_named(&self.target_crud, supp_tls_name).await?;

        let orig_table = target_table_of(&self.target_crud, &orig_tls).await?;
        let supp_table = target_table_of(&self.target_crud, &supp_tls).await?;
        check_same_season(&orig_table, &supp_table)?;

        let supp_tls_id = supp_tls.id.ok_or_else(|| {
            TadError::IllegalArgument(format!("target list set {} has not been stored", supp_tls.name))
        })?;
        orig_tls.supplemental_tls_id = Some(supp_tls_id);
        self.target_crud
            .repository()
            .update_target_list_set(&orig_tls)
            .await?;

        info!(
            "{} ({}) now uses {} ({}) as its supplemental target list set",
            orig_tls.name,
            orig_table.label(),
            supp_tls.name,
            supp_table.label()
        );
        Ok(orig_tls)
    }
}
