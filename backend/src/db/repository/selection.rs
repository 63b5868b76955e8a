//! Storage operations for the target selection and cadence bookkeeping
//! records TAD queries join against.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{
    CadenceType, PixelLog, PlannedTarget, SkyGroup, TargetListId, TargetListSet, TargetListSetId,
    TargetTableId,
};

#[async_trait]
pub trait TargetSelectionRepository: Send + Sync {
    /// Store a target list set together with any unsaved target lists.
    async fn create_target_list_set(&self, tls: &TargetListSet) -> RepositoryResult<TargetListSet>;

    /// Persist the scalar columns of a stored target list set (state, tables,
    /// supplemental link).
    async fn update_target_list_set(&self, tls: &TargetListSet) -> RepositoryResult<()>;

    async fn get_target_list_set(
        &self,
        id: TargetListSetId,
    ) -> RepositoryResult<Option<TargetListSet>>;

    /// Every target list set with the given name, ordered by id.
    async fn find_target_list_sets_by_name(&self, name: &str)
        -> RepositoryResult<Vec<TargetListSet>>;

    /// Every target list set whose target table is `target_table_id`.
    async fn find_target_list_sets_by_target_table(
        &self,
        target_table_id: TargetTableId,
    ) -> RepositoryResult<Vec<TargetListSet>>;

    async fn create_planned_target(&self, target: &PlannedTarget)
        -> RepositoryResult<PlannedTarget>;

    /// Planned targets on any of the given lists, optionally limited to
    /// kepler ids.
    async fn find_planned_targets(
        &self,
        target_list_ids: &[TargetListId],
        kepler_ids: Option<&[i32]>,
    ) -> RepositoryResult<Vec<PlannedTarget>>;

    async fn create_sky_group(&self, sky_group: &SkyGroup) -> RepositoryResult<SkyGroup>;

    async fn find_sky_group(
        &self,
        sky_group_id: i32,
        observing_season: i32,
    ) -> RepositoryResult<Option<SkyGroup>>;
}

#[async_trait]
pub trait PixelLogRepository: Send + Sync {
    async fn create_pixel_log(&self, log: &PixelLog) -> RepositoryResult<()>;

    /// Pixel logs ordered by cadence number, optionally limited to one cadence
    /// type and an inclusive cadence range.
    async fn find_pixel_logs(
        &self,
        cadence_type: Option<CadenceType>,
        cadence_range: Option<(i32, i32)>,
    ) -> RepositoryResult<Vec<PixelLog>>;
}
