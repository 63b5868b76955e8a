//! Storage operations for TAD entities.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use crate::db::query::{
    DeletedRows, KeplerIdQuery, MaskTableFilter, ObservedTargetQuery, ObservedTargetRow,
    TargetDefinitionQuery, TargetTableFilter,
};
use crate::models::{
    Aperture, Image, KtcInfo, Mask, MaskTable, MaskTableId, ObservedTarget, ObservedTargetId,
    TargetDefinition, TargetTable, TargetTableId,
};

/// Repository trait for target and mask tables and everything hanging off them.
///
/// Every `create_*` method stores a record whose `id` is `None` and returns it
/// with ids assigned (including nested apertures, target definitions and
/// report). Retrievals return detached copies.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// Check that the backing store is reachable.
    async fn health_check(&self) -> RepositoryResult<bool>;

    // ==================== Target tables ====================

    async fn create_target_table(&self, table: &TargetTable) -> RepositoryResult<TargetTable>;

    /// Persist every column of an existing table (state, times, season, report).
    async fn update_target_table(&self, table: &TargetTable) -> RepositoryResult<()>;

    async fn get_target_table(&self, id: TargetTableId) -> RepositoryResult<Option<TargetTable>>;

    /// Tables matching the filter, ordered by id.
    async fn find_target_tables(
        &self,
        filter: &TargetTableFilter,
    ) -> RepositoryResult<Vec<TargetTable>>;

    /// Delete a table and all of its children, in
    /// [`TARGET_TABLE_DELETE_ORDER`](crate::db::query::TARGET_TABLE_DELETE_ORDER).
    async fn delete_target_table(&self, id: TargetTableId) -> RepositoryResult<Vec<DeletedRows>>;

    // ==================== Mask tables and masks ====================

    async fn create_mask_table(&self, table: &MaskTable) -> RepositoryResult<MaskTable>;

    async fn get_mask_table(&self, id: MaskTableId) -> RepositoryResult<Option<MaskTable>>;

    /// Mask tables matching the filter, ordered by id.
    async fn find_mask_tables(&self, filter: &MaskTableFilter) -> RepositoryResult<Vec<MaskTable>>;

    /// Delete a mask table, its masks and their offsets, in
    /// [`MASK_TABLE_DELETE_ORDER`](crate::db::query::MASK_TABLE_DELETE_ORDER).
    async fn delete_mask_table(&self, id: MaskTableId) -> RepositoryResult<Vec<DeletedRows>>;

    async fn create_mask(&self, mask: &Mask) -> RepositoryResult<Mask>;

    /// Masks of one table, ordered by `index_in_table`.
    async fn find_masks(&self, mask_table_id: MaskTableId) -> RepositoryResult<Vec<Mask>>;

    /// Delete the supermasks of a mask table, clearing target definition
    /// references to them first.
    async fn delete_supermasks(&self, mask_table_id: MaskTableId)
        -> RepositoryResult<Vec<DeletedRows>>;

    // ==================== Observed targets ====================

    /// Store a target together with its aperture, labels and target
    /// definitions. Definition masks must already be stored.
    async fn create_observed_target(
        &self,
        target: &ObservedTarget,
    ) -> RepositoryResult<ObservedTarget>;

    /// Raw observed target ⟕ target definition rows, one per pair.
    ///
    /// Ordered by module, output, id for whole-table queries and by id
    /// otherwise (see [`ObservedTargetQuery::orders_by_module_output`]).
    async fn find_observed_target_rows(
        &self,
        query: &ObservedTargetQuery,
    ) -> RepositoryResult<Vec<ObservedTargetRow>>;

    /// Distinct, ascending kepler ids of non-rejected targets.
    async fn find_observed_kepler_ids(&self, query: &KeplerIdQuery) -> RepositoryResult<Vec<i32>>;

    /// Distinct labels of one target, sorted.
    async fn find_labels(&self, observed_target_id: ObservedTargetId)
        -> RepositoryResult<Vec<String>>;

    /// Replace the aperture of a stored target, returning the stored aperture.
    async fn update_aperture(
        &self,
        observed_target_id: ObservedTargetId,
        aperture: &Aperture,
    ) -> RepositoryResult<Aperture>;

    /// KTC projection over UPLINKED long and short cadence tables planned
    /// inside `[start, end]`, kepler id ≥ 0, ordered by kepler id, table type
    /// and external id.
    async fn find_ktc_info(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<KtcInfo>>;

    // ==================== Target definitions ====================

    async fn create_target_definition(
        &self,
        definition: &TargetDefinition,
    ) -> RepositoryResult<TargetDefinition>;

    /// Ordered by `index_in_module_output` for one module/output, and by
    /// module, output, index for a whole table.
    async fn find_target_definitions(
        &self,
        query: &TargetDefinitionQuery,
    ) -> RepositoryResult<Vec<TargetDefinition>>;

    // ==================== Images ====================

    async fn create_image(&self, image: &Image) -> RepositoryResult<Image>;

    async fn find_images(
        &self,
        target_table_id: TargetTableId,
        ccd_module: i32,
        ccd_output: i32,
    ) -> RepositoryResult<Vec<Image>>;
}
