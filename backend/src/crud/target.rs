//! Query, create and delete operations over TAD entities.
//!
//! [`TargetCrud`] sits on top of the storage traits and adds the rules that
//! every consumer of TAD data relies on:
//!
//! - observed target graphs are rebuilt from left-join rows, one entry per
//!   target in first-seen order
//! - targets of an original table are merged with their supplemental
//!   counterparts when the table's target list set names a supplemental run
//! - targets without an aperture are dropped unless asked for
//! - kepler id lookups are chunked and aligned with the caller's list

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::error::{at_most_one, TadError, TadResult};
use crate::db::query::{
    dedup_by_key, in_list_chunks, DeletedRows, KeplerIdQuery, KeplerIdSelection, MaskTableFilter,
    ObservedTargetQuery, ObservedTargetRow, TargetDefinitionQuery, TargetTableFilter,
};
use crate::db::{FullRepository, PixelLogRepository, TargetRepository, TargetSelectionRepository};
use crate::models::{
    CadenceType, Image, KtcInfo, Mask, MaskTable, MaskTableId, MaskType, ObservedTarget,
    ObservedTargetId, PixelLog, State, SupplementedImage, SupplementedTarget, TargetCrowdingInfo,
    TargetDefinition, TargetTable, TargetTableId, TargetTableLog, TargetType, TargetView,
    INVALID_KEPLER_ID,
};

/// Bulk creation logs one progress line per this many records.
const PROGRESS_INTERVAL: usize = 10_000;

/// Façade over the TAD tables.
#[derive(Clone)]
pub struct TargetCrud {
    repo: Arc<dyn FullRepository>,
}

impl TargetCrud {
    pub fn new(repo: Arc<dyn FullRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn FullRepository> {
        &self.repo
    }

    // ==================== Target tables ====================

    pub async fn create_target_table(&self, table: &TargetTable) -> TadResult<TargetTable> {
        Ok(self.repo.create_target_table(table).await?)
    }

    pub async fn update_target_table(&self, table: &TargetTable) -> TadResult<()> {
        Ok(self.repo.update_target_table(table).await?)
    }

    pub async fn retrieve_target_table(&self, id: TargetTableId) -> TadResult<Option<TargetTable>> {
        Ok(self.repo.get_target_table(id).await?)
    }

    /// The UPLINKED table of a type with the given external id.
    pub async fn retrieve_target_table_by_type(
        &self,
        target_type: TargetType,
        external_id: i32,
    ) -> TadResult<Option<TargetTable>> {
        self.retrieve_target_table_in_state(external_id, target_type, State::Uplinked)
            .await
    }

    pub async fn retrieve_target_table_in_state(
        &self,
        external_id: i32,
        target_type: TargetType,
        state: State,
    ) -> TadResult<Option<TargetTable>> {
        let filter = TargetTableFilter::of_type(target_type)
            .with_external_id(external_id)
            .in_state(state);
        let tables = self.repo.find_target_tables(&filter).await?;
        at_most_one(tables, "target table")
    }

    pub async fn retrieve_uplinked_target_table(
        &self,
        external_id: i32,
        target_type: TargetType,
    ) -> TadResult<Option<TargetTable>> {
        self.retrieve_target_table_in_state(external_id, target_type, State::Uplinked)
            .await
    }

    pub async fn retrieve_revised_target_table(
        &self,
        external_id: i32,
        target_type: TargetType,
    ) -> TadResult<Option<TargetTable>> {
        self.retrieve_target_table_in_state(external_id, target_type, State::Revised)
            .await
    }

    /// Every table of a type, in any state.
    pub async fn retrieve_target_tables(&self, target_type: TargetType) -> TadResult<Vec<TargetTable>> {
        Ok(self
            .repo
            .find_target_tables(&TargetTableFilter::of_type(target_type))
            .await?)
    }

    pub async fn retrieve_uplinked_target_tables(
        &self,
        target_type: TargetType,
    ) -> TadResult<Vec<TargetTable>> {
        let filter = TargetTableFilter::of_type(target_type).in_state(State::Uplinked);
        Ok(self.repo.find_target_tables(&filter).await?)
    }

    /// UPLINKED tables of any type planned entirely inside `[start, end]`.
    pub async fn retrieve_uplinked_target_tables_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TadResult<Vec<TargetTable>> {
        let filter = TargetTableFilter::any()
            .in_state(State::Uplinked)
            .planned_within(start, end);
        Ok(self.repo.find_target_tables(&filter).await?)
    }

    /// Distinct external ids of UPLINKED tables of a type, ascending.
    pub async fn retrieve_ordered_external_ids(&self, target_type: TargetType) -> TadResult<Vec<i32>> {
        Ok(self
            .retrieve_uplinked_external_ids(target_type)
            .await?
            .into_iter()
            .collect())
    }

    pub async fn retrieve_uplinked_external_ids(
        &self,
        target_type: TargetType,
    ) -> TadResult<BTreeSet<i32>> {
        let tables = self.retrieve_uplinked_target_tables(target_type).await?;
        Ok(tables.iter().map(|t| t.external_id).collect())
    }

    /// External ids taken by tables of a type in any state.
    pub async fn retrieve_external_ids_in_use(
        &self,
        target_type: TargetType,
    ) -> TadResult<BTreeSet<i32>> {
        let tables = self.retrieve_target_tables(target_type).await?;
        Ok(tables.iter().map(|t| t.external_id).collect())
    }

    // ==================== Target table logs ====================

    /// The single table in effect over a cadence range.
    pub async fn retrieve_target_table_log(
        &self,
        target_type: TargetType,
        cadence_start: i32,
        cadence_end: i32,
    ) -> TadResult<Option<TargetTableLog>> {
        let logs = self
            .retrieve_target_table_logs(target_type, cadence_start, cadence_end)
            .await?;
        at_most_one(logs, "target table log")
    }

    /// Tables in effect over a cadence range, one entry per contiguous run of
    /// cadences that recorded the same table. Each run resolves to the REVISED
    /// table when one exists, else the UPLINKED one.
    pub async fn retrieve_target_table_logs(
        &self,
        target_type: TargetType,
        cadence_start: i32,
        cadence_end: i32,
    ) -> TadResult<Vec<TargetTableLog>> {
        let cadence_type = cadence_type_of(target_type)?;
        let pixel_logs = self
            .repo
            .find_pixel_logs(Some(cadence_type), Some((cadence_start, cadence_end)))
            .await?;

        let mut logs = Vec::new();
        for run in pixel_log_runs(&pixel_logs, target_type) {
            let table = match self
                .retrieve_revised_target_table(run.external_id, target_type)
                .await?
            {
                Some(revised) => revised,
                None => self
                    .retrieve_uplinked_target_table(run.external_id, target_type)
                    .await?
                    .ok_or_else(|| {
                        TadError::not_found(format!(
                            "uplinked {} table with external id {} (cadences {}-{})",
                            target_type, run.external_id, run.cadence_start, run.cadence_end
                        ))
                    })?,
            };
            logs.push(TargetTableLog {
                target_table: table,
                cadence_start: run.cadence_start,
                cadence_end: run.cadence_end,
            });
        }
        Ok(logs)
    }

    // ==================== Observed targets ====================

    /// Non-rejected targets with an aperture, merged with supplemental data.
    pub async fn retrieve_observed_targets(
        &self,
        table: &TargetTable,
    ) -> TadResult<Vec<SupplementedTarget>> {
        self.retrieve_observed_targets_with(table, false).await
    }

    pub async fn retrieve_observed_targets_with(
        &self,
        table: &TargetTable,
        include_null_apertures: bool,
    ) -> TadResult<Vec<SupplementedTarget>> {
        let query = ObservedTargetQuery::for_table(saved_id(table)?);
        self.retrieve_internal(table, &query, include_null_apertures, false)
            .await
    }

    pub async fn retrieve_observed_targets_for_mod_out(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<Vec<SupplementedTarget>> {
        self.retrieve_observed_targets_for_mod_out_with(table, ccd_module, ccd_output, false)
            .await
    }

    pub async fn retrieve_observed_targets_for_mod_out_with(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
        include_null_apertures: bool,
    ) -> TadResult<Vec<SupplementedTarget>> {
        let query =
            ObservedTargetQuery::for_table(saved_id(table)?).at_module_output(ccd_module, ccd_output);
        self.retrieve_internal(table, &query, include_null_apertures, false)
            .await
    }

    pub async fn retrieve_observed_targets_plus_rejected(
        &self,
        table: &TargetTable,
    ) -> TadResult<Vec<SupplementedTarget>> {
        let query = ObservedTargetQuery::for_table(saved_id(table)?).plus_rejected();
        self.retrieve_internal(table, &query, false, false).await
    }

    pub async fn retrieve_observed_targets_plus_rejected_for_mod_out(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
        include_null_apertures: bool,
    ) -> TadResult<Vec<SupplementedTarget>> {
        let query = ObservedTargetQuery::for_table(saved_id(table)?)
            .at_module_output(ccd_module, ccd_output)
            .plus_rejected();
        self.retrieve_internal(table, &query, include_null_apertures, false)
            .await
    }

    /// Targets of the table as the original TAD run produced them.
    ///
    /// Only target rejection logic should read these; everything else wants
    /// the supplemental data when it exists.
    pub async fn retrieve_observed_targets_plus_rejected_ignore_supplemental(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
        include_null_apertures: bool,
    ) -> TadResult<Vec<ObservedTarget>> {
        let query = ObservedTargetQuery::for_table(saved_id(table)?)
            .at_module_output(ccd_module, ccd_output)
            .plus_rejected();
        let targets = self
            .retrieve_internal(table, &query, include_null_apertures, true)
            .await?;
        Ok(targets.into_iter().map(SupplementedTarget::into_original).collect())
    }

    /// Targets for each kepler id, aligned with `kepler_ids`; `None` where a
    /// kepler id has no non-rejected target with an aperture.
    pub async fn retrieve_observed_targets_for_kepler_ids(
        &self,
        table: &TargetTable,
        kepler_ids: &[i32],
    ) -> TadResult<Vec<Option<SupplementedTarget>>> {
        if kepler_ids.is_empty() {
            return Ok(Vec::new());
        }
        let table_id = saved_id(table)?;

        let mut by_kepler_id = HashMap::with_capacity(kepler_ids.len());
        for chunk in in_list_chunks(kepler_ids) {
            let query = ObservedTargetQuery::for_table(table_id).with_kepler_ids(chunk.to_vec());
            for target in self.retrieve_internal(table, &query, false, false).await? {
                by_kepler_id.insert(target.kepler_id(), target);
            }
        }

        Ok(kepler_ids
            .iter()
            .map(|kepler_id| by_kepler_id.get(kepler_id).cloned())
            .collect())
    }

    /// Raw targets matching a query: no supplemental merge and no aperture
    /// filter.
    pub async fn retrieve_original_observed_targets(
        &self,
        query: &ObservedTargetQuery,
    ) -> TadResult<Vec<ObservedTarget>> {
        let rows = self.repo.find_observed_target_rows(query).await?;
        Ok(assemble_targets(rows))
    }

    async fn retrieve_internal(
        &self,
        table: &TargetTable,
        query: &ObservedTargetQuery,
        include_null_apertures: bool,
        ignore_supplemental: bool,
    ) -> TadResult<Vec<SupplementedTarget>> {
        let originals = self.retrieve_original_observed_targets(query).await?;
        let mut targets: Vec<SupplementedTarget> =
            originals.into_iter().map(SupplementedTarget::new).collect();

        if !ignore_supplemental && !targets.is_empty() {
            if let Some(supp_table) = self
                .retrieve_supp_target_table_for_orig_target_table(table)
                .await?
            {
                let supp_query = query.retarget(saved_id(&supp_table)?);
                let supplementals = self.retrieve_original_observed_targets(&supp_query).await?;
                if !supplementals.is_empty() {
                    check_same_season(table, &supp_table)?;
                    attach_supplementals(&mut targets, supplementals)?;
                }
            }
        }

        if !include_null_apertures {
            targets.retain(|t| {
                t.aperture().is_some() || t.rejected() || t.kepler_id() == INVALID_KEPLER_ID
            });
        }
        Ok(targets)
    }

    pub async fn retrieve_observed_kepler_ids(&self, table: &TargetTable) -> TadResult<Vec<i32>> {
        let query = KeplerIdQuery {
            target_table_id: saved_id(table)?,
            module_output: None,
            kepler_ids: KeplerIdSelection::All,
        };
        Ok(self.repo.find_observed_kepler_ids(&query).await?)
    }

    pub async fn retrieve_observed_kepler_ids_for_mod_out(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<Vec<i32>> {
        let query = KeplerIdQuery {
            target_table_id: saved_id(table)?,
            module_output: Some((ccd_module, ccd_output)),
            kepler_ids: KeplerIdSelection::All,
        };
        Ok(self.repo.find_observed_kepler_ids(&query).await?)
    }

    pub async fn create_observed_target(&self, target: &ObservedTarget) -> TadResult<ObservedTarget> {
        Ok(self.repo.create_observed_target(target).await?)
    }

    pub async fn create_observed_targets(
        &self,
        targets: &[ObservedTarget],
    ) -> TadResult<Vec<ObservedTarget>> {
        let mut created = Vec::with_capacity(targets.len());
        for (count, target) in targets.iter().enumerate() {
            if count % PROGRESS_INTERVAL == 0 {
                info!("Created {} ObservedTargets...", count);
            }
            created.push(self.repo.create_observed_target(target).await?);
        }
        info!("Completed creating {} ObservedTargets.", created.len());
        Ok(created)
    }

    /// Persists the aperture of every target that has one. Returns how many
    /// apertures were written.
    pub async fn update_apertures(&self, targets: &[ObservedTarget]) -> TadResult<usize> {
        let mut updated = 0;
        for target in targets {
            let Some(aperture) = &target.aperture else {
                continue;
            };
            let id = target.id.ok_or_else(|| {
                TadError::IllegalArgument(format!(
                    "observed target for kepler id {} has not been stored",
                    target.kepler_id
                ))
            })?;
            self.repo.update_aperture(id, aperture).await?;
            updated += 1;
        }
        debug!("Updated {} apertures", updated);
        Ok(updated)
    }

    /// Categories of the target lists that planned the target's kepler id.
    pub async fn retrieve_categories_for_target(
        &self,
        observed_target_id: ObservedTargetId,
        target_table_id: TargetTableId,
    ) -> TadResult<Vec<String>> {
        let query = ObservedTargetQuery::for_table(target_table_id).plus_rejected();
        let targets = self.retrieve_original_observed_targets(&query).await?;
        let Some(target) = targets.iter().find(|t| t.id == Some(observed_target_id)) else {
            return Ok(Vec::new());
        };

        let categories = self
            .categories_by_kepler_id(target_table_id, &[target.kepler_id])
            .await?;
        Ok(categories
            .get(&target.kepler_id)
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Categories of every target of the table that some target list planned.
    pub async fn retrieve_categories_for_target_table(
        &self,
        table: &TargetTable,
    ) -> TadResult<BTreeMap<ObservedTargetId, Vec<String>>> {
        let table_id = saved_id(table)?;
        let query = ObservedTargetQuery::for_table(table_id).plus_rejected();
        let targets = self.retrieve_original_observed_targets(&query).await?;

        let kepler_ids: Vec<i32> = targets
            .iter()
            .map(|t| t.kepler_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let categories = self.categories_by_kepler_id(table_id, &kepler_ids).await?;

        let mut by_target = BTreeMap::new();
        for target in &targets {
            if let (Some(id), Some(found)) = (target.id, categories.get(&target.kepler_id)) {
                by_target.insert(id, found.iter().cloned().collect());
            }
        }
        Ok(by_target)
    }

    async fn categories_by_kepler_id(
        &self,
        target_table_id: TargetTableId,
        kepler_ids: &[i32],
    ) -> TadResult<HashMap<i32, BTreeSet<String>>> {
        let target_list_sets = self
            .repo
            .find_target_list_sets_by_target_table(target_table_id)
            .await?;
        let lists: HashMap<_, _> = target_list_sets
            .iter()
            .flat_map(|tls| tls.target_lists.iter())
            .filter_map(|list| list.id.map(|id| (id, list.category.clone())))
            .collect();
        let list_ids: Vec<_> = lists.keys().copied().collect();

        let mut categories: HashMap<i32, BTreeSet<String>> = HashMap::new();
        if list_ids.is_empty() {
            return Ok(categories);
        }
        for chunk in in_list_chunks(kepler_ids) {
            let planned = self.repo.find_planned_targets(&list_ids, Some(chunk)).await?;
            for target in planned {
                if let Some(category) = lists.get(&target.target_list_id) {
                    categories
                        .entry(target.kepler_id)
                        .or_default()
                        .insert(category.clone());
                }
            }
        }
        Ok(categories)
    }

    pub async fn retrieve_labels_for_observed_target(
        &self,
        observed_target_id: ObservedTargetId,
    ) -> TadResult<Vec<String>> {
        Ok(self.repo.find_labels(observed_target_id).await?)
    }

    // ==================== Target definitions ====================

    pub async fn create_target_definitions(
        &self,
        definitions: &[TargetDefinition],
    ) -> TadResult<Vec<TargetDefinition>> {
        let mut created = Vec::with_capacity(definitions.len());
        for (count, definition) in definitions.iter().enumerate() {
            if count % PROGRESS_INTERVAL == 0 {
                info!("Created {} TargetDefinitions...", count);
            }
            created.push(self.repo.create_target_definition(definition).await?);
        }
        info!("Completed creating {} TargetDefinitions.", created.len());
        Ok(created)
    }

    /// Definitions of one module/output, ordered by index.
    pub async fn retrieve_target_definitions(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<Vec<TargetDefinition>> {
        let query =
            TargetDefinitionQuery::for_table(saved_id(table)?).at_module_output(ccd_module, ccd_output);
        Ok(self.repo.find_target_definitions(&query).await?)
    }

    pub async fn retrieve_all_target_definitions(
        &self,
        table: &TargetTable,
    ) -> TadResult<Vec<TargetDefinition>> {
        let query = TargetDefinitionQuery::for_table(saved_id(table)?);
        Ok(self.repo.find_target_definitions(&query).await?)
    }

    // ==================== KTC ====================

    pub async fn retrieve_ktc_info(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> TadResult<Vec<KtcInfo>> {
        Ok(self.repo.find_ktc_info(start, end).await?)
    }

    // ==================== Deletes ====================

    /// Deletes a table with everything hanging off it and reports the rows
    /// removed per child table, in execution order.
    pub async fn delete_target_table(&self, table: &TargetTable) -> TadResult<Vec<DeletedRows>> {
        let deleted = self.repo.delete_target_table(saved_id(table)?).await?;
        info!("Deleted target table {}: {}", table.label(), summarize(&deleted));
        Ok(deleted)
    }

    pub async fn delete_mask_table(&self, table: &MaskTable) -> TadResult<Vec<DeletedRows>> {
        let deleted = self.repo.delete_mask_table(saved_mask_table_id(table)?).await?;
        info!(
            "Deleted {} mask table {}: {}",
            table.mask_type,
            table.external_id,
            summarize(&deleted)
        );
        Ok(deleted)
    }

    pub async fn delete_supermasks(&self, table: &MaskTable) -> TadResult<Vec<DeletedRows>> {
        Ok(self
            .repo
            .delete_supermasks(saved_mask_table_id(table)?)
            .await?)
    }

    // ==================== Mask tables and masks ====================

    pub async fn create_mask_table(&self, table: &MaskTable) -> TadResult<MaskTable> {
        Ok(self.repo.create_mask_table(table).await?)
    }

    pub async fn retrieve_mask_table(&self, id: MaskTableId) -> TadResult<Option<MaskTable>> {
        Ok(self.repo.get_mask_table(id).await?)
    }

    pub async fn retrieve_uplinked_mask_table(
        &self,
        external_id: i32,
        mask_type: MaskType,
    ) -> TadResult<Option<MaskTable>> {
        let filter = MaskTableFilter::of_type(mask_type)
            .in_state(State::Uplinked)
            .with_external_id(external_id);
        let tables = self.repo.find_mask_tables(&filter).await?;
        at_most_one(tables, "mask table")
    }

    pub async fn retrieve_uplinked_mask_external_ids(
        &self,
        mask_type: MaskType,
    ) -> TadResult<BTreeSet<i32>> {
        let filter = MaskTableFilter::of_type(mask_type).in_state(State::Uplinked);
        let tables = self.repo.find_mask_tables(&filter).await?;
        Ok(tables.iter().map(|t| t.external_id).collect())
    }

    pub async fn retrieve_mask_external_ids_in_use(
        &self,
        mask_type: MaskType,
    ) -> TadResult<BTreeSet<i32>> {
        let tables = self
            .repo
            .find_mask_tables(&MaskTableFilter::of_type(mask_type))
            .await?;
        Ok(tables.iter().map(|t| t.external_id).collect())
    }

    /// Mask tables flown alongside a target table, found through the pixel
    /// log's aperture table columns.
    pub async fn retrieve_mask_table_for_target_table(
        &self,
        table: &TargetTable,
        mask_type: MaskType,
    ) -> TadResult<Vec<MaskTable>> {
        let external_ids = self
            .external_ids_from_pixel_log(table, |log| match mask_type {
                MaskType::Target => log.target_aperture_table_id,
                MaskType::Background => log.back_aperture_table_id,
            })
            .await?;

        let mut tables = Vec::with_capacity(external_ids.len());
        for external_id in external_ids {
            match self.retrieve_uplinked_mask_table(external_id, mask_type).await? {
                Some(mask_table) => tables.push(mask_table),
                None => warn!(
                    "Pixel log for {} names {} mask table {} which is not uplinked",
                    table.label(),
                    mask_type,
                    external_id
                ),
            }
        }
        Ok(tables)
    }

    pub async fn create_mask(&self, mask: &Mask) -> TadResult<Mask> {
        Ok(self.repo.create_mask(mask).await?)
    }

    pub async fn create_masks(&self, masks: &[Mask]) -> TadResult<Vec<Mask>> {
        let mut created = Vec::with_capacity(masks.len());
        for mask in masks {
            created.push(self.repo.create_mask(mask).await?);
        }
        Ok(created)
    }

    /// Masks ordered by index in table.
    pub async fn retrieve_masks(&self, table: &MaskTable) -> TadResult<Vec<Mask>> {
        Ok(self.repo.find_masks(saved_mask_table_id(table)?).await?)
    }

    // ==================== Cadence-linked tables ====================

    pub async fn retrieve_long_cadence_target_table(
        &self,
        table: &TargetTable,
    ) -> TadResult<Vec<TargetTable>> {
        self.linked_target_tables(table, TargetType::LongCadence).await
    }

    pub async fn retrieve_short_cadence_target_table(
        &self,
        table: &TargetTable,
    ) -> TadResult<Vec<TargetTable>> {
        self.linked_target_tables(table, TargetType::ShortCadence).await
    }

    pub async fn retrieve_background_target_table(
        &self,
        table: &TargetTable,
    ) -> TadResult<Vec<TargetTable>> {
        self.linked_target_tables(table, TargetType::Background).await
    }

    /// UPLINKED tables of `wanted` type recorded by the same cadences as `table`.
    async fn linked_target_tables(
        &self,
        table: &TargetTable,
        wanted: TargetType,
    ) -> TadResult<Vec<TargetTable>> {
        let external_ids = self
            .external_ids_from_pixel_log(table, |log| {
                log.target_table_external_id(wanted).unwrap_or_default()
            })
            .await?;
        if external_ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = TargetTableFilter::of_type(wanted)
            .in_state(State::Uplinked)
            .with_external_ids(external_ids);
        Ok(self.repo.find_target_tables(&filter).await?)
    }

    /// Distinct values of one pixel log column over the cadences that
    /// recorded `table`, in cadence order.
    async fn external_ids_from_pixel_log<F>(&self, table: &TargetTable, column: F) -> TadResult<Vec<i32>>
    where
        F: Fn(&PixelLog) -> i32,
    {
        let cadence_type = cadence_type_of(table.target_type)?;
        let logs = self.repo.find_pixel_logs(Some(cadence_type), None).await?;
        let recorded = logs
            .iter()
            .filter(|log| log.target_table_external_id(table.target_type) == Some(table.external_id))
            .map(column);
        Ok(dedup_by_key(recorded, |id| *id))
    }

    // ==================== Images ====================

    pub async fn create_image(&self, image: &Image) -> TadResult<Image> {
        Ok(self.repo.create_image(image).await?)
    }

    /// The table's image for a module/output, with the supplemental table's
    /// image attached when there is one.
    pub async fn retrieve_image(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<Option<SupplementedImage>> {
        let Some(original) = self
            .retrieve_image_internal(table, ccd_module, ccd_output)
            .await?
        else {
            return Ok(None);
        };

        let mut image = SupplementedImage::new(original);
        if let Some(supp_table) = self
            .retrieve_supp_target_table_for_orig_target_table(table)
            .await?
        {
            if let Some(supp_image) = self
                .retrieve_image_internal(&supp_table, ccd_module, ccd_output)
                .await?
            {
                image.set_supplemental(supp_image)?;
            }
        }
        Ok(Some(image))
    }

    async fn retrieve_image_internal(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<Option<Image>> {
        let images = self
            .repo
            .find_images(saved_id(table)?, ccd_module, ccd_output)
            .await?;
        at_most_one(images, "image")
    }

    // ==================== Supplemental ====================

    /// The target table of the supplemental TAD run for `table`, if its
    /// target list set names one.
    pub async fn retrieve_supp_target_table_for_orig_target_table(
        &self,
        table: &TargetTable,
    ) -> TadResult<Option<TargetTable>> {
        let target_list_sets = self
            .repo
            .find_target_list_sets_by_target_table(saved_id(table)?)
            .await?;
        let Some(orig_tls) = at_most_one(target_list_sets, "target list set")? else {
            return Ok(None);
        };
        let Some(supp_tls_id) = orig_tls.supplemental_tls_id else {
            return Ok(None);
        };
        let Some(supp_tls) = self.repo.get_target_list_set(supp_tls_id).await? else {
            return Ok(None);
        };
        match supp_tls.target_table_id {
            Some(id) => Ok(self.repo.get_target_table(id).await?),
            None => Ok(None),
        }
    }

    // ==================== Crowding ====================

    /// Crowding history of every target of a sky group across `tables`.
    ///
    /// Array slots follow the position of each table in `tables`.
    pub async fn retrieve_crowding_metric_info(
        &self,
        tables: &[TargetTable],
        sky_group_id: i32,
    ) -> TadResult<BTreeMap<i32, TargetCrowdingInfo>> {
        let mut infos: BTreeMap<i32, TargetCrowdingInfo> = BTreeMap::new();
        for (index, table) in tables.iter().enumerate() {
            let sky_group = self
                .repo
                .find_sky_group(sky_group_id, table.observing_season)
                .await?
                .ok_or_else(|| {
                    TadError::not_found(format!(
                        "sky group {} in season {}",
                        sky_group_id, table.observing_season
                    ))
                })?;

            let targets = self
                .retrieve_observed_targets_for_mod_out(table, sky_group.ccd_module, sky_group.ccd_output)
                .await?;
            for target in &targets {
                infos
                    .entry(target.kepler_id())
                    .or_insert_with(|| TargetCrowdingInfo::new(target.kepler_id(), tables.len()))
                    .set(
                        index,
                        target.crowding_metric(),
                        target.ccd_module(),
                        target.ccd_output(),
                    );
            }
        }
        Ok(infos)
    }
}

/// A contiguous run of cadences that recorded one table external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelLogRun {
    pub external_id: i32,
    pub cadence_start: i32,
    pub cadence_end: i32,
}

/// Groups consecutive pixel logs (already in cadence order) that recorded the
/// same external id for `target_type`.
pub(crate) fn pixel_log_runs(logs: &[PixelLog], target_type: TargetType) -> Vec<PixelLogRun> {
    let mut runs: Vec<PixelLogRun> = Vec::new();
    for log in logs {
        let Some(external_id) = log.target_table_external_id(target_type) else {
            continue;
        };
        match runs.last_mut() {
            Some(run) if run.external_id == external_id => run.cadence_end = log.cadence_number,
            _ => runs.push(PixelLogRun {
                external_id,
                cadence_start: log.cadence_number,
                cadence_end: log.cadence_number,
            }),
        }
    }
    runs
}

/// Rebuilds target graphs from left-join rows: one target per primary key,
/// first-seen order, definitions collected in row order.
pub(crate) fn assemble_targets(rows: Vec<ObservedTargetRow>) -> Vec<ObservedTarget> {
    let mut definitions: HashMap<Option<ObservedTargetId>, Vec<TargetDefinition>> = HashMap::new();
    let mut targets = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(definition) = row.definition {
            definitions.entry(row.target.id).or_default().push(definition);
        }
        targets.push(row.target);
    }

    dedup_by_key(targets, |t| t.id)
        .into_iter()
        .map(|mut target| {
            target.target_definitions = definitions.remove(&target.id).unwrap_or_default();
            target
        })
        .collect()
}

fn attach_supplementals(
    targets: &mut [SupplementedTarget],
    supplementals: Vec<ObservedTarget>,
) -> TadResult<()> {
    let by_kepler_id: HashMap<i32, usize> = targets
        .iter()
        .enumerate()
        .map(|(index, t)| (t.kepler_id(), index))
        .collect();
    for supplemental in supplementals {
        if let Some(&index) = by_kepler_id.get(&supplemental.kepler_id) {
            targets[index].set_supplemental(supplemental)?;
        }
    }
    Ok(())
}

pub(crate) fn check_same_season(original: &TargetTable, other: &TargetTable) -> TadResult<()> {
    if original.observing_season != other.observing_season {
        return Err(TadError::SeasonMismatch {
            original_label: original.label(),
            original: original.observing_season,
            other_label: other.label(),
            other: other.observing_season,
        });
    }
    Ok(())
}

fn cadence_type_of(target_type: TargetType) -> TadResult<CadenceType> {
    CadenceType::for_target_type(target_type).ok_or_else(|| {
        TadError::illegal_state(format!("pixel logs do not record {} tables", target_type))
    })
}

pub(crate) fn saved_id(table: &TargetTable) -> TadResult<TargetTableId> {
    table.id.ok_or_else(|| {
        TadError::IllegalArgument(format!("target table {} has not been stored", table.label()))
    })
}

fn saved_mask_table_id(table: &MaskTable) -> TadResult<MaskTableId> {
    table.id.ok_or_else(|| {
        TadError::IllegalArgument(format!(
            "{} mask table {} has not been stored",
            table.mask_type, table.external_id
        ))
    })
}

fn summarize(deleted: &[DeletedRows]) -> String {
    deleted
        .iter()
        .map(|d| format!("{}={}", d.table, d.rows))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Aperture;

    fn log(cadence: i32, lc: i32) -> PixelLog {
        PixelLog {
            cadence_number: cadence,
            cadence_type: CadenceType::Long,
            mjd_start_time: 0.0,
            mjd_end_time: 0.0,
            lc_target_table_id: lc,
            sc_target_table_id: 0,
            back_target_table_id: 0,
            target_aperture_table_id: 0,
            back_aperture_table_id: 0,
        }
    }

    fn row(id: i64, kepler_id: i32, definition_index: Option<i32>) -> ObservedTargetRow {
        let mut target = ObservedTarget::new(Some(TargetTableId(1)), 2, 1, kepler_id);
        target.id = Some(ObservedTargetId(id));
        let definition = definition_index.map(|index| {
            let mut definition = TargetDefinition::new(2, 1, kepler_id);
            definition.index_in_module_output = index;
            definition
        });
        ObservedTargetRow { target, definition }
    }

    #[test]
    fn test_pixel_log_runs_group_consecutive_cadences() {
        let logs = vec![log(10, 5), log(11, 5), log(12, 6), log(13, 5)];
        let runs = pixel_log_runs(&logs, TargetType::LongCadence);
        assert_eq!(runs.len(), 3);
        assert_eq!(
            runs[0],
            PixelLogRun {
                external_id: 5,
                cadence_start: 10,
                cadence_end: 11
            }
        );
        assert_eq!(runs[2].cadence_start, 13);
        assert!(pixel_log_runs(&logs, TargetType::ReferencePixel).is_empty());
    }

    #[test]
    fn test_assemble_targets_collects_definitions() {
        let rows = vec![
            row(3, 300, Some(0)),
            row(1, 100, None),
            row(3, 300, Some(1)),
            row(2, 200, Some(4)),
        ];
        let targets = assemble_targets(rows);
        let ids: Vec<_> = targets.iter().map(|t| t.id.map(|id| id.0)).collect();
        assert_eq!(ids, vec![Some(3), Some(1), Some(2)]);
        assert_eq!(targets[0].target_definitions.len(), 2);
        assert_eq!(targets[0].target_definitions[1].index_in_module_output, 1);
        assert!(targets[1].target_definitions.is_empty());
    }

    #[test]
    fn test_attach_supplementals_matches_kepler_ids() {
        let mut targets = vec![
            SupplementedTarget::new(row(1, 100, None).target),
            SupplementedTarget::new(row(2, 200, None).target),
        ];
        let mut supp = row(9, 200, None).target;
        supp.aperture = Some(Aperture::default());
        attach_supplementals(&mut targets, vec![supp, row(10, 999, None).target]).unwrap();

        assert!(targets[0].supplemental().is_none());
        assert!(targets[1].supplemental().is_some());
        assert!(targets[1].aperture().is_some());
    }

    #[test]
    fn test_season_check() {
        let a = TargetTable::new(TargetType::LongCadence).with_observing_season(3);
        let b = TargetTable::new(TargetType::LongCadence).with_observing_season(4);
        assert!(check_same_season(&a, &a.clone()).is_ok());
        assert!(matches!(
            check_same_season(&a, &b),
            Err(TadError::SeasonMismatch {
                original: 3,
                other: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_unsaved_table_is_illegal_argument() {
        let table = TargetTable::new(TargetType::ShortCadence).with_external_id(4);
        assert!(matches!(saved_id(&table), Err(TadError::IllegalArgument(_))));
    }
}
