//! In-memory local repository implementation.
//!
//! Stores every table in ordered maps behind one `RwLock`, reproducing the
//! relational behaviour the façades depend on: generated ids, the observed
//! target ⟕ target definition fan-out, ordered child-then-parent deletes and
//! foreign key checks. Used by unit tests and dry runs of the batch tools.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::query::*;
use crate::db::repository::*;
use crate::models::*;

/// In-memory local repository.
///
/// Cloning shares the underlying store.
///
/// # Example
/// ```
/// use kepler_tad::db::repositories::LocalRepository;
/// use kepler_tad::db::repository::TargetRepository;
/// use kepler_tad::models::{TargetTable, TargetType};
///
/// # tokio_test_block(async {
/// let repo = LocalRepository::new();
/// let table = repo
///     .create_target_table(&TargetTable::new(TargetType::LongCadence))
///     .await
///     .unwrap();
/// assert!(table.id.is_some());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
    /// Copy of `data` taken by `begin_transaction`, restored on rollback.
    snapshot: Arc<RwLock<Option<LocalData>>>,
}

#[derive(Clone)]
struct StoredDefinition {
    definition: TargetDefinition,
    mask_id: Option<MaskId>,
}

#[derive(Clone)]
struct LocalData {
    target_tables: BTreeMap<TargetTableId, TargetTable>,
    mask_tables: BTreeMap<MaskTableId, MaskTable>,
    masks: BTreeMap<MaskId, Mask>,
    // Stored with an empty definition list; see `obs_target_defs`.
    observed_targets: BTreeMap<ObservedTargetId, ObservedTarget>,
    target_definitions: BTreeMap<TargetDefinitionId, StoredDefinition>,
    obs_target_defs: Vec<(ObservedTargetId, TargetDefinitionId)>,
    images: BTreeMap<ImageId, Image>,

    target_list_sets: BTreeMap<TargetListSetId, TargetListSet>,
    planned_targets: BTreeMap<PlannedTargetId, PlannedTarget>,
    sky_groups: Vec<SkyGroup>,
    pixel_logs: Vec<PixelLog>,

    pipeline_instances: BTreeMap<PipelineInstanceId, PipelineInstance>,
    pipeline_tasks: BTreeMap<PipelineTaskId, PipelineTask>,

    planet_results: BTreeMap<DvPlanetResultsId, DvPlanetResults>,
    target_results: BTreeMap<DvTargetResultsId, DvTargetResults>,
    limb_darkening_models: BTreeMap<DvLimbDarkeningModelId, DvLimbDarkeningModel>,

    histories: BTreeMap<HistoryId, History>,
    large_flat_fields: BTreeMap<LargeFlatFieldId, LargeFlatField>,
    small_flat_field_images: BTreeMap<SmallFlatFieldImageId, SmallFlatFieldImage>,

    next_id: i64,
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            target_tables: BTreeMap::new(),
            mask_tables: BTreeMap::new(),
            masks: BTreeMap::new(),
            observed_targets: BTreeMap::new(),
            target_definitions: BTreeMap::new(),
            obs_target_defs: Vec::new(),
            images: BTreeMap::new(),
            target_list_sets: BTreeMap::new(),
            planned_targets: BTreeMap::new(),
            sky_groups: Vec::new(),
            pixel_logs: Vec::new(),
            pipeline_instances: BTreeMap::new(),
            pipeline_tasks: BTreeMap::new(),
            planet_results: BTreeMap::new(),
            target_results: BTreeMap::new(),
            limb_darkening_models: BTreeMap::new(),
            histories: BTreeMap::new(),
            large_flat_fields: BTreeMap::new(),
            small_flat_field_images: BTreeMap::new(),
            next_id: 1,
            is_healthy: true,
        }
    }
}

impl LocalData {
    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn resolve_definition(&self, stored: &StoredDefinition) -> TargetDefinition {
        let mut definition = stored.definition.clone();
        definition.mask = stored.mask_id.and_then(|id| self.masks.get(&id).cloned());
        definition
    }

    fn definitions_of(&self, target_id: ObservedTargetId) -> Vec<TargetDefinition> {
        let ids: BTreeSet<TargetDefinitionId> = self
            .obs_target_defs
            .iter()
            .filter(|(ot, _)| *ot == target_id)
            .map(|(_, td)| *td)
            .collect();
        ids.iter()
            .filter_map(|id| self.target_definitions.get(id))
            .map(|stored| self.resolve_definition(stored))
            .collect()
    }

    fn store_definition(
        &mut self,
        definition: &TargetDefinition,
        default_table: Option<TargetTableId>,
    ) -> RepositoryResult<TargetDefinition> {
        let mask_id = match &definition.mask {
            None => None,
            Some(mask) => {
                let id = mask.id.ok_or_else(|| {
                    RepositoryError::validation("target definition references an unsaved mask")
                })?;
                if !self.masks.contains_key(&id) {
                    return Err(RepositoryError::validation_with_context(
                        "target definition references a missing mask",
                        ErrorContext::new("store_definition")
                            .with_entity("tad_mask")
                            .with_entity_id(id),
                    ));
                }
                Some(id)
            }
        };

        let id = TargetDefinitionId(self.next_id());
        let mut stored = definition.clone();
        stored.id = Some(id);
        if stored.target_table_id.is_none() {
            stored.target_table_id = default_table;
        }
        let returned = stored.clone();
        stored.mask = None;
        self.target_definitions.insert(
            id,
            StoredDefinition {
                definition: stored,
                mask_id,
            },
        );
        Ok(returned)
    }

    fn with_provenance<T: DvResult + Clone>(
        &self,
        results: impl Iterator<Item = T>,
        query: &DvResultQuery,
    ) -> Vec<WithProvenance<T>> {
        let mut rows: Vec<WithProvenance<T>> = results
            .filter(|r| query.kepler_ids.contains(r.kepler_id()))
            .filter_map(|result| {
                let task = self.pipeline_tasks.get(&result.pipeline_task_id())?;
                let instance = self.pipeline_instances.get(&task.pipeline_instance_id)?;
                query
                    .instances
                    .contains(task.pipeline_instance_id)
                    .then(|| WithProvenance {
                        pipeline_instance_id: task.pipeline_instance_id,
                        instance_state: instance.state,
                        task_state: task.state,
                        result,
                    })
            })
            .collect();
        rows.sort_by_key(|row| (row.result.kepler_id(), row.result.ordinal()));
        rows
    }
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
            snapshot: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) -> RepositoryResult<()> {
        self.write()?.is_healthy = healthy;
        Ok(())
    }

    /// Drop every record, keeping the health flag.
    pub fn clear(&self) -> RepositoryResult<()> {
        let mut data = self.write()?;
        let healthy = data.is_healthy;
        *data = LocalData {
            is_healthy: healthy,
            ..Default::default()
        };
        Ok(())
    }

    pub fn observed_target_count(&self) -> RepositoryResult<usize> {
        Ok(self.read()?.observed_targets.len())
    }

    fn read(&self) -> RepositoryResult<RwLockReadGuard<'_, LocalData>> {
        Ok(self.data.read()?)
    }

    fn write(&self) -> RepositoryResult<RwLockWriteGuard<'_, LocalData>> {
        Ok(self.data.write()?)
    }

    fn check_health(&self) -> RepositoryResult<()> {
        if !self.read()?.is_healthy {
            return Err(RepositoryError::connection("Database is not healthy"));
        }
        Ok(())
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(operation: &str, entity: &str, id: impl ToString) -> RepositoryError {
    RepositoryError::not_found_with_context(
        format!("{} not found", entity),
        ErrorContext::new(operation)
            .with_entity(entity)
            .with_entity_id(id),
    )
}

fn unsaved(operation: &str, entity: &str) -> RepositoryError {
    RepositoryError::validation_with_context(
        format!("{} has no id", entity),
        ErrorContext::new(operation).with_entity(entity),
    )
}

#[async_trait]
impl TargetRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.read()?.is_healthy)
    }

    async fn create_target_table(&self, table: &TargetTable) -> RepositoryResult<TargetTable> {
        self.check_health()?;
        let mut data = self.write()?;
        if let Some(mask_table_id) = table.mask_table_id {
            if !data.mask_tables.contains_key(&mask_table_id) {
                return Err(missing("create_target_table", "tad_mask_table", mask_table_id));
            }
        }
        let mut stored = table.clone();
        let id = TargetTableId(data.next_id());
        stored.id = Some(id);
        if let Some(report) = stored.tad_report.as_mut() {
            report.id = Some(TadReportId(data.next_id()));
        }
        data.target_tables.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_target_table(&self, table: &TargetTable) -> RepositoryResult<()> {
        let id = table
            .id
            .ok_or_else(|| unsaved("update_target_table", "tad_target_table"))?;
        let mut data = self.write()?;
        if !data.target_tables.contains_key(&id) {
            return Err(missing("update_target_table", "tad_target_table", id));
        }
        let mut stored = table.clone();
        if let Some(report) = stored.tad_report.as_mut() {
            if report.id.is_none() {
                report.id = Some(TadReportId(data.next_id()));
            }
        }
        data.target_tables.insert(id, stored);
        Ok(())
    }

    async fn get_target_table(&self, id: TargetTableId) -> RepositoryResult<Option<TargetTable>> {
        Ok(self.read()?.target_tables.get(&id).cloned())
    }

    async fn find_target_tables(
        &self,
        filter: &TargetTableFilter,
    ) -> RepositoryResult<Vec<TargetTable>> {
        Ok(self
            .read()?
            .target_tables
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn delete_target_table(&self, id: TargetTableId) -> RepositoryResult<Vec<DeletedRows>> {
        self.check_health()?;
        let mut data = self.write()?;
        let table = data
            .target_tables
            .get(&id)
            .cloned()
            .ok_or_else(|| missing("delete_target_table", "tad_target_table", id))?;

        let target_ids: BTreeSet<ObservedTargetId> = data
            .observed_targets
            .iter()
            .filter(|(_, t)| t.target_table_id == Some(id))
            .map(|(k, _)| *k)
            .collect();
        let definition_ids: BTreeSet<TargetDefinitionId> = data
            .target_definitions
            .iter()
            .filter(|(_, d)| d.definition.target_table_id == Some(id))
            .map(|(k, _)| *k)
            .collect();

        let links_before = data.obs_target_defs.len();
        data.obs_target_defs
            .retain(|(ot, td)| !definition_ids.contains(td) && !target_ids.contains(ot));
        let links = links_before - data.obs_target_defs.len();

        for definition_id in &definition_ids {
            data.target_definitions.remove(definition_id);
        }

        let removed: Vec<ObservedTarget> = target_ids
            .iter()
            .filter_map(|target_id| data.observed_targets.remove(target_id))
            .collect();
        let labels = removed.iter().map(|t| t.labels.len()).sum();
        let apertures: Vec<&Aperture> = removed.iter().filter_map(|t| t.aperture.as_ref()).collect();
        let aperture_offsets = apertures.iter().map(|a| a.offsets.len()).sum();

        let images_before = data.images.len();
        data.images.retain(|_, image| image.target_table_id != Some(id));
        let images = images_before - data.images.len();

        data.target_tables.remove(&id);

        let counts = [
            links,
            definition_ids.len(),
            labels,
            removed.len(),
            aperture_offsets,
            apertures.len(),
            images,
            usize::from(table.tad_report.is_some()),
            1,
        ];
        Ok(TARGET_TABLE_DELETE_ORDER
            .iter()
            .zip(counts)
            .map(|(table, rows)| DeletedRows::new(table, rows))
            .collect())
    }

    async fn create_mask_table(&self, table: &MaskTable) -> RepositoryResult<MaskTable> {
        self.check_health()?;
        let mut data = self.write()?;
        let mut stored = table.clone();
        let id = MaskTableId(data.next_id());
        stored.id = Some(id);
        data.mask_tables.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_mask_table(&self, id: MaskTableId) -> RepositoryResult<Option<MaskTable>> {
        Ok(self.read()?.mask_tables.get(&id).cloned())
    }

    async fn find_mask_tables(&self, filter: &MaskTableFilter) -> RepositoryResult<Vec<MaskTable>> {
        Ok(self
            .read()?
            .mask_tables
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn delete_mask_table(&self, id: MaskTableId) -> RepositoryResult<Vec<DeletedRows>> {
        let mut data = self.write()?;
        if !data.mask_tables.contains_key(&id) {
            return Err(missing("delete_mask_table", "tad_mask_table", id));
        }
        let mask_ids: BTreeSet<MaskId> = data
            .masks
            .iter()
            .filter(|(_, m)| m.mask_table_id == id)
            .map(|(k, _)| *k)
            .collect();
        if data
            .target_definitions
            .values()
            .any(|d| d.mask_id.is_some_and(|m| mask_ids.contains(&m)))
        {
            return Err(RepositoryError::validation_with_context(
                "masks are still referenced by target definitions",
                ErrorContext::new("delete_mask_table")
                    .with_entity("tad_mask")
                    .with_entity_id(id),
            ));
        }

        let removed: Vec<Mask> = mask_ids.iter().filter_map(|m| data.masks.remove(m)).collect();
        data.mask_tables.remove(&id);

        let counts = [removed.iter().map(|m| m.offsets.len()).sum(), removed.len(), 1];
        Ok(MASK_TABLE_DELETE_ORDER
            .iter()
            .zip(counts)
            .map(|(table, rows)| DeletedRows::new(table, rows))
            .collect())
    }

    async fn create_mask(&self, mask: &Mask) -> RepositoryResult<Mask> {
        let mut data = self.write()?;
        if !data.mask_tables.contains_key(&mask.mask_table_id) {
            return Err(missing("create_mask", "tad_mask_table", mask.mask_table_id));
        }
        let mut stored = mask.clone();
        let id = MaskId(data.next_id());
        stored.id = Some(id);
        data.masks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_masks(&self, mask_table_id: MaskTableId) -> RepositoryResult<Vec<Mask>> {
        let data = self.read()?;
        let mut masks: Vec<Mask> = data
            .masks
            .values()
            .filter(|m| m.mask_table_id == mask_table_id)
            .cloned()
            .collect();
        masks.sort_by_key(|m| m.index_in_table);
        Ok(masks)
    }

    async fn delete_supermasks(
        &self,
        mask_table_id: MaskTableId,
    ) -> RepositoryResult<Vec<DeletedRows>> {
        let mut data = self.write()?;
        let supermask_ids: BTreeSet<MaskId> = data
            .masks
            .iter()
            .filter(|(_, m)| m.mask_table_id == mask_table_id && m.supermask)
            .map(|(k, _)| *k)
            .collect();
        let offsets = supermask_ids
            .iter()
            .filter_map(|id| data.masks.get(id))
            .map(|m| m.offsets.len())
            .sum();

        let mut cleared = 0;
        for stored in data.target_definitions.values_mut() {
            if stored.mask_id.is_some_and(|m| supermask_ids.contains(&m)) {
                stored.mask_id = None;
                cleared += 1;
            }
        }
        for id in &supermask_ids {
            data.masks.remove(id);
        }

        let counts = [offsets, cleared, supermask_ids.len()];
        Ok(SUPERMASK_DELETE_ORDER
            .iter()
            .zip(counts)
            .map(|(table, rows)| DeletedRows::new(table, rows))
            .collect())
    }

    async fn create_observed_target(
        &self,
        target: &ObservedTarget,
    ) -> RepositoryResult<ObservedTarget> {
        let mut data = self.write()?;
        let table_id = target
            .target_table_id
            .ok_or_else(|| unsaved("create_observed_target", "tad_target_table"))?;
        if !data.target_tables.contains_key(&table_id) {
            return Err(missing("create_observed_target", "tad_target_table", table_id));
        }

        let mut stored = target.clone();
        let id = ObservedTargetId(data.next_id());
        stored.id = Some(id);
        if let Some(aperture) = stored.aperture.as_mut() {
            aperture.id = Some(ApertureId(data.next_id()));
        }

        let mut definitions = Vec::with_capacity(target.target_definitions.len());
        for definition in &target.target_definitions {
            let saved = match definition.id {
                Some(existing) if data.target_definitions.contains_key(&existing) => {
                    definition.clone()
                }
                Some(existing) => {
                    return Err(missing(
                        "create_observed_target",
                        "tad_target_definition",
                        existing,
                    ))
                }
                None => data.store_definition(definition, Some(table_id))?,
            };
            if let Some(definition_id) = saved.id {
                data.obs_target_defs.push((id, definition_id));
            }
            definitions.push(saved);
        }

        stored.target_definitions = Vec::new();
        data.observed_targets.insert(id, stored.clone());
        stored.target_definitions = definitions;
        Ok(stored)
    }

    async fn find_observed_target_rows(
        &self,
        query: &ObservedTargetQuery,
    ) -> RepositoryResult<Vec<ObservedTargetRow>> {
        let data = self.read()?;
        let mut targets: Vec<&ObservedTarget> = data
            .observed_targets
            .values()
            .filter(|t| query.matches(t))
            .collect();
        if query.orders_by_module_output() {
            targets.sort_by_key(|t| (t.ccd_module, t.ccd_output, t.id));
        }

        let mut rows = Vec::with_capacity(targets.len());
        for target in targets {
            let definitions = target.id.map(|id| data.definitions_of(id)).unwrap_or_default();
            if definitions.is_empty() {
                rows.push(ObservedTargetRow {
                    target: target.clone(),
                    definition: None,
                });
            }
            for definition in definitions {
                rows.push(ObservedTargetRow {
                    target: target.clone(),
                    definition: Some(definition),
                });
            }
        }
        Ok(rows)
    }

    async fn find_observed_kepler_ids(&self, query: &KeplerIdQuery) -> RepositoryResult<Vec<i32>> {
        let data = self.read()?;
        let ids: BTreeSet<i32> = data
            .observed_targets
            .values()
            .filter(|t| t.target_table_id == Some(query.target_table_id) && !t.rejected)
            .filter(|t| {
                query
                    .module_output
                    .map_or(true, |mo| mo == (t.ccd_module, t.ccd_output))
            })
            .filter(|t| query.kepler_ids.contains(t.kepler_id))
            .map(|t| t.kepler_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn find_labels(
        &self,
        observed_target_id: ObservedTargetId,
    ) -> RepositoryResult<Vec<String>> {
        Ok(self
            .read()?
            .observed_targets
            .get(&observed_target_id)
            .map(|t| t.labels.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_aperture(
        &self,
        observed_target_id: ObservedTargetId,
        aperture: &Aperture,
    ) -> RepositoryResult<Aperture> {
        let mut data = self.write()?;
        let mut stored = aperture.clone();
        if stored.id.is_none() {
            stored.id = Some(ApertureId(data.next_id()));
        }
        let target = data
            .observed_targets
            .get_mut(&observed_target_id)
            .ok_or_else(|| missing("update_aperture", "tad_observed_target", observed_target_id))?;
        target.aperture = Some(stored.clone());
        Ok(stored)
    }

    async fn find_ktc_info(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<KtcInfo>> {
        let data = self.read()?;
        let filter = TargetTableFilter::of_types(&[TargetType::LongCadence, TargetType::ShortCadence])
            .in_state(State::Uplinked)
            .planned_within(start, end);
        let tables: BTreeMap<TargetTableId, &TargetTable> = data
            .target_tables
            .iter()
            .filter(|(_, t)| filter.matches(t))
            .map(|(k, t)| (*k, t))
            .collect();

        let mut rows: Vec<KtcInfo> = data
            .observed_targets
            .values()
            .filter(|t| t.kepler_id >= 0)
            .filter_map(|target| {
                let table = tables.get(&target.target_table_id?)?;
                Some(KtcInfo {
                    kepler_id: target.kepler_id,
                    target_type: table.target_type,
                    planned_start_time: table.planned_start_time,
                    planned_end_time: table.planned_end_time,
                    observed_target_id: target.id?,
                    external_id: table.external_id,
                    target_table_id: table.id?,
                })
            })
            .collect();
        rows.sort_by_key(|k| (k.kepler_id, k.target_type, k.external_id, k.observed_target_id));
        Ok(rows)
    }

    async fn create_target_definition(
        &self,
        definition: &TargetDefinition,
    ) -> RepositoryResult<TargetDefinition> {
        let mut data = self.write()?;
        let table_id = definition
            .target_table_id
            .ok_or_else(|| unsaved("create_target_definition", "tad_target_table"))?;
        if !data.target_tables.contains_key(&table_id) {
            return Err(missing("create_target_definition", "tad_target_table", table_id));
        }
        data.store_definition(definition, Some(table_id))
    }

    async fn find_target_definitions(
        &self,
        query: &TargetDefinitionQuery,
    ) -> RepositoryResult<Vec<TargetDefinition>> {
        let data = self.read()?;
        let mut definitions: Vec<TargetDefinition> = data
            .target_definitions
            .values()
            .filter(|s| s.definition.target_table_id == Some(query.target_table_id))
            .filter(|s| {
                query
                    .module_output
                    .map_or(true, |mo| mo == (s.definition.ccd_module, s.definition.ccd_output))
            })
            .map(|s| data.resolve_definition(s))
            .collect();
        definitions.sort_by_key(|d| (d.ccd_module, d.ccd_output, d.index_in_module_output));
        Ok(definitions)
    }

    async fn create_image(&self, image: &Image) -> RepositoryResult<Image> {
        let mut data = self.write()?;
        let table_id = image
            .target_table_id
            .ok_or_else(|| unsaved("create_image", "tad_target_table"))?;
        if !data.target_tables.contains_key(&table_id) {
            return Err(missing("create_image", "tad_target_table", table_id));
        }
        let mut stored = image.clone();
        let id = ImageId(data.next_id());
        stored.id = Some(id);
        data.images.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_images(
        &self,
        target_table_id: TargetTableId,
        ccd_module: i32,
        ccd_output: i32,
    ) -> RepositoryResult<Vec<Image>> {
        Ok(self
            .read()?
            .images
            .values()
            .filter(|i| {
                i.target_table_id == Some(target_table_id)
                    && i.ccd_module == ccd_module
                    && i.ccd_output == ccd_output
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TargetSelectionRepository for LocalRepository {
    async fn create_target_list_set(&self, tls: &TargetListSet) -> RepositoryResult<TargetListSet> {
        let mut data = self.write()?;
        let mut stored = tls.clone();
        let id = TargetListSetId(data.next_id());
        stored.id = Some(id);
        for list in stored.target_lists.iter_mut() {
            if list.id.is_none() {
                list.id = Some(TargetListId(data.next_id()));
            }
        }
        data.target_list_sets.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_target_list_set(&self, tls: &TargetListSet) -> RepositoryResult<()> {
        let id = tls
            .id
            .ok_or_else(|| unsaved("update_target_list_set", "cm_target_list_set"))?;
        let mut data = self.write()?;
        if let Some(supp_id) = tls.supplemental_tls_id {
            if !data.target_list_sets.contains_key(&supp_id) {
                return Err(missing("update_target_list_set", "cm_target_list_set", supp_id));
            }
        }
        let stored = data
            .target_list_sets
            .get_mut(&id)
            .ok_or_else(|| missing("update_target_list_set", "cm_target_list_set", id))?;
        stored.name = tls.name.clone();
        stored.state = tls.state;
        stored.target_table_id = tls.target_table_id;
        stored.background_table_id = tls.background_table_id;
        stored.supplemental_tls_id = tls.supplemental_tls_id;
        Ok(())
    }

    async fn get_target_list_set(
        &self,
        id: TargetListSetId,
    ) -> RepositoryResult<Option<TargetListSet>> {
        Ok(self.read()?.target_list_sets.get(&id).cloned())
    }

    async fn find_target_list_sets_by_name(
        &self,
        name: &str,
    ) -> RepositoryResult<Vec<TargetListSet>> {
        Ok(self
            .read()?
            .target_list_sets
            .values()
            .filter(|t| t.name == name)
            .cloned()
            .collect())
    }

    async fn find_target_list_sets_by_target_table(
        &self,
        target_table_id: TargetTableId,
    ) -> RepositoryResult<Vec<TargetListSet>> {
        Ok(self
            .read()?
            .target_list_sets
            .values()
            .filter(|t| t.target_table_id == Some(target_table_id))
            .cloned()
            .collect())
    }

    async fn create_planned_target(
        &self,
        target: &PlannedTarget,
    ) -> RepositoryResult<PlannedTarget> {
        let mut data = self.write()?;
        let list_exists = data
            .target_list_sets
            .values()
            .flat_map(|tls| tls.target_lists.iter())
            .any(|list| list.id == Some(target.target_list_id));
        if !list_exists {
            return Err(missing(
                "create_planned_target",
                "cm_target_list",
                target.target_list_id,
            ));
        }
        let mut stored = target.clone();
        let id = PlannedTargetId(data.next_id());
        stored.id = Some(id);
        data.planned_targets.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_planned_targets(
        &self,
        target_list_ids: &[TargetListId],
        kepler_ids: Option<&[i32]>,
    ) -> RepositoryResult<Vec<PlannedTarget>> {
        Ok(self
            .read()?
            .planned_targets
            .values()
            .filter(|p| target_list_ids.contains(&p.target_list_id))
            .filter(|p| kepler_ids.map_or(true, |ids| ids.contains(&p.kepler_id)))
            .cloned()
            .collect())
    }

    async fn create_sky_group(&self, sky_group: &SkyGroup) -> RepositoryResult<SkyGroup> {
        self.write()?.sky_groups.push(*sky_group);
        Ok(*sky_group)
    }

    async fn find_sky_group(
        &self,
        sky_group_id: i32,
        observing_season: i32,
    ) -> RepositoryResult<Option<SkyGroup>> {
        Ok(self
            .read()?
            .sky_groups
            .iter()
            .find(|s| s.sky_group_id == sky_group_id && s.observing_season == observing_season)
            .copied())
    }
}

#[async_trait]
impl PixelLogRepository for LocalRepository {
    async fn create_pixel_log(&self, log: &PixelLog) -> RepositoryResult<()> {
        self.write()?.pixel_logs.push(log.clone());
        Ok(())
    }

    async fn find_pixel_logs(
        &self,
        cadence_type: Option<CadenceType>,
        cadence_range: Option<(i32, i32)>,
    ) -> RepositoryResult<Vec<PixelLog>> {
        let mut logs: Vec<PixelLog> = self
            .read()?
            .pixel_logs
            .iter()
            .filter(|l| cadence_type.map_or(true, |t| t == l.cadence_type))
            .filter(|l| {
                cadence_range.map_or(true, |(start, end)| {
                    (start..=end).contains(&l.cadence_number)
                })
            })
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.cadence_type, l.cadence_number));
        Ok(logs)
    }
}

#[async_trait]
impl PipelineRepository for LocalRepository {
    async fn create_pipeline_instance(
        &self,
        instance: &PipelineInstance,
    ) -> RepositoryResult<PipelineInstance> {
        let mut data = self.write()?;
        let mut stored = instance.clone();
        let id = PipelineInstanceId(data.next_id());
        stored.id = Some(id);
        data.pipeline_instances.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_pipeline_instance_state(
        &self,
        id: PipelineInstanceId,
        state: PipelineInstanceState,
    ) -> RepositoryResult<()> {
        let mut data = self.write()?;
        let instance = data
            .pipeline_instances
            .get_mut(&id)
            .ok_or_else(|| missing("update_pipeline_instance_state", "pi_pipeline_instance", id))?;
        instance.state = state;
        Ok(())
    }

    async fn get_pipeline_instance(
        &self,
        id: PipelineInstanceId,
    ) -> RepositoryResult<Option<PipelineInstance>> {
        Ok(self.read()?.pipeline_instances.get(&id).cloned())
    }

    async fn create_pipeline_task(&self, task: &PipelineTask) -> RepositoryResult<PipelineTask> {
        let mut data = self.write()?;
        if !data.pipeline_instances.contains_key(&task.pipeline_instance_id) {
            return Err(missing(
                "create_pipeline_task",
                "pi_pipeline_instance",
                task.pipeline_instance_id,
            ));
        }
        let mut stored = task.clone();
        let id = PipelineTaskId(data.next_id());
        stored.id = Some(id);
        data.pipeline_tasks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_pipeline_task(&self, id: PipelineTaskId) -> RepositoryResult<Option<PipelineTask>> {
        Ok(self.read()?.pipeline_tasks.get(&id).cloned())
    }
}

#[async_trait]
impl DvRepository for LocalRepository {
    async fn create_planet_results(
        &self,
        results: &[DvPlanetResults],
    ) -> RepositoryResult<Vec<DvPlanetResults>> {
        let mut data = self.write()?;
        let mut stored = Vec::with_capacity(results.len());
        for result in results {
            let mut result = result.clone();
            let id = DvPlanetResultsId(data.next_id());
            result.id = Some(id);
            data.planet_results.insert(id, result.clone());
            stored.push(result);
        }
        Ok(stored)
    }

    async fn find_planet_results(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvPlanetResults>>> {
        let data = self.read()?;
        Ok(data.with_provenance(data.planet_results.values().cloned(), query))
    }

    async fn delete_planet_results(&self, ids: &[DvPlanetResultsId]) -> RepositoryResult<usize> {
        let mut data = self.write()?;
        Ok(ids
            .iter()
            .filter(|id| data.planet_results.remove(id).is_some())
            .count())
    }

    async fn create_target_results(
        &self,
        results: &[DvTargetResults],
    ) -> RepositoryResult<Vec<DvTargetResults>> {
        let mut data = self.write()?;
        let mut stored = Vec::with_capacity(results.len());
        for result in results {
            let mut result = result.clone();
            let id = DvTargetResultsId(data.next_id());
            result.id = Some(id);
            data.target_results.insert(id, result.clone());
            stored.push(result);
        }
        Ok(stored)
    }

    async fn find_target_results(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvTargetResults>>> {
        let data = self.read()?;
        Ok(data.with_provenance(data.target_results.values().cloned(), query))
    }

    async fn delete_target_results(&self, ids: &[DvTargetResultsId]) -> RepositoryResult<usize> {
        let mut data = self.write()?;
        Ok(ids
            .iter()
            .filter(|id| data.target_results.remove(id).is_some())
            .count())
    }

    async fn create_limb_darkening_models(
        &self,
        models: &[DvLimbDarkeningModel],
    ) -> RepositoryResult<Vec<DvLimbDarkeningModel>> {
        let mut data = self.write()?;
        let mut stored = Vec::with_capacity(models.len());
        for model in models {
            let mut model = model.clone();
            let id = DvLimbDarkeningModelId(data.next_id());
            model.id = Some(id);
            data.limb_darkening_models.insert(id, model.clone());
            stored.push(model);
        }
        Ok(stored)
    }

    async fn find_limb_darkening_models(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvLimbDarkeningModel>>> {
        let data = self.read()?;
        Ok(data.with_provenance(data.limb_darkening_models.values().cloned(), query))
    }

    async fn delete_limb_darkening_models(
        &self,
        ids: &[DvLimbDarkeningModelId],
    ) -> RepositoryResult<usize> {
        let mut data = self.write()?;
        Ok(ids
            .iter()
            .filter(|id| data.limb_darkening_models.remove(id).is_some())
            .count())
    }
}

#[async_trait]
impl FcRepository for LocalRepository {
    async fn create_history(&self, history: &History) -> RepositoryResult<History> {
        let mut data = self.write()?;
        let mut stored = history.clone();
        let id = HistoryId(data.next_id());
        stored.id = Some(id);
        data.histories.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_histories(&self, model_type: HistoryModelName) -> RepositoryResult<Vec<History>> {
        let mut histories: Vec<History> = self
            .read()?
            .histories
            .values()
            .filter(|h| h.model_type == model_type)
            .cloned()
            .collect();
        histories.sort_by_key(|h| (h.ingest_time, h.id));
        Ok(histories)
    }

    async fn create_large_flat_field(
        &self,
        flat_field: &LargeFlatField,
    ) -> RepositoryResult<LargeFlatField> {
        let mut data = self.write()?;
        if !data.histories.contains_key(&flat_field.history_id) {
            return Err(missing("create_large_flat_field", "fc_history", flat_field.history_id));
        }
        let mut stored = flat_field.clone();
        let id = LargeFlatFieldId(data.next_id());
        stored.id = Some(id);
        data.large_flat_fields.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_large_flat_fields(
        &self,
        query: &LargeFlatFieldQuery,
    ) -> RepositoryResult<Vec<LargeFlatField>> {
        let mut flats: Vec<LargeFlatField> = self
            .read()?
            .large_flat_fields
            .values()
            .filter(|f| f.history_id == query.history_id)
            .filter(|f| {
                query
                    .module_output
                    .map_or(true, |mo| mo == (f.ccd_module, f.ccd_output))
            })
            .filter(|f| {
                query
                    .start_time_range
                    .map_or(true, |(start, end)| f.start_time >= start && f.start_time <= end)
            })
            .cloned()
            .collect();
        flats.sort_by(|a, b| a.start_time.total_cmp(&b.start_time).then(a.id.cmp(&b.id)));
        Ok(flats)
    }

    async fn create_small_flat_field_image(
        &self,
        image: &SmallFlatFieldImage,
    ) -> RepositoryResult<SmallFlatFieldImage> {
        let mut data = self.write()?;
        if !data.histories.contains_key(&image.history_id) {
            return Err(missing("create_small_flat_field_image", "fc_history", image.history_id));
        }
        let mut stored = image.clone();
        let id = SmallFlatFieldImageId(data.next_id());
        stored.id = Some(id);
        data.small_flat_field_images.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_small_flat_field_images(
        &self,
        history_id: HistoryId,
        ccd_module: i32,
        ccd_output: i32,
    ) -> RepositoryResult<Vec<SmallFlatFieldImage>> {
        let mut images: Vec<SmallFlatFieldImage> = self
            .read()?
            .small_flat_field_images
            .values()
            .filter(|i| {
                i.history_id == history_id && i.ccd_module == ccd_module && i.ccd_output == ccd_output
            })
            .cloned()
            .collect();
        images.sort_by(|a, b| a.mjd.total_cmp(&b.mjd).then(a.id.cmp(&b.id)));
        Ok(images)
    }
}

#[async_trait]
impl TransactionRepository for LocalRepository {
    async fn begin_transaction(&self) -> RepositoryResult<()> {
        self.check_health()?;
        let mut snapshot = self.snapshot.write()?;
        if snapshot.is_some() {
            return Err(RepositoryError::transaction("a transaction is already open"));
        }
        *snapshot = Some(self.read()?.clone());
        Ok(())
    }

    async fn commit_transaction(&self) -> RepositoryResult<()> {
        match self.snapshot.write()?.take() {
            Some(_) => Ok(()),
            None => Err(RepositoryError::transaction("no open transaction to commit")),
        }
    }

    async fn rollback_transaction(&self) -> RepositoryResult<()> {
        let saved = self
            .snapshot
            .write()?
            .take()
            .ok_or_else(|| RepositoryError::transaction("no open transaction to roll back"))?;
        *self.write()? = saved;
        Ok(())
    }

    async fn in_transaction(&self) -> RepositoryResult<bool> {
        Ok(self.snapshot.read()?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn table(repo: &LocalRepository) -> TargetTable {
        repo.create_target_table(&TargetTable::new(TargetType::LongCadence))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_join_rows_fan_out_per_definition() {
        let repo = LocalRepository::new();
        let table = table(&repo).await;
        let mut target = ObservedTarget::new(table.id, 2, 1, 100);
        target.target_definitions = vec![TargetDefinition::new(2, 1, 100), TargetDefinition::new(2, 1, 100)];
        repo.create_observed_target(&target).await.unwrap();
        repo.create_observed_target(&ObservedTarget::new(table.id, 2, 1, 101))
            .await
            .unwrap();

        let rows = repo
            .find_observed_target_rows(&ObservedTargetQuery::for_table(table.id.unwrap()))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r.definition.is_none()).count(), 1);
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let repo = LocalRepository::new();
        repo.begin_transaction().await.unwrap();
        table(&repo).await;
        assert!(repo.begin_transaction().await.is_err());
        repo.rollback_transaction().await.unwrap();

        let tables = repo.find_target_tables(&TargetTableFilter::any()).await.unwrap();
        assert!(tables.is_empty());
        assert!(!repo.in_transaction().await.unwrap());
        assert!(repo.commit_transaction().await.is_err());
    }

    #[tokio::test]
    async fn test_mask_table_delete_refuses_referenced_masks() {
        let repo = LocalRepository::new();
        let mask_table = repo
            .create_mask_table(&MaskTable::new(MaskType::Target))
            .await
            .unwrap();
        let mask = repo
            .create_mask(&Mask::new(mask_table.id.unwrap(), vec![Offset::new(0, 0)]))
            .await
            .unwrap();
        let table = table(&repo).await;
        let mut definition = TargetDefinition::new(2, 1, 5);
        definition.target_table_id = table.id;
        definition.mask = Some(mask);
        repo.create_target_definition(&definition).await.unwrap();

        let err = repo.delete_mask_table(mask_table.id.unwrap()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ValidationError { .. }));
    }

    #[tokio::test]
    async fn test_unhealthy_repository_rejects_writes() {
        let repo = LocalRepository::new();
        repo.set_healthy(false).unwrap();
        assert!(!repo.health_check().await.unwrap());
        assert!(repo
            .create_target_table(&TargetTable::new(TargetType::Background))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unhealthy_repository_keeps_target_table_on_delete() {
        let repo = LocalRepository::new();
        let table = repo
            .create_target_table(&TargetTable::new(TargetType::LongCadence))
            .await
            .unwrap();
        let id = table.id.unwrap();

        repo.set_healthy(false).unwrap();
        let err = repo.delete_target_table(id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::ConnectionError { .. }));

        repo.set_healthy(true).unwrap();
        assert!(repo.get_target_table(id).await.unwrap().is_some());
    }
}
