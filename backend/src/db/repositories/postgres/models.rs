use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::schema::*;
use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult};
use crate::models::*;

/// Decode a stored enum code.
pub fn decode<T>(decoded: Result<T, UnknownShortName>) -> RepositoryResult<T> {
    decoded.map_err(|e| {
        RepositoryError::internal_with_context(e.to_string(), ErrorContext::new("decode_row"))
    })
}

pub fn to_json<T: serde::Serialize>(value: &T) -> RepositoryResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        RepositoryError::internal_with_context(e.to_string(), ErrorContext::new("encode_json"))
    })
}

pub fn from_json<T: DeserializeOwned>(value: Value) -> RepositoryResult<T> {
    serde_json::from_value(value).map_err(|e| {
        RepositoryError::internal_with_context(e.to_string(), ErrorContext::new("decode_json"))
    })
}

// ==================== Masks ====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_mask_table)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MaskTableRow {
    pub id: i64,
    pub mask_type: i16,
    pub external_id: i32,
    pub state: i16,
}

impl MaskTableRow {
    pub fn into_domain(self) -> RepositoryResult<MaskTable> {
        Ok(MaskTable {
            id: Some(MaskTableId(self.id)),
            mask_type: decode(MaskType::from_code(self.mask_type))?,
            external_id: self.external_id,
            state: decode(State::from_code(self.state))?,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tad_mask_table)]
pub struct NewMaskTableRow {
    pub mask_type: i16,
    pub external_id: i32,
    pub state: i16,
}

impl From<&MaskTable> for NewMaskTableRow {
    fn from(table: &MaskTable) -> Self {
        Self {
            mask_type: table.mask_type.code(),
            external_id: table.external_id,
            state: table.state.code(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_mask)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MaskRow {
    pub id: i64,
    pub mask_table_id: i64,
    pub index_in_table: i32,
    pub used: bool,
    pub supermask: bool,
}

impl MaskRow {
    pub fn into_domain(self, offsets: Vec<Offset>) -> Mask {
        Mask {
            id: Some(MaskId(self.id)),
            mask_table_id: MaskTableId(self.mask_table_id),
            index_in_table: self.index_in_table,
            offsets,
            used: self.used,
            supermask: self.supermask,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tad_mask)]
pub struct NewMaskRow {
    pub mask_table_id: i64,
    pub index_in_table: i32,
    pub used: bool,
    pub supermask: bool,
}

impl From<&Mask> for NewMaskRow {
    fn from(mask: &Mask) -> Self {
        Self {
            mask_table_id: mask.mask_table_id.0,
            index_in_table: mask.index_in_table,
            used: mask.used,
            supermask: mask.supermask,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = tad_mask_offsets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MaskOffsetRow {
    pub mask_id: i64,
    pub idx: i32,
    pub row_offset: i32,
    pub column_offset: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = tad_aperture_offsets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApertureOffsetRow {
    pub aperture_id: i64,
    pub idx: i32,
    pub row_offset: i32,
    pub column_offset: i32,
}

// ==================== Target tables ====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_target_table)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TargetTableRow {
    pub id: i64,
    pub target_type: i16,
    pub external_id: i32,
    pub state: i16,
    pub planned_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub observing_season: i32,
    pub mask_table_id: Option<i64>,
}

impl TargetTableRow {
    pub fn into_domain(self, report: Option<TadReport>) -> RepositoryResult<TargetTable> {
        Ok(TargetTable {
            id: Some(TargetTableId(self.id)),
            target_type: decode(TargetType::from_code(self.target_type))?,
            external_id: self.external_id,
            state: decode(State::from_code(self.state))?,
            planned_start_time: self.planned_start_time,
            planned_end_time: self.planned_end_time,
            observing_season: self.observing_season,
            mask_table_id: self.mask_table_id.map(MaskTableId),
            tad_report: report,
        })
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = tad_target_table)]
#[diesel(treat_none_as_null = true)]
pub struct NewTargetTableRow {
    pub target_type: i16,
    pub external_id: i32,
    pub state: i16,
    pub planned_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub observing_season: i32,
    pub mask_table_id: Option<i64>,
}

impl From<&TargetTable> for NewTargetTableRow {
    fn from(table: &TargetTable) -> Self {
        Self {
            target_type: table.target_type.code(),
            external_id: table.external_id,
            state: table.state.code(),
            planned_start_time: table.planned_start_time,
            planned_end_time: table.planned_end_time,
            observing_season: table.observing_season,
            mask_table_id: table.mask_table_id.map(|id| id.0),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_report)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TadReportRow {
    pub id: i64,
    pub target_table_id: i64,
    pub warnings_json: Value,
    pub errors_json: Value,
}

impl TadReportRow {
    pub fn into_domain(self) -> RepositoryResult<TadReport> {
        Ok(TadReport {
            id: Some(TadReportId(self.id)),
            warnings: from_json(self.warnings_json)?,
            errors: from_json(self.errors_json)?,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tad_report)]
pub struct NewTadReportRow {
    pub target_table_id: i64,
    pub warnings_json: Value,
    pub errors_json: Value,
}

impl NewTadReportRow {
    pub fn new(target_table_id: TargetTableId, report: &TadReport) -> RepositoryResult<Self> {
        Ok(Self {
            target_table_id: target_table_id.0,
            warnings_json: to_json(&report.warnings)?,
            errors_json: to_json(&report.errors)?,
        })
    }
}

// ==================== Observed targets ====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_aperture)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApertureRow {
    pub id: i64,
    pub target_table_id: i64,
    pub user_defined: bool,
    pub reference_row: i32,
    pub reference_column: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tad_aperture)]
pub struct NewApertureRow {
    pub target_table_id: i64,
    pub user_defined: bool,
    pub reference_row: i32,
    pub reference_column: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_observed_target)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ObservedTargetRow {
    pub id: i64,
    pub target_table_id: i64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub kepler_id: i32,
    pub aperture_id: Option<i64>,
    pub crowding_metric: f64,
    pub sky_crowding_metric: f64,
    pub flux_fraction_in_aperture: f64,
    pub signal_to_noise_ratio: f64,
    pub magnitude: f32,
    pub ra: f64,
    pub dec: f64,
    pub saturated_row_count: i32,
    pub rejected: bool,
    pub pipeline_task_id: Option<i64>,
}

impl ObservedTargetRow {
    pub fn into_domain(
        self,
        aperture: Option<Aperture>,
        labels: std::collections::BTreeSet<String>,
    ) -> ObservedTarget {
        ObservedTarget {
            id: Some(ObservedTargetId(self.id)),
            target_table_id: Some(TargetTableId(self.target_table_id)),
            ccd_module: self.ccd_module,
            ccd_output: self.ccd_output,
            kepler_id: self.kepler_id,
            aperture,
            target_definitions: Vec::new(),
            labels,
            crowding_metric: self.crowding_metric,
            sky_crowding_metric: self.sky_crowding_metric,
            flux_fraction_in_aperture: self.flux_fraction_in_aperture,
            signal_to_noise_ratio: self.signal_to_noise_ratio,
            magnitude: self.magnitude,
            ra: self.ra,
            dec: self.dec,
            saturated_row_count: self.saturated_row_count,
            rejected: self.rejected,
            pipeline_task_id: self.pipeline_task_id.map(PipelineTaskId),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tad_observed_target)]
pub struct NewObservedTargetRow {
    pub target_table_id: i64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub kepler_id: i32,
    pub aperture_id: Option<i64>,
    pub crowding_metric: f64,
    pub sky_crowding_metric: f64,
    pub flux_fraction_in_aperture: f64,
    pub signal_to_noise_ratio: f64,
    pub magnitude: f32,
    pub ra: f64,
    pub dec: f64,
    pub saturated_row_count: i32,
    pub rejected: bool,
    pub pipeline_task_id: Option<i64>,
}

impl NewObservedTargetRow {
    pub fn new(
        target_table_id: TargetTableId,
        target: &ObservedTarget,
        aperture_id: Option<i64>,
    ) -> Self {
        Self {
            target_table_id: target_table_id.0,
            ccd_module: target.ccd_module,
            ccd_output: target.ccd_output,
            kepler_id: target.kepler_id,
            aperture_id,
            crowding_metric: target.crowding_metric,
            sky_crowding_metric: target.sky_crowding_metric,
            flux_fraction_in_aperture: target.flux_fraction_in_aperture,
            signal_to_noise_ratio: target.signal_to_noise_ratio,
            magnitude: target.magnitude,
            ra: target.ra,
            dec: target.dec,
            saturated_row_count: target.saturated_row_count,
            rejected: target.rejected,
            pipeline_task_id: target.pipeline_task_id.map(|id| id.0),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = tad_observed_target_labels)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LabelRow {
    pub observed_target_id: i64,
    pub label: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = tad_obs_target_target_defs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ObsTargetDefRow {
    pub observed_target_id: i64,
    pub target_definition_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_target_definition)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TargetDefinitionRow {
    pub id: i64,
    pub target_table_id: Option<i64>,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub kepler_id: i32,
    pub index_in_module_output: i32,
    pub reference_row: i32,
    pub reference_column: i32,
    pub excess_pixels: i32,
    pub status: i32,
    pub mask_id: Option<i64>,
}

impl TargetDefinitionRow {
    pub fn into_domain(self, mask: Option<Mask>) -> TargetDefinition {
        TargetDefinition {
            id: Some(TargetDefinitionId(self.id)),
            target_table_id: self.target_table_id.map(TargetTableId),
            ccd_module: self.ccd_module,
            ccd_output: self.ccd_output,
            kepler_id: self.kepler_id,
            index_in_module_output: self.index_in_module_output,
            reference_row: self.reference_row,
            reference_column: self.reference_column,
            excess_pixels: self.excess_pixels,
            status: self.status,
            mask,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tad_target_definition)]
pub struct NewTargetDefinitionRow {
    pub target_table_id: Option<i64>,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub kepler_id: i32,
    pub index_in_module_output: i32,
    pub reference_row: i32,
    pub reference_column: i32,
    pub excess_pixels: i32,
    pub status: i32,
    pub mask_id: Option<i64>,
}

impl From<&TargetDefinition> for NewTargetDefinitionRow {
    fn from(definition: &TargetDefinition) -> Self {
        Self {
            target_table_id: definition.target_table_id.map(|id| id.0),
            ccd_module: definition.ccd_module,
            ccd_output: definition.ccd_output,
            kepler_id: definition.kepler_id,
            index_in_module_output: definition.index_in_module_output,
            reference_row: definition.reference_row,
            reference_column: definition.reference_column,
            excess_pixels: definition.excess_pixels,
            status: definition.status,
            mask_id: definition.mask.as_ref().and_then(|m| m.id).map(|id| id.0),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tad_image)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ImageRow {
    pub id: i64,
    pub target_table_id: i64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub pipeline_task_id: Option<i64>,
    pub module_output_image_json: Value,
    pub min_row: i32,
    pub max_row: i32,
    pub min_col: i32,
    pub max_col: i32,
}

impl ImageRow {
    pub fn into_domain(self) -> RepositoryResult<Image> {
        Ok(Image {
            id: Some(ImageId(self.id)),
            target_table_id: Some(TargetTableId(self.target_table_id)),
            ccd_module: self.ccd_module,
            ccd_output: self.ccd_output,
            pipeline_task_id: self.pipeline_task_id.map(PipelineTaskId),
            module_output_image: from_json(self.module_output_image_json)?,
            min_row: self.min_row,
            max_row: self.max_row,
            min_col: self.min_col,
            max_col: self.max_col,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tad_image)]
pub struct NewImageRow {
    pub target_table_id: i64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub pipeline_task_id: Option<i64>,
    pub module_output_image_json: Value,
    pub min_row: i32,
    pub max_row: i32,
    pub min_col: i32,
    pub max_col: i32,
}

impl NewImageRow {
    pub fn new(target_table_id: TargetTableId, image: &Image) -> RepositoryResult<Self> {
        Ok(Self {
            target_table_id: target_table_id.0,
            ccd_module: image.ccd_module,
            ccd_output: image.ccd_output,
            pipeline_task_id: image.pipeline_task_id.map(|id| id.0),
            module_output_image_json: to_json(&image.module_output_image)?,
            min_row: image.min_row,
            max_row: image.max_row,
            min_col: image.min_col,
            max_col: image.max_col,
        })
    }
}

// ==================== Target selection ====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = cm_target_list_set)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TargetListSetRow {
    pub id: i64,
    pub name: String,
    pub state: i16,
    pub target_table_id: Option<i64>,
    pub background_table_id: Option<i64>,
    pub supplemental_tls_id: Option<i64>,
}

impl TargetListSetRow {
    pub fn into_domain(self, target_lists: Vec<TargetList>) -> RepositoryResult<TargetListSet> {
        Ok(TargetListSet {
            id: Some(TargetListSetId(self.id)),
            name: self.name,
            state: decode(State::from_code(self.state))?,
            target_table_id: self.target_table_id.map(TargetTableId),
            background_table_id: self.background_table_id.map(TargetTableId),
            supplemental_tls_id: self.supplemental_tls_id.map(TargetListSetId),
            target_lists,
        })
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = cm_target_list_set)]
#[diesel(treat_none_as_null = true)]
pub struct NewTargetListSetRow {
    pub name: String,
    pub state: i16,
    pub target_table_id: Option<i64>,
    pub background_table_id: Option<i64>,
    pub supplemental_tls_id: Option<i64>,
}

impl From<&TargetListSet> for NewTargetListSetRow {
    fn from(tls: &TargetListSet) -> Self {
        Self {
            name: tls.name.clone(),
            state: tls.state.code(),
            target_table_id: tls.target_table_id.map(|id| id.0),
            background_table_id: tls.background_table_id.map(|id| id.0),
            supplemental_tls_id: tls.supplemental_tls_id.map(|id| id.0),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = cm_target_list)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TargetListRow {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub source: String,
    pub source_type: i16,
}

impl TargetListRow {
    pub fn into_domain(self) -> RepositoryResult<TargetList> {
        Ok(TargetList {
            id: Some(TargetListId(self.id)),
            name: self.name,
            category: self.category,
            source: self.source,
            source_type: decode(SourceType::from_code(self.source_type))?,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cm_target_list)]
pub struct NewTargetListRow {
    pub name: String,
    pub category: String,
    pub source: String,
    pub source_type: i16,
}

impl From<&TargetList> for NewTargetListRow {
    fn from(list: &TargetList) -> Self {
        Self {
            name: list.name.clone(),
            category: list.category.clone(),
            source: list.source.clone(),
            source_type: list.source_type.code(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = cm_tls_target_lists)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TlsTargetListRow {
    pub target_list_set_id: i64,
    pub target_list_id: i64,
    pub idx: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = cm_planned_target)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PlannedTargetRow {
    pub id: i64,
    pub kepler_id: i32,
    pub target_list_id: i64,
    pub sky_group_id: i32,
}

impl From<PlannedTargetRow> for PlannedTarget {
    fn from(row: PlannedTargetRow) -> Self {
        PlannedTarget {
            id: Some(PlannedTargetId(row.id)),
            kepler_id: row.kepler_id,
            target_list_id: TargetListId(row.target_list_id),
            sky_group_id: row.sky_group_id,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = cm_planned_target)]
pub struct NewPlannedTargetRow {
    pub kepler_id: i32,
    pub target_list_id: i64,
    pub sky_group_id: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = cm_sky_group)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SkyGroupRow {
    pub sky_group_id: i32,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub observing_season: i32,
}

impl From<SkyGroupRow> for SkyGroup {
    fn from(row: SkyGroupRow) -> Self {
        SkyGroup {
            sky_group_id: row.sky_group_id,
            ccd_module: row.ccd_module,
            ccd_output: row.ccd_output,
            observing_season: row.observing_season,
        }
    }
}

impl From<&SkyGroup> for SkyGroupRow {
    fn from(group: &SkyGroup) -> Self {
        Self {
            sky_group_id: group.sky_group_id,
            ccd_module: group.ccd_module,
            ccd_output: group.ccd_output,
            observing_season: group.observing_season,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = dr_pixel_log)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PixelLogRow {
    pub cadence_number: i32,
    pub cadence_type: i16,
    pub mjd_start_time: f64,
    pub mjd_end_time: f64,
    pub lc_target_table_id: i32,
    pub sc_target_table_id: i32,
    pub back_target_table_id: i32,
    pub target_aperture_table_id: i32,
    pub back_aperture_table_id: i32,
}

impl PixelLogRow {
    pub fn into_domain(self) -> RepositoryResult<PixelLog> {
        Ok(PixelLog {
            cadence_number: self.cadence_number,
            cadence_type: decode(CadenceType::from_code(self.cadence_type))?,
            mjd_start_time: self.mjd_start_time,
            mjd_end_time: self.mjd_end_time,
            lc_target_table_id: self.lc_target_table_id,
            sc_target_table_id: self.sc_target_table_id,
            back_target_table_id: self.back_target_table_id,
            target_aperture_table_id: self.target_aperture_table_id,
            back_aperture_table_id: self.back_aperture_table_id,
        })
    }
}

impl From<&PixelLog> for PixelLogRow {
    fn from(log: &PixelLog) -> Self {
        Self {
            cadence_number: log.cadence_number,
            cadence_type: log.cadence_type.code(),
            mjd_start_time: log.mjd_start_time,
            mjd_end_time: log.mjd_end_time,
            lc_target_table_id: log.lc_target_table_id,
            sc_target_table_id: log.sc_target_table_id,
            back_target_table_id: log.back_target_table_id,
            target_aperture_table_id: log.target_aperture_table_id,
            back_aperture_table_id: log.back_aperture_table_id,
        }
    }
}

// ==================== Pipeline ====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pi_pipeline_instance)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PipelineInstanceRow {
    pub id: i64,
    pub state: i16,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pi_pipeline_task)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PipelineTaskRow {
    pub id: i64,
    pub pipeline_instance_id: i64,
    pub state: i16,
}

// ==================== Data validation ====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = dv_planet_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PlanetResultsRow {
    pub id: i64,
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub kepler_id: i32,
    pub planet_number: i32,
    pub kepler_name: String,
    pub koi_id: String,
    pub koi_correlation: f32,
    pub detrend_filter_length: i32,
    pub flux_type: i16,
    pub pipeline_task_id: i64,
}

impl PlanetResultsRow {
    pub fn into_domain(self) -> RepositoryResult<DvPlanetResults> {
        Ok(DvPlanetResults {
            id: Some(DvPlanetResultsId(self.id)),
            start_cadence: self.start_cadence,
            end_cadence: self.end_cadence,
            kepler_id: self.kepler_id,
            planet_number: self.planet_number,
            kepler_name: self.kepler_name,
            koi_id: self.koi_id,
            koi_correlation: self.koi_correlation,
            detrend_filter_length: self.detrend_filter_length,
            flux_type: decode(FluxType::from_code(self.flux_type))?,
            pipeline_task_id: PipelineTaskId(self.pipeline_task_id),
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = dv_planet_results)]
pub struct NewPlanetResultsRow {
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub kepler_id: i32,
    pub planet_number: i32,
    pub kepler_name: String,
    pub koi_id: String,
    pub koi_correlation: f32,
    pub detrend_filter_length: i32,
    pub flux_type: i16,
    pub pipeline_task_id: i64,
}

impl From<&DvPlanetResults> for NewPlanetResultsRow {
    fn from(r: &DvPlanetResults) -> Self {
        Self {
            start_cadence: r.start_cadence,
            end_cadence: r.end_cadence,
            kepler_id: r.kepler_id,
            planet_number: r.planet_number,
            kepler_name: r.kepler_name.clone(),
            koi_id: r.koi_id.clone(),
            koi_correlation: r.koi_correlation,
            detrend_filter_length: r.detrend_filter_length,
            flux_type: r.flux_type.code(),
            pipeline_task_id: r.pipeline_task_id.0,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = dv_target_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TargetResultsRow {
    pub id: i64,
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub kepler_id: i32,
    pub koi_id: String,
    pub kepler_name: String,
    pub matched_koi_ids_json: Value,
    pub unmatched_koi_ids_json: Value,
    pub planet_candidate_count: i32,
    pub quarters_observed: String,
    pub flux_type: i16,
    pub pipeline_task_id: i64,
}

impl TargetResultsRow {
    pub fn into_domain(self) -> RepositoryResult<DvTargetResults> {
        Ok(DvTargetResults {
            id: Some(DvTargetResultsId(self.id)),
            start_cadence: self.start_cadence,
            end_cadence: self.end_cadence,
            kepler_id: self.kepler_id,
            koi_id: self.koi_id,
            kepler_name: self.kepler_name,
            matched_koi_ids: from_json(self.matched_koi_ids_json)?,
            unmatched_koi_ids: from_json(self.unmatched_koi_ids_json)?,
            planet_candidate_count: self.planet_candidate_count,
            quarters_observed: self.quarters_observed,
            flux_type: decode(FluxType::from_code(self.flux_type))?,
            pipeline_task_id: PipelineTaskId(self.pipeline_task_id),
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = dv_target_results)]
pub struct NewTargetResultsRow {
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub kepler_id: i32,
    pub koi_id: String,
    pub kepler_name: String,
    pub matched_koi_ids_json: Value,
    pub unmatched_koi_ids_json: Value,
    pub planet_candidate_count: i32,
    pub quarters_observed: String,
    pub flux_type: i16,
    pub pipeline_task_id: i64,
}

impl NewTargetResultsRow {
    pub fn new(r: &DvTargetResults) -> RepositoryResult<Self> {
        Ok(Self {
            start_cadence: r.start_cadence,
            end_cadence: r.end_cadence,
            kepler_id: r.kepler_id,
            koi_id: r.koi_id.clone(),
            kepler_name: r.kepler_name.clone(),
            matched_koi_ids_json: to_json(&r.matched_koi_ids)?,
            unmatched_koi_ids_json: to_json(&r.unmatched_koi_ids)?,
            planet_candidate_count: r.planet_candidate_count,
            quarters_observed: r.quarters_observed.clone(),
            flux_type: r.flux_type.code(),
            pipeline_task_id: r.pipeline_task_id.0,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = dv_limb_darkening_model)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LimbDarkeningModelRow {
    pub id: i64,
    pub kepler_id: i32,
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub target_table_id: i32,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub model_name: String,
    pub coefficient1: f32,
    pub coefficient2: f32,
    pub coefficient3: f32,
    pub coefficient4: f32,
    pub flux_type: i16,
    pub pipeline_task_id: i64,
}

impl LimbDarkeningModelRow {
    pub fn into_domain(self) -> RepositoryResult<DvLimbDarkeningModel> {
        Ok(DvLimbDarkeningModel {
            id: Some(DvLimbDarkeningModelId(self.id)),
            kepler_id: self.kepler_id,
            start_cadence: self.start_cadence,
            end_cadence: self.end_cadence,
            target_table_id: self.target_table_id,
            ccd_module: self.ccd_module,
            ccd_output: self.ccd_output,
            model_name: self.model_name,
            coefficients: [
                self.coefficient1,
                self.coefficient2,
                self.coefficient3,
                self.coefficient4,
            ],
            flux_type: decode(FluxType::from_code(self.flux_type))?,
            pipeline_task_id: PipelineTaskId(self.pipeline_task_id),
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = dv_limb_darkening_model)]
pub struct NewLimbDarkeningModelRow {
    pub kepler_id: i32,
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub target_table_id: i32,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub model_name: String,
    pub coefficient1: f32,
    pub coefficient2: f32,
    pub coefficient3: f32,
    pub coefficient4: f32,
    pub flux_type: i16,
    pub pipeline_task_id: i64,
}

impl From<&DvLimbDarkeningModel> for NewLimbDarkeningModelRow {
    fn from(m: &DvLimbDarkeningModel) -> Self {
        let [coefficient1, coefficient2, coefficient3, coefficient4] = m.coefficients;
        Self {
            kepler_id: m.kepler_id,
            start_cadence: m.start_cadence,
            end_cadence: m.end_cadence,
            target_table_id: m.target_table_id,
            ccd_module: m.ccd_module,
            ccd_output: m.ccd_output,
            model_name: m.model_name.clone(),
            coefficient1,
            coefficient2,
            coefficient3,
            coefficient4,
            flux_type: m.flux_type.code(),
            pipeline_task_id: m.pipeline_task_id.0,
        }
    }
}

// ==================== Flat fields ====================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = fc_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HistoryRow {
    pub id: i64,
    pub ingest_time: DateTime<Utc>,
    pub model_type: i16,
    pub description: String,
    pub version: i32,
}

impl HistoryRow {
    pub fn into_domain(self) -> RepositoryResult<History> {
        Ok(History {
            id: Some(HistoryId(self.id)),
            ingest_time: self.ingest_time,
            model_type: decode(HistoryModelName::from_code(self.model_type))?,
            description: self.description,
            version: self.version,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = fc_history)]
pub struct NewHistoryRow {
    pub ingest_time: DateTime<Utc>,
    pub model_type: i16,
    pub description: String,
    pub version: i32,
}

impl From<&History> for NewHistoryRow {
    fn from(h: &History) -> Self {
        Self {
            ingest_time: h.ingest_time,
            model_type: h.model_type.code(),
            description: h.description.clone(),
            version: h.version,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = fc_large_flat_field)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LargeFlatFieldRow {
    pub id: i64,
    pub history_id: i64,
    pub start_time: f64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub polynomial_order: i32,
    pub coefficients_json: Value,
}

impl LargeFlatFieldRow {
    pub fn into_domain(self) -> RepositoryResult<LargeFlatField> {
        Ok(LargeFlatField {
            id: Some(LargeFlatFieldId(self.id)),
            history_id: HistoryId(self.history_id),
            start_time: self.start_time,
            ccd_module: self.ccd_module,
            ccd_output: self.ccd_output,
            polynomial_order: self.polynomial_order,
            coefficients: from_json(self.coefficients_json)?,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = fc_large_flat_field)]
pub struct NewLargeFlatFieldRow {
    pub history_id: i64,
    pub start_time: f64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub polynomial_order: i32,
    pub coefficients_json: Value,
}

impl NewLargeFlatFieldRow {
    pub fn new(f: &LargeFlatField) -> RepositoryResult<Self> {
        Ok(Self {
            history_id: f.history_id.0,
            start_time: f.start_time,
            ccd_module: f.ccd_module,
            ccd_output: f.ccd_output,
            polynomial_order: f.polynomial_order,
            coefficients_json: to_json(&f.coefficients)?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = fc_small_flat_field_image)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SmallFlatFieldImageRow {
    pub id: i64,
    pub history_id: i64,
    pub mjd: f64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub image_json: Value,
    pub uncertainty_json: Value,
}

impl SmallFlatFieldImageRow {
    pub fn into_domain(self) -> RepositoryResult<SmallFlatFieldImage> {
        Ok(SmallFlatFieldImage {
            id: Some(SmallFlatFieldImageId(self.id)),
            history_id: HistoryId(self.history_id),
            mjd: self.mjd,
            ccd_module: self.ccd_module,
            ccd_output: self.ccd_output,
            image: from_json(self.image_json)?,
            uncertainty: from_json(self.uncertainty_json)?,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = fc_small_flat_field_image)]
pub struct NewSmallFlatFieldImageRow {
    pub history_id: i64,
    pub mjd: f64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub image_json: Value,
    pub uncertainty_json: Value,
}

impl NewSmallFlatFieldImageRow {
    pub fn new(i: &SmallFlatFieldImage) -> RepositoryResult<Self> {
        Ok(Self {
            history_id: i.history_id.0,
            mjd: i.mjd,
            ccd_module: i.ccd_module,
            ccd_output: i.ccd_output,
            image_json: to_json(&i.image)?,
            uncertainty_json: to_json(&i.uncertainty)?,
        })
    }
}
