//! Data validation (DV) result records.
//!
//! DV writes one set of results per target per pipeline task. Consumers
//! usually want the newest set that a finished pipeline instance produced,
//! which is what the provenance fields here support.

use serde::{Deserialize, Serialize};

use super::pipeline::{PipelineInstanceId, PipelineTaskId};

crate::define_id_type!(i64, DvPlanetResultsId);
crate::define_id_type!(i64, DvTargetResultsId);
crate::define_id_type!(i64, DvLimbDarkeningModelId);

crate::short_name_enum!(
    /// Light curve flavour the results were derived from.
    FluxType, "flux type" {
        Sap => ("SAP", 0),
        Oap => ("OAP", 1),
        Dia => ("DIA", 2),
    }
);

/// Common accessors for DV result families.
pub trait DvResult {
    fn kepler_id(&self) -> i32;
    fn pipeline_task_id(&self) -> PipelineTaskId;
    /// Secondary ordering within one kepler id.
    fn ordinal(&self) -> i64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvPlanetResults {
    pub id: Option<DvPlanetResultsId>,
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub kepler_id: i32,
    pub planet_number: i32,
    pub kepler_name: String,
    pub koi_id: String,
    pub koi_correlation: f32,
    pub detrend_filter_length: i32,
    pub flux_type: FluxType,
    pub pipeline_task_id: PipelineTaskId,
}

impl DvPlanetResults {
    pub fn new(
        kepler_id: i32,
        planet_number: i32,
        start_cadence: i32,
        end_cadence: i32,
        pipeline_task_id: PipelineTaskId,
    ) -> Self {
        Self {
            id: None,
            start_cadence,
            end_cadence,
            kepler_id,
            planet_number,
            kepler_name: String::new(),
            koi_id: String::new(),
            koi_correlation: 0.0,
            detrend_filter_length: 0,
            flux_type: FluxType::Sap,
            pipeline_task_id,
        }
    }
}

impl DvResult for DvPlanetResults {
    fn kepler_id(&self) -> i32 {
        self.kepler_id
    }
    fn pipeline_task_id(&self) -> PipelineTaskId {
        self.pipeline_task_id
    }
    fn ordinal(&self) -> i64 {
        i64::from(self.planet_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvTargetResults {
    pub id: Option<DvTargetResultsId>,
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub kepler_id: i32,
    pub koi_id: String,
    pub kepler_name: String,
    pub matched_koi_ids: Vec<String>,
    pub unmatched_koi_ids: Vec<String>,
    pub planet_candidate_count: i32,
    pub quarters_observed: String,
    pub flux_type: FluxType,
    pub pipeline_task_id: PipelineTaskId,
}

impl DvTargetResults {
    pub fn new(
        kepler_id: i32,
        start_cadence: i32,
        end_cadence: i32,
        pipeline_task_id: PipelineTaskId,
    ) -> Self {
        Self {
            id: None,
            start_cadence,
            end_cadence,
            kepler_id,
            koi_id: String::new(),
            kepler_name: String::new(),
            matched_koi_ids: Vec::new(),
            unmatched_koi_ids: Vec::new(),
            planet_candidate_count: 0,
            quarters_observed: String::new(),
            flux_type: FluxType::Sap,
            pipeline_task_id,
        }
    }
}

impl DvResult for DvTargetResults {
    fn kepler_id(&self) -> i32 {
        self.kepler_id
    }
    fn pipeline_task_id(&self) -> PipelineTaskId {
        self.pipeline_task_id
    }
    fn ordinal(&self) -> i64 {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvLimbDarkeningModel {
    pub id: Option<DvLimbDarkeningModelId>,
    pub kepler_id: i32,
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub target_table_id: i32,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub model_name: String,
    pub coefficients: [f32; 4],
    pub flux_type: FluxType,
    pub pipeline_task_id: PipelineTaskId,
}

impl DvLimbDarkeningModel {
    pub fn new(kepler_id: i32, target_table_id: i32, pipeline_task_id: PipelineTaskId) -> Self {
        Self {
            id: None,
            kepler_id,
            start_cadence: 0,
            end_cadence: 0,
            target_table_id,
            ccd_module: 0,
            ccd_output: 0,
            model_name: String::new(),
            coefficients: [0.0; 4],
            flux_type: FluxType::Sap,
            pipeline_task_id,
        }
    }
}

impl DvResult for DvLimbDarkeningModel {
    fn kepler_id(&self) -> i32 {
        self.kepler_id
    }
    fn pipeline_task_id(&self) -> PipelineTaskId {
        self.pipeline_task_id
    }
    fn ordinal(&self) -> i64 {
        i64::from(self.target_table_id)
    }
}

/// A DV result together with the pipeline bookkeeping that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct WithProvenance<T> {
    pub result: T,
    pub pipeline_instance_id: PipelineInstanceId,
    pub instance_state: super::pipeline::PipelineInstanceState,
    pub task_state: super::pipeline::PipelineTaskState,
}

/// The planets DV found for one kepler id in one pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvPlanetSummary {
    pub start_cadence: i32,
    pub end_cadence: i32,
    pub planet_numbers: Vec<i32>,
    pub kepler_id: i32,
    pub pipeline_instance_id: PipelineInstanceId,
    pub pipeline_task_id: PipelineTaskId,
}
