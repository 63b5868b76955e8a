//! Focal plane characterization (FC) flat field records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

crate::define_id_type!(i64, HistoryId);
crate::define_id_type!(i64, LargeFlatFieldId);
crate::define_id_type!(i64, SmallFlatFieldImageId);

crate::short_name_enum!(
    /// Model families versioned by an FC history.
    HistoryModelName, "history model name" {
        LargeFlatField => ("LARGEFLATFIELD", 0),
        SmallFlatField => ("SMALLFLATFIELD", 1),
    }
);

/// A versioned ingest of one FC model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: Option<HistoryId>,
    pub ingest_time: DateTime<Utc>,
    pub model_type: HistoryModelName,
    pub description: String,
    pub version: i32,
}

impl History {
    pub fn new(
        ingest_time: DateTime<Utc>,
        model_type: HistoryModelName,
        description: impl Into<String>,
        version: i32,
    ) -> Self {
        Self {
            id: None,
            ingest_time,
            model_type,
            description: description.into(),
            version,
        }
    }
}

/// Polynomial large-scale flat field valid from `start_time` (MJD) onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargeFlatField {
    pub id: Option<LargeFlatFieldId>,
    pub history_id: HistoryId,
    pub start_time: f64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub polynomial_order: i32,
    pub coefficients: Vec<f64>,
}

impl LargeFlatField {
    pub fn new(
        history_id: HistoryId,
        start_time: f64,
        ccd_module: i32,
        ccd_output: i32,
        coefficients: Vec<f64>,
    ) -> Self {
        Self {
            id: None,
            history_id,
            start_time,
            ccd_module,
            ccd_output,
            polynomial_order: coefficients.len().saturating_sub(1) as i32,
            coefficients,
        }
    }
}

/// Pixel-level flat field image measured at `mjd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmallFlatFieldImage {
    pub id: Option<SmallFlatFieldImageId>,
    pub history_id: HistoryId,
    pub mjd: f64,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub image: Vec<Vec<f32>>,
    pub uncertainty: Vec<Vec<f32>>,
}

impl SmallFlatFieldImage {
    pub fn new(
        history_id: HistoryId,
        mjd: f64,
        ccd_module: i32,
        ccd_output: i32,
        image: Vec<Vec<f32>>,
        uncertainty: Vec<Vec<f32>>,
    ) -> Self {
        Self {
            id: None,
            history_id,
            mjd,
            ccd_module,
            ccd_output,
            image,
            uncertainty,
        }
    }
}
