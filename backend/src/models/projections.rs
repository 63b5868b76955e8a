//! Flat projections assembled by `TargetCrud` queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tad::{ObservedTargetId, TargetTable, TargetTableId, TargetType};

/// One row of the Kepler target catalog (KTC) export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KtcInfo {
    pub kepler_id: i32,
    pub target_type: TargetType,
    pub planned_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub observed_target_id: ObservedTargetId,
    pub external_id: i32,
    pub target_table_id: TargetTableId,
}

/// The target table in effect over a contiguous run of cadences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTableLog {
    pub target_table: TargetTable,
    pub cadence_start: i32,
    pub cadence_end: i32,
}

/// Crowding metric history of one kepler id across a list of target tables.
///
/// Each array has one slot per target table, by position; `None` marks a
/// table in which the target was not observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCrowdingInfo {
    pub kepler_id: i32,
    pub crowding_metric: Vec<Option<f64>>,
    pub ccd_module: Vec<Option<i32>>,
    pub ccd_output: Vec<Option<i32>>,
}

impl TargetCrowdingInfo {
    pub fn new(kepler_id: i32, table_count: usize) -> Self {
        Self {
            kepler_id,
            crowding_metric: vec![None; table_count],
            ccd_module: vec![None; table_count],
            ccd_output: vec![None; table_count],
        }
    }

    pub fn set(&mut self, index: usize, crowding_metric: f64, ccd_module: i32, ccd_output: i32) {
        self.crowding_metric[index] = Some(crowding_metric);
        self.ccd_module[index] = Some(ccd_module);
        self.ccd_output[index] = Some(ccd_output);
    }

    /// `true` for every table position without data.
    pub fn gap_indicators(&self) -> Vec<bool> {
        self.crowding_metric.iter().map(Option::is_none).collect()
    }
}
