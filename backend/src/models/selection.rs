//! Target selection, pixel log and focal plane geometry records.
//!
//! These belong to neighbouring subsystems. They are modelled with just
//! enough structure for TAD queries to follow target list sets to their
//! tables, cadences to their uplinked tables, and sky groups to module/outputs.

use serde::{Deserialize, Serialize};

use super::tad::{State, TargetTableId, TargetType};

crate::define_id_type!(i64, TargetListSetId);
crate::define_id_type!(i64, TargetListId);
crate::define_id_type!(i64, PlannedTargetId);

/// CCD modules populated on the focal plane (the four corner slots are empty).
pub const FOCAL_PLANE_MODULES: [i32; 21] = [
    2, 3, 4, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 22, 23, 24,
];

/// Readout outputs per module.
pub const FOCAL_PLANE_OUTPUTS: [i32; 4] = [1, 2, 3, 4];

/// Every (module, output) on the focal plane, module-major.
pub fn module_outputs() -> impl Iterator<Item = (i32, i32)> {
    FOCAL_PLANE_MODULES
        .iter()
        .flat_map(|&m| FOCAL_PLANE_OUTPUTS.iter().map(move |&o| (m, o)))
}

crate::short_name_enum!(
    SourceType, "source type" {
        File => ("file", 0),
        Query => ("query", 1),
    }
);

crate::short_name_enum!(
    CadenceType, "cadence type" {
        Long => ("long", 0),
        Short => ("short", 1),
    }
);

impl CadenceType {
    /// Cadence whose pixel logs record tables of the given type.
    pub fn for_target_type(target_type: TargetType) -> Option<CadenceType> {
        match target_type {
            TargetType::LongCadence | TargetType::Background => Some(CadenceType::Long),
            TargetType::ShortCadence => Some(CadenceType::Short),
            TargetType::ReferencePixel => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetList {
    pub id: Option<TargetListId>,
    pub name: String,
    pub category: String,
    pub source: String,
    pub source_type: SourceType,
}

impl TargetList {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            category: category.into(),
            source: String::new(),
            source_type: SourceType::File,
        }
    }
}

/// Named bundle of target lists that one TAD run turns into target tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetListSet {
    pub id: Option<TargetListSetId>,
    pub name: String,
    pub state: State,
    pub target_table_id: Option<TargetTableId>,
    pub background_table_id: Option<TargetTableId>,
    pub supplemental_tls_id: Option<TargetListSetId>,
    pub target_lists: Vec<TargetList>,
}

impl TargetListSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            state: State::Unlocked,
            target_table_id: None,
            background_table_id: None,
            supplemental_tls_id: None,
            target_lists: Vec::new(),
        }
    }

    pub fn with_target_table(mut self, target_table_id: TargetTableId) -> Self {
        self.target_table_id = Some(target_table_id);
        self
    }

    pub fn with_target_list(mut self, target_list: TargetList) -> Self {
        self.target_lists.push(target_list);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTarget {
    pub id: Option<PlannedTargetId>,
    pub kepler_id: i32,
    pub target_list_id: TargetListId,
    pub sky_group_id: i32,
}

impl PlannedTarget {
    pub fn new(kepler_id: i32, target_list_id: TargetListId, sky_group_id: i32) -> Self {
        Self {
            id: None,
            kepler_id,
            target_list_id,
            sky_group_id,
        }
    }
}

/// Cadence bookkeeping: which table external ids were in effect for a cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelLog {
    pub cadence_number: i32,
    pub cadence_type: CadenceType,
    pub mjd_start_time: f64,
    pub mjd_end_time: f64,
    pub lc_target_table_id: i32,
    pub sc_target_table_id: i32,
    pub back_target_table_id: i32,
    pub target_aperture_table_id: i32,
    pub back_aperture_table_id: i32,
}

impl PixelLog {
    /// External id of the table of the given type recorded for this cadence.
    pub fn target_table_external_id(&self, target_type: TargetType) -> Option<i32> {
        match target_type {
            TargetType::LongCadence => Some(self.lc_target_table_id),
            TargetType::ShortCadence => Some(self.sc_target_table_id),
            TargetType::Background => Some(self.back_target_table_id),
            TargetType::ReferencePixel => None,
        }
    }
}

/// Sky group placement for one observing season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkyGroup {
    pub sky_group_id: i32,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub observing_season: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_focal_plane_has_84_module_outputs() {
        let all: Vec<_> = module_outputs().collect();
        assert_eq!(all.len(), 84);
        assert_eq!(all.first(), Some(&(2, 1)));
        assert_eq!(all.last(), Some(&(24, 4)));
        assert!(!all.iter().any(|(m, _)| [1, 5, 21, 25].contains(m)));
    }

    #[test]
    fn test_cadence_for_target_type() {
        assert_eq!(
            CadenceType::for_target_type(TargetType::Background),
            Some(CadenceType::Long)
        );
        assert_eq!(CadenceType::for_target_type(TargetType::ReferencePixel), None);
    }
}
