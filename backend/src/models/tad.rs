//! Target and aperture definition entities.
//!
//! These are the persistent records of a TAD run: the uplinked target and
//! mask tables, the masks they carry, and the per-target apertures and target
//! definitions that assign masks to pixels on a module/output.

use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pipeline::PipelineTaskId;

/// Kepler id used for custom targets that have no catalog entry.
pub const INVALID_KEPLER_ID: i32 = -1;

crate::define_id_type!(i64, TargetTableId);
crate::define_id_type!(i64, MaskTableId);
crate::define_id_type!(i64, MaskId);
crate::define_id_type!(i64, ApertureId);
crate::define_id_type!(i64, ObservedTargetId);
crate::define_id_type!(i64, TargetDefinitionId);
crate::define_id_type!(i64, ImageId);
crate::define_id_type!(i64, TadReportId);

/// Error raised when a short name or database code matches no enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind} short name: {value:?}")]
pub struct UnknownShortName {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownShortName {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

crate::short_name_enum!(
    /// Kind of pixel data a target table selects.
    TargetType, "target type" {
        Background => ("bgp", 0),
        LongCadence => ("lct", 1),
        ShortCadence => ("sct", 2),
        ReferencePixel => ("rp", 3),
    }
);

crate::short_name_enum!(
    /// Kind of aperture a mask table defines.
    MaskType, "mask type" {
        Target => ("tad", 0),
        Background => ("bad", 1),
    }
);

crate::short_name_enum!(
    /// Lifecycle of an exported table. Linear: unlocked, locked, uplinked, revised.
    State, "state" {
        Unlocked => ("unlocked", 0),
        Locked => ("locked", 1),
        Uplinked => ("uplinked", 2),
        Revised => ("revised", 3),
    }
);

/// Relative pixel offset from a reference row and column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Offset {
    pub row: i32,
    pub column: i32,
}

impl Offset {
    pub fn new(row: i32, column: i32) -> Self {
        Self { row, column }
    }
}

/// Summary of a TAD run attached to its target table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TadReport {
    pub id: Option<TadReportId>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// An uplinked (or to-be-uplinked) target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTable {
    pub id: Option<TargetTableId>,
    pub target_type: TargetType,
    pub external_id: i32,
    pub state: State,
    pub planned_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub observing_season: i32,
    pub mask_table_id: Option<MaskTableId>,
    pub tad_report: Option<TadReport>,
}

impl TargetTable {
    pub fn new(target_type: TargetType) -> Self {
        Self {
            id: None,
            target_type,
            external_id: 0,
            state: State::Unlocked,
            planned_start_time: None,
            planned_end_time: None,
            observing_season: 0,
            mask_table_id: None,
            tad_report: None,
        }
    }

    pub fn with_external_id(mut self, external_id: i32) -> Self {
        self.external_id = external_id;
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn with_observing_season(mut self, observing_season: i32) -> Self {
        self.observing_season = observing_season;
        self
    }

    pub fn with_planned_times(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.planned_start_time = Some(start);
        self.planned_end_time = Some(end);
        self
    }

    pub fn with_mask_table(mut self, mask_table_id: MaskTableId) -> Self {
        self.mask_table_id = Some(mask_table_id);
        self
    }

    /// Short human-readable label, e.g. `lct:12 (uplinked)`.
    pub fn label(&self) -> String {
        format!(
            "{}:{} ({})",
            self.target_type.short_name(),
            self.external_id,
            self.state
        )
    }
}

/// A table of masks uplinked to the spacecraft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskTable {
    pub id: Option<MaskTableId>,
    pub mask_type: MaskType,
    pub external_id: i32,
    pub state: State,
}

impl MaskTable {
    pub fn new(mask_type: MaskType) -> Self {
        Self {
            id: None,
            mask_type,
            external_id: 0,
            state: State::Unlocked,
        }
    }

    pub fn with_external_id(mut self, external_id: i32) -> Self {
        self.external_id = external_id;
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }
}

/// A reusable pixel pattern shared by target definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    pub id: Option<MaskId>,
    pub mask_table_id: MaskTableId,
    pub index_in_table: i32,
    pub offsets: Vec<Offset>,
    pub used: bool,
    pub supermask: bool,
}

impl Mask {
    pub fn new(mask_table_id: MaskTableId, offsets: Vec<Offset>) -> Self {
        Self {
            id: None,
            mask_table_id,
            index_in_table: 0,
            offsets,
            used: false,
            supermask: false,
        }
    }
}

/// Set of pixels read out for a target, relative to a reference pixel.
///
/// Offsets are treated as a multiset: two apertures with the same offsets in
/// a different order are equal and hash the same. The id does not take part
/// in equality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Aperture {
    pub id: Option<ApertureId>,
    pub user_defined: bool,
    pub reference_row: i32,
    pub reference_column: i32,
    pub offsets: Vec<Offset>,
}

impl Aperture {
    pub fn new(
        user_defined: bool,
        reference_row: i32,
        reference_column: i32,
        offsets: Vec<Offset>,
    ) -> Self {
        Self {
            id: None,
            user_defined,
            reference_row,
            reference_column,
            offsets,
        }
    }

    /// Offsets as a set; repeats and order do not matter.
    fn offset_set(&self) -> BTreeSet<Offset> {
        self.offsets.iter().copied().collect()
    }

    /// Absolute (row, column) of every pixel in the aperture.
    pub fn pixels(&self) -> BTreeSet<(i32, i32)> {
        self.offsets
            .iter()
            .map(|o| (self.reference_row + o.row, self.reference_column + o.column))
            .collect()
    }

    pub fn pixel_count(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Moves the reference pixel; offsets are unchanged.
    pub fn shift(&mut self, rows: i32, columns: i32) {
        self.reference_row += rows;
        self.reference_column += columns;
    }
}

impl PartialEq for Aperture {
    fn eq(&self, other: &Self) -> bool {
        self.user_defined == other.user_defined
            && self.reference_row == other.reference_row
            && self.reference_column == other.reference_column
            && self.offset_set() == other.offset_set()
    }
}

impl Eq for Aperture {}

impl Hash for Aperture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_defined.hash(state);
        self.reference_row.hash(state);
        self.reference_column.hash(state);
        self.offset_set().hash(state);
    }
}

/// Assignment of a mask to a target at a module/output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDefinition {
    pub id: Option<TargetDefinitionId>,
    pub target_table_id: Option<TargetTableId>,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub kepler_id: i32,
    pub index_in_module_output: i32,
    pub reference_row: i32,
    pub reference_column: i32,
    pub excess_pixels: i32,
    pub status: i32,
    pub mask: Option<Mask>,
}

impl Hash for Mask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.mask_table_id.hash(state);
        self.index_in_table.hash(state);
    }
}

impl TargetDefinition {
    pub fn new(ccd_module: i32, ccd_output: i32, kepler_id: i32) -> Self {
        Self {
            id: None,
            target_table_id: None,
            ccd_module,
            ccd_output,
            kepler_id,
            index_in_module_output: 0,
            reference_row: 0,
            reference_column: 0,
            excess_pixels: 0,
            status: 0,
            mask: None,
        }
    }

    /// Absolute (row, column) of every pixel the mask covers for this definition.
    pub fn mask_pixels(&self) -> BTreeSet<(i32, i32)> {
        self.mask
            .iter()
            .flat_map(|m| m.offsets.iter())
            .map(|o| (self.reference_row + o.row, self.reference_column + o.column))
            .collect()
    }
}

/// One row per (target table, kepler id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedTarget {
    pub id: Option<ObservedTargetId>,
    pub target_table_id: Option<TargetTableId>,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub kepler_id: i32,
    pub aperture: Option<Aperture>,
    pub target_definitions: Vec<TargetDefinition>,
    pub labels: BTreeSet<String>,
    pub crowding_metric: f64,
    pub sky_crowding_metric: f64,
    pub flux_fraction_in_aperture: f64,
    pub signal_to_noise_ratio: f64,
    pub magnitude: f32,
    pub ra: f64,
    pub dec: f64,
    pub saturated_row_count: i32,
    pub rejected: bool,
    pub pipeline_task_id: Option<PipelineTaskId>,
}

impl ObservedTarget {
    pub fn new(
        target_table_id: Option<TargetTableId>,
        ccd_module: i32,
        ccd_output: i32,
        kepler_id: i32,
    ) -> Self {
        Self {
            id: None,
            target_table_id,
            ccd_module,
            ccd_output,
            kepler_id,
            aperture: None,
            target_definitions: Vec::new(),
            labels: BTreeSet::new(),
            crowding_metric: 0.0,
            sky_crowding_metric: 0.0,
            flux_fraction_in_aperture: 0.0,
            signal_to_noise_ratio: 0.0,
            magnitude: 0.0,
            ra: 0.0,
            dec: 0.0,
            saturated_row_count: 0,
            rejected: false,
            pipeline_task_id: None,
        }
    }

    pub fn add_label(&mut self, label: impl Into<String>) {
        self.labels.insert(label.into());
    }

    pub fn module_output(&self) -> (i32, i32) {
        (self.ccd_module, self.ccd_output)
    }
}

/// Per module/output image produced for a target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: Option<ImageId>,
    pub target_table_id: Option<TargetTableId>,
    pub ccd_module: i32,
    pub ccd_output: i32,
    pub pipeline_task_id: Option<PipelineTaskId>,
    pub module_output_image: Vec<Vec<f64>>,
    pub min_row: i32,
    pub max_row: i32,
    pub min_col: i32,
    pub max_col: i32,
}

impl Image {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target_table_id: TargetTableId,
        ccd_module: i32,
        ccd_output: i32,
        pipeline_task_id: Option<PipelineTaskId>,
        module_output_image: Vec<Vec<f64>>,
        min_row: i32,
        max_row: i32,
        min_col: i32,
        max_col: i32,
    ) -> Self {
        Self {
            id: None,
            target_table_id: Some(target_table_id),
            ccd_module,
            ccd_output,
            pipeline_task_id,
            module_output_image,
            min_row,
            max_row,
            min_col,
            max_col,
        }
    }
}

/// Mask pixel accounting for one target definition against an aperture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDefinitionAndPixelCounts {
    pub target_definition: TargetDefinition,
    pub mask_pixel_count: usize,
    pub in_optimal_aperture_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(aperture: &Aperture) -> u64 {
        let mut hasher = DefaultHasher::new();
        aperture.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_short_names_round_trip() {
        for t in TargetType::ALL {
            assert_eq!(TargetType::value_of_short_name(t.short_name()), Ok(*t));
            assert_eq!(TargetType::from_code(t.code()), Ok(*t));
        }
        for m in MaskType::ALL {
            assert_eq!(MaskType::value_of_short_name(m.short_name()), Ok(*m));
        }
        for s in State::ALL {
            assert_eq!(s.to_string().parse::<State>(), Ok(*s));
        }
    }

    #[test]
    fn test_unknown_short_name_is_rejected() {
        let err = TargetType::value_of_short_name("LCT").unwrap_err();
        assert_eq!(err.kind, "target type");
        assert!(MaskType::value_of_short_name("").is_err());
        assert!(MaskType::from_code(7).is_err());
    }

    #[test]
    fn test_aperture_pixels_are_absolute() {
        let aperture = Aperture::new(false, 100, 200, vec![Offset::new(1, -1), Offset::new(0, 0)]);
        let pixels: Vec<_> = aperture.pixels().into_iter().collect();
        assert_eq!(pixels, vec![(100, 200), (101, 199)]);
    }

    #[test]
    fn test_aperture_equality_ignores_id() {
        let mut a = Aperture::new(true, 1, 2, vec![Offset::new(3, 4)]);
        let b = a.clone();
        a.id = Some(ApertureId(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_aperture_with_repeated_offsets_is_equal() {
        let a = Aperture::new(false, 0, 0, vec![Offset::new(1, 1), Offset::new(1, 1)]);
        let b = Aperture::new(false, 0, 0, vec![Offset::new(1, 1)]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    proptest! {
        #[test]
        fn prop_aperture_equality_is_order_independent(
            offsets in prop::collection::vec((-20i32..20, -20i32..20), 0..16),
            seed in any::<u64>(),
            row in -5i32..5,
            col in -5i32..5,
        ) {
            let offsets: Vec<Offset> = offsets.into_iter().map(|(r, c)| Offset::new(r, c)).collect();
            let mut shuffled = offsets.clone();
            if !shuffled.is_empty() {
                let k = (seed as usize) % shuffled.len();
                shuffled.rotate_left(k);
                shuffled.reverse();
            }
            let a = Aperture::new(false, row, col, offsets);
            let b = Aperture::new(false, row, col, shuffled);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(hash_of(&a), hash_of(&b));
        }

        #[test]
        fn prop_unknown_short_names_fail(name in "[A-Z]{1,6}") {
            prop_assert!(TargetType::value_of_short_name(&name).is_err());
            prop_assert!(MaskType::value_of_short_name(&name).is_err());
        }
    }
}
