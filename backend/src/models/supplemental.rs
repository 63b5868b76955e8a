//! Supplemental TAD overrides.
//!
//! A supplemental TAD run re-derives apertures and photometric metrics for an
//! already uplinked target table. The original record keeps its identity and
//! target definitions; the supplemental record, when attached and accepted,
//! supplies everything else. [`Supplemented`] makes that indirection explicit
//! instead of hiding a back-pointer inside the entity.

use std::collections::BTreeSet;

use super::pipeline::PipelineTaskId;
use super::tad::{Aperture, Image, ObservedTarget, ObservedTargetId, TargetDefinition, TargetTableId};

/// Whether a record is served by itself or by an attached supplemental record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Override<T> {
    #[default]
    Original,
    OverriddenBy(Box<T>),
}

impl<T> Override<T> {
    pub fn as_ref(&self) -> Option<&T> {
        match self {
            Override::Original => None,
            Override::OverriddenBy(value) => Some(value),
        }
    }

    pub fn is_overridden(&self) -> bool {
        matches!(self, Override::OverriddenBy(_))
    }
}

/// Raised when a supplemental record does not describe the same thing as the
/// original it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupplementalMismatch {
    #[error("supplemental kepler id {supplemental} does not match original kepler id {original}")]
    KeplerId { original: i32, supplemental: i32 },

    #[error(
        "supplemental module/output {}/{} does not match original module/output {}/{}",
        supplemental.0, supplemental.1, original.0, original.1
    )]
    ModuleOutput {
        original: (i32, i32),
        supplemental: (i32, i32),
    },
}

/// Records that accept a supplemental override.
pub trait Overridable: Sized {
    /// Fails when `supplemental` cannot stand in for `self`.
    fn check_supplemental(&self, supplemental: &Self) -> Result<(), SupplementalMismatch>;

    /// Whether an attached supplemental record is served in place of the original.
    fn overrides(supplemental: &Self) -> bool {
        let _ = supplemental;
        true
    }
}

impl Overridable for ObservedTarget {
    fn check_supplemental(&self, supplemental: &Self) -> Result<(), SupplementalMismatch> {
        if self.kepler_id != supplemental.kepler_id {
            return Err(SupplementalMismatch::KeplerId {
                original: self.kepler_id,
                supplemental: supplemental.kepler_id,
            });
        }
        Ok(())
    }

    fn overrides(supplemental: &Self) -> bool {
        !supplemental.rejected
    }
}

impl Overridable for Image {
    fn check_supplemental(&self, supplemental: &Self) -> Result<(), SupplementalMismatch> {
        let original = (self.ccd_module, self.ccd_output);
        let other = (supplemental.ccd_module, supplemental.ccd_output);
        if original != other {
            return Err(SupplementalMismatch::ModuleOutput {
                original,
                supplemental: other,
            });
        }
        Ok(())
    }
}

/// An original record plus an optional supplemental override.
#[derive(Debug, Clone, PartialEq)]
pub struct Supplemented<T> {
    original: T,
    supplemental: Override<T>,
}

impl<T: Overridable> Supplemented<T> {
    pub fn new(original: T) -> Self {
        Self {
            original,
            supplemental: Override::Original,
        }
    }

    pub fn original(&self) -> &T {
        &self.original
    }

    pub fn supplemental(&self) -> Option<&T> {
        self.supplemental.as_ref()
    }

    pub fn override_state(&self) -> &Override<T> {
        &self.supplemental
    }

    pub fn set_supplemental(&mut self, supplemental: T) -> Result<(), SupplementalMismatch> {
        self.original.check_supplemental(&supplemental)?;
        self.supplemental = Override::OverriddenBy(Box::new(supplemental));
        Ok(())
    }

    pub fn clear_supplemental(&mut self) {
        self.supplemental = Override::Original;
    }

    /// The record the delegating getters read from.
    pub fn active(&self) -> &T {
        match &self.supplemental {
            Override::OverriddenBy(supp) if T::overrides(supp) => supp,
            _ => &self.original,
        }
    }

    pub fn into_original(self) -> T {
        self.original
    }

    pub fn into_parts(self) -> (T, Option<T>) {
        let supplemental = match self.supplemental {
            Override::Original => None,
            Override::OverriddenBy(supp) => Some(*supp),
        };
        (self.original, supplemental)
    }
}

pub type SupplementedTarget = Supplemented<ObservedTarget>;
pub type SupplementedImage = Supplemented<Image>;

/// Read-only view of an observed target.
pub trait TargetView {
    fn kepler_id(&self) -> i32;
    fn ccd_module(&self) -> i32;
    fn ccd_output(&self) -> i32;
    fn aperture(&self) -> Option<&Aperture>;
    fn target_definitions(&self) -> &[TargetDefinition];
    fn labels(&self) -> &BTreeSet<String>;
    fn crowding_metric(&self) -> f64;
    fn sky_crowding_metric(&self) -> f64;
    fn flux_fraction_in_aperture(&self) -> f64;
    fn signal_to_noise_ratio(&self) -> f64;
    fn magnitude(&self) -> f32;
    fn ra(&self) -> f64;
    fn dec(&self) -> f64;
    fn saturated_row_count(&self) -> i32;
    fn pipeline_task_id(&self) -> Option<PipelineTaskId>;
}

impl TargetView for ObservedTarget {
    fn kepler_id(&self) -> i32 {
        self.kepler_id
    }
    fn ccd_module(&self) -> i32 {
        self.ccd_module
    }
    fn ccd_output(&self) -> i32 {
        self.ccd_output
    }
    fn aperture(&self) -> Option<&Aperture> {
        self.aperture.as_ref()
    }
    fn target_definitions(&self) -> &[TargetDefinition] {
        &self.target_definitions
    }
    fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }
    fn crowding_metric(&self) -> f64 {
        self.crowding_metric
    }
    fn sky_crowding_metric(&self) -> f64 {
        self.sky_crowding_metric
    }
    fn flux_fraction_in_aperture(&self) -> f64 {
        self.flux_fraction_in_aperture
    }
    fn signal_to_noise_ratio(&self) -> f64 {
        self.signal_to_noise_ratio
    }
    fn magnitude(&self) -> f32 {
        self.magnitude
    }
    fn ra(&self) -> f64 {
        self.ra
    }
    fn dec(&self) -> f64 {
        self.dec
    }
    fn saturated_row_count(&self) -> i32 {
        self.saturated_row_count
    }
    fn pipeline_task_id(&self) -> Option<PipelineTaskId> {
        self.pipeline_task_id
    }
}

impl SupplementedTarget {
    pub fn id(&self) -> Option<ObservedTargetId> {
        self.original.id
    }

    pub fn target_table_id(&self) -> Option<TargetTableId> {
        self.original.target_table_id
    }

    pub fn rejected(&self) -> bool {
        self.original.rejected
    }
}

// Identity and target definitions always come from the original record.
impl TargetView for SupplementedTarget {
    fn kepler_id(&self) -> i32 {
        self.original.kepler_id
    }
    fn ccd_module(&self) -> i32 {
        self.original.ccd_module
    }
    fn ccd_output(&self) -> i32 {
        self.original.ccd_output
    }
    fn aperture(&self) -> Option<&Aperture> {
        self.active().aperture.as_ref()
    }
    fn target_definitions(&self) -> &[TargetDefinition] {
        &self.original.target_definitions
    }
    fn labels(&self) -> &BTreeSet<String> {
        &self.active().labels
    }
    fn crowding_metric(&self) -> f64 {
        self.active().crowding_metric
    }
    fn sky_crowding_metric(&self) -> f64 {
        self.active().sky_crowding_metric
    }
    fn flux_fraction_in_aperture(&self) -> f64 {
        self.active().flux_fraction_in_aperture
    }
    fn signal_to_noise_ratio(&self) -> f64 {
        self.active().signal_to_noise_ratio
    }
    fn magnitude(&self) -> f32 {
        self.active().magnitude
    }
    fn ra(&self) -> f64 {
        self.active().ra
    }
    fn dec(&self) -> f64 {
        self.active().dec
    }
    fn saturated_row_count(&self) -> i32 {
        self.active().saturated_row_count
    }
    fn pipeline_task_id(&self) -> Option<PipelineTaskId> {
        self.active().pipeline_task_id
    }
}

impl SupplementedImage {
    pub fn ccd_module(&self) -> i32 {
        self.original.ccd_module
    }

    pub fn ccd_output(&self) -> i32 {
        self.original.ccd_output
    }

    pub fn target_table_id(&self) -> Option<TargetTableId> {
        self.original.target_table_id
    }

    pub fn module_output_image(&self) -> &[Vec<f64>] {
        &self.active().module_output_image
    }

    /// (min_row, max_row, min_col, max_col)
    pub fn bounds(&self) -> (i32, i32, i32, i32) {
        let image = self.active();
        (image.min_row, image.max_row, image.min_col, image.max_col)
    }

    pub fn pipeline_task_id(&self) -> Option<PipelineTaskId> {
        self.active().pipeline_task_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tad::{Offset, TargetTableId};

    fn target(kepler_id: i32, row: i32, crowding: f64) -> ObservedTarget {
        let mut target = ObservedTarget::new(Some(TargetTableId(1)), 7, 3, kepler_id);
        target.aperture = Some(Aperture::new(false, row, 10, vec![Offset::new(0, 0)]));
        target.crowding_metric = crowding;
        target.flux_fraction_in_aperture = crowding / 2.0;
        target.add_label("PLANETARY");
        target.pipeline_task_id = Some(PipelineTaskId(11));
        target
    }

    #[test]
    fn test_supplemental_getters_delegate() {
        let mut supplemented = Supplemented::new(target(42, 100, 0.9));
        let mut supp = target(42, 200, 0.5);
        supp.ccd_module = 8;
        supp.labels.clear();
        supp.add_label("ASTERO");
        supp.pipeline_task_id = Some(PipelineTaskId(12));
        supplemented.set_supplemental(supp).unwrap();

        assert_eq!(supplemented.aperture().map(|a| a.reference_row), Some(200));
        assert_eq!(supplemented.crowding_metric(), 0.5);
        assert_eq!(supplemented.flux_fraction_in_aperture(), 0.25);
        assert!(supplemented.labels().contains("ASTERO"));
        assert_eq!(supplemented.pipeline_task_id(), Some(PipelineTaskId(12)));
        // identity stays with the original
        assert_eq!(supplemented.ccd_module(), 7);
        assert_eq!(supplemented.kepler_id(), 42);
    }

    #[test]
    fn test_rejected_supplemental_falls_back_to_original() {
        let mut supplemented = Supplemented::new(target(42, 100, 0.9));
        let mut supp = target(42, 200, 0.5);
        supp.rejected = true;
        supplemented.set_supplemental(supp).unwrap();

        assert!(supplemented.override_state().is_overridden());
        assert_eq!(supplemented.aperture().map(|a| a.reference_row), Some(100));
        assert_eq!(supplemented.crowding_metric(), 0.9);
    }

    #[test]
    fn test_supplemental_kepler_id_must_match() {
        let mut supplemented = Supplemented::new(target(42, 100, 0.9));
        let err = supplemented.set_supplemental(target(43, 100, 0.9)).unwrap_err();
        assert_eq!(
            err,
            SupplementalMismatch::KeplerId {
                original: 42,
                supplemental: 43
            }
        );
        assert!(supplemented.supplemental().is_none());
    }

    #[test]
    fn test_supplemental_image_requires_same_module_output() {
        let image = Image::new(TargetTableId(1), 2, 1, None, vec![vec![1.0]], 0, 0, 0, 0);
        let mut other = image.clone();
        other.ccd_output = 2;
        let mut supplemented = Supplemented::new(image.clone());
        assert!(supplemented.set_supplemental(other).is_err());

        let mut replacement = image;
        replacement.module_output_image = vec![vec![2.0]];
        replacement.max_row = 5;
        supplemented.set_supplemental(replacement).unwrap();
        assert_eq!(supplemented.module_output_image(), &[vec![2.0]]);
        assert_eq!(supplemented.bounds(), (0, 5, 0, 0));
    }
}
