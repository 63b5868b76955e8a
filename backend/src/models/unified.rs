use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::pipeline::PipelineTaskId;
use super::supplemental::TargetView;
use super::tad::{Aperture, ObservedTarget, TargetDefinition, TargetTableId};

/// Merged, read-only view of one target across an original TAD run and its
/// supplemental run.
///
/// Target definitions always describe what was uplinked (the original run).
/// Aperture and photometry describe the supplemental run when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedObservedTarget {
    target_table_id: Option<TargetTableId>,
    kepler_id: i32,
    ccd_module: i32,
    ccd_output: i32,
    aperture: Option<Aperture>,
    target_definitions: Vec<TargetDefinition>,
    labels: BTreeSet<String>,
    crowding_metric: f64,
    sky_crowding_metric: f64,
    flux_fraction_in_aperture: f64,
    signal_to_noise_ratio: f64,
    magnitude: f32,
    ra: f64,
    dec: f64,
    saturated_row_count: i32,
    pipeline_task_id: Option<PipelineTaskId>,
    clipped_pixel_count: usize,
    was_dropped_by_supplemental_tad: bool,
}

impl UnifiedObservedTarget {
    /// View of a target that has no supplemental counterpart to consult.
    pub fn from_original(original: &ObservedTarget, clipped_pixel_count: usize) -> Self {
        Self::build(original, original, original.labels.clone(), clipped_pixel_count, false)
    }

    /// Aperture and metrics from `supplemental`, definitions from `original`.
    ///
    /// Labels come from the supplemental target unless it carries none.
    pub fn from_supplemental(
        original: &ObservedTarget,
        supplemental: &ObservedTarget,
        clipped_pixel_count: usize,
    ) -> Self {
        let labels = if supplemental.labels.is_empty() {
            original.labels.clone()
        } else {
            supplemental.labels.clone()
        };
        Self::build(supplemental, original, labels, clipped_pixel_count, false)
    }

    /// A target the supplemental run no longer observes: empty aperture,
    /// original metrics.
    pub fn dropped(original: &ObservedTarget, clipped_pixel_count: usize) -> Self {
        let mut view = Self::build(original, original, original.labels.clone(), clipped_pixel_count, true);
        view.aperture = Some(Aperture::default());
        view
    }

    fn build(
        source: &ObservedTarget,
        original: &ObservedTarget,
        labels: BTreeSet<String>,
        clipped_pixel_count: usize,
        was_dropped_by_supplemental_tad: bool,
    ) -> Self {
        Self {
            target_table_id: original.target_table_id,
            kepler_id: source.kepler_id,
            ccd_module: source.ccd_module,
            ccd_output: source.ccd_output,
            aperture: source.aperture.clone(),
            target_definitions: original.target_definitions.clone(),
            labels,
            crowding_metric: source.crowding_metric,
            sky_crowding_metric: source.sky_crowding_metric,
            flux_fraction_in_aperture: source.flux_fraction_in_aperture,
            signal_to_noise_ratio: source.signal_to_noise_ratio,
            magnitude: source.magnitude,
            ra: source.ra,
            dec: source.dec,
            saturated_row_count: source.saturated_row_count,
            pipeline_task_id: source.pipeline_task_id,
            clipped_pixel_count,
            was_dropped_by_supplemental_tad,
        }
    }

    /// Target table of the original run.
    pub fn target_table_id(&self) -> Option<TargetTableId> {
        self.target_table_id
    }

    pub fn clipped_pixel_count(&self) -> usize {
        self.clipped_pixel_count
    }

    pub fn was_dropped_by_supplemental_tad(&self) -> bool {
        self.was_dropped_by_supplemental_tad
    }
}

impl TargetView for UnifiedObservedTarget {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tad::Offset;

    fn original() -> ObservedTarget {
        let mut target = ObservedTarget::new(Some(TargetTableId(1)), 2, 1, 100);
        target.aperture = Some(Aperture::new(false, 10, 10, vec![Offset::new(0, 0)]));
        target.crowding_metric = 0.8;
        target.add_label("ORIG");
        target.target_definitions.push(TargetDefinition::new(2, 1, 100));
        target.pipeline_task_id = Some(PipelineTaskId(1));
        target
    }

    #[test]
    fn test_supplemental_view_keeps_original_definitions() {
        let orig = original();
        let mut supp = ObservedTarget::new(Some(TargetTableId(2)), 2, 1, 100);
        supp.aperture = Some(Aperture::new(false, 11, 12, vec![Offset::new(1, 1)]));
        supp.crowding_metric = 0.4;

        let view = UnifiedObservedTarget::from_supplemental(&orig, &supp, 0);
        assert_eq!(view.target_table_id(), Some(TargetTableId(1)));
        assert_eq!(view.aperture(), supp.aperture.as_ref());
        assert_eq!(view.crowding_metric(), 0.4);
        assert_eq!(view.target_definitions().len(), 1);
        assert!(view.labels().contains("ORIG"));
        assert!(!view.was_dropped_by_supplemental_tad());
    }

    #[test]
    fn test_dropped_view_has_empty_aperture() {
        let view = UnifiedObservedTarget::dropped(&original(), 0);
        assert!(view.was_dropped_by_supplemental_tad());
        assert_eq!(view.aperture().map(Aperture::pixel_count), Some(0));
        assert_eq!(view.crowding_metric(), 0.8);
        assert_eq!(view.pipeline_task_id(), Some(PipelineTaskId(1)));
    }
}
