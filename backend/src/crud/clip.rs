//! Aperture clipping against uplinked target definitions.
//!
//! A pixel of an optimal aperture is *clipped* when no mask of the target's
//! definitions reads it out.

use std::collections::BTreeSet;

use crate::models::{Aperture, TargetDefinition, TargetDefinitionAndPixelCounts};

/// Result of checking one aperture against its target definitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClipReport {
    /// Aperture pixels not covered by any mask.
    pub clipped_pixels: BTreeSet<(i32, i32)>,
    pub definition_counts: Vec<TargetDefinitionAndPixelCounts>,
}

impl ClipReport {
    pub fn clipped_pixel_count(&self) -> usize {
        self.clipped_pixels.len()
    }

    pub fn is_clipped(&self) -> bool {
        !self.clipped_pixels.is_empty()
    }
}

/// Builds clip reports. Injected into the unified target view and the
/// target table comparator.
pub trait ClipReportFactory: Send + Sync {
    fn clip_report(&self, definitions: &[TargetDefinition], aperture: &Aperture) -> ClipReport;
}

/// Clips by plain mask coverage.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaskCoverageClipReportFactory;

impl ClipReportFactory for MaskCoverageClipReportFactory {
    fn clip_report(&self, definitions: &[TargetDefinition], aperture: &Aperture) -> ClipReport {
        let aperture_pixels = aperture.pixels();
        let mut covered = BTreeSet::new();
        let mut definition_counts = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let mask_pixels = definition.mask_pixels();
            let in_optimal_aperture_count = mask_pixels.intersection(&aperture_pixels).count();
            definition_counts.push(TargetDefinitionAndPixelCounts {
                target_definition: definition.clone(),
                mask_pixel_count: mask_pixels.len(),
                in_optimal_aperture_count,
            });
            covered.extend(mask_pixels);
        }

        ClipReport {
            clipped_pixels: aperture_pixels.difference(&covered).copied().collect(),
            definition_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mask, MaskTableId, Offset};

    fn definition(row: i32, column: i32, offsets: Vec<Offset>) -> TargetDefinition {
        let mut definition = TargetDefinition::new(2, 1, 100);
        definition.reference_row = row;
        definition.reference_column = column;
        definition.mask = Some(Mask::new(MaskTableId(1), offsets));
        definition
    }

    #[test]
    fn test_fully_covered_aperture_is_not_clipped() {
        let aperture = Aperture::new(false, 10, 10, vec![Offset::new(0, 0), Offset::new(0, 1)]);
        let definitions = vec![definition(
            9,
            9,
            vec![Offset::new(1, 1), Offset::new(1, 2), Offset::new(2, 2)],
        )];

        let report = MaskCoverageClipReportFactory.clip_report(&definitions, &aperture);
        assert!(!report.is_clipped());
        assert_eq!(report.definition_counts[0].mask_pixel_count, 3);
        assert_eq!(report.definition_counts[0].in_optimal_aperture_count, 2);
    }

    #[test]
    fn test_uncovered_pixels_are_clipped() {
        let aperture = Aperture::new(
            false,
            10,
            10,
            vec![Offset::new(0, 0), Offset::new(5, 5), Offset::new(-1, 0)],
        );
        let definitions = vec![
            definition(10, 10, vec![Offset::new(0, 0)]),
            definition(0, 0, vec![Offset::new(9, 10)]),
        ];

        let report = MaskCoverageClipReportFactory.clip_report(&definitions, &aperture);
        assert_eq!(report.clipped_pixel_count(), 1);
        assert!(report.clipped_pixels.contains(&(15, 15)));
        assert_eq!(report.definition_counts.len(), 2);
    }

    #[test]
    fn test_no_definitions_clips_everything() {
        let aperture = Aperture::new(true, 0, 0, vec![Offset::new(0, 0), Offset::new(1, 0)]);
        let report = MaskCoverageClipReportFactory.clip_report(&[], &aperture);
        assert_eq!(report.clipped_pixel_count(), 2);
    }
}
