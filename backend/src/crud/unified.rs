//! Single view over an original TAD run and its supplemental run.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use log::debug;

use super::clip::{ClipReportFactory, MaskCoverageClipReportFactory};
use super::error::TadResult;
use super::target::{saved_id, TargetCrud};
use crate::db::query::{in_list_chunks, KeplerIdQuery, KeplerIdSelection, ObservedTargetQuery};
use crate::db::{FullRepository, TargetRepository};
use crate::models::{ObservedTarget, TargetTable, UnifiedObservedTarget};

/// Kepler ids of the Cyg16 binary, observed with hand-built apertures that do
/// not follow their target definitions.
const CYG16_KEPLER_IDS: [i32; 2] = [12069424, 12069449];

/// Mission-specific data patch: Cyg16 apertures are reported as unclipped
/// without consulting their target definitions.
fn is_cyg16(kepler_id: i32) -> bool {
    CYG16_KEPLER_IDS.contains(&kepler_id)
}

#[derive(Clone)]
pub struct UnifiedObservedTargetCrud {
    target_crud: TargetCrud,
    clip_reports: Arc<dyn ClipReportFactory>,
}

impl UnifiedObservedTargetCrud {
    /// Uses [`MaskCoverageClipReportFactory`] for clipping.
    pub fn new(repo: Arc<dyn FullRepository>) -> Self {
        Self::with_clip_report_factory(repo, Arc::new(MaskCoverageClipReportFactory))
    }

    pub fn with_clip_report_factory(
        repo: Arc<dyn FullRepository>,
        clip_reports: Arc<dyn ClipReportFactory>,
    ) -> Self {
        Self {
            target_crud: TargetCrud::new(repo),
            clip_reports,
        }
    }

    /// Unified targets of `table` at a module/output, keyed by kepler id.
    ///
    /// Target definitions come from the original run. Aperture and metrics
    /// come from the supplemental run when the table has one; a target the
    /// supplemental run no longer observes (or rejected) is reported as
    /// dropped with an empty aperture.
    pub async fn retrieve_unified_observed_targets(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
        kepler_ids: &[i32],
    ) -> TadResult<BTreeMap<i32, UnifiedObservedTarget>> {
        let query = ObservedTargetQuery::for_table(saved_id(table)?)
            .at_module_output(ccd_module, ccd_output);
        let originals = self.load_chunked(&query, kepler_ids).await?;

        let supp_table = self
            .target_crud
            .retrieve_supp_target_table_for_orig_target_table(table)
            .await?;
        let Some(supp_table) = supp_table else {
            return Ok(originals
                .iter()
                .map(|orig| {
                    let clipped = self.clipped_pixel_count(orig, orig);
                    (orig.kepler_id, UnifiedObservedTarget::from_original(orig, clipped))
                })
                .collect());
        };

        let supp_query = query.retarget(saved_id(&supp_table)?).plus_rejected();
        let supplementals: HashMap<i32, ObservedTarget> = self
            .load_chunked(&supp_query, kepler_ids)
            .await?
            .into_iter()
            .map(|t| (t.kepler_id, t))
            .collect();
        debug!(
            "Unifying {} targets of {} with {} supplemental targets of {}",
            originals.len(),
            table.label(),
            supplementals.len(),
            supp_table.label()
        );

        let mut unified = BTreeMap::new();
        for orig in &originals {
            let view = match supplementals.get(&orig.kepler_id) {
                Some(supp) if !supp.rejected => {
                    let clipped = self.clipped_pixel_count(orig, supp);
                    UnifiedObservedTarget::from_supplemental(orig, supp, clipped)
                }
                _ => UnifiedObservedTarget::dropped(orig, 0),
            };
            unified.insert(orig.kepler_id, view);
        }
        Ok(unified)
    }

    async fn load_chunked(
        &self,
        query: &ObservedTargetQuery,
        kepler_ids: &[i32],
    ) -> TadResult<Vec<ObservedTarget>> {
        let mut targets = Vec::new();
        for chunk in in_list_chunks(kepler_ids) {
            let chunk_query = query.clone().with_kepler_ids(chunk.to_vec());
            targets.extend(
                self.target_crud
                    .retrieve_original_observed_targets(&chunk_query)
                    .await?,
            );
        }
        Ok(targets)
    }

    /// Ascending kepler ids of the original table's non-rejected targets
    /// within `[min_kepler_id, max_kepler_id]`.
    pub async fn retrieve_kepler_ids(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
        min_kepler_id: i32,
        max_kepler_id: i32,
    ) -> TadResult<Vec<i32>> {
        let query = KeplerIdQuery {
            target_table_id: saved_id(table)?,
            module_output: Some((ccd_module, ccd_output)),
            kepler_ids: KeplerIdSelection::Range {
                min: min_kepler_id,
                max: max_kepler_id,
            },
        };
        Ok(self
            .target_crud
            .repository()
            .find_observed_kepler_ids(&query)
            .await?)
    }

    /// Pixels of the serving aperture that the original definitions miss.
    fn clipped_pixel_count(&self, original: &ObservedTarget, serving: &ObservedTarget) -> usize {
        if is_cyg16(original.kepler_id) {
            return 0;
        }
        match &serving.aperture {
            Some(aperture) => self
                .clip_reports
                .clip_report(&original.target_definitions, aperture)
                .clipped_pixel_count(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cyg16_ids() {
        assert!(is_cyg16(12069424));
        assert!(is_cyg16(12069449));
        assert!(!is_cyg16(12069425));
    }
}
