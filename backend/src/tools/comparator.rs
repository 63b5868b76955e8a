//! Cross-checks two TAD runs of the same season.
//!
//! For every module/output the comparator lines up the targets of an old and
//! a new target table by kepler id and checks the new apertures against the
//! old target definitions. Findings are logged as warnings and summed into a
//! [`ComparisonReport`]; only a season mismatch aborts the comparison.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{info, warn};

use super::{target_list_set_named, target_table_of};
use crate::crud::clip::{ClipReportFactory, MaskCoverageClipReportFactory};
use crate::crud::target::check_same_season;
use crate::crud::{TadResult, TargetCrud};
use crate::db::FullRepository;
use crate::models::{module_outputs, ObservedTarget, TargetTable};

/// Totals of a table comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonReport {
    pub mod_outs_compared: usize,
    /// Module/outputs where the two runs observe different kepler id sets.
    pub mod_outs_with_divergent_targets: usize,
    /// Kepler ids observed by the old run only.
    pub missing_kepler_ids: BTreeSet<i32>,
    /// Kepler ids observed by the new run only.
    pub extra_kepler_ids: BTreeSet<i32>,
    pub clipped_targets: usize,
    pub clipped_pixels: usize,
}

impl ComparisonReport {
    pub fn is_clean(&self) -> bool {
        self.mod_outs_with_divergent_targets == 0 && self.clipped_targets == 0
    }
}

pub struct TargetTableComparator {
    target_crud: TargetCrud,
    clip_reports: Arc<dyn ClipReportFactory>,
}

impl TargetTableComparator {
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

    /// Compares the target tables of two target list sets.
    pub async fn compare_target_list_sets(
        &self,
        old_tls_name: &str,
        new_tls_name: &str,
    ) -> TadResult<ComparisonReport> {
        let old_tls = target_list_set_named(&self.target_crud, old_tls_name).await?;
        let new_tls = target_list_set_named(&self.target_crud, new_tls_name).await?;
        let old_table = target_table_of(&self.target_crud, &old_tls).await?;
        let new_table = target_table_of(&self.target_crud, &new_tls).await?;
        self.compare(&old_table, &new_table).await
    }

    pub async fn compare(
        &self,
        old_table: &TargetTable,
        new_table: &TargetTable,
    ) -> TadResult<ComparisonReport> {
        check_same_season(old_table, new_table)?;
        info!(
            "Comparing {} against {}",
            new_table.label(),
            old_table.label()
        );

        let mut report = ComparisonReport::default();
        for (ccd_module, ccd_output) in module_outputs() {
            let old_targets = self
                .observed_targets(old_table, ccd_module, ccd_output)
                .await?;
            let new_targets = self
                .observed_targets(new_table, ccd_module, ccd_output)
                .await?;
            self.compare_mod_out(ccd_module, ccd_output, &old_targets, &new_targets, &mut report);
            report.mod_outs_compared += 1;
        }

        info!(
            "Compared {} mod/outs: {} clipped targets, {} missing and {} extra kepler ids",
            report.mod_outs_compared,
            report.clipped_targets,
            report.missing_kepler_ids.len(),
            report.extra_kepler_ids.len()
        );
        Ok(report)
    }

    /// Non-rejected targets as the run itself produced them.
    async fn observed_targets(
        &self,
        table: &TargetTable,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<BTreeMap<i32, ObservedTarget>> {
        let targets = self
            .target_crud
            .retrieve_observed_targets_plus_rejected_ignore_supplemental(
                table, ccd_module, ccd_output, false,
            )
            .await?;
        Ok(targets
            .into_iter()
            .filter(|t| !t.rejected)
            .map(|t| (t.kepler_id, t))
            .collect())
    }

    fn compare_mod_out(
        &self,
        ccd_module: i32,
        ccd_output: i32,
        old_targets: &BTreeMap<i32, ObservedTarget>,
        new_targets: &BTreeMap<i32, ObservedTarget>,
        report: &mut ComparisonReport,
    ) {
        let missing: Vec<i32> = old_targets
            .keys()
            .filter(|id| !new_targets.contains_key(id))
            .copied()
            .collect();
        let extra: Vec<i32> = new_targets
            .keys()
            .filter(|id| !old_targets.contains_key(id))
            .copied()
            .collect();

        if old_targets.len() != new_targets.len() {
            warn!(
                "{}/{}: target counts differ (old {}, new {})",
                ccd_module,
                ccd_output,
                old_targets.len(),
                new_targets.len()
            );
        }
        if !missing.is_empty() || !extra.is_empty() {
            warn!(
                "{}/{}: kepler ids diverge, missing from new {:?}, extra in new {:?}",
                ccd_module, ccd_output, missing, extra
            );
            report.mod_outs_with_divergent_targets += 1;
        }
        report.missing_kepler_ids.extend(missing);
        report.extra_kepler_ids.extend(extra);

        for (kepler_id, new_target) in new_targets {
            let (Some(old_target), Some(aperture)) =
                (old_targets.get(kepler_id), new_target.aperture.as_ref())
            else {
                continue;
            };
            let clip = self
                .clip_reports
                .clip_report(&old_target.target_definitions, aperture);
            if clip.is_clipped() {
                warn!(
                    "{}/{}: aperture of kepler id {} has {} pixels outside the old target definitions",
                    ccd_module,
                    ccd_output,
                    kepler_id,
                    clip.clipped_pixel_count()
                );
                report.clipped_targets += 1;
                report.clipped_pixels += clip.clipped_pixel_count();
            }
        }
    }
}
