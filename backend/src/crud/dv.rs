//! Data validation result queries.
//!
//! Every result family (planet results, target results, limb darkening
//! models) is selected the same way:
//!
//! - *by instance*: rows of one pipeline instance whose task produced results
//!   (COMPLETED or PARTIAL) and whose instance finished in a state eligible
//!   for results (COMPLETED, STOPPED or ERRORS_STALLED)
//! - *latest before*: for each kepler id, the newest eligible instance at or
//!   before a bound, then that instance's rows whose task produced results

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::error::{TadError, TadResult};
use crate::db::query::{in_list_chunks, DvResultQuery, InstanceSelection, KeplerIdSelection};
use crate::db::repository::RepositoryResult;
use crate::db::{DvRepository, FullRepository};
use crate::models::{
    DvLimbDarkeningModel, DvPlanetResults, DvPlanetSummary, DvResult, DvTargetResults,
    PipelineInstanceId, WithProvenance,
};

/// A DV result family stored through [`DvRepository`].
#[async_trait]
pub trait DvRecord: DvResult + Clone + Send + Sync + Sized + 'static {
    /// Name used in log and error messages.
    const NAME: &'static str;

    async fn find(
        repo: &dyn FullRepository,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<Self>>>;
}

#[async_trait]
impl DvRecord for DvPlanetResults {
    const NAME: &'static str = "planet results";

    async fn find(
        repo: &dyn FullRepository,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<Self>>> {
        repo.find_planet_results(query).await
    }
}

#[async_trait]
impl DvRecord for DvTargetResults {
    const NAME: &'static str = "target results";

    async fn find(
        repo: &dyn FullRepository,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<Self>>> {
        repo.find_target_results(query).await
    }
}

#[async_trait]
impl DvRecord for DvLimbDarkeningModel {
    const NAME: &'static str = "limb darkening models";

    async fn find(
        repo: &dyn FullRepository,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<Self>>> {
        repo.find_limb_darkening_models(query).await
    }
}

#[derive(Clone)]
pub struct DvCrud {
    repo: Arc<dyn FullRepository>,
}

impl DvCrud {
    pub fn new(repo: Arc<dyn FullRepository>) -> Self {
        Self { repo }
    }

    // ==================== Create / delete ====================

    pub async fn create_planet_results(
        &self,
        results: &[DvPlanetResults],
    ) -> TadResult<Vec<DvPlanetResults>> {
        Ok(self.repo.create_planet_results(results).await?)
    }

    pub async fn create_target_results(
        &self,
        results: &[DvTargetResults],
    ) -> TadResult<Vec<DvTargetResults>> {
        Ok(self.repo.create_target_results(results).await?)
    }

    pub async fn create_limb_darkening_models(
        &self,
        models: &[DvLimbDarkeningModel],
    ) -> TadResult<Vec<DvLimbDarkeningModel>> {
        Ok(self.repo.create_limb_darkening_models(models).await?)
    }

    pub async fn delete_planet_results(&self, results: &[DvPlanetResults]) -> TadResult<usize> {
        let ids = stored_ids(results, |r| r.id, DvPlanetResults::NAME)?;
        Ok(self.repo.delete_planet_results(&ids).await?)
    }

    pub async fn delete_target_results(&self, results: &[DvTargetResults]) -> TadResult<usize> {
        let ids = stored_ids(results, |r| r.id, DvTargetResults::NAME)?;
        Ok(self.repo.delete_target_results(&ids).await?)
    }

    pub async fn delete_limb_darkening_models(
        &self,
        models: &[DvLimbDarkeningModel],
    ) -> TadResult<usize> {
        let ids = stored_ids(models, |m| m.id, DvLimbDarkeningModel::NAME)?;
        Ok(self.repo.delete_limb_darkening_models(&ids).await?)
    }

    // ==================== Retrieval ====================

    /// Every stored row, optionally for one kepler id, regardless of
    /// pipeline state.
    pub async fn retrieve_all<T: DvRecord>(&self, kepler_id: Option<i32>) -> TadResult<Vec<T>> {
        let query = match kepler_id {
            Some(id) => DvResultQuery::for_kepler_id(id),
            None => DvResultQuery::all(),
        };
        let rows = T::find(self.repo.as_ref(), &query).await?;
        Ok(rows.into_iter().map(|row| row.result).collect())
    }

    /// Rows produced by one pipeline instance, ordered by kepler id and the
    /// family's secondary key.
    pub async fn retrieve_by_pipeline_instance_id<T: DvRecord>(
        &self,
        pipeline_instance_id: PipelineInstanceId,
        kepler_ids: KeplerIdSelection,
    ) -> TadResult<Vec<T>> {
        let rows = self
            .by_instance_rows::<T>(pipeline_instance_id, kepler_ids)
            .await?;
        Ok(rows.into_iter().map(|row| row.result).collect())
    }

    /// Newest eligible rows per kepler id at or before `max_pipeline_instance_id`.
    pub async fn retrieve_latest_completed_or_erred_before_pipeline_instance<T: DvRecord>(
        &self,
        max_pipeline_instance_id: PipelineInstanceId,
        kepler_ids: KeplerIdSelection,
    ) -> TadResult<Vec<T>> {
        let rows = self
            .latest_before_rows::<T>(max_pipeline_instance_id, kepler_ids)
            .await?;
        Ok(rows.into_iter().map(|row| row.result).collect())
    }

    /// Newest eligible rows for each kepler id from any instance.
    pub async fn retrieve_latest<T: DvRecord>(&self, kepler_ids: &[i32]) -> TadResult<Vec<T>> {
        if kepler_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .latest_before_rows::<T>(
                PipelineInstanceId(i64::MAX),
                KeplerIdSelection::Ids(kepler_ids.to_vec()),
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.result).collect())
    }

    /// Distinct, ascending kepler ids with rows in one instance.
    pub async fn retrieve_kepler_ids_by_pipeline_instance_id<T: DvRecord>(
        &self,
        pipeline_instance_id: PipelineInstanceId,
    ) -> TadResult<Vec<i32>> {
        let rows = self
            .by_instance_rows::<T>(pipeline_instance_id, KeplerIdSelection::All)
            .await?;
        Ok(distinct_kepler_ids(&rows))
    }

    /// Distinct, ascending kepler ids with rows at or before an instance.
    pub async fn retrieve_kepler_ids_before_pipeline_instance<T: DvRecord>(
        &self,
        max_pipeline_instance_id: PipelineInstanceId,
    ) -> TadResult<Vec<i32>> {
        let rows = self
            .latest_before_rows::<T>(max_pipeline_instance_id, KeplerIdSelection::All)
            .await?;
        Ok(distinct_kepler_ids(&rows))
    }

    // ==================== Planet summaries ====================

    pub async fn retrieve_planet_summary_by_pipeline_instance_id(
        &self,
        pipeline_instance_id: PipelineInstanceId,
        min_kepler_id: i32,
        max_kepler_id: i32,
    ) -> TadResult<Vec<DvPlanetSummary>> {
        let rows = self
            .by_instance_rows::<DvPlanetResults>(
                pipeline_instance_id,
                KeplerIdSelection::Range {
                    min: min_kepler_id,
                    max: max_kepler_id,
                },
            )
            .await?;
        summarize_planets(&rows)
    }

    pub async fn retrieve_planet_summary_before_pipeline_instance(
        &self,
        max_pipeline_instance_id: PipelineInstanceId,
        min_kepler_id: i32,
        max_kepler_id: i32,
    ) -> TadResult<Vec<DvPlanetSummary>> {
        let rows = self
            .latest_before_rows::<DvPlanetResults>(
                max_pipeline_instance_id,
                KeplerIdSelection::Range {
                    min: min_kepler_id,
                    max: max_kepler_id,
                },
            )
            .await?;
        summarize_planets(&rows)
    }

    // ==================== Selection ====================

    async fn by_instance_rows<T: DvRecord>(
        &self,
        pipeline_instance_id: PipelineInstanceId,
        kepler_ids: KeplerIdSelection,
    ) -> TadResult<Vec<WithProvenance<T>>> {
        let rows = self
            .find_chunked::<T>(kepler_ids, InstanceSelection::Exactly(pipeline_instance_id))
            .await?;
        Ok(rows
            .into_iter()
            .filter(|row| {
                row.pipeline_instance_id == pipeline_instance_id
                    && row.task_state.produced_results()
                    && row.instance_state.is_eligible_for_results()
            })
            .collect())
    }

    async fn latest_before_rows<T: DvRecord>(
        &self,
        max_pipeline_instance_id: PipelineInstanceId,
        kepler_ids: KeplerIdSelection,
    ) -> TadResult<Vec<WithProvenance<T>>> {
        let rows = self
            .find_chunked::<T>(kepler_ids, InstanceSelection::AtMost(max_pipeline_instance_id))
            .await?;
        let selected = latest_eligible(rows);
        debug!(
            "Selected {} {} at or before pipeline instance {}",
            selected.len(),
            T::NAME,
            max_pipeline_instance_id
        );
        Ok(selected)
    }

    /// Runs the query once per chunk of an explicit kepler id list and
    /// restores kepler id order across chunks.
    async fn find_chunked<T: DvRecord>(
        &self,
        kepler_ids: KeplerIdSelection,
        instances: InstanceSelection,
    ) -> TadResult<Vec<WithProvenance<T>>> {
        let ids = match kepler_ids {
            KeplerIdSelection::Ids(ids) => ids,
            other => {
                let query = DvResultQuery::all()
                    .with_kepler_ids(other)
                    .with_instances(instances);
                return Ok(T::find(self.repo.as_ref(), &query).await?);
            }
        };

        let mut rows = Vec::new();
        for chunk in in_list_chunks(&ids) {
            let query = DvResultQuery::all()
                .with_kepler_ids(KeplerIdSelection::Ids(chunk.to_vec()))
                .with_instances(instances);
            rows.extend(T::find(self.repo.as_ref(), &query).await?);
        }
        rows.sort_by_key(|row| (row.result.kepler_id(), row.result.ordinal()));
        Ok(rows)
    }
}

/// Keeps, per kepler id, the rows of the newest instance in an eligible state
/// whose task produced results. Row order is preserved.
pub(crate) fn latest_eligible<T: DvResult>(rows: Vec<WithProvenance<T>>) -> Vec<WithProvenance<T>> {
    let mut latest: HashMap<i32, PipelineInstanceId> = HashMap::new();
    for row in rows.iter().filter(|r| r.instance_state.is_eligible_for_results()) {
        let entry = latest
            .entry(row.result.kepler_id())
            .or_insert(row.pipeline_instance_id);
        if row.pipeline_instance_id > *entry {
            *entry = row.pipeline_instance_id;
        }
    }

    rows.into_iter()
        .filter(|row| {
            latest.get(&row.result.kepler_id()) == Some(&row.pipeline_instance_id)
                && row.task_state.produced_results()
        })
        .collect()
}

/// Groups planet rows (ordered by kepler id) into one summary per kepler id.
pub(crate) fn summarize_planets(
    rows: &[WithProvenance<DvPlanetResults>],
) -> TadResult<Vec<DvPlanetSummary>> {
    let mut summaries: Vec<DvPlanetSummary> = Vec::new();
    for row in rows {
        let planet = &row.result;
        match summaries.last_mut() {
            Some(summary) if summary.kepler_id == planet.kepler_id => {
                if summary.pipeline_instance_id != row.pipeline_instance_id {
                    return Err(TadError::illegal_state(format!(
                        "kepler id {} has planet results from pipeline instances {} and {}",
                        planet.kepler_id, summary.pipeline_instance_id, row.pipeline_instance_id
                    )));
                }
                summary.planet_numbers.push(planet.planet_number);
            }
            _ => summaries.push(DvPlanetSummary {
                start_cadence: planet.start_cadence,
                end_cadence: planet.end_cadence,
                planet_numbers: vec![planet.planet_number],
                kepler_id: planet.kepler_id,
                pipeline_instance_id: row.pipeline_instance_id,
                pipeline_task_id: planet.pipeline_task_id,
            }),
        }
    }
    Ok(summaries)
}

fn distinct_kepler_ids<T: DvResult>(rows: &[WithProvenance<T>]) -> Vec<i32> {
    rows.iter()
        .map(|row| row.result.kepler_id())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn stored_ids<T, I>(records: &[T], id: impl Fn(&T) -> Option<I>, name: &str) -> TadResult<Vec<I>> {
    records
        .iter()
        .map(|record| {
            id(record).ok_or_else(|| {
                TadError::IllegalArgument(format!("cannot delete {} that were never stored", name))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PipelineInstanceState, PipelineTaskId, PipelineTaskState};

    fn planet(
        kepler_id: i32,
        planet_number: i32,
        instance: i64,
        instance_state: PipelineInstanceState,
        task_state: PipelineTaskState,
    ) -> WithProvenance<DvPlanetResults> {
        WithProvenance {
            result: DvPlanetResults::new(kepler_id, planet_number, 100, 200, PipelineTaskId(instance * 10)),
            pipeline_instance_id: PipelineInstanceId(instance),
            instance_state,
            task_state,
        }
    }

    #[test]
    fn test_latest_eligible_picks_newest_instance_per_kepler_id() {
        use PipelineInstanceState::*;
        use PipelineTaskState::Completed as Done;

        let rows = vec![
            planet(1, 1, 1, Completed, Done),
            planet(1, 1, 2, ErrorsStalled, Done),
            planet(1, 2, 2, ErrorsStalled, PipelineTaskState::Error),
            planet(1, 1, 3, Processing, Done),
            planet(2, 1, 1, Stopped, PipelineTaskState::Partial),
        ];
        let selected = latest_eligible(rows);
        let picked: Vec<_> = selected
            .iter()
            .map(|r| (r.result.kepler_id, r.result.planet_number, r.pipeline_instance_id.0))
            .collect();
        assert_eq!(picked, vec![(1, 1, 2), (2, 1, 1)]);
    }

    #[test]
    fn test_latest_eligible_can_select_nothing_for_failed_task() {
        let rows = vec![planet(
            5,
            1,
            4,
            PipelineInstanceState::Completed,
            PipelineTaskState::Error,
        )];
        assert!(latest_eligible(rows).is_empty());
    }

    #[test]
    fn test_planet_summary_groups_planet_numbers() {
        let rows = vec![
            planet(1, 1, 7, PipelineInstanceState::Completed, PipelineTaskState::Completed),
            planet(1, 2, 7, PipelineInstanceState::Completed, PipelineTaskState::Completed),
            planet(3, 1, 7, PipelineInstanceState::Completed, PipelineTaskState::Completed),
        ];
        let summaries = summarize_planets(&rows).unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].planet_numbers, vec![1, 2]);
        assert_eq!(summaries[0].pipeline_task_id, PipelineTaskId(70));
        assert_eq!(summaries[1].kepler_id, 3);
    }

    #[test]
    fn test_planet_summary_rejects_mixed_instances() {
        let rows = vec![
            planet(1, 1, 7, PipelineInstanceState::Completed, PipelineTaskState::Completed),
            planet(1, 2, 8, PipelineInstanceState::Completed, PipelineTaskState::Completed),
        ];
        assert!(matches!(
            summarize_planets(&rows),
            Err(TadError::IllegalState(_))
        ));
    }
}
