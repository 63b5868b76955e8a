use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::db::query::DvResultQuery;
use crate::models::{
    DvLimbDarkeningModel, DvLimbDarkeningModelId, DvPlanetResults, DvPlanetResultsId,
    DvTargetResults, DvTargetResultsId, WithProvenance,
};

/// Storage for DV results.
///
/// `find_*` returns every row matching the kepler id and instance bounds,
/// each joined with its task and instance states, ordered by kepler id and
/// then the family's secondary key. State filtering is left to the caller.
#[async_trait]
pub trait DvRepository: Send + Sync {
    async fn create_planet_results(
        &self,
        results: &[DvPlanetResults],
    ) -> RepositoryResult<Vec<DvPlanetResults>>;

    async fn find_planet_results(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvPlanetResults>>>;

    async fn delete_planet_results(&self, ids: &[DvPlanetResultsId]) -> RepositoryResult<usize>;

    async fn create_target_results(
        &self,
        results: &[DvTargetResults],
    ) -> RepositoryResult<Vec<DvTargetResults>>;

    async fn find_target_results(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvTargetResults>>>;

    async fn delete_target_results(&self, ids: &[DvTargetResultsId]) -> RepositoryResult<usize>;

    async fn create_limb_darkening_models(
        &self,
        models: &[DvLimbDarkeningModel],
    ) -> RepositoryResult<Vec<DvLimbDarkeningModel>>;

    async fn find_limb_darkening_models(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvLimbDarkeningModel>>>;

    async fn delete_limb_darkening_models(
        &self,
        ids: &[DvLimbDarkeningModelId],
    ) -> RepositoryResult<usize>;
}
