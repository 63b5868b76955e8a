use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::db::query::LargeFlatFieldQuery;
use crate::models::{History, HistoryId, HistoryModelName, LargeFlatField, SmallFlatFieldImage};

/// Storage for flat field models and their histories.
#[async_trait]
pub trait FcRepository: Send + Sync {
    async fn create_history(&self, history: &History) -> RepositoryResult<History>;

    /// Histories of one model family, ordered by ingest time.
    async fn find_histories(&self, model_type: HistoryModelName) -> RepositoryResult<Vec<History>>;

    async fn create_large_flat_field(
        &self,
        flat_field: &LargeFlatField,
    ) -> RepositoryResult<LargeFlatField>;

    /// Ordered by start time, then id.
    async fn find_large_flat_fields(
        &self,
        query: &LargeFlatFieldQuery,
    ) -> RepositoryResult<Vec<LargeFlatField>>;

    async fn create_small_flat_field_image(
        &self,
        image: &SmallFlatFieldImage,
    ) -> RepositoryResult<SmallFlatFieldImage>;

    /// Ordered by MJD, then id.
    async fn find_small_flat_field_images(
        &self,
        history_id: HistoryId,
        ccd_module: i32,
        ccd_output: i32,
    ) -> RepositoryResult<Vec<SmallFlatFieldImage>>;
}
