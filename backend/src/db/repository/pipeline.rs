use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::models::{
    PipelineInstance, PipelineInstanceId, PipelineInstanceState, PipelineTask, PipelineTaskId,
};

/// Pipeline bookkeeping needed to attribute DV results.
#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn create_pipeline_instance(
        &self,
        instance: &PipelineInstance,
    ) -> RepositoryResult<PipelineInstance>;

    async fn update_pipeline_instance_state(
        &self,
        id: PipelineInstanceId,
        state: PipelineInstanceState,
    ) -> RepositoryResult<()>;

    async fn get_pipeline_instance(
        &self,
        id: PipelineInstanceId,
    ) -> RepositoryResult<Option<PipelineInstance>>;

    async fn create_pipeline_task(&self, task: &PipelineTask) -> RepositoryResult<PipelineTask>;

    async fn get_pipeline_task(&self, id: PipelineTaskId) -> RepositoryResult<Option<PipelineTask>>;
}
