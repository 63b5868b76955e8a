//! Minimal pipeline bookkeeping records.
//!
//! Only the identity and state columns the DV provenance filters need are
//! modelled here; task scheduling lives elsewhere.

use serde::{Deserialize, Serialize};

crate::define_id_type!(i64, PipelineInstanceId);
crate::define_id_type!(i64, PipelineTaskId);

crate::short_name_enum!(
    /// Run state of a pipeline instance.
    PipelineInstanceState, "pipeline instance state" {
        Initialized => ("INITIALIZED", 0),
        Processing => ("PROCESSING", 1),
        ErrorsRunning => ("ERRORS_RUNNING", 2),
        ErrorsStalled => ("ERRORS_STALLED", 3),
        Stopped => ("STOPPED", 4),
        Completed => ("COMPLETED", 5),
    }
);

crate::short_name_enum!(
    /// Run state of a single pipeline task.
    PipelineTaskState, "pipeline task state" {
        Initialized => ("INITIALIZED", 0),
        Submitted => ("SUBMITTED", 1),
        Processing => ("PROCESSING", 2),
        Error => ("ERROR", 3),
        Completed => ("COMPLETED", 4),
        Partial => ("PARTIAL", 5),
    }
);

impl PipelineInstanceState {
    /// States whose results may be consumed downstream.
    pub const ELIGIBLE_FOR_RESULTS: &'static [PipelineInstanceState] = &[
        PipelineInstanceState::Completed,
        PipelineInstanceState::Stopped,
        PipelineInstanceState::ErrorsStalled,
    ];

    pub fn is_eligible_for_results(&self) -> bool {
        Self::ELIGIBLE_FOR_RESULTS.contains(self)
    }
}

impl PipelineTaskState {
    pub fn produced_results(&self) -> bool {
        matches!(self, PipelineTaskState::Completed | PipelineTaskState::Partial)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineInstance {
    pub id: Option<PipelineInstanceId>,
    pub state: PipelineInstanceState,
}

impl PipelineInstance {
    pub fn new(state: PipelineInstanceState) -> Self {
        Self { id: None, state }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTask {
    pub id: Option<PipelineTaskId>,
    pub pipeline_instance_id: PipelineInstanceId,
    pub state: PipelineTaskState,
}

impl PipelineTask {
    pub fn new(pipeline_instance_id: PipelineInstanceId, state: PipelineTaskState) -> Self {
        Self {
            id: None,
            pipeline_instance_id,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_eligibility() {
        assert!(PipelineInstanceState::Stopped.is_eligible_for_results());
        assert!(!PipelineInstanceState::ErrorsRunning.is_eligible_for_results());
        assert!(PipelineTaskState::Partial.produced_results());
        assert!(!PipelineTaskState::Error.produced_results());
    }
}
