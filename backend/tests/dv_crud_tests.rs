//! DV result selection by pipeline instance and provenance state.

mod support;

use std::sync::Arc;

use kepler_tad::crud::{DvCrud, TadError};
use kepler_tad::db::query::KeplerIdSelection;
use kepler_tad::db::{FullRepository, PipelineRepository};
use kepler_tad::models::{
    DvLimbDarkeningModel, DvPlanetResults, DvTargetResults, PipelineInstance, PipelineInstanceId,
    PipelineInstanceState, PipelineTask, PipelineTaskId, PipelineTaskState,
};

use support::local_repo;

async fn instance(
    repo: &Arc<dyn FullRepository>,
    state: PipelineInstanceState,
) -> PipelineInstanceId {
    repo.create_pipeline_instance(&PipelineInstance::new(state))
        .await
        .unwrap()
        .id
        .unwrap()
}

async fn task(
    repo: &Arc<dyn FullRepository>,
    instance_id: PipelineInstanceId,
    state: PipelineTaskState,
) -> PipelineTaskId {
    repo.create_pipeline_task(&PipelineTask::new(instance_id, state))
        .await
        .unwrap()
        .id
        .unwrap()
}

fn planets(task_id: PipelineTaskId, rows: &[(i32, i32)]) -> Vec<DvPlanetResults> {
    rows.iter()
        .map(|&(kepler_id, planet_number)| {
            DvPlanetResults::new(kepler_id, planet_number, 1000, 5000, task_id)
        })
        .collect()
}

fn numbers(results: &[DvPlanetResults]) -> Vec<(i32, i32)> {
    results
        .iter()
        .map(|p| (p.kepler_id, p.planet_number))
        .collect()
}

#[tokio::test]
async fn test_by_instance_requires_eligible_instance_and_task() {
    let repo = local_repo();
    let crud = DvCrud::new(repo.clone());

    let done = instance(&repo, PipelineInstanceState::Completed).await;
    let ok_task = task(&repo, done, PipelineTaskState::Completed).await;
    let partial_task = task(&repo, done, PipelineTaskState::Partial).await;
    let failed_task = task(&repo, done, PipelineTaskState::Error).await;
    crud.create_planet_results(&planets(ok_task, &[(20, 2), (10, 1), (20, 1)]))
        .await
        .unwrap();
    crud.create_planet_results(&planets(partial_task, &[(30, 1)]))
        .await
        .unwrap();
    crud.create_planet_results(&planets(failed_task, &[(40, 1)]))
        .await
        .unwrap();

    let running = instance(&repo, PipelineInstanceState::Processing).await;
    let running_task = task(&repo, running, PipelineTaskState::Completed).await;
    crud.create_planet_results(&planets(running_task, &[(10, 1)]))
        .await
        .unwrap();

    let results: Vec<DvPlanetResults> = crud
        .retrieve_by_pipeline_instance_id(done, KeplerIdSelection::All)
        .await
        .unwrap();
    assert_eq!(numbers(&results), vec![(10, 1), (20, 1), (20, 2), (30, 1)]);

    let none: Vec<DvPlanetResults> = crud
        .retrieve_by_pipeline_instance_id(running, KeplerIdSelection::All)
        .await
        .unwrap();
    assert!(none.is_empty());

    let ranged: Vec<DvPlanetResults> = crud
        .retrieve_by_pipeline_instance_id(done, KeplerIdSelection::Range { min: 15, max: 25 })
        .await
        .unwrap();
    assert_eq!(numbers(&ranged), vec![(20, 1), (20, 2)]);
}

#[tokio::test]
async fn test_latest_before_picks_newest_eligible_instance() {
    let repo = local_repo();
    let crud = DvCrud::new(repo.clone());

    let first = instance(&repo, PipelineInstanceState::Completed).await;
    let first_task = task(&repo, first, PipelineTaskState::Completed).await;
    crud.create_planet_results(&planets(first_task, &[(10, 1), (20, 1)]))
        .await
        .unwrap();

    let second = instance(&repo, PipelineInstanceState::ErrorsStalled).await;
    let second_task = task(&repo, second, PipelineTaskState::Completed).await;
    crud.create_planet_results(&planets(second_task, &[(10, 1), (10, 2)]))
        .await
        .unwrap();

    let third = instance(&repo, PipelineInstanceState::Completed).await;
    let third_task = task(&repo, third, PipelineTaskState::Completed).await;
    crud.create_planet_results(&planets(third_task, &[(20, 1), (20, 2), (20, 3)]))
        .await
        .unwrap();

    let before_third: Vec<DvPlanetResults> = crud
        .retrieve_latest_completed_or_erred_before_pipeline_instance(
            second,
            KeplerIdSelection::All,
        )
        .await
        .unwrap();
    assert_eq!(numbers(&before_third), vec![(10, 1), (10, 2), (20, 1)]);

    let latest: Vec<DvPlanetResults> = crud.retrieve_latest(&[10, 20, 99]).await.unwrap();
    assert_eq!(
        numbers(&latest),
        vec![(10, 1), (10, 2), (20, 1), (20, 2), (20, 3)]
    );

    let nothing: Vec<DvPlanetResults> = crud.retrieve_latest(&[]).await.unwrap();
    assert!(nothing.is_empty());

    let ids = crud
        .retrieve_kepler_ids_before_pipeline_instance::<DvPlanetResults>(first)
        .await
        .unwrap();
    assert_eq!(ids, vec![10, 20]);
}

#[tokio::test]
async fn test_latest_instance_with_failed_task_hides_older_results() {
    let repo = local_repo();
    let crud = DvCrud::new(repo.clone());

    let old = instance(&repo, PipelineInstanceState::Completed).await;
    let old_task = task(&repo, old, PipelineTaskState::Completed).await;
    crud.create_target_results(&[DvTargetResults::new(10, 0, 100, old_task)])
        .await
        .unwrap();

    let newer = instance(&repo, PipelineInstanceState::Stopped).await;
    let failed = task(&repo, newer, PipelineTaskState::Error).await;
    crud.create_target_results(&[DvTargetResults::new(10, 0, 100, failed)])
        .await
        .unwrap();

    let latest: Vec<DvTargetResults> = crud.retrieve_latest(&[10]).await.unwrap();
    assert!(latest.is_empty());

    let at_old: Vec<DvTargetResults> = crud
        .retrieve_latest_completed_or_erred_before_pipeline_instance(
            old,
            KeplerIdSelection::Ids(vec![10]),
        )
        .await
        .unwrap();
    assert_eq!(at_old.len(), 1);
    assert_eq!(at_old[0].pipeline_task_id, old_task);
}

#[tokio::test]
async fn test_planet_summaries_group_by_kepler_id() {
    let repo = local_repo();
    let crud = DvCrud::new(repo.clone());

    let done = instance(&repo, PipelineInstanceState::Completed).await;
    let task_id = task(&repo, done, PipelineTaskState::Completed).await;
    crud.create_planet_results(&planets(task_id, &[(11, 2), (11, 1), (12, 1), (50, 1)]))
        .await
        .unwrap();

    let summaries = crud
        .retrieve_planet_summary_by_pipeline_instance_id(done, 10, 20)
        .await
        .unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].kepler_id, 11);
    assert_eq!(summaries[0].planet_numbers, vec![1, 2]);
    assert_eq!(summaries[0].pipeline_instance_id, done);
    assert_eq!(summaries[0].pipeline_task_id, task_id);
    assert_eq!((summaries[0].start_cadence, summaries[0].end_cadence), (1000, 5000));
    assert_eq!(summaries[1].kepler_id, 12);

    let before = crud
        .retrieve_planet_summary_before_pipeline_instance(done, 0, 100)
        .await
        .unwrap();
    assert_eq!(
        before.iter().map(|s| s.kepler_id).collect::<Vec<_>>(),
        vec![11, 12, 50]
    );
}

#[tokio::test]
async fn test_limb_darkening_models_order_by_target_table() {
    let repo = local_repo();
    let crud = DvCrud::new(repo.clone());

    let done = instance(&repo, PipelineInstanceState::Completed).await;
    let task_id = task(&repo, done, PipelineTaskState::Completed).await;
    crud.create_limb_darkening_models(&[
        DvLimbDarkeningModel::new(7, 30, task_id),
        DvLimbDarkeningModel::new(7, 10, task_id),
        DvLimbDarkeningModel::new(3, 20, task_id),
    ])
    .await
    .unwrap();

    let models: Vec<DvLimbDarkeningModel> = crud
        .retrieve_by_pipeline_instance_id(done, KeplerIdSelection::Ids(vec![7, 3]))
        .await
        .unwrap();
    let keys: Vec<_> = models
        .iter()
        .map(|m| (m.kepler_id, m.target_table_id))
        .collect();
    assert_eq!(keys, vec![(3, 20), (7, 10), (7, 30)]);

    let ids = crud
        .retrieve_kepler_ids_by_pipeline_instance_id::<DvLimbDarkeningModel>(done)
        .await
        .unwrap();
    assert_eq!(ids, vec![3, 7]);
}

#[tokio::test]
async fn test_retrieve_all_ignores_pipeline_state_and_delete_removes_rows() {
    let repo = local_repo();
    let crud = DvCrud::new(repo.clone());

    let running = instance(&repo, PipelineInstanceState::Processing).await;
    let task_id = task(&repo, running, PipelineTaskState::Error).await;
    let stored = crud
        .create_planet_results(&planets(task_id, &[(5, 1), (6, 1)]))
        .await
        .unwrap();

    let all: Vec<DvPlanetResults> = crud.retrieve_all(None).await.unwrap();
    assert_eq!(all.len(), 2);
    let one: Vec<DvPlanetResults> = crud.retrieve_all(Some(6)).await.unwrap();
    assert_eq!(numbers(&one), vec![(6, 1)]);

    assert_eq!(crud.delete_planet_results(&stored[..1]).await.unwrap(), 1);
    let remaining: Vec<DvPlanetResults> = crud.retrieve_all(None).await.unwrap();
    assert_eq!(numbers(&remaining), vec![(6, 1)]);

    let unsaved = planets(task_id, &[(7, 1)]);
    let err = crud.delete_planet_results(&unsaved).await.unwrap_err();
    assert!(matches!(err, TadError::IllegalArgument(_)));
}
