//! Batch tools: supplemental linking, aperture shifting and table comparison.

mod support;

use kepler_tad::crud::{TadError, TargetCrud};
use kepler_tad::db::{run_in_transaction, TargetSelectionRepository};
use kepler_tad::models::{TargetType, TargetView};
use kepler_tad::tools::{ApertureShifter, SupplementalTargetListSetSetter, TargetTableComparator};

use support::{aperture, block, definition, local_repo, masks, store, target, uplinked_table};

#[tokio::test]
async fn test_setter_rejects_season_mismatch() {
    let repo = local_repo();
    let table_a = uplinked_table(&repo, TargetType::LongCadence, 1, 3).await;
    let table_b = uplinked_table(&repo, TargetType::LongCadence, 2, 4).await;
    support::target_list_set(&repo, "A", &table_a).await;
    support::target_list_set(&repo, "B", &table_b).await;

    let setter = SupplementalTargetListSetSetter::new(repo.clone());
    let err = setter.set("A", "B").await.unwrap_err();
    assert!(matches!(
        err,
        TadError::SeasonMismatch {
            original: 3,
            other: 4,
            ..
        }
    ));

    let unchanged = repo.find_target_list_sets_by_name("A").await.unwrap();
    assert_eq!(unchanged[0].supplemental_tls_id, None);
}

#[tokio::test]
async fn test_setter_links_same_season_tables() {
    let repo = local_repo();
    let table_a = uplinked_table(&repo, TargetType::LongCadence, 1, 3).await;
    let table_b = uplinked_table(&repo, TargetType::LongCadence, 2, 3).await;
    support::target_list_set(&repo, "A", &table_a).await;
    let tls_b = support::target_list_set(&repo, "B", &table_b).await;

    let setter = SupplementalTargetListSetSetter::new(repo.clone());
    let updated = setter.set("A", "B").await.unwrap();
    assert_eq!(updated.supplemental_tls_id, tls_b.id);

    let crud = TargetCrud::new(repo.clone());
    let supp = crud
        .retrieve_supp_target_table_for_orig_target_table(&table_a)
        .await
        .unwrap();
    assert_eq!(supp.and_then(|t| t.id), table_b.id);
}

#[tokio::test]
async fn test_setter_requires_existing_target_list_sets() {
    let repo = local_repo();
    let table_a = uplinked_table(&repo, TargetType::LongCadence, 1, 3).await;
    support::target_list_set(&repo, "A", &table_a).await;

    let setter = SupplementalTargetListSetSetter::new(repo.clone());
    let err = setter.set("A", "missing").await.unwrap_err();
    assert!(matches!(err, TadError::NotFound(ref what) if what.contains("missing")));
}

#[tokio::test]
async fn test_shifter_moves_every_aperture() {
    let repo = local_repo();
    let table = uplinked_table(&repo, TargetType::LongCadence, 1, 1).await;
    support::target_list_set(&repo, "q1", &table).await;

    let mut kept = target(&table, 2, 1, 100);
    kept.aperture = Some(aperture(10, 20, block(2, 2)));
    store(&repo, kept).await;
    let mut rejected = target(&table, 2, 1, 101);
    rejected.aperture = Some(aperture(30, 40, block(1, 1)));
    rejected.rejected = true;
    store(&repo, rejected).await;
    store(&repo, target(&table, 2, 1, 102)).await;

    let shifter = ApertureShifter::new(repo.clone());
    let shifted = run_in_transaction(repo.as_ref(), || shifter.shift("q1", -3))
        .await
        .unwrap();
    assert_eq!(shifted, 2);

    let crud = TargetCrud::new(repo.clone());
    let targets = crud
        .retrieve_observed_targets_plus_rejected(&table)
        .await
        .unwrap();
    let reference = |kepler_id: i32| {
        let a = targets
            .iter()
            .find(|t| t.kepler_id() == kepler_id)
            .and_then(|t| t.aperture())
            .unwrap();
        (a.reference_row, a.reference_column)
    };
    assert_eq!(reference(100), (7, 17));
    assert_eq!(reference(101), (27, 37));
}

#[tokio::test]
async fn test_comparator_counts_clipped_and_divergent_targets() {
    let repo = local_repo();
    let old_table = uplinked_table(&repo, TargetType::LongCadence, 1, 2).await;
    let new_table = uplinked_table(&repo, TargetType::LongCadence, 2, 2).await;
    support::target_list_set(&repo, "old", &old_table).await;
    support::target_list_set(&repo, "new", &new_table).await;
    let mask = masks(&repo, vec![block(2, 2)]).await.remove(0);

    for kepler_id in [100, 101, 102] {
        let mut old = target(&old_table, 2, 1, kepler_id);
        old.aperture = Some(aperture(10, 10, block(2, 2)));
        old.target_definitions
            .push(definition(2, 1, kepler_id, &mask, 10, 10));
        store(&repo, old).await;
    }

    let mut inside = target(&new_table, 2, 1, 100);
    inside.aperture = Some(aperture(10, 10, block(2, 2)));
    store(&repo, inside).await;
    let mut clipped = target(&new_table, 2, 1, 101);
    clipped.aperture = Some(aperture(10, 10, block(2, 3)));
    store(&repo, clipped).await;
    let mut extra = target(&new_table, 2, 1, 103);
    extra.aperture = Some(aperture(0, 0, block(1, 1)));
    store(&repo, extra).await;

    let comparator = TargetTableComparator::new(repo.clone());
    let report = comparator
        .compare_target_list_sets("old", "new")
        .await
        .unwrap();

    assert_eq!(report.mod_outs_compared, 84);
    assert_eq!(report.mod_outs_with_divergent_targets, 1);
    assert_eq!(report.clipped_targets, 1);
    assert_eq!(report.clipped_pixels, 2);
    assert_eq!(report.missing_kepler_ids.iter().copied().collect::<Vec<_>>(), vec![102]);
    assert_eq!(report.extra_kepler_ids.iter().copied().collect::<Vec<_>>(), vec![103]);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn test_comparator_rejects_season_mismatch() {
    let repo = local_repo();
    let old_table = uplinked_table(&repo, TargetType::LongCadence, 1, 2).await;
    let new_table = uplinked_table(&repo, TargetType::LongCadence, 2, 3).await;

    let comparator = TargetTableComparator::new(repo.clone());
    let err = comparator.compare(&old_table, &new_table).await.unwrap_err();
    assert!(matches!(err, TadError::SeasonMismatch { .. }));
}
