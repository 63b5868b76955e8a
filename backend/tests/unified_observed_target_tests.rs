//! Unified view over an original TAD run and its supplemental run.

mod support;

use std::sync::Arc;

use kepler_tad::crud::{ClipReport, ClipReportFactory, UnifiedObservedTargetCrud};
use kepler_tad::models::{Aperture, TargetDefinition, TargetType, TargetView};

use support::{aperture, block, definition, local_repo, masks, store, target, uplinked_table};

const CYG16_A: i32 = 12069424;

#[tokio::test]
async fn test_unified_targets_merge_supplemental_run() {
    let repo = local_repo();
    let orig_table = uplinked_table(&repo, TargetType::LongCadence, 1, 2).await;
    let supp_table = uplinked_table(&repo, TargetType::LongCadence, 2, 2).await;
    let orig_tls = support::target_list_set(&repo, "q2", &orig_table).await;
    let supp_tls = support::target_list_set(&repo, "q2-supp", &supp_table).await;
    support::link_supplemental(&repo, &orig_tls, &supp_tls).await;
    let mask = masks(&repo, vec![block(2, 2)]).await.remove(0);

    for kepler_id in [100, 101, CYG16_A] {
        let mut orig = target(&orig_table, 2, 1, kepler_id);
        orig.aperture = Some(aperture(10, 10, block(2, 2)));
        orig.crowding_metric = 0.5;
        orig.target_definitions
            .push(definition(2, 1, kepler_id, &mask, 10, 10));
        store(&repo, orig).await;
    }
    let mut rejected = target(&orig_table, 2, 1, 102);
    rejected.rejected = true;
    store(&repo, rejected).await;

    for kepler_id in [100, CYG16_A] {
        let mut supp = target(&supp_table, 2, 1, kepler_id);
        supp.aperture = Some(aperture(10, 10, block(3, 3)));
        supp.crowding_metric = 0.8;
        store(&repo, supp).await;
    }

    let crud = UnifiedObservedTargetCrud::new(repo.clone());
    let unified = crud
        .retrieve_unified_observed_targets(&orig_table, 2, 1, &[100, 101, 102, CYG16_A])
        .await
        .unwrap();
    assert_eq!(unified.keys().copied().collect::<Vec<_>>(), vec![100, 101, CYG16_A]);

    let served = &unified[&100];
    assert!(!served.was_dropped_by_supplemental_tad());
    assert_eq!(served.aperture().unwrap().pixel_count(), 9);
    assert_eq!(served.crowding_metric(), 0.8);
    assert_eq!(served.target_definitions().len(), 1);
    assert_eq!(served.target_table_id(), orig_table.id);
    assert_eq!(served.clipped_pixel_count(), 5);

    let dropped = &unified[&101];
    assert!(dropped.was_dropped_by_supplemental_tad());
    assert!(dropped.aperture().unwrap().is_empty());
    assert_eq!(dropped.crowding_metric(), 0.5);
    assert_eq!(dropped.clipped_pixel_count(), 0);

    assert_eq!(unified[&CYG16_A].clipped_pixel_count(), 0);
    assert_eq!(unified[&CYG16_A].aperture().unwrap().pixel_count(), 9);
}

#[tokio::test]
async fn test_unified_targets_without_supplemental_run() {
    let repo = local_repo();
    let table = uplinked_table(&repo, TargetType::ShortCadence, 3, 1).await;
    let mask = masks(&repo, vec![block(1, 2)]).await.remove(0);

    let mut orig = target(&table, 5, 2, 400);
    orig.aperture = Some(aperture(0, 0, block(2, 2)));
    orig.target_definitions.push(definition(5, 2, 400, &mask, 0, 0));
    store(&repo, orig).await;

    let crud = UnifiedObservedTargetCrud::new(repo.clone());
    let unified = crud
        .retrieve_unified_observed_targets(&table, 5, 2, &[400])
        .await
        .unwrap();
    let only = &unified[&400];
    assert!(!only.was_dropped_by_supplemental_tad());
    assert_eq!(only.clipped_pixel_count(), 2);
}

struct FixedClipReports(usize);

impl ClipReportFactory for FixedClipReports {
    fn clip_report(&self, _definitions: &[TargetDefinition], aperture: &Aperture) -> ClipReport {
        ClipReport {
            clipped_pixels: aperture.pixels().into_iter().take(self.0).collect(),
            definition_counts: Vec::new(),
        }
    }
}

#[tokio::test]
async fn test_injected_clip_report_factory_is_used() {
    let repo = local_repo();
    let table = uplinked_table(&repo, TargetType::LongCadence, 4, 1).await;
    let mut orig = target(&table, 2, 2, 500);
    orig.aperture = Some(aperture(0, 0, block(3, 3)));
    store(&repo, orig).await;

    let crud = UnifiedObservedTargetCrud::with_clip_report_factory(
        repo.clone(),
        Arc::new(FixedClipReports(4)),
    );
    let unified = crud
        .retrieve_unified_observed_targets(&table, 2, 2, &[500])
        .await
        .unwrap();
    assert_eq!(unified[&500].clipped_pixel_count(), 4);
}

#[tokio::test]
async fn test_kepler_ids_in_range_skip_rejected() {
    let repo = local_repo();
    let table = uplinked_table(&repo, TargetType::LongCadence, 1, 1).await;
    for kepler_id in [99, 100, 101, 150, 200] {
        let mut observed = target(&table, 2, 1, kepler_id);
        observed.rejected = kepler_id == 101;
        store(&repo, observed).await;
    }
    store(&repo, target(&table, 3, 1, 120)).await;

    let crud = UnifiedObservedTargetCrud::new(repo.clone());
    let ids = crud
        .retrieve_kepler_ids(&table, 2, 1, 100, 150)
        .await
        .unwrap();
    assert_eq!(ids, vec![100, 150]);
}

#[tokio::test]
async fn test_unified_targets_span_in_list_chunks() {
    let repo = local_repo();
    let orig_table = uplinked_table(&repo, TargetType::LongCadence, 1, 4).await;
    let supp_table = uplinked_table(&repo, TargetType::LongCadence, 2, 4).await;
    let orig_tls = support::target_list_set(&repo, "q4", &orig_table).await;
    let supp_tls = support::target_list_set(&repo, "q4-supp", &supp_table).await;
    support::link_supplemental(&repo, &orig_tls, &supp_tls).await;

    for kepler_id in 1..=1100 {
        let mut orig = target(&orig_table, 2, 1, kepler_id);
        orig.aperture = Some(aperture(0, 0, block(1, 1)));
        store(&repo, orig).await;
        if kepler_id % 2 == 0 {
            let mut supp = target(&supp_table, 2, 1, kepler_id);
            supp.aperture = Some(aperture(0, 0, block(1, 2)));
            store(&repo, supp).await;
        }
    }

    let requested: Vec<i32> = (1..=1250).rev().collect();
    let crud = UnifiedObservedTargetCrud::new(repo.clone());
    let unified = crud
        .retrieve_unified_observed_targets(&orig_table, 2, 1, &requested)
        .await
        .unwrap();

    assert_eq!(
        unified.keys().copied().collect::<Vec<_>>(),
        (1..=1100).collect::<Vec<_>>()
    );
    assert!(!unified[&1000].was_dropped_by_supplemental_tad());
    assert_eq!(unified[&1000].aperture().unwrap().pixel_count(), 2);
    assert!(unified[&1001].was_dropped_by_supplemental_tad());
    assert!(!unified[&2].was_dropped_by_supplemental_tad());
    assert!(unified[&1099].was_dropped_by_supplemental_tad());
}
