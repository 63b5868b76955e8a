//! Flat field lookups against a versioned FC history.

mod support;

use chrono::{Duration, Utc};
use kepler_tad::crud::{FcCrud, TadError};
use kepler_tad::models::{History, HistoryModelName, LargeFlatField, SmallFlatFieldImage};

use support::local_repo;

async fn history_with_flats(crud: &FcCrud, starts: &[f64]) -> History {
    let history = crud
        .create_history(&History::new(
            Utc::now(),
            HistoryModelName::LargeFlatField,
            "flats",
            1,
        ))
        .await
        .unwrap();
    let hid = history.id.unwrap();
    let flats: Vec<LargeFlatField> = starts
        .iter()
        .map(|&start| LargeFlatField::new(hid, start, 2, 1, vec![1.0, 0.5]))
        .collect();
    crud.create_large_flat_fields(&flats).await.unwrap();
    crud.create_large_flat_field(&LargeFlatField::new(hid, 55050.0, 3, 1, vec![1.0]))
        .await
        .unwrap();
    history
}

fn starts(flats: &[LargeFlatField]) -> Vec<f64> {
    flats.iter().map(|f| f.start_time).collect()
}

#[tokio::test]
async fn test_history_retrieval_returns_latest_ingest() {
    let crud = FcCrud::new(local_repo());
    let now = Utc::now();
    for (offset, version) in [(2, 2), (0, 3), (5, 1)] {
        crud.create_history(&History::new(
            now - Duration::days(offset),
            HistoryModelName::SmallFlatField,
            format!("v{}", version),
            version,
        ))
        .await
        .unwrap();
    }

    let latest = crud
        .retrieve_history(HistoryModelName::SmallFlatField)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.version, 3);
    assert!(crud
        .retrieve_history(HistoryModelName::LargeFlatField)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_flat_in_effect_at_time() {
    let crud = FcCrud::new(local_repo());
    let history = history_with_flats(&crud, &[55100.0, 55000.0, 55200.0]).await;

    let all = crud.retrieve_large_flat_fields(2, 1, &history).await.unwrap();
    assert_eq!(starts(&all), vec![55000.0, 55100.0, 55200.0]);

    let at = |mjd: f64| {
        let crud = crud.clone();
        let history = history.clone();
        async move {
            crud.retrieve_large_flat_field(mjd, 2, 1, &history)
                .await
                .unwrap()
                .map(|f| f.start_time)
        }
    };
    assert_eq!(at(55150.0).await, Some(55100.0));
    assert_eq!(at(55100.0).await, Some(55100.0));
    assert_eq!(at(54000.0).await, Some(55000.0));
    assert_eq!(at(60000.0).await, Some(55200.0));

    let empty = crud.retrieve_large_flat_field(55100.0, 9, 9, &history).await.unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn test_flats_between_include_boundary_neighbours() {
    let crud = FcCrud::new(local_repo());
    let history =
        history_with_flats(&crud, &[55000.0, 55100.0, 55200.0, 55300.0, 55400.0]).await;

    let between = crud
        .retrieve_large_flat_fields_between(55150.0, 55250.0, 2, 1, &history)
        .await
        .unwrap();
    assert_eq!(starts(&between), vec![55100.0, 55200.0, 55300.0]);

    let exact_edges = crud
        .retrieve_large_flat_fields_between(55100.0, 55200.0, 2, 1, &history)
        .await
        .unwrap();
    assert_eq!(
        starts(&exact_edges),
        vec![55000.0, 55100.0, 55200.0, 55300.0]
    );
}

#[tokio::test]
async fn test_exact_next_and_most_recent_flats() {
    let crud = FcCrud::new(local_repo());
    let history = history_with_flats(&crud, &[55000.0, 55100.0]).await;

    let exact = crud
        .retrieve_large_flat_field_exact(55100.0, 2, 1, &history)
        .await
        .unwrap();
    assert_eq!(exact.map(|f| f.start_time), Some(55100.0));
    assert!(crud
        .retrieve_large_flat_field_exact(55050.0, 2, 1, &history)
        .await
        .unwrap()
        .is_none());

    let next = crud
        .retrieve_next_large_flat_field(55001.0, 2, 1, &history)
        .await
        .unwrap();
    assert_eq!(next.map(|f| f.start_time), Some(55100.0));
    assert!(crud
        .retrieve_next_large_flat_field(55101.0, 2, 1, &history)
        .await
        .unwrap()
        .is_none());

    let recent = crud
        .retrieve_most_recent_large_flat_field(&history, 2, 1)
        .await
        .unwrap();
    assert_eq!(recent.map(|f| f.start_time), Some(55100.0));
}

#[tokio::test]
async fn test_duplicate_exact_flats_are_not_unique() {
    let crud = FcCrud::new(local_repo());
    let history = history_with_flats(&crud, &[55000.0, 55000.0]).await;

    let err = crud
        .retrieve_large_flat_field_exact(55000.0, 2, 1, &history)
        .await
        .unwrap_err();
    assert!(matches!(err, TadError::NonUniqueResult { .. }));
}

#[tokio::test]
async fn test_unique_dates_span_all_module_outputs() {
    let crud = FcCrud::new(local_repo());
    let history = history_with_flats(&crud, &[55000.0, 55050.0, 55100.0]).await;

    let dates = crud
        .retrieve_unique_large_flat_field_dates(55000.0, 55060.0, &history)
        .await
        .unwrap();
    assert_eq!(dates, vec![55000.0, 55050.0]);
}

#[tokio::test]
async fn test_most_recent_small_flat_image() {
    let crud = FcCrud::new(local_repo());
    let history = crud
        .create_history(&History::new(
            Utc::now(),
            HistoryModelName::SmallFlatField,
            "images",
            1,
        ))
        .await
        .unwrap();
    let hid = history.id.unwrap();
    for mjd in [55300.0, 55500.0, 55400.0] {
        crud.create_small_flat_field_image(&SmallFlatFieldImage::new(
            hid,
            mjd,
            7,
            3,
            vec![vec![1.0; 2]; 2],
            vec![vec![0.1; 2]; 2],
        ))
        .await
        .unwrap();
    }

    let latest = crud
        .retrieve_most_recent_small_flat_field_image(&history, 7, 3)
        .await
        .unwrap();
    assert_eq!(latest.map(|i| i.mjd), Some(55500.0));
    assert!(crud
        .retrieve_most_recent_small_flat_field_image(&history, 7, 4)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unsaved_history_is_rejected() {
    let crud = FcCrud::new(local_repo());
    let unsaved = History::new(Utc::now(), HistoryModelName::LargeFlatField, "draft", 0);

    let err = crud
        .retrieve_large_flat_fields(2, 1, &unsaved)
        .await
        .unwrap_err();
    assert!(matches!(err, TadError::IllegalArgument(_)));
}
