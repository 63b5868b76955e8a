//! In-memory repository behaviour: concurrent access, health toggling and
//! shared state between clones.

use std::sync::Arc;

use kepler_tad::db::query::TargetTableFilter;
use kepler_tad::db::repositories::LocalRepository;
use kepler_tad::db::{RepositoryError, TargetRepository, TransactionRepository};
use kepler_tad::models::{MaskTable, MaskType, ObservedTarget, TargetTable, TargetType};

// =========================================================
// Concurrent Access Tests
// =========================================================

#[tokio::test]
async fn test_concurrent_target_table_creation() {
    let repo = Arc::new(LocalRepository::new());

    let mut handles = vec![];
    for external_id in 0..10 {
        let repo_clone = Arc::clone(&repo);
        handles.push(tokio::spawn(async move {
            repo_clone
                .create_target_table(
                    &TargetTable::new(TargetType::LongCadence).with_external_id(external_id),
                )
                .await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let table = handle.await.unwrap().unwrap();
        ids.push(table.id.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 10);

    let tables = repo
        .find_target_tables(&TargetTableFilter::any())
        .await
        .unwrap();
    assert_eq!(tables.len(), 10);
}

#[tokio::test]
async fn test_concurrent_readers_and_writers() {
    let repo = Arc::new(LocalRepository::new());
    let table = repo
        .create_target_table(&TargetTable::new(TargetType::ShortCadence))
        .await
        .unwrap();
    let table_id = table.id.unwrap();

    let mut readers = vec![];
    for _ in 0..10 {
        let repo_clone = Arc::clone(&repo);
        readers.push(tokio::spawn(async move {
            repo_clone.get_target_table(table_id).await
        }));
    }
    let mut writers = vec![];
    for kepler_id in 0..20 {
        let repo_clone = Arc::clone(&repo);
        writers.push(tokio::spawn(async move {
            repo_clone
                .create_observed_target(&ObservedTarget::new(Some(table_id), 2, 1, kepler_id))
                .await
        }));
    }

    for reader in readers {
        assert!(reader.await.unwrap().unwrap().is_some());
    }
    for writer in writers {
        assert!(writer.await.unwrap().is_ok());
    }
    assert_eq!(repo.observed_target_count().unwrap(), 20);
}

// =========================================================
// Health and lifecycle
// =========================================================

#[tokio::test]
async fn test_unhealthy_repository_rejects_writes() {
    let repo = LocalRepository::new();
    repo.set_healthy(false).unwrap();

    assert!(!repo.health_check().await.unwrap());
    let err = repo
        .create_target_table(&TargetTable::new(TargetType::LongCadence))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::ConnectionError { .. }));
    assert!(repo
        .create_mask_table(&MaskTable::new(MaskType::Target))
        .await
        .is_err());
    assert!(repo.begin_transaction().await.is_err());

    repo.set_healthy(true).unwrap();
    assert!(repo.health_check().await.unwrap());
    assert!(repo
        .create_target_table(&TargetTable::new(TargetType::LongCadence))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_clear_drops_records_but_keeps_health() {
    let repo = LocalRepository::new();
    let table = repo
        .create_target_table(&TargetTable::new(TargetType::Background))
        .await
        .unwrap();
    repo.create_observed_target(&ObservedTarget::new(table.id, 4, 4, 42))
        .await
        .unwrap();
    repo.set_healthy(false).unwrap();

    repo.clear().unwrap();
    assert_eq!(repo.observed_target_count().unwrap(), 0);
    assert!(!repo.health_check().await.unwrap());
}

#[tokio::test]
async fn test_cloned_repository_shares_state() {
    let repo = LocalRepository::new();
    let clone = repo.clone();

    let table = clone
        .create_target_table(&TargetTable::new(TargetType::LongCadence))
        .await
        .unwrap();
    let seen = repo.get_target_table(table.id.unwrap()).await.unwrap();
    assert_eq!(seen, Some(table));
}

#[tokio::test]
async fn test_nested_transactions_are_rejected() {
    let repo = LocalRepository::new();
    repo.begin_transaction().await.unwrap();
    assert!(repo.begin_transaction().await.is_err());
    repo.rollback_transaction().await.unwrap();
    assert!(repo.begin_transaction().await.is_ok());
}

#[test]
fn test_repository_default_trait() {
    let repo = LocalRepository::default();
    assert_eq!(repo.observed_target_count().unwrap(), 0);
}
