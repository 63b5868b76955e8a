//! Helpers shared by the integration tests: scoped environment variables and
//! TAD fixtures on a fresh [`LocalRepository`].

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use kepler_tad::db::repositories::LocalRepository;
use kepler_tad::db::{FullRepository, TargetRepository, TargetSelectionRepository};
use kepler_tad::models::{
    Aperture, Mask, MaskTable, MaskType, ObservedTarget, Offset, State, TargetDefinition,
    TargetListSet, TargetTable, TargetType,
};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// This is panic-safe (restores variables on unwind) and also serializes access to
/// process-global env vars to avoid flaky tests when Rust runs tests in parallel.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().expect("ENV_LOCK poisoned");
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

/// A fresh in-memory repository behind the trait object the façades take.
pub fn local_repo() -> Arc<dyn FullRepository> {
    Arc::new(LocalRepository::new())
}

/// Stores an uplinked target table.
pub async fn uplinked_table(
    repo: &Arc<dyn FullRepository>,
    target_type: TargetType,
    external_id: i32,
    observing_season: i32,
) -> TargetTable {
    repo.create_target_table(
        &TargetTable::new(target_type)
            .with_external_id(external_id)
            .with_state(State::Uplinked)
            .with_observing_season(observing_season),
    )
    .await
    .unwrap()
}

/// Stores a target list set that was turned into `table`.
pub async fn target_list_set(
    repo: &Arc<dyn FullRepository>,
    name: &str,
    table: &TargetTable,
) -> TargetListSet {
    repo.create_target_list_set(&TargetListSet::new(name).with_target_table(table.id.unwrap()))
        .await
        .unwrap()
}

/// Links `supp` as the supplemental target list set of `orig`.
pub async fn link_supplemental(
    repo: &Arc<dyn FullRepository>,
    orig: &TargetListSet,
    supp: &TargetListSet,
) {
    let mut orig = orig.clone();
    orig.supplemental_tls_id = supp.id;
    repo.update_target_list_set(&orig).await.unwrap();
}

/// Offsets of a `rows` x `columns` block anchored at the reference pixel.
pub fn block(rows: i32, columns: i32) -> Vec<Offset> {
    (0..rows)
        .flat_map(|r| (0..columns).map(move |c| Offset::new(r, c)))
        .collect()
}

pub fn aperture(reference_row: i32, reference_column: i32, offsets: Vec<Offset>) -> Aperture {
    Aperture::new(false, reference_row, reference_column, offsets)
}

/// Stores a target mask table with one mask per offset list.
pub async fn masks(repo: &Arc<dyn FullRepository>, offsets: Vec<Vec<Offset>>) -> Vec<Mask> {
    let table = repo
        .create_mask_table(&MaskTable::new(MaskType::Target).with_state(State::Uplinked))
        .await
        .unwrap();
    let mut stored = Vec::new();
    for (index, offsets) in offsets.into_iter().enumerate() {
        let mut mask = Mask::new(table.id.unwrap(), offsets);
        mask.index_in_table = index as i32;
        stored.push(repo.create_mask(&mask).await.unwrap());
    }
    stored
}

/// A target definition placing `mask` at the given reference pixel.
pub fn definition(
    ccd_module: i32,
    ccd_output: i32,
    kepler_id: i32,
    mask: &Mask,
    reference_row: i32,
    reference_column: i32,
) -> TargetDefinition {
    let mut definition = TargetDefinition::new(ccd_module, ccd_output, kepler_id);
    definition.mask = Some(mask.clone());
    definition.reference_row = reference_row;
    definition.reference_column = reference_column;
    definition
}

/// An unsaved observed target on `table`.
pub fn target(table: &TargetTable, ccd_module: i32, ccd_output: i32, kepler_id: i32) -> ObservedTarget {
    ObservedTarget::new(table.id, ccd_module, ccd_output, kepler_id)
}

pub async fn store(repo: &Arc<dyn FullRepository>, target: ObservedTarget) -> ObservedTarget {
    repo.create_observed_target(&target).await.unwrap()
}
