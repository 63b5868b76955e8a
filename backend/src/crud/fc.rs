//! Flat field model queries.
//!
//! Flat fields are versioned by a [`History`]; within one history a large
//! flat field is valid from its start time until the next one starts.

use std::sync::Arc;

use super::error::{at_most_one, TadError, TadResult};
use crate::db::query::LargeFlatFieldQuery;
use crate::db::{FcRepository, FullRepository};
use crate::models::{History, HistoryId, HistoryModelName, LargeFlatField, SmallFlatFieldImage};

#[derive(Clone)]
pub struct FcCrud {
    repo: Arc<dyn FullRepository>,
}

impl FcCrud {
    pub fn new(repo: Arc<dyn FullRepository>) -> Self {
        Self { repo }
    }

    pub async fn create_history(&self, history: &History) -> TadResult<History> {
        Ok(self.repo.create_history(history).await?)
    }

    /// The most recently ingested history of a model family.
    pub async fn retrieve_history(&self, model_type: HistoryModelName) -> TadResult<Option<History>> {
        let mut histories = self.repo.find_histories(model_type).await?;
        Ok(histories.pop())
    }

    pub async fn create_large_flat_field(&self, flat_field: &LargeFlatField) -> TadResult<LargeFlatField> {
        Ok(self.repo.create_large_flat_field(flat_field).await?)
    }

    pub async fn create_large_flat_fields(
        &self,
        flat_fields: &[LargeFlatField],
    ) -> TadResult<Vec<LargeFlatField>> {
        let mut created = Vec::with_capacity(flat_fields.len());
        for flat_field in flat_fields {
            created.push(self.repo.create_large_flat_field(flat_field).await?);
        }
        Ok(created)
    }

    pub async fn create_small_flat_field_image(
        &self,
        image: &SmallFlatFieldImage,
    ) -> TadResult<SmallFlatFieldImage> {
        Ok(self.repo.create_small_flat_field_image(image).await?)
    }

    /// Every flat of a module/output in the history, by start time.
    pub async fn retrieve_large_flat_fields(
        &self,
        ccd_module: i32,
        ccd_output: i32,
        history: &History,
    ) -> TadResult<Vec<LargeFlatField>> {
        let query =
            LargeFlatFieldQuery::for_history(saved_id(history)?).at_module_output(ccd_module, ccd_output);
        Ok(self.repo.find_large_flat_fields(&query).await?)
    }

    /// The flat in effect at `mjd`: the latest one starting at or before it,
    /// or the earliest one when all start later.
    pub async fn retrieve_large_flat_field(
        &self,
        mjd: f64,
        ccd_module: i32,
        ccd_output: i32,
        history: &History,
    ) -> TadResult<Option<LargeFlatField>> {
        let flats = self
            .retrieve_large_flat_fields(ccd_module, ccd_output, history)
            .await?;
        Ok(flat_in_effect(flats, mjd))
    }

    /// Flats starting in `[start, end]`, plus the one in effect at `start`
    /// and the first one after `end`.
    pub async fn retrieve_large_flat_fields_between(
        &self,
        start: f64,
        end: f64,
        ccd_module: i32,
        ccd_output: i32,
        history: &History,
    ) -> TadResult<Vec<LargeFlatField>> {
        let flats = self
            .retrieve_large_flat_fields(ccd_module, ccd_output, history)
            .await?;
        Ok(flats_covering(flats, start, end))
    }

    /// The flat starting exactly at `mjd`.
    pub async fn retrieve_large_flat_field_exact(
        &self,
        mjd: f64,
        ccd_module: i32,
        ccd_output: i32,
        history: &History,
    ) -> TadResult<Option<LargeFlatField>> {
        let query = LargeFlatFieldQuery::for_history(saved_id(history)?)
            .at_module_output(ccd_module, ccd_output)
            .starting_between(mjd, mjd);
        let flats = self.repo.find_large_flat_fields(&query).await?;
        at_most_one(flats, "large flat field")
    }

    /// The earliest flat starting at or after `mjd`.
    pub async fn retrieve_next_large_flat_field(
        &self,
        mjd: f64,
        ccd_module: i32,
        ccd_output: i32,
        history: &History,
    ) -> TadResult<Option<LargeFlatField>> {
        let flats = self
            .retrieve_large_flat_fields(ccd_module, ccd_output, history)
            .await?;
        Ok(flats.into_iter().find(|f| f.start_time >= mjd))
    }

    pub async fn retrieve_most_recent_large_flat_field(
        &self,
        history: &History,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<Option<LargeFlatField>> {
        let mut flats = self
            .retrieve_large_flat_fields(ccd_module, ccd_output, history)
            .await?;
        Ok(flats.pop())
    }

    /// Distinct start times in `[start, end]` over every module/output.
    pub async fn retrieve_unique_large_flat_field_dates(
        &self,
        start: f64,
        end: f64,
        history: &History,
    ) -> TadResult<Vec<f64>> {
        let query = LargeFlatFieldQuery::for_history(saved_id(history)?).starting_between(start, end);
        let mut dates: Vec<f64> = self
            .repo
            .find_large_flat_fields(&query)
            .await?
            .iter()
            .map(|f| f.start_time)
            .collect();
        dates.sort_by(f64::total_cmp);
        dates.dedup();
        Ok(dates)
    }

    /// The image measured last, or `None` when the history has none for the
    /// module/output.
    pub async fn retrieve_most_recent_small_flat_field_image(
        &self,
        history: &History,
        ccd_module: i32,
        ccd_output: i32,
    ) -> TadResult<Option<SmallFlatFieldImage>> {
        let images = self
            .repo
            .find_small_flat_field_images(saved_id(history)?, ccd_module, ccd_output)
            .await?;
        Ok(images
            .into_iter()
            .reduce(|latest, image| if image.mjd >= latest.mjd { image } else { latest }))
    }
}

/// `flats` must be ordered by start time.
pub(crate) fn flat_in_effect(flats: Vec<LargeFlatField>, mjd: f64) -> Option<LargeFlatField> {
    let preceding = flats.iter().rposition(|f| f.start_time <= mjd);
    let index = preceding.unwrap_or(0);
    flats.into_iter().nth(index)
}

/// `flats` must be ordered by start time.
pub(crate) fn flats_covering(flats: Vec<LargeFlatField>, start: f64, end: f64) -> Vec<LargeFlatField> {
    let before = flats.iter().rposition(|f| f.start_time < start);
    let after = flats.iter().position(|f| f.start_time > end);

    flats
        .into_iter()
        .enumerate()
        .filter(|(index, f)| {
            Some(*index) == before
                || Some(*index) == after
                || (f.start_time >= start && f.start_time <= end)
        })
        .map(|(_, f)| f)
        .collect()
}

fn saved_id(history: &History) -> TadResult<HistoryId> {
    history.id.ok_or_else(|| {
        TadError::IllegalArgument(format!(
            "{} history version {} has not been stored",
            history.model_type, history.version
        ))
    })
}
