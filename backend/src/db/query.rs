//! Typed query descriptions shared by every repository backend.
//!
//! Façades never build SQL text. They describe what they want with the filter
//! structs below and each backend translates them (Diesel query DSL for
//! Postgres, iterator filters for the in-memory store).

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, Utc};

use crate::models::{
    HistoryId, MaskTable, MaskType, ObservedTarget, PipelineInstanceId, State, TargetDefinition,
    TargetTable, TargetTableId, TargetType,
};

/// Upper bound on the number of values bound into one `IN (...)` list.
pub const MAX_EXPRESSIONS: usize = 1000;

/// Child-then-parent statement order used when deleting a target table.
pub const TARGET_TABLE_DELETE_ORDER: [&str; 9] = [
    "tad_obs_target_target_defs",
    "tad_target_definition",
    "tad_observed_target_labels",
    "tad_observed_target",
    "tad_aperture_offsets",
    "tad_aperture",
    "tad_image",
    "tad_report",
    "tad_target_table",
];

/// Child-then-parent statement order used when deleting a mask table.
pub const MASK_TABLE_DELETE_ORDER: [&str; 3] = ["tad_mask_offsets", "tad_mask", "tad_mask_table"];

/// Statement order used when deleting the supermasks of a mask table. The
/// target definition step clears mask references rather than deleting rows.
pub const SUPERMASK_DELETE_ORDER: [&str; 3] =
    ["tad_mask_offsets", "tad_target_definition", "tad_mask"];

/// Splits an `IN`-list parameter into chunks of at most [`MAX_EXPRESSIONS`].
pub fn in_list_chunks<T>(values: &[T]) -> std::slice::Chunks<'_, T> {
    values.chunks(MAX_EXPRESSIONS)
}

/// Drops every item whose key was already seen, keeping first-seen order.
pub fn dedup_by_key<T, K, F>(items: impl IntoIterator<Item = T>, mut key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Rows removed by one delete statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedRows {
    pub table: &'static str,
    pub rows: usize,
}

impl DeletedRows {
    pub fn new(table: &'static str, rows: usize) -> Self {
        Self { table, rows }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetTableFilter {
    /// Empty matches every type.
    pub target_types: Vec<TargetType>,
    /// Empty matches every external id.
    pub external_ids: Vec<i32>,
    pub state: Option<State>,
    /// Tables planned entirely inside `[start, end]`.
    pub planned_within: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl TargetTableFilter {
    pub fn of_type(target_type: TargetType) -> Self {
        Self {
            target_types: vec![target_type],
            ..Default::default()
        }
    }

    pub fn of_types(target_types: &[TargetType]) -> Self {
        Self {
            target_types: target_types.to_vec(),
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn in_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_external_id(mut self, external_id: i32) -> Self {
        self.external_ids = vec![external_id];
        self
    }

    pub fn with_external_ids(mut self, external_ids: Vec<i32>) -> Self {
        self.external_ids = external_ids;
        self
    }

    pub fn planned_within(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.planned_within = Some((start, end));
        self
    }

    pub fn matches(&self, table: &TargetTable) -> bool {
        if !self.target_types.is_empty() && !self.target_types.contains(&table.target_type) {
            return false;
        }
        if !self.external_ids.is_empty() && !self.external_ids.contains(&table.external_id) {
            return false;
        }
        if self.state.is_some_and(|state| state != table.state) {
            return false;
        }
        match self.planned_within {
            None => true,
            Some((start, end)) => matches!(
                (table.planned_start_time, table.planned_end_time),
                (Some(s), Some(e)) if s >= start && e <= end
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskTableFilter {
    pub mask_type: Option<MaskType>,
    pub external_ids: Vec<i32>,
    pub state: Option<State>,
}

impl MaskTableFilter {
    pub fn of_type(mask_type: MaskType) -> Self {
        Self {
            mask_type: Some(mask_type),
            ..Default::default()
        }
    }

    pub fn in_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_external_id(mut self, external_id: i32) -> Self {
        self.external_ids = vec![external_id];
        self
    }

    pub fn matches(&self, table: &MaskTable) -> bool {
        self.mask_type.map_or(true, |t| t == table.mask_type)
            && (self.external_ids.is_empty() || self.external_ids.contains(&table.external_id))
            && self.state.map_or(true, |s| s == table.state)
    }
}

/// Which kepler ids a query covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum KeplerIdSelection {
    #[default]
    All,
    /// An explicit `IN` list; callers chunk it at [`MAX_EXPRESSIONS`].
    Ids(Vec<i32>),
    /// Inclusive range.
    Range { min: i32, max: i32 },
}

impl KeplerIdSelection {
    pub fn contains(&self, kepler_id: i32) -> bool {
        match self {
            KeplerIdSelection::All => true,
            KeplerIdSelection::Ids(ids) => ids.contains(&kepler_id),
            KeplerIdSelection::Range { min, max } => (*min..=*max).contains(&kepler_id),
        }
    }
}

/// Observed targets of one target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTargetQuery {
    pub target_table_id: TargetTableId,
    pub module_output: Option<(i32, i32)>,
    pub kepler_ids: KeplerIdSelection,
    pub include_rejected: bool,
}

impl ObservedTargetQuery {
    /// Non-rejected targets of the whole table.
    pub fn for_table(target_table_id: TargetTableId) -> Self {
        Self {
            target_table_id,
            module_output: None,
            kepler_ids: KeplerIdSelection::All,
            include_rejected: false,
        }
    }

    pub fn at_module_output(mut self, ccd_module: i32, ccd_output: i32) -> Self {
        self.module_output = Some((ccd_module, ccd_output));
        self
    }

    pub fn with_kepler_ids(mut self, kepler_ids: Vec<i32>) -> Self {
        self.kepler_ids = KeplerIdSelection::Ids(kepler_ids);
        self
    }

    pub fn in_kepler_id_range(mut self, min: i32, max: i32) -> Self {
        self.kepler_ids = KeplerIdSelection::Range { min, max };
        self
    }

    pub fn plus_rejected(mut self) -> Self {
        self.include_rejected = true;
        self
    }

    /// The same query against another table.
    pub fn retarget(&self, target_table_id: TargetTableId) -> Self {
        Self {
            target_table_id,
            ..self.clone()
        }
    }

    /// Whole-table scans order by module, output, id; narrower ones by id.
    pub fn orders_by_module_output(&self) -> bool {
        self.module_output.is_none() && self.kepler_ids == KeplerIdSelection::All
    }

    pub fn matches(&self, target: &ObservedTarget) -> bool {
        target.target_table_id == Some(self.target_table_id)
            && self
                .module_output
                .map_or(true, |mo| mo == (target.ccd_module, target.ccd_output))
            && self.kepler_ids.contains(target.kepler_id)
            && (self.include_rejected || !target.rejected)
    }
}

/// One row of the observed target ⟕ target definition join.
///
/// A target with N definitions yields N rows, each carrying a full copy of the
/// target with an empty definition list; a target without definitions yields
/// one row with `definition: None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedTargetRow {
    pub target: ObservedTarget,
    pub definition: Option<TargetDefinition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDefinitionQuery {
    pub target_table_id: TargetTableId,
    pub module_output: Option<(i32, i32)>,
}

impl TargetDefinitionQuery {
    pub fn for_table(target_table_id: TargetTableId) -> Self {
        Self {
            target_table_id,
            module_output: None,
        }
    }

    pub fn at_module_output(mut self, ccd_module: i32, ccd_output: i32) -> Self {
        self.module_output = Some((ccd_module, ccd_output));
        self
    }
}

/// Kepler id projection of observed targets; always non-rejected, distinct and
/// ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeplerIdQuery {
    pub target_table_id: TargetTableId,
    pub module_output: Option<(i32, i32)>,
    pub kepler_ids: KeplerIdSelection,
}

/// Pipeline instance bound on DV result rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstanceSelection {
    #[default]
    Any,
    Exactly(PipelineInstanceId),
    AtMost(PipelineInstanceId),
}

impl InstanceSelection {
    pub fn contains(&self, instance_id: PipelineInstanceId) -> bool {
        match self {
            InstanceSelection::Any => true,
            InstanceSelection::Exactly(id) => instance_id == *id,
            InstanceSelection::AtMost(max) => instance_id <= *max,
        }
    }
}

/// DV result rows joined with the task and instance that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DvResultQuery {
    pub kepler_ids: KeplerIdSelection,
    pub instances: InstanceSelection,
}

impl DvResultQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_kepler_id(kepler_id: i32) -> Self {
        Self {
            kepler_ids: KeplerIdSelection::Ids(vec![kepler_id]),
            ..Default::default()
        }
    }

    pub fn with_kepler_ids(mut self, kepler_ids: KeplerIdSelection) -> Self {
        self.kepler_ids = kepler_ids;
        self
    }

    pub fn with_instances(mut self, instances: InstanceSelection) -> Self {
        self.instances = instances;
        self
    }
}

/// Large flat fields of one history, ordered by start time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LargeFlatFieldQuery {
    pub history_id: HistoryId,
    pub module_output: Option<(i32, i32)>,
    /// Inclusive start time range (MJD).
    pub start_time_range: Option<(f64, f64)>,
}

impl LargeFlatFieldQuery {
    pub fn for_history(history_id: HistoryId) -> Self {
        Self {
            history_id,
            module_output: None,
            start_time_range: None,
        }
    }

    pub fn at_module_output(mut self, ccd_module: i32, ccd_output: i32) -> Self {
        self.module_output = Some((ccd_module, ccd_output));
        self
    }

    pub fn starting_between(mut self, start: f64, end: f64) -> Self {
        self.start_time_range = Some((start, end));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_in_list_chunks_respect_limit() {
        let ids: Vec<i32> = (0..2500).collect();
        let sizes: Vec<usize> = in_list_chunks(&ids).map(<[i32]>::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[test]
    fn test_planned_window_requires_both_times() {
        let start = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2010, 4, 1, 0, 0, 0).unwrap();
        let filter = TargetTableFilter::any().planned_within(start, end);

        let mut table = TargetTable::new(TargetType::LongCadence);
        assert!(!filter.matches(&table));
        table.planned_start_time = Some(start);
        table.planned_end_time = Some(end);
        assert!(filter.matches(&table));
        table.planned_end_time = Some(Utc.with_ymd_and_hms(2010, 4, 2, 0, 0, 0).unwrap());
        assert!(!filter.matches(&table));
    }

    #[test]
    fn test_observed_target_query_ordering_mode() {
        let query = ObservedTargetQuery::for_table(TargetTableId(1));
        assert!(query.orders_by_module_output());
        assert!(!query.clone().at_module_output(2, 1).orders_by_module_output());
        assert!(!query.with_kepler_ids(vec![1]).orders_by_module_output());
    }

    #[test]
    fn test_instance_selection() {
        assert!(InstanceSelection::AtMost(PipelineInstanceId(5)).contains(PipelineInstanceId(5)));
        assert!(!InstanceSelection::AtMost(PipelineInstanceId(5)).contains(PipelineInstanceId(6)));
        assert!(InstanceSelection::Exactly(PipelineInstanceId(2)).contains(PipelineInstanceId(2)));
    }

    proptest! {
        #[test]
        fn prop_dedup_keeps_first_seen(keys in prop::collection::vec(0u8..20, 0..200)) {
            let items: Vec<(u8, usize)> = keys.iter().copied().zip(0..).collect();
            let deduped = dedup_by_key(items.clone(), |(k, _)| *k);

            let distinct: HashSet<u8> = keys.iter().copied().collect();
            prop_assert_eq!(deduped.len(), distinct.len());
            for (key, position) in &deduped {
                let first = items.iter().find(|(k, _)| k == key).map(|(_, p)| *p);
                prop_assert_eq!(Some(*position), first);
            }
            let positions: Vec<usize> = deduped.iter().map(|(_, p)| *p).collect();
            let mut sorted = positions.clone();
            sorted.sort_unstable();
            prop_assert_eq!(positions, sorted);
        }
    }
}
