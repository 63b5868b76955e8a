//! Postgres repository implementation using Diesel.
//!
//! Implements every repository trait against the schema created by the
//! embedded migrations under `migrations/`.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures outside transactions
//! - One pinned connection for the lifetime of an explicit transaction
//! - Automatic migration execution
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::task;

use crate::db::query::{
    in_list_chunks, DeletedRows, DvResultQuery, InstanceSelection, KeplerIdQuery,
    KeplerIdSelection, LargeFlatFieldQuery, MaskTableFilter, ObservedTargetQuery,
    ObservedTargetRow as JoinedTargetRow, TargetDefinitionQuery, TargetTableFilter,
    MASK_TABLE_DELETE_ORDER, SUPERMASK_DELETE_ORDER, TARGET_TABLE_DELETE_ORDER,
};
use crate::db::repository::*;
use crate::models::*;

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connection_timeout_sec: u64,
    pub idle_timeout_sec: u64,
    /// Retry attempts for transient failures, not applied inside a transaction
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Create configuration from the environment variables listed in the
    /// module documentation.
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;
        let defaults = Self::default();

        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
        })
    }

    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Pool health statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub connections_in_use: u32,
    pub idle_connections: u32,
    pub total_connections: u32,
    pub max_size: u32,
    pub total_queries: u64,
    pub failed_queries: u64,
    pub retried_operations: u64,
}

/// Diesel-backed repository for Postgres.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
    /// Connection holding the open transaction, if any.
    pinned: Arc<Mutex<Option<PgPooled>>>,
    total_queries: Arc<AtomicU64>,
    failed_queries: Arc<AtomicU64>,
    retried_operations: Arc<AtomicU64>,
}

impl std::fmt::Debug for PostgresRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresRepository")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        Ok(Self {
            pool,
            config,
            pinned: Arc::new(Mutex::new(None)),
            total_queries: Arc::new(AtomicU64::new(0)),
            failed_queries: Arc::new(AtomicU64::new(0)),
            retried_operations: Arc::new(AtomicU64::new(0)),
        })
    }

    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;
        Ok(())
    }

    /// Run a database operation on a blocking thread.
    ///
    /// Inside an explicit transaction the pinned connection is used and the
    /// operation runs exactly once. Otherwise a pooled connection is used and
    /// retryable failures are retried with exponential backoff.
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let pinned = self.pinned.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;
        let total_queries = self.total_queries.clone();
        let failed_queries = self.failed_queries.clone();
        let retried_operations = self.retried_operations.clone();

        task::spawn_blocking(move || {
            {
                let mut guard = pinned.lock()?;
                if let Some(conn) = guard.as_mut() {
                    total_queries.fetch_add(1, Ordering::Relaxed);
                    let result = f(conn);
                    if result.is_err() {
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                    }
                    return result;
                }
            }

            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    retried_operations.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1)),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                };

                total_queries.fetch_add(1, Ordering::Relaxed);
                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        log::debug!("Retrying after transient failure: {}", e);
                        last_error = Some(e);
                    }
                    Err(e) => {
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }

            failed_queries.fetch_add(1, Ordering::Relaxed);
            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }

    /// Current pool state and query counters.
    pub fn get_pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections_in_use: state.connections - state.idle_connections,
            idle_connections: state.idle_connections,
            total_connections: state.connections,
            max_size: self.config.max_pool_size,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            retried_operations: self.retried_operations.load(Ordering::Relaxed),
        }
    }

    pub async fn is_healthy(&self) -> bool {
        self.health_check().await.unwrap_or(false)
    }
}

fn map_diesel_error(err: diesel::result::Error) -> RepositoryError {
    RepositoryError::from(err)
}

fn missing(operation: &str, entity: &str, id: impl ToString) -> RepositoryError {
    RepositoryError::not_found_with_context(
        format!("{} not found", entity),
        ErrorContext::new(operation)
            .with_entity(entity)
            .with_entity_id(id),
    )
}

fn unsaved(operation: &str, entity: &str) -> RepositoryError {
    RepositoryError::validation_with_context(
        format!("{} has no id", entity),
        ErrorContext::new(operation).with_entity(entity),
    )
}

fn offsets_of<I>(rows: I) -> HashMap<i64, Vec<Offset>>
where
    I: IntoIterator<Item = (i64, i32, i32)>,
{
    let mut offsets: HashMap<i64, Vec<Offset>> = HashMap::new();
    for (owner, row, column) in rows {
        offsets.entry(owner).or_default().push(Offset::new(row, column));
    }
    offsets
}

// ==================== Graph loaders ====================

fn load_reports(
    conn: &mut PgConnection,
    table_ids: &[i64],
) -> RepositoryResult<HashMap<i64, TadReport>> {
    let rows: Vec<TadReportRow> = tad_report::table
        .filter(tad_report::target_table_id.eq_any(table_ids))
        .select(TadReportRow::as_select())
        .load(conn)
        .map_err(map_diesel_error)?;
    rows.into_iter()
        .map(|row| Ok((row.target_table_id, row.into_domain()?)))
        .collect()
}

fn load_target_tables(
    conn: &mut PgConnection,
    rows: Vec<TargetTableRow>,
) -> RepositoryResult<Vec<TargetTable>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut reports = load_reports(conn, &ids)?;
    rows.into_iter()
        .map(|row| {
            let report = reports.remove(&row.id);
            row.into_domain(report)
        })
        .collect()
}

fn load_masks(conn: &mut PgConnection, mask_ids: &[i64]) -> RepositoryResult<HashMap<i64, Mask>> {
    if mask_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<MaskRow> = tad_mask::table
        .filter(tad_mask::id.eq_any(mask_ids))
        .select(MaskRow::as_select())
        .load(conn)
        .map_err(map_diesel_error)?;
    let offset_rows: Vec<(i64, i32, i32)> = tad_mask_offsets::table
        .filter(tad_mask_offsets::mask_id.eq_any(mask_ids))
        .order((tad_mask_offsets::mask_id, tad_mask_offsets::idx))
        .select((
            tad_mask_offsets::mask_id,
            tad_mask_offsets::row_offset,
            tad_mask_offsets::column_offset,
        ))
        .load(conn)
        .map_err(map_diesel_error)?;
    let mut offsets = offsets_of(offset_rows);
    Ok(rows
        .into_iter()
        .map(|row| {
            let id = row.id;
            (id, row.into_domain(offsets.remove(&id).unwrap_or_default()))
        })
        .collect())
}

fn load_apertures(
    conn: &mut PgConnection,
    aperture_ids: &[i64],
) -> RepositoryResult<HashMap<i64, Aperture>> {
    if aperture_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<ApertureRow> = tad_aperture::table
        .filter(tad_aperture::id.eq_any(aperture_ids))
        .select(ApertureRow::as_select())
        .load(conn)
        .map_err(map_diesel_error)?;
    let offset_rows: Vec<(i64, i32, i32)> = tad_aperture_offsets::table
        .filter(tad_aperture_offsets::aperture_id.eq_any(aperture_ids))
        .order((tad_aperture_offsets::aperture_id, tad_aperture_offsets::idx))
        .select((
            tad_aperture_offsets::aperture_id,
            tad_aperture_offsets::row_offset,
            tad_aperture_offsets::column_offset,
        ))
        .load(conn)
        .map_err(map_diesel_error)?;
    let mut offsets = offsets_of(offset_rows);
    Ok(rows
        .into_iter()
        .map(|row| {
            let mut aperture = Aperture::new(
                row.user_defined,
                row.reference_row,
                row.reference_column,
                offsets.remove(&row.id).unwrap_or_default(),
            );
            aperture.id = Some(ApertureId(row.id));
            (row.id, aperture)
        })
        .collect())
}

fn load_labels(
    conn: &mut PgConnection,
    target_ids: &[i64],
) -> RepositoryResult<HashMap<i64, BTreeSet<String>>> {
    let rows: Vec<LabelRow> = tad_observed_target_labels::table
        .filter(tad_observed_target_labels::observed_target_id.eq_any(target_ids))
        .select(LabelRow::as_select())
        .load(conn)
        .map_err(map_diesel_error)?;
    let mut labels: HashMap<i64, BTreeSet<String>> = HashMap::new();
    for row in rows {
        labels.entry(row.observed_target_id).or_default().insert(row.label);
    }
    Ok(labels)
}

fn load_definitions(
    conn: &mut PgConnection,
    rows: Vec<TargetDefinitionRow>,
) -> RepositoryResult<Vec<TargetDefinition>> {
    let mask_ids: Vec<i64> = rows.iter().filter_map(|r| r.mask_id).collect();
    let masks = load_masks(conn, &mask_ids)?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let mask = row.mask_id.and_then(|id| masks.get(&id).cloned());
            row.into_domain(mask)
        })
        .collect())
}

fn insert_aperture(
    conn: &mut PgConnection,
    target_table_id: i64,
    aperture: &Aperture,
) -> RepositoryResult<i64> {
    let id: i64 = diesel::insert_into(tad_aperture::table)
        .values(&NewApertureRow {
            target_table_id,
            user_defined: aperture.user_defined,
            reference_row: aperture.reference_row,
            reference_column: aperture.reference_column,
        })
        .returning(tad_aperture::id)
        .get_result(conn)
        .map_err(map_diesel_error)?;
    insert_aperture_offsets(conn, id, &aperture.offsets)?;
    Ok(id)
}

fn insert_aperture_offsets(
    conn: &mut PgConnection,
    aperture_id: i64,
    offsets: &[Offset],
) -> RepositoryResult<()> {
    let rows: Vec<ApertureOffsetRow> = offsets
        .iter()
        .enumerate()
        .map(|(idx, o)| ApertureOffsetRow {
            aperture_id,
            idx: idx as i32,
            row_offset: o.row,
            column_offset: o.column,
        })
        .collect();
    for chunk in in_list_chunks(&rows) {
        diesel::insert_into(tad_aperture_offsets::table)
            .values(chunk)
            .execute(conn)
            .map_err(map_diesel_error)?;
    }
    Ok(())
}

fn insert_definition(
    conn: &mut PgConnection,
    definition: &TargetDefinition,
) -> RepositoryResult<TargetDefinition> {
    if definition.mask.as_ref().is_some_and(|m| m.id.is_none()) {
        return Err(RepositoryError::validation(
            "target definition references an unsaved mask",
        ));
    }
    let id: i64 = diesel::insert_into(tad_target_definition::table)
        .values(&NewTargetDefinitionRow::from(definition))
        .returning(tad_target_definition::id)
        .get_result(conn)
        .map_err(map_diesel_error)?;
    let mut stored = definition.clone();
    stored.id = Some(TargetDefinitionId(id));
    Ok(stored)
}

fn deleted(table: &'static str, rows: usize) -> DeletedRows {
    DeletedRows::new(table, rows)
}

#[async_trait]
impl TargetRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn create_target_table(&self, table: &TargetTable) -> RepositoryResult<TargetTable> {
        let table = table.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let id: i64 = diesel::insert_into(tad_target_table::table)
                    .values(&NewTargetTableRow::from(&table))
                    .returning(tad_target_table::id)
                    .get_result(tx)
                    .map_err(map_diesel_error)?;
                let mut stored = table.clone();
                stored.id = Some(TargetTableId(id));
                if let Some(report) = stored.tad_report.as_mut() {
                    let report_id: i64 = diesel::insert_into(tad_report::table)
                        .values(&NewTadReportRow::new(TargetTableId(id), report)?)
                        .returning(tad_report::id)
                        .get_result(tx)
                        .map_err(map_diesel_error)?;
                    report.id = Some(TadReportId(report_id));
                }
                Ok(stored)
            })
        })
        .await
    }

    async fn update_target_table(&self, table: &TargetTable) -> RepositoryResult<()> {
        let id = table
            .id
            .ok_or_else(|| unsaved("update_target_table", "tad_target_table"))?;
        let table = table.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let updated = diesel::update(tad_target_table::table.find(id.0))
                    .set(&NewTargetTableRow::from(&table))
                    .execute(tx)
                    .map_err(map_diesel_error)?;
                if updated == 0 {
                    return Err(missing("update_target_table", "tad_target_table", id));
                }
                diesel::delete(tad_report::table.filter(tad_report::target_table_id.eq(id.0)))
                    .execute(tx)
                    .map_err(map_diesel_error)?;
                if let Some(report) = &table.tad_report {
                    diesel::insert_into(tad_report::table)
                        .values(&NewTadReportRow::new(id, report)?)
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                }
                Ok(())
            })
        })
        .await
    }

    async fn get_target_table(&self, id: TargetTableId) -> RepositoryResult<Option<TargetTable>> {
        self.with_conn(move |conn| {
            let row: Option<TargetTableRow> = tad_target_table::table
                .find(id.0)
                .select(TargetTableRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            match row {
                Some(row) => Ok(load_target_tables(conn, vec![row])?.pop()),
                None => Ok(None),
            }
        })
        .await
    }

    async fn find_target_tables(
        &self,
        filter: &TargetTableFilter,
    ) -> RepositoryResult<Vec<TargetTable>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut query = tad_target_table::table
                .select(TargetTableRow::as_select())
                .into_boxed::<Pg>();
            if !filter.target_types.is_empty() {
                let codes: Vec<i16> = filter.target_types.iter().map(|t| t.code()).collect();
                query = query.filter(tad_target_table::target_type.eq_any(codes));
            }
            if !filter.external_ids.is_empty() {
                query = query.filter(tad_target_table::external_id.eq_any(filter.external_ids.clone()));
            }
            if let Some(state) = filter.state {
                query = query.filter(tad_target_table::state.eq(state.code()));
            }
            if let Some((start, end)) = filter.planned_within {
                query = query
                    .filter(tad_target_table::planned_start_time.ge(start))
                    .filter(tad_target_table::planned_end_time.le(end));
            }
            let rows: Vec<TargetTableRow> = query
                .order(tad_target_table::id)
                .load(conn)
                .map_err(map_diesel_error)?;
            load_target_tables(conn, rows)
        })
        .await
    }

    async fn delete_target_table(&self, id: TargetTableId) -> RepositoryResult<Vec<DeletedRows>> {
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let exists: Option<i64> = tad_target_table::table
                    .find(id.0)
                    .select(tad_target_table::id)
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                if exists.is_none() {
                    return Err(missing("delete_target_table", "tad_target_table", id));
                }

                let definition_ids: Vec<i64> = tad_target_definition::table
                    .filter(tad_target_definition::target_table_id.eq(id.0))
                    .select(tad_target_definition::id)
                    .load(tx)
                    .map_err(map_diesel_error)?;
                let target_ids: Vec<i64> = tad_observed_target::table
                    .filter(tad_observed_target::target_table_id.eq(id.0))
                    .select(tad_observed_target::id)
                    .load(tx)
                    .map_err(map_diesel_error)?;
                let aperture_ids: Vec<i64> = tad_aperture::table
                    .filter(tad_aperture::target_table_id.eq(id.0))
                    .select(tad_aperture::id)
                    .load(tx)
                    .map_err(map_diesel_error)?;

                let links = diesel::delete(
                    tad_obs_target_target_defs::table.filter(
                        tad_obs_target_target_defs::target_definition_id
                            .eq_any(&definition_ids)
                            .or(tad_obs_target_target_defs::observed_target_id.eq_any(&target_ids)),
                    ),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let definitions = diesel::delete(
                    tad_target_definition::table
                        .filter(tad_target_definition::target_table_id.eq(id.0)),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let labels = diesel::delete(
                    tad_observed_target_labels::table
                        .filter(tad_observed_target_labels::observed_target_id.eq_any(&target_ids)),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let targets = diesel::delete(
                    tad_observed_target::table
                        .filter(tad_observed_target::target_table_id.eq(id.0)),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let aperture_offsets = diesel::delete(
                    tad_aperture_offsets::table
                        .filter(tad_aperture_offsets::aperture_id.eq_any(&aperture_ids)),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let apertures = diesel::delete(
                    tad_aperture::table.filter(tad_aperture::target_table_id.eq(id.0)),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let images =
                    diesel::delete(tad_image::table.filter(tad_image::target_table_id.eq(id.0)))
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                let reports =
                    diesel::delete(tad_report::table.filter(tad_report::target_table_id.eq(id.0)))
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                let tables = diesel::delete(tad_target_table::table.find(id.0))
                    .execute(tx)
                    .map_err(map_diesel_error)?;

                let counts = [
                    links,
                    definitions,
                    labels,
                    targets,
                    aperture_offsets,
                    apertures,
                    images,
                    reports,
                    tables,
                ];
                Ok(TARGET_TABLE_DELETE_ORDER
                    .iter()
                    .zip(counts)
                    .map(|(table, rows)| deleted(table, rows))
                    .collect())
            })
        })
        .await
    }

    async fn create_mask_table(&self, table: &MaskTable) -> RepositoryResult<MaskTable> {
        let table = table.clone();
        self.with_conn(move |conn| {
            let id: i64 = diesel::insert_into(tad_mask_table::table)
                .values(&NewMaskTableRow::from(&table))
                .returning(tad_mask_table::id)
                .get_result(conn)
                .map_err(map_diesel_error)?;
            let mut stored = table.clone();
            stored.id = Some(MaskTableId(id));
            Ok(stored)
        })
        .await
    }

    async fn get_mask_table(&self, id: MaskTableId) -> RepositoryResult<Option<MaskTable>> {
        self.with_conn(move |conn| {
            let row: Option<MaskTableRow> = tad_mask_table::table
                .find(id.0)
                .select(MaskTableRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            row.map(MaskTableRow::into_domain).transpose()
        })
        .await
    }

    async fn find_mask_tables(&self, filter: &MaskTableFilter) -> RepositoryResult<Vec<MaskTable>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut query = tad_mask_table::table
                .select(MaskTableRow::as_select())
                .into_boxed::<Pg>();
            if let Some(mask_type) = filter.mask_type {
                query = query.filter(tad_mask_table::mask_type.eq(mask_type.code()));
            }
            if !filter.external_ids.is_empty() {
                query = query.filter(tad_mask_table::external_id.eq_any(filter.external_ids.clone()));
            }
            if let Some(state) = filter.state {
                query = query.filter(tad_mask_table::state.eq(state.code()));
            }
            let rows: Vec<MaskTableRow> = query
                .order(tad_mask_table::id)
                .load(conn)
                .map_err(map_diesel_error)?;
            rows.into_iter().map(MaskTableRow::into_domain).collect()
        })
        .await
    }

    async fn delete_mask_table(&self, id: MaskTableId) -> RepositoryResult<Vec<DeletedRows>> {
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let exists: Option<i64> = tad_mask_table::table
                    .find(id.0)
                    .select(tad_mask_table::id)
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                if exists.is_none() {
                    return Err(missing("delete_mask_table", "tad_mask_table", id));
                }
                let mask_ids: Vec<i64> = tad_mask::table
                    .filter(tad_mask::mask_table_id.eq(id.0))
                    .select(tad_mask::id)
                    .load(tx)
                    .map_err(map_diesel_error)?;

                let offsets = diesel::delete(
                    tad_mask_offsets::table.filter(tad_mask_offsets::mask_id.eq_any(&mask_ids)),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let masks = diesel::delete(tad_mask::table.filter(tad_mask::mask_table_id.eq(id.0)))
                    .execute(tx)
                    .map_err(map_diesel_error)?;
                let tables = diesel::delete(tad_mask_table::table.find(id.0))
                    .execute(tx)
                    .map_err(map_diesel_error)?;

                Ok(MASK_TABLE_DELETE_ORDER
                    .iter()
                    .zip([offsets, masks, tables])
                    .map(|(table, rows)| deleted(table, rows))
                    .collect())
            })
        })
        .await
    }

    async fn create_mask(&self, mask: &Mask) -> RepositoryResult<Mask> {
        let mask = mask.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let id: i64 = diesel::insert_into(tad_mask::table)
                    .values(&NewMaskRow::from(&mask))
                    .returning(tad_mask::id)
                    .get_result(tx)
                    .map_err(map_diesel_error)?;
                let offsets: Vec<MaskOffsetRow> = mask
                    .offsets
                    .iter()
                    .enumerate()
                    .map(|(idx, o)| MaskOffsetRow {
                        mask_id: id,
                        idx: idx as i32,
                        row_offset: o.row,
                        column_offset: o.column,
                    })
                    .collect();
                for chunk in in_list_chunks(&offsets) {
                    diesel::insert_into(tad_mask_offsets::table)
                        .values(chunk)
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                }
                let mut stored = mask.clone();
                stored.id = Some(MaskId(id));
                Ok(stored)
            })
        })
        .await
    }

    async fn find_masks(&self, mask_table_id: MaskTableId) -> RepositoryResult<Vec<Mask>> {
        self.with_conn(move |conn| {
            let ids: Vec<i64> = tad_mask::table
                .filter(tad_mask::mask_table_id.eq(mask_table_id.0))
                .order((tad_mask::index_in_table, tad_mask::id))
                .select(tad_mask::id)
                .load(conn)
                .map_err(map_diesel_error)?;
            let mut masks = load_masks(conn, &ids)?;
            Ok(ids.iter().filter_map(|id| masks.remove(id)).collect())
        })
        .await
    }

    async fn delete_supermasks(
        &self,
        mask_table_id: MaskTableId,
    ) -> RepositoryResult<Vec<DeletedRows>> {
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let supermask_ids: Vec<i64> = tad_mask::table
                    .filter(tad_mask::mask_table_id.eq(mask_table_id.0))
                    .filter(tad_mask::supermask.eq(true))
                    .select(tad_mask::id)
                    .load(tx)
                    .map_err(map_diesel_error)?;

                let offsets = diesel::delete(
                    tad_mask_offsets::table
                        .filter(tad_mask_offsets::mask_id.eq_any(&supermask_ids)),
                )
                .execute(tx)
                .map_err(map_diesel_error)?;
                let cleared = diesel::update(
                    tad_target_definition::table
                        .filter(tad_target_definition::mask_id.eq_any(&supermask_ids)),
                )
                .set(tad_target_definition::mask_id.eq(None::<i64>))
                .execute(tx)
                .map_err(map_diesel_error)?;
                let masks = diesel::delete(tad_mask::table.filter(tad_mask::id.eq_any(&supermask_ids)))
                    .execute(tx)
                    .map_err(map_diesel_error)?;

                Ok(SUPERMASK_DELETE_ORDER
                    .iter()
                    .zip([offsets, cleared, masks])
                    .map(|(table, rows)| deleted(table, rows))
                    .collect())
            })
        })
        .await
    }

    async fn create_observed_target(
        &self,
        target: &ObservedTarget,
    ) -> RepositoryResult<ObservedTarget> {
        let table_id = target
            .target_table_id
            .ok_or_else(|| unsaved("create_observed_target", "tad_target_table"))?;
        let target = target.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let mut stored = target.clone();
                let aperture_id = match stored.aperture.as_mut() {
                    Some(aperture) => {
                        let id = insert_aperture(tx, table_id.0, aperture)?;
                        aperture.id = Some(ApertureId(id));
                        Some(id)
                    }
                    None => None,
                };

                let id: i64 = diesel::insert_into(tad_observed_target::table)
                    .values(&NewObservedTargetRow::new(table_id, &target, aperture_id))
                    .returning(tad_observed_target::id)
                    .get_result(tx)
                    .map_err(map_diesel_error)?;
                stored.id = Some(ObservedTargetId(id));

                let labels: Vec<LabelRow> = target
                    .labels
                    .iter()
                    .map(|label| LabelRow {
                        observed_target_id: id,
                        label: label.clone(),
                    })
                    .collect();
                if !labels.is_empty() {
                    diesel::insert_into(tad_observed_target_labels::table)
                        .values(&labels)
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                }

                let mut definitions = Vec::with_capacity(target.target_definitions.len());
                for definition in &target.target_definitions {
                    let saved = match definition.id {
                        Some(_) => definition.clone(),
                        None => {
                            let mut definition = definition.clone();
                            if definition.target_table_id.is_none() {
                                definition.target_table_id = Some(table_id);
                            }
                            insert_definition(tx, &definition)?
                        }
                    };
                    if let Some(definition_id) = saved.id {
                        diesel::insert_into(tad_obs_target_target_defs::table)
                            .values(&ObsTargetDefRow {
                                observed_target_id: id,
                                target_definition_id: definition_id.0,
                            })
                            .execute(tx)
                            .map_err(map_diesel_error)?;
                    }
                    definitions.push(saved);
                }
                stored.target_definitions = definitions;
                Ok(stored)
            })
        })
        .await
    }

    async fn find_observed_target_rows(
        &self,
        query: &ObservedTargetQuery,
    ) -> RepositoryResult<Vec<JoinedTargetRow>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut select = tad_observed_target::table
                .filter(tad_observed_target::target_table_id.eq(query.target_table_id.0))
                .select(ObservedTargetRow::as_select())
                .into_boxed::<Pg>();
            if let Some((module, output)) = query.module_output {
                select = select
                    .filter(tad_observed_target::ccd_module.eq(module))
                    .filter(tad_observed_target::ccd_output.eq(output));
            }
            match &query.kepler_ids {
                KeplerIdSelection::All => {}
                KeplerIdSelection::Ids(ids) => {
                    select = select.filter(tad_observed_target::kepler_id.eq_any(ids.clone()));
                }
                KeplerIdSelection::Range { min, max } => {
                    select = select.filter(tad_observed_target::kepler_id.between(*min, *max));
                }
            }
            if !query.include_rejected {
                select = select.filter(tad_observed_target::rejected.eq(false));
            }
            select = if query.orders_by_module_output() {
                select.order((
                    tad_observed_target::ccd_module,
                    tad_observed_target::ccd_output,
                    tad_observed_target::id,
                ))
            } else {
                select.order(tad_observed_target::id)
            };
            let rows: Vec<ObservedTargetRow> = select.load(conn).map_err(map_diesel_error)?;

            let target_ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
            let aperture_ids: Vec<i64> = rows.iter().filter_map(|r| r.aperture_id).collect();
            let apertures = load_apertures(conn, &aperture_ids)?;
            let mut labels = load_labels(conn, &target_ids)?;

            let links: Vec<ObsTargetDefRow> = tad_obs_target_target_defs::table
                .filter(tad_obs_target_target_defs::observed_target_id.eq_any(&target_ids))
                .order(tad_obs_target_target_defs::target_definition_id)
                .select(ObsTargetDefRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            let definition_ids: Vec<i64> = links.iter().map(|l| l.target_definition_id).collect();
            let definition_rows: Vec<TargetDefinitionRow> = tad_target_definition::table
                .filter(tad_target_definition::id.eq_any(&definition_ids))
                .select(TargetDefinitionRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            let definitions: HashMap<i64, TargetDefinition> = load_definitions(conn, definition_rows)?
                .into_iter()
                .filter_map(|d| d.id.map(|id| (id.0, d)))
                .collect();
            let mut definitions_by_target: HashMap<i64, Vec<TargetDefinition>> = HashMap::new();
            for link in &links {
                if let Some(definition) = definitions.get(&link.target_definition_id) {
                    definitions_by_target
                        .entry(link.observed_target_id)
                        .or_default()
                        .push(definition.clone());
                }
            }

            let mut joined = Vec::with_capacity(rows.len());
            for row in rows {
                let id = row.id;
                let aperture = row.aperture_id.and_then(|a| apertures.get(&a).cloned());
                let target = row.into_domain(aperture, labels.remove(&id).unwrap_or_default());
                match definitions_by_target.remove(&id) {
                    None => joined.push(JoinedTargetRow {
                        target,
                        definition: None,
                    }),
                    Some(target_definitions) => {
                        for definition in target_definitions {
                            joined.push(JoinedTargetRow {
                                target: target.clone(),
                                definition: Some(definition),
                            });
                        }
                    }
                }
            }
            Ok(joined)
        })
        .await
    }

    async fn find_observed_kepler_ids(&self, query: &KeplerIdQuery) -> RepositoryResult<Vec<i32>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut select = tad_observed_target::table
                .filter(tad_observed_target::target_table_id.eq(query.target_table_id.0))
                .filter(tad_observed_target::rejected.eq(false))
                .select(tad_observed_target::kepler_id)
                .distinct()
                .into_boxed::<Pg>();
            if let Some((module, output)) = query.module_output {
                select = select
                    .filter(tad_observed_target::ccd_module.eq(module))
                    .filter(tad_observed_target::ccd_output.eq(output));
            }
            match &query.kepler_ids {
                KeplerIdSelection::All => {}
                KeplerIdSelection::Ids(ids) => {
                    select = select.filter(tad_observed_target::kepler_id.eq_any(ids.clone()));
                }
                KeplerIdSelection::Range { min, max } => {
                    select = select.filter(tad_observed_target::kepler_id.between(*min, *max));
                }
            }
            select
                .order(tad_observed_target::kepler_id)
                .load(conn)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn find_labels(
        &self,
        observed_target_id: ObservedTargetId,
    ) -> RepositoryResult<Vec<String>> {
        self.with_conn(move |conn| {
            tad_observed_target_labels::table
                .filter(tad_observed_target_labels::observed_target_id.eq(observed_target_id.0))
                .select(tad_observed_target_labels::label)
                .distinct()
                .order(tad_observed_target_labels::label)
                .load(conn)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn update_aperture(
        &self,
        observed_target_id: ObservedTargetId,
        aperture: &Aperture,
    ) -> RepositoryResult<Aperture> {
        let aperture = aperture.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let current: Option<(i64, Option<i64>)> = tad_observed_target::table
                    .find(observed_target_id.0)
                    .select((
                        tad_observed_target::target_table_id,
                        tad_observed_target::aperture_id,
                    ))
                    .first(tx)
                    .optional()
                    .map_err(map_diesel_error)?;
                let (table_id, old_aperture_id) = current.ok_or_else(|| {
                    missing("update_aperture", "tad_observed_target", observed_target_id)
                })?;

                let mut stored = aperture.clone();
                match aperture.id.filter(|id| Some(id.0) == old_aperture_id) {
                    Some(id) => {
                        diesel::update(tad_aperture::table.find(id.0))
                            .set((
                                tad_aperture::user_defined.eq(aperture.user_defined),
                                tad_aperture::reference_row.eq(aperture.reference_row),
                                tad_aperture::reference_column.eq(aperture.reference_column),
                            ))
                            .execute(tx)
                            .map_err(map_diesel_error)?;
                        diesel::delete(
                            tad_aperture_offsets::table
                                .filter(tad_aperture_offsets::aperture_id.eq(id.0)),
                        )
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                        insert_aperture_offsets(tx, id.0, &aperture.offsets)?;
                    }
                    None => {
                        let id = insert_aperture(tx, table_id, &aperture)?;
                        diesel::update(tad_observed_target::table.find(observed_target_id.0))
                            .set(tad_observed_target::aperture_id.eq(Some(id)))
                            .execute(tx)
                            .map_err(map_diesel_error)?;
                        if let Some(old) = old_aperture_id {
                            diesel::delete(
                                tad_aperture_offsets::table
                                    .filter(tad_aperture_offsets::aperture_id.eq(old)),
                            )
                            .execute(tx)
                            .map_err(map_diesel_error)?;
                            diesel::delete(tad_aperture::table.find(old))
                                .execute(tx)
                                .map_err(map_diesel_error)?;
                        }
                        stored.id = Some(ApertureId(id));
                    }
                }
                Ok(stored)
            })
        })
        .await
    }

    async fn find_ktc_info(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<Vec<KtcInfo>> {
        self.with_conn(move |conn| {
            let types = [TargetType::LongCadence.code(), TargetType::ShortCadence.code()];
            let rows: Vec<(i32, i16, Option<DateTime<Utc>>, Option<DateTime<Utc>>, i64, i32, i64)> =
                tad_observed_target::table
                    .inner_join(tad_target_table::table)
                    .filter(tad_target_table::state.eq(State::Uplinked.code()))
                    .filter(tad_target_table::target_type.eq_any(types))
                    .filter(tad_target_table::planned_start_time.ge(start))
                    .filter(tad_target_table::planned_end_time.le(end))
                    .filter(tad_observed_target::kepler_id.ge(0))
                    .order((
                        tad_observed_target::kepler_id,
                        tad_target_table::target_type,
                        tad_target_table::external_id,
                        tad_observed_target::id,
                    ))
                    .select((
                        tad_observed_target::kepler_id,
                        tad_target_table::target_type,
                        tad_target_table::planned_start_time,
                        tad_target_table::planned_end_time,
                        tad_observed_target::id,
                        tad_target_table::external_id,
                        tad_target_table::id,
                    ))
                    .load(conn)
                    .map_err(map_diesel_error)?;

            rows.into_iter()
                .map(|(kepler_id, target_type, planned_start, planned_end, ot_id, external_id, table_id)| {
                    Ok(KtcInfo {
                        kepler_id,
                        target_type: decode(TargetType::from_code(target_type))?,
                        planned_start_time: planned_start,
                        planned_end_time: planned_end,
                        observed_target_id: ObservedTargetId(ot_id),
                        external_id,
                        target_table_id: TargetTableId(table_id),
                    })
                })
                .collect()
        })
        .await
    }

    async fn create_target_definition(
        &self,
        definition: &TargetDefinition,
    ) -> RepositoryResult<TargetDefinition> {
        if definition.target_table_id.is_none() {
            return Err(unsaved("create_target_definition", "tad_target_table"));
        }
        let definition = definition.clone();
        self.with_conn(move |conn| insert_definition(conn, &definition))
            .await
    }

    async fn find_target_definitions(
        &self,
        query: &TargetDefinitionQuery,
    ) -> RepositoryResult<Vec<TargetDefinition>> {
        let query = *query;
        self.with_conn(move |conn| {
            let mut select = tad_target_definition::table
                .filter(tad_target_definition::target_table_id.eq(query.target_table_id.0))
                .select(TargetDefinitionRow::as_select())
                .into_boxed::<Pg>();
            if let Some((module, output)) = query.module_output {
                select = select
                    .filter(tad_target_definition::ccd_module.eq(module))
                    .filter(tad_target_definition::ccd_output.eq(output));
            }
            let rows: Vec<TargetDefinitionRow> = select
                .order((
                    tad_target_definition::ccd_module,
                    tad_target_definition::ccd_output,
                    tad_target_definition::index_in_module_output,
                ))
                .load(conn)
                .map_err(map_diesel_error)?;
            load_definitions(conn, rows)
        })
        .await
    }

    async fn create_image(&self, image: &Image) -> RepositoryResult<Image> {
        let table_id = image
            .target_table_id
            .ok_or_else(|| unsaved("create_image", "tad_target_table"))?;
        let image = image.clone();
        self.with_conn(move |conn| {
            let id: i64 = diesel::insert_into(tad_image::table)
                .values(&NewImageRow::new(table_id, &image)?)
                .returning(tad_image::id)
                .get_result(conn)
                .map_err(map_diesel_error)?;
            let mut stored = image.clone();
            stored.id = Some(ImageId(id));
            Ok(stored)
        })
        .await
    }

    async fn find_images(
        &self,
        target_table_id: TargetTableId,
        ccd_module: i32,
        ccd_output: i32,
    ) -> RepositoryResult<Vec<Image>> {
        self.with_conn(move |conn| {
            let rows: Vec<ImageRow> = tad_image::table
                .filter(tad_image::target_table_id.eq(target_table_id.0))
                .filter(tad_image::ccd_module.eq(ccd_module))
                .filter(tad_image::ccd_output.eq(ccd_output))
                .order(tad_image::id)
                .select(ImageRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            rows.into_iter().map(ImageRow::into_domain).collect()
        })
        .await
    }
}

fn load_target_list_sets(
    conn: &mut PgConnection,
    rows: Vec<TargetListSetRow>,
) -> RepositoryResult<Vec<TargetListSet>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let members: Vec<(i64, TargetListRow)> = cm_tls_target_lists::table
        .inner_join(cm_target_list::table)
        .filter(cm_tls_target_lists::target_list_set_id.eq_any(&ids))
        .order((cm_tls_target_lists::target_list_set_id, cm_tls_target_lists::idx))
        .select((cm_tls_target_lists::target_list_set_id, TargetListRow::as_select()))
        .load(conn)
        .map_err(map_diesel_error)?;
    let mut lists: HashMap<i64, Vec<TargetList>> = HashMap::new();
    for (tls_id, row) in members {
        lists.entry(tls_id).or_default().push(row.into_domain()?);
    }
    rows.into_iter()
        .map(|row| {
            let target_lists = lists.remove(&row.id).unwrap_or_default();
            row.into_domain(target_lists)
        })
        .collect()
}

#[async_trait]
impl TargetSelectionRepository for PostgresRepository {
    async fn create_target_list_set(&self, tls: &TargetListSet) -> RepositoryResult<TargetListSet> {
        let tls = tls.clone();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let id: i64 = diesel::insert_into(cm_target_list_set::table)
                    .values(&NewTargetListSetRow::from(&tls))
                    .returning(cm_target_list_set::id)
                    .get_result(tx)
                    .map_err(map_diesel_error)?;
                let mut stored = tls.clone();
                stored.id = Some(TargetListSetId(id));
                for (idx, list) in stored.target_lists.iter_mut().enumerate() {
                    let list_id = match list.id {
                        Some(list_id) => list_id.0,
                        None => diesel::insert_into(cm_target_list::table)
                            .values(&NewTargetListRow::from(&*list))
                            .returning(cm_target_list::id)
                            .get_result(tx)
                            .map_err(map_diesel_error)?,
                    };
                    list.id = Some(TargetListId(list_id));
                    diesel::insert_into(cm_tls_target_lists::table)
                        .values(&TlsTargetListRow {
                            target_list_set_id: id,
                            target_list_id: list_id,
                            idx: idx as i32,
                        })
                        .execute(tx)
                        .map_err(map_diesel_error)?;
                }
                Ok(stored)
            })
        })
        .await
    }

    async fn update_target_list_set(&self, tls: &TargetListSet) -> RepositoryResult<()> {
        let id = tls
            .id
            .ok_or_else(|| unsaved("update_target_list_set", "cm_target_list_set"))?;
        let row = NewTargetListSetRow::from(tls);
        self.with_conn(move |conn| {
            let updated = diesel::update(cm_target_list_set::table.find(id.0))
                .set(&row)
                .execute(conn)
                .map_err(map_diesel_error)?;
            if updated == 0 {
                return Err(missing("update_target_list_set", "cm_target_list_set", id));
            }
            Ok(())
        })
        .await
    }

    async fn get_target_list_set(
        &self,
        id: TargetListSetId,
    ) -> RepositoryResult<Option<TargetListSet>> {
        self.with_conn(move |conn| {
            let rows: Vec<TargetListSetRow> = cm_target_list_set::table
                .find(id.0)
                .select(TargetListSetRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(load_target_list_sets(conn, rows)?.pop())
        })
        .await
    }

    async fn find_target_list_sets_by_name(
        &self,
        name: &str,
    ) -> RepositoryResult<Vec<TargetListSet>> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let rows: Vec<TargetListSetRow> = cm_target_list_set::table
                .filter(cm_target_list_set::name.eq(&name))
                .order(cm_target_list_set::id)
                .select(TargetListSetRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            load_target_list_sets(conn, rows)
        })
        .await
    }

    async fn find_target_list_sets_by_target_table(
        &self,
        target_table_id: TargetTableId,
    ) -> RepositoryResult<Vec<TargetListSet>> {
        self.with_conn(move |conn| {
            let rows: Vec<TargetListSetRow> = cm_target_list_set::table
                .filter(cm_target_list_set::target_table_id.eq(target_table_id.0))
                .order(cm_target_list_set::id)
                .select(TargetListSetRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            load_target_list_sets(conn, rows)
        })
        .await
    }

    async fn create_planned_target(
        &self,
        target: &PlannedTarget,
    ) -> RepositoryResult<PlannedTarget> {
        let row = NewPlannedTargetRow {
            kepler_id: target.kepler_id,
            target_list_id: target.target_list_id.0,
            sky_group_id: target.sky_group_id,
        };
        self.with_conn(move |conn| {
            let stored: PlannedTargetRow = diesel::insert_into(cm_planned_target::table)
                .values(&row)
                .returning(PlannedTargetRow::as_returning())
                .get_result(conn)
                .map_err(map_diesel_error)?;
            Ok(stored.into())
        })
        .await
    }

    async fn find_planned_targets(
        &self,
        target_list_ids: &[TargetListId],
        kepler_ids: Option<&[i32]>,
    ) -> RepositoryResult<Vec<PlannedTarget>> {
        let list_ids: Vec<i64> = target_list_ids.iter().map(|id| id.0).collect();
        let kepler_ids = kepler_ids.map(<[i32]>::to_vec);
        self.with_conn(move |conn| {
            let mut select = cm_planned_target::table
                .filter(cm_planned_target::target_list_id.eq_any(list_ids.clone()))
                .select(PlannedTargetRow::as_select())
                .into_boxed::<Pg>();
            if let Some(ids) = &kepler_ids {
                select = select.filter(cm_planned_target::kepler_id.eq_any(ids.clone()));
            }
            let rows: Vec<PlannedTargetRow> = select
                .order(cm_planned_target::id)
                .load(conn)
                .map_err(map_diesel_error)?;
            Ok(rows.into_iter().map(PlannedTarget::from).collect())
        })
        .await
    }

    async fn create_sky_group(&self, sky_group: &SkyGroup) -> RepositoryResult<SkyGroup> {
        let row = SkyGroupRow::from(sky_group);
        self.with_conn(move |conn| {
            diesel::insert_into(cm_sky_group::table)
                .values(&row)
                .execute(conn)
                .map_err(map_diesel_error)?;
            Ok(SkyGroup::from(row.clone()))
        })
        .await
    }

    async fn find_sky_group(
        &self,
        sky_group_id: i32,
        observing_season: i32,
    ) -> RepositoryResult<Option<SkyGroup>> {
        self.with_conn(move |conn| {
            let row: Option<SkyGroupRow> = cm_sky_group::table
                .find((sky_group_id, observing_season))
                .select(SkyGroupRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            Ok(row.map(SkyGroup::from))
        })
        .await
    }
}

#[async_trait]
impl PixelLogRepository for PostgresRepository {
    async fn create_pixel_log(&self, log: &PixelLog) -> RepositoryResult<()> {
        let row = PixelLogRow::from(log);
        self.with_conn(move |conn| {
            diesel::insert_into(dr_pixel_log::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn find_pixel_logs(
        &self,
        cadence_type: Option<CadenceType>,
        cadence_range: Option<(i32, i32)>,
    ) -> RepositoryResult<Vec<PixelLog>> {
        self.with_conn(move |conn| {
            let mut select = dr_pixel_log::table
                .select(PixelLogRow::as_select())
                .into_boxed::<Pg>();
            if let Some(cadence_type) = cadence_type {
                select = select.filter(dr_pixel_log::cadence_type.eq(cadence_type.code()));
            }
            if let Some((start, end)) = cadence_range {
                select = select.filter(dr_pixel_log::cadence_number.between(start, end));
            }
            let rows: Vec<PixelLogRow> = select
                .order((dr_pixel_log::cadence_type, dr_pixel_log::cadence_number))
                .load(conn)
                .map_err(map_diesel_error)?;
            rows.into_iter().map(PixelLogRow::into_domain).collect()
        })
        .await
    }
}

#[async_trait]
impl PipelineRepository for PostgresRepository {
    async fn create_pipeline_instance(
        &self,
        instance: &PipelineInstance,
    ) -> RepositoryResult<PipelineInstance> {
        let state = instance.state;
        self.with_conn(move |conn| {
            let id: i64 = diesel::insert_into(pi_pipeline_instance::table)
                .values(pi_pipeline_instance::state.eq(state.code()))
                .returning(pi_pipeline_instance::id)
                .get_result(conn)
                .map_err(map_diesel_error)?;
            Ok(PipelineInstance {
                id: Some(PipelineInstanceId(id)),
                state,
            })
        })
        .await
    }

    async fn update_pipeline_instance_state(
        &self,
        id: PipelineInstanceId,
        state: PipelineInstanceState,
    ) -> RepositoryResult<()> {
        self.with_conn(move |conn| {
            let updated = diesel::update(pi_pipeline_instance::table.find(id.0))
                .set(pi_pipeline_instance::state.eq(state.code()))
                .execute(conn)
                .map_err(map_diesel_error)?;
            if updated == 0 {
                return Err(missing(
                    "update_pipeline_instance_state",
                    "pi_pipeline_instance",
                    id,
                ));
            }
            Ok(())
        })
        .await
    }

    async fn get_pipeline_instance(
        &self,
        id: PipelineInstanceId,
    ) -> RepositoryResult<Option<PipelineInstance>> {
        self.with_conn(move |conn| {
            let row: Option<PipelineInstanceRow> = pi_pipeline_instance::table
                .find(id.0)
                .select(PipelineInstanceRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            row.map(|row| {
                Ok(PipelineInstance {
                    id: Some(PipelineInstanceId(row.id)),
                    state: decode(PipelineInstanceState::from_code(row.state))?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn create_pipeline_task(&self, task: &PipelineTask) -> RepositoryResult<PipelineTask> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let id: i64 = diesel::insert_into(pi_pipeline_task::table)
                .values((
                    pi_pipeline_task::pipeline_instance_id.eq(task.pipeline_instance_id.0),
                    pi_pipeline_task::state.eq(task.state.code()),
                ))
                .returning(pi_pipeline_task::id)
                .get_result(conn)
                .map_err(map_diesel_error)?;
            let mut stored = task.clone();
            stored.id = Some(PipelineTaskId(id));
            Ok(stored)
        })
        .await
    }

    async fn get_pipeline_task(&self, id: PipelineTaskId) -> RepositoryResult<Option<PipelineTask>> {
        self.with_conn(move |conn| {
            let row: Option<PipelineTaskRow> = pi_pipeline_task::table
                .find(id.0)
                .select(PipelineTaskRow::as_select())
                .first(conn)
                .optional()
                .map_err(map_diesel_error)?;
            row.map(|row| {
                Ok(PipelineTask {
                    id: Some(PipelineTaskId(row.id)),
                    pipeline_instance_id: PipelineInstanceId(row.pipeline_instance_id),
                    state: decode(PipelineTaskState::from_code(row.state))?,
                })
            })
            .transpose()
        })
        .await
    }
}

fn with_provenance<T>(
    result: T,
    pipeline_instance_id: i64,
    task_state: i16,
    instance_state: i16,
) -> RepositoryResult<WithProvenance<T>> {
    Ok(WithProvenance {
        result,
        pipeline_instance_id: PipelineInstanceId(pipeline_instance_id),
        instance_state: decode(PipelineInstanceState::from_code(instance_state))?,
        task_state: decode(PipelineTaskState::from_code(task_state))?,
    })
}

/// DV rows joined with their task and instance, filtered by kepler id and
/// instance selection.
macro_rules! dv_provenance_query {
    ($table:ident, $row:ty, $query:expr) => {{
        let mut select = $table::table
            .inner_join(pi_pipeline_task::table.inner_join(pi_pipeline_instance::table))
            .select((
                <$row>::as_select(),
                pi_pipeline_task::pipeline_instance_id,
                pi_pipeline_task::state,
                pi_pipeline_instance::state,
            ))
            .into_boxed::<Pg>();
        match &$query.kepler_ids {
            KeplerIdSelection::All => {}
            KeplerIdSelection::Ids(ids) => {
                select = select.filter($table::kepler_id.eq_any(ids.clone()));
            }
            KeplerIdSelection::Range { min, max } => {
                select = select.filter($table::kepler_id.between(*min, *max));
            }
        }
        match $query.instances {
            InstanceSelection::Any => {}
            InstanceSelection::Exactly(id) => {
                select = select.filter(pi_pipeline_task::pipeline_instance_id.eq(id.0));
            }
            InstanceSelection::AtMost(id) => {
                select = select.filter(pi_pipeline_task::pipeline_instance_id.le(id.0));
            }
        }
        select
    }};
}

#[async_trait]
impl DvRepository for PostgresRepository {
    async fn create_planet_results(
        &self,
        results: &[DvPlanetResults],
    ) -> RepositoryResult<Vec<DvPlanetResults>> {
        let results = results.to_vec();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let mut stored = Vec::with_capacity(results.len());
                for result in &results {
                    let id: i64 = diesel::insert_into(dv_planet_results::table)
                        .values(&NewPlanetResultsRow::from(result))
                        .returning(dv_planet_results::id)
                        .get_result(tx)
                        .map_err(map_diesel_error)?;
                    let mut result = result.clone();
                    result.id = Some(DvPlanetResultsId(id));
                    stored.push(result);
                }
                Ok(stored)
            })
        })
        .await
    }

    async fn find_planet_results(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvPlanetResults>>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let rows: Vec<(PlanetResultsRow, i64, i16, i16)> =
                dv_provenance_query!(dv_planet_results, PlanetResultsRow, query)
                    .order((
                        dv_planet_results::kepler_id,
                        dv_planet_results::planet_number,
                        dv_planet_results::id,
                    ))
                    .load(conn)
                    .map_err(map_diesel_error)?;
            rows.into_iter()
                .map(|(row, instance, task_state, instance_state)| {
                    with_provenance(row.into_domain()?, instance, task_state, instance_state)
                })
                .collect()
        })
        .await
    }

    async fn delete_planet_results(&self, ids: &[DvPlanetResultsId]) -> RepositoryResult<usize> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        self.with_conn(move |conn| {
            diesel::delete(dv_planet_results::table.filter(dv_planet_results::id.eq_any(&ids)))
                .execute(conn)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn create_target_results(
        &self,
        results: &[DvTargetResults],
    ) -> RepositoryResult<Vec<DvTargetResults>> {
        let results = results.to_vec();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let mut stored = Vec::with_capacity(results.len());
                for result in &results {
                    let id: i64 = diesel::insert_into(dv_target_results::table)
                        .values(&NewTargetResultsRow::new(result)?)
                        .returning(dv_target_results::id)
                        .get_result(tx)
                        .map_err(map_diesel_error)?;
                    let mut result = result.clone();
                    result.id = Some(DvTargetResultsId(id));
                    stored.push(result);
                }
                Ok(stored)
            })
        })
        .await
    }

    async fn find_target_results(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvTargetResults>>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let rows: Vec<(TargetResultsRow, i64, i16, i16)> =
                dv_provenance_query!(dv_target_results, TargetResultsRow, query)
                    .order((dv_target_results::kepler_id, dv_target_results::id))
                    .load(conn)
                    .map_err(map_diesel_error)?;
            rows.into_iter()
                .map(|(row, instance, task_state, instance_state)| {
                    with_provenance(row.into_domain()?, instance, task_state, instance_state)
                })
                .collect()
        })
        .await
    }

    async fn delete_target_results(&self, ids: &[DvTargetResultsId]) -> RepositoryResult<usize> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        self.with_conn(move |conn| {
            diesel::delete(dv_target_results::table.filter(dv_target_results::id.eq_any(&ids)))
                .execute(conn)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn create_limb_darkening_models(
        &self,
        models: &[DvLimbDarkeningModel],
    ) -> RepositoryResult<Vec<DvLimbDarkeningModel>> {
        let models = models.to_vec();
        self.with_conn(move |conn| {
            conn.transaction(|tx| {
                let mut stored = Vec::with_capacity(models.len());
                for model in &models {
                    let id: i64 = diesel::insert_into(dv_limb_darkening_model::table)
                        .values(&NewLimbDarkeningModelRow::from(model))
                        .returning(dv_limb_darkening_model::id)
                        .get_result(tx)
                        .map_err(map_diesel_error)?;
                    let mut model = model.clone();
                    model.id = Some(DvLimbDarkeningModelId(id));
                    stored.push(model);
                }
                Ok(stored)
            })
        })
        .await
    }

    async fn find_limb_darkening_models(
        &self,
        query: &DvResultQuery,
    ) -> RepositoryResult<Vec<WithProvenance<DvLimbDarkeningModel>>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let rows: Vec<(LimbDarkeningModelRow, i64, i16, i16)> =
                dv_provenance_query!(dv_limb_darkening_model, LimbDarkeningModelRow, query)
                    .order((
                        dv_limb_darkening_model::kepler_id,
                        dv_limb_darkening_model::target_table_id,
                        dv_limb_darkening_model::id,
                    ))
                    .load(conn)
                    .map_err(map_diesel_error)?;
            rows.into_iter()
                .map(|(row, instance, task_state, instance_state)| {
                    with_provenance(row.into_domain()?, instance, task_state, instance_state)
                })
                .collect()
        })
        .await
    }

    async fn delete_limb_darkening_models(
        &self,
        ids: &[DvLimbDarkeningModelId],
    ) -> RepositoryResult<usize> {
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        self.with_conn(move |conn| {
            diesel::delete(
                dv_limb_darkening_model::table.filter(dv_limb_darkening_model::id.eq_any(&ids)),
            )
            .execute(conn)
            .map_err(map_diesel_error)
        })
        .await
    }
}

#[async_trait]
impl FcRepository for PostgresRepository {
    async fn create_history(&self, history: &History) -> RepositoryResult<History> {
        let history = history.clone();
        self.with_conn(move |conn| {
            let id: i64 = diesel::insert_into(fc_history::table)
                .values(&NewHistoryRow::from(&history))
                .returning(fc_history::id)
                .get_result(conn)
                .map_err(map_diesel_error)?;
            let mut stored = history.clone();
            stored.id = Some(HistoryId(id));
            Ok(stored)
        })
        .await
    }

    async fn find_histories(&self, model_type: HistoryModelName) -> RepositoryResult<Vec<History>> {
        self.with_conn(move |conn| {
            let rows: Vec<HistoryRow> = fc_history::table
                .filter(fc_history::model_type.eq(model_type.code()))
                .order((fc_history::ingest_time, fc_history::id))
                .select(HistoryRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            rows.into_iter().map(HistoryRow::into_domain).collect()
        })
        .await
    }

    async fn create_large_flat_field(
        &self,
        flat_field: &LargeFlatField,
    ) -> RepositoryResult<LargeFlatField> {
        let flat_field = flat_field.clone();
        self.with_conn(move |conn| {
            let id: i64 = diesel::insert_into(fc_large_flat_field::table)
                .values(&NewLargeFlatFieldRow::new(&flat_field)?)
                .returning(fc_large_flat_field::id)
                .get_result(conn)
                .map_err(map_diesel_error)?;
            let mut stored = flat_field.clone();
            stored.id = Some(LargeFlatFieldId(id));
            Ok(stored)
        })
        .await
    }

    async fn find_large_flat_fields(
        &self,
        query: &LargeFlatFieldQuery,
    ) -> RepositoryResult<Vec<LargeFlatField>> {
        let query = *query;
        self.with_conn(move |conn| {
            let mut select = fc_large_flat_field::table
                .filter(fc_large_flat_field::history_id.eq(query.history_id.0))
                .select(LargeFlatFieldRow::as_select())
                .into_boxed::<Pg>();
            if let Some((module, output)) = query.module_output {
                select = select
                    .filter(fc_large_flat_field::ccd_module.eq(module))
                    .filter(fc_large_flat_field::ccd_output.eq(output));
            }
            if let Some((start, end)) = query.start_time_range {
                select = select.filter(fc_large_flat_field::start_time.between(start, end));
            }
            let rows: Vec<LargeFlatFieldRow> = select
                .order((fc_large_flat_field::start_time, fc_large_flat_field::id))
                .load(conn)
                .map_err(map_diesel_error)?;
            rows.into_iter().map(LargeFlatFieldRow::into_domain).collect()
        })
        .await
    }

    async fn create_small_flat_field_image(
        &self,
        image: &SmallFlatFieldImage,
    ) -> RepositoryResult<SmallFlatFieldImage> {
        let image = image.clone();
        self.with_conn(move |conn| {
            let id: i64 = diesel::insert_into(fc_small_flat_field_image::table)
                .values(&NewSmallFlatFieldImageRow::new(&image)?)
                .returning(fc_small_flat_field_image::id)
                .get_result(conn)
                .map_err(map_diesel_error)?;
            let mut stored = image.clone();
            stored.id = Some(SmallFlatFieldImageId(id));
            Ok(stored)
        })
        .await
    }

    async fn find_small_flat_field_images(
        &self,
        history_id: HistoryId,
        ccd_module: i32,
        ccd_output: i32,
    ) -> RepositoryResult<Vec<SmallFlatFieldImage>> {
        self.with_conn(move |conn| {
            let rows: Vec<SmallFlatFieldImageRow> = fc_small_flat_field_image::table
                .filter(fc_small_flat_field_image::history_id.eq(history_id.0))
                .filter(fc_small_flat_field_image::ccd_module.eq(ccd_module))
                .filter(fc_small_flat_field_image::ccd_output.eq(ccd_output))
                .order((fc_small_flat_field_image::mjd, fc_small_flat_field_image::id))
                .select(SmallFlatFieldImageRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;
            rows.into_iter().map(SmallFlatFieldImageRow::into_domain).collect()
        })
        .await
    }
}

#[async_trait]
impl TransactionRepository for PostgresRepository {
    async fn begin_transaction(&self) -> RepositoryResult<()> {
        let pool = self.pool.clone();
        let pinned = self.pinned.clone();
        task::spawn_blocking(move || {
            let mut guard = pinned.lock()?;
            if guard.is_some() {
                return Err(RepositoryError::transaction("a transaction is already open"));
            }
            let mut conn = pool.get()?;
            AnsiTransactionManager::begin_transaction(&mut *conn).map_err(map_diesel_error)?;
            *guard = Some(conn);
            Ok(())
        })
        .await
        .map_err(|e| RepositoryError::internal(format!("Task join error: {}", e)))?
    }

    async fn commit_transaction(&self) -> RepositoryResult<()> {
        let pinned = self.pinned.clone();
        task::spawn_blocking(move || {
            let mut conn = pinned
                .lock()?
                .take()
                .ok_or_else(|| RepositoryError::transaction("no open transaction to commit"))?;
            AnsiTransactionManager::commit_transaction(&mut *conn).map_err(map_diesel_error)
        })
        .await
        .map_err(|e| RepositoryError::internal(format!("Task join error: {}", e)))?
    }

    async fn rollback_transaction(&self) -> RepositoryResult<()> {
        let pinned = self.pinned.clone();
        task::spawn_blocking(move || {
            let mut conn = pinned
                .lock()?
                .take()
                .ok_or_else(|| RepositoryError::transaction("no open transaction to roll back"))?;
            AnsiTransactionManager::rollback_transaction(&mut *conn).map_err(map_diesel_error)
        })
        .await
        .map_err(|e| RepositoryError::internal(format!("Task join error: {}", e)))?
    }

    async fn in_transaction(&self) -> RepositoryResult<bool> {
        Ok(self.pinned.lock()?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_with_url_keeps_defaults() {
        let config = PostgresConfig::with_url("postgres://localhost/tad");
        assert_eq!(config.database_url, "postgres://localhost/tad");
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_offsets_grouped_by_owner_in_order() {
        let grouped = offsets_of(vec![(1, 0, 0), (2, 5, 5), (1, 0, 1)]);
        assert_eq!(grouped[&1], vec![Offset::new(0, 0), Offset::new(0, 1)]);
        assert_eq!(grouped[&2], vec![Offset::new(5, 5)]);
    }

    /// Round trip against a live database; requires `DATABASE_URL`.
    #[tokio::test]
    async fn test_target_table_round_trip_against_database() {
        let Ok(config) = PostgresConfig::from_env() else {
            return;
        };
        let repo = PostgresRepository::new(config).unwrap();
        repo.begin_transaction().await.unwrap();
        let table = repo
            .create_target_table(&TargetTable::new(TargetType::LongCadence).with_external_id(42))
            .await
            .unwrap();
        let loaded = repo.get_target_table(table.id.unwrap()).await.unwrap();
        repo.rollback_transaction().await.unwrap();
        assert_eq!(loaded.map(|t| t.external_id), Some(42));
    }
}
