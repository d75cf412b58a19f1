//! Postgres store.
//!
//! Events are keyed locally by a generated UUID; the upstream id lives in
//! `nylas_event_ids` and is what every lookup matches on.

use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{Postgres, QueryBuilder};

use super::schema::{self, SqlTables};
use super::{CalendarStore, ConnectionManager, EventFilter, OperationLog, QueryRow};
use crate::calendar::Calendar;
use crate::config::{ConnectionTarget, StoreConfig, TableNames};
use crate::credentials::Credentials;
use crate::error::{CalMirrorError, CalMirrorResult};
use crate::event::{Event, EventPatch, When, parse_instant};

const MAX_CONNECTIONS: u32 = 5;

const EVENT_COLUMNS: &str = "nylas_event_ids, nylas_calendar_ids, title, description, location, \
    start_datetime, end_datetime, start_timezone, end_timezone, busy, read_only, grant_id, \
    when_object, created_at, updated_at";

const CALENDAR_COLUMNS: &str = "id, name, description, timezone, hex_color, hex_foreground_color, \
    is_primary, is_read_only, is_owned_by_user, grant_id";

#[derive(sqlx::FromRow)]
struct CredentialRow {
    grant_id: String,
    access_token: String,
    email: String,
    provider: String,
    expires_at: Option<DateTime<Utc>>,
    id_token: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
}

impl From<CredentialRow> for Credentials {
    fn from(row: CredentialRow) -> Self {
        Credentials {
            grant_id: row.grant_id,
            access_token: row.access_token,
            email: row.email,
            provider: row.provider,
            expires_at: row.expires_at.map(|dt| dt.timestamp()),
            id_token: row.id_token,
            token_type: row.token_type,
            scope: row.scope,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CalendarRow {
    id: String,
    name: String,
    description: Option<String>,
    timezone: Option<String>,
    hex_color: Option<String>,
    hex_foreground_color: Option<String>,
    is_primary: bool,
    is_read_only: bool,
    is_owned_by_user: bool,
    grant_id: String,
}

impl From<CalendarRow> for Calendar {
    fn from(row: CalendarRow) -> Self {
        Calendar {
            id: row.id,
            name: row.name,
            description: row.description,
            timezone: row.timezone.unwrap_or_else(|| "UTC".to_string()),
            color: row.hex_color,
            foreground_color: row.hex_foreground_color,
            is_primary: row.is_primary,
            is_owned_by_user: row.is_owned_by_user,
            read_only: row.is_read_only,
            grant_id: row.grant_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    nylas_event_ids: Vec<String>,
    nylas_calendar_ids: Vec<String>,
    title: Option<String>,
    description: Option<String>,
    location: Option<String>,
    start_datetime: Option<DateTime<Utc>>,
    end_datetime: Option<DateTime<Utc>>,
    start_timezone: Option<String>,
    end_timezone: Option<String>,
    busy: bool,
    read_only: bool,
    grant_id: String,
    when_object: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        let when = if row.when_object == "datespan" {
            let date = |dt: DateTime<Utc>| dt.format("%Y-%m-%d").to_string();
            When::Datespan {
                start_date: row.start_datetime.map(date),
                end_date: row.end_datetime.map(date),
            }
        } else {
            When::Timespan {
                start_time: row.start_datetime.map(|dt| dt.timestamp()),
                end_time: row.end_datetime.map(|dt| dt.timestamp()),
                start_timezone: row.start_timezone,
                end_timezone: row.end_timezone,
            }
        };

        Event {
            id: row.nylas_event_ids.into_iter().next().unwrap_or_default(),
            calendar_id: row.nylas_calendar_ids.into_iter().next().unwrap_or_default(),
            title: row.title,
            description: row.description,
            location: row.location,
            busy: row.busy,
            read_only: row.read_only,
            grant_id: row.grant_id,
            created_at: row.created_at.timestamp(),
            updated_at: row.updated_at.timestamp(),
            when,
        }
    }
}

/// Column values derived from an event's time window.
#[derive(Debug, PartialEq)]
struct WhenColumns {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    start_timezone: Option<String>,
    end_timezone: Option<String>,
}

impl WhenColumns {
    fn from_when(when: &When) -> CalMirrorResult<Self> {
        Ok(match when {
            When::Timespan {
                start_time,
                end_time,
                start_timezone,
                end_timezone,
            } => WhenColumns {
                start: start_time.map(epoch_to_datetime).transpose()?,
                end: end_time.map(epoch_to_datetime).transpose()?,
                start_timezone: start_timezone.clone(),
                end_timezone: end_timezone.clone(),
            },
            When::Datespan {
                start_date,
                end_date,
            } => WhenColumns {
                start: start_date.as_deref().map(date_to_datetime).transpose()?,
                end: end_date.as_deref().map(date_to_datetime).transpose()?,
                start_timezone: None,
                end_timezone: None,
            },
        })
    }
}

fn epoch_to_datetime(secs: i64) -> CalMirrorResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| CalMirrorError::Validation(format!("Timestamp {secs} is out of range")))
}

fn date_to_datetime(date: &str) -> CalMirrorResult<DateTime<Utc>> {
    parse_instant(date).ok_or_else(|| CalMirrorError::Validation(format!("Invalid date '{date}'")))
}

/// Build connect options from the store config.
///
/// A configured TLS root certificate switches to verified TLS; if the file
/// is missing the connection still requires TLS but skips verification.
pub(crate) fn connect_options(config: &StoreConfig) -> CalMirrorResult<PgConnectOptions> {
    let target = config.connection.as_ref().ok_or_else(|| {
        CalMirrorError::Config("store.connection is required for the postgres backend".into())
    })?;

    let mut options = match target {
        ConnectionTarget::Dsn(dsn) => PgConnectOptions::from_str(dsn)
            .map_err(|e| CalMirrorError::Config(format!("Invalid connection string: {e}")))?,
        ConnectionTarget::Params {
            host,
            port,
            database,
            user,
            password,
        } => {
            let options = PgConnectOptions::new()
                .host(host)
                .database(database)
                .username(user)
                .password(password);
            match port {
                Some(port) => options.port(*port),
                None => options,
            }
        }
    };

    if let Some(cert) = config.tls_certificate_path() {
        if cert.exists() {
            options = options.ssl_mode(PgSslMode::VerifyFull).ssl_root_cert(cert);
        } else {
            tracing::warn!(
                "TLS certificate not found at {}, connecting without certificate verification",
                cert.display()
            );
            options = options.ssl_mode(PgSslMode::Require);
        }
    }

    Ok(options)
}

async fn open_pool(
    options: PgConnectOptions,
    create_tables: Option<TableNames>,
    slot: Arc<RwLock<Option<PgPool>>>,
) -> CalMirrorResult<()> {
    let fail = |e: sqlx::Error| CalMirrorError::Connection(format!("Failed to connect to PostgreSQL: {e}"));

    tracing::info!("Connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(fail)?;

    sqlx::query("SELECT 1").execute(&pool).await.map_err(fail)?;

    if let Some(names) = create_tables {
        schema::create_tables(&pool, &names).await?;
    }

    *slot.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
    tracing::info!("Connected to PostgreSQL");
    Ok(())
}

/// Statements that produce rows get wrapped so each row comes back as JSON.
fn returns_rows(query: &str) -> bool {
    let head = query.trim_start().to_ascii_lowercase();
    ["select", "with", "values", "table"]
        .iter()
        .any(|kw| head.starts_with(kw))
}

/// Bind a JSON parameter using the closest native type.
macro_rules! bind_json {
    ($statement:expr, $value:expr) => {
        match $value {
            serde_json::Value::Null => $statement.bind(None::<String>),
            serde_json::Value::Bool(b) => $statement.bind(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => $statement.bind(i),
                None => $statement.bind(n.as_f64()),
            },
            serde_json::Value::String(s) => $statement.bind(s.clone()),
            other => $statement.bind(sqlx::types::Json(other.clone())),
        }
    };
}

fn events_query(events_table: &str, filter: &EventFilter) -> CalMirrorResult<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM {events_table}"));
    let mut clause = " WHERE ";

    if let Some(user_id) = &filter.user_id {
        qb.push(clause).push("user_id = ").push_bind(user_id.clone());
        clause = " AND ";
    }
    if let Some(calendar_id) = &filter.calendar_id {
        qb.push(clause)
            .push_bind(calendar_id.clone())
            .push(" = ANY(nylas_calendar_ids)");
        clause = " AND ";
    }
    if filter.has_time_bounds() {
        qb.push(clause)
            .push("start_datetime IS NOT NULL AND end_datetime IS NOT NULL");
        clause = " AND ";
    }
    if let Some(start) = filter.start_time {
        qb.push(clause)
            .push("end_datetime >= ")
            .push_bind(epoch_to_datetime(start)?);
        clause = " AND ";
    }
    if let Some(end) = filter.end_time {
        qb.push(clause)
            .push("start_datetime <= ")
            .push_bind(epoch_to_datetime(end)?);
    }

    qb.push(" ORDER BY start_datetime ASC NULLS LAST, nylas_event_ids[1] ASC");

    if let Some(limit) = filter.limit.filter(|l| *l > 0) {
        qb.push(" LIMIT ").push_bind(limit_param(limit));
    }

    Ok(qb)
}

/// LIMIT is a BIGINT; larger limits saturate.
fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn update_event_query(
    events_table: &str,
    event_id: &str,
    patch: &EventPatch,
) -> CalMirrorResult<QueryBuilder<'static, Postgres>> {
    let mut qb = QueryBuilder::new(format!("UPDATE {events_table} SET updated_at = NOW()"));

    if let Some(title) = &patch.title {
        qb.push(", title = ").push_bind(title.clone());
    }
    if let Some(description) = &patch.description {
        qb.push(", description = ").push_bind(description.clone());
    }
    if let Some(location) = &patch.location {
        qb.push(", location = ").push_bind(location.clone());
    }
    if let Some(busy) = patch.busy {
        qb.push(", busy = ").push_bind(busy);
    }
    if let Some(read_only) = patch.read_only {
        qb.push(", read_only = ").push_bind(read_only);
    }
    if let Some(when) = &patch.when {
        let columns = WhenColumns::from_when(when)?;
        qb.push(", when_object = ").push_bind(when.kind());
        qb.push(", start_datetime = ").push_bind(columns.start);
        qb.push(", end_datetime = ").push_bind(columns.end);
        qb.push(", start_timezone = ").push_bind(columns.start_timezone);
        qb.push(", end_timezone = ").push_bind(columns.end_timezone);
    }

    qb.push(" WHERE nylas_event_ids @> ARRAY[")
        .push_bind(event_id.to_string())
        .push("]::text[]");

    Ok(qb)
}

pub struct PgStore {
    connection: ConnectionManager,
    options: PgConnectOptions,
    auto_create_tables: bool,
    names: TableNames,
    tables: SqlTables,
    pool: Arc<RwLock<Option<PgPool>>>,
    log: OperationLog,
}

impl PgStore {
    pub fn new(config: &StoreConfig, log_operations: bool) -> CalMirrorResult<Self> {
        let names = config.table_names();
        Ok(PgStore {
            connection: ConnectionManager::new(config.auto_connect),
            options: connect_options(config)?,
            auto_create_tables: config.auto_create_tables,
            tables: SqlTables::new(&names),
            names,
            pool: Arc::new(RwLock::new(None)),
            log: OperationLog::new("postgres", log_operations),
        })
    }

    fn attempt(&self) -> impl FnOnce() -> BoxFuture<'static, CalMirrorResult<()>> {
        let options = self.options.clone();
        let create_tables = self.auto_create_tables.then(|| self.names.clone());
        let slot = self.pool.clone();
        move || open_pool(options, create_tables, slot).boxed()
    }

    async fn pool(&self) -> CalMirrorResult<PgPool> {
        self.connection.ensure_connected(self.attempt()).await?;
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| CalMirrorError::Connection("PostgreSQL pool is closed".into()))
    }

    fn fail(&self, operation: &str, cause: impl std::fmt::Display) -> CalMirrorError {
        let err = CalMirrorError::storage(operation, cause);
        self.log.failure(operation, &err);
        err
    }
}

#[async_trait]
impl CalendarStore for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self) -> CalMirrorResult<()> {
        self.connection.connect(self.attempt()).await.inspect_err(|e| {
            self.log.failure("connect", e);
        })
    }

    async fn disconnect(&self) -> CalMirrorResult<()> {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.close().await;
        }
        self.connection.mark_disconnected();
        tracing::info!("Disconnected from PostgreSQL");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    async fn store_credentials(
        &self,
        user_id: &str,
        credentials: &Credentials,
    ) -> CalMirrorResult<()> {
        const OP: &str = "Failed to store credentials";
        let pool = self.pool().await?;
        let expires_at = credentials.expires_at.map(epoch_to_datetime).transpose()?;

        let sql = format!(
            "INSERT INTO {} (user_id, grant_id, access_token, email, provider, expires_at, \
                id_token, token_type, scope, grant_expired, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, NOW())
             ON CONFLICT (user_id) DO UPDATE SET
                grant_id = EXCLUDED.grant_id,
                access_token = EXCLUDED.access_token,
                email = EXCLUDED.email,
                provider = EXCLUDED.provider,
                expires_at = EXCLUDED.expires_at,
                id_token = EXCLUDED.id_token,
                token_type = EXCLUDED.token_type,
                scope = EXCLUDED.scope,
                grant_expired = FALSE,
                updated_at = NOW()",
            self.tables.credentials
        );

        sqlx::query(&sql)
            .bind(user_id)
            .bind(&credentials.grant_id)
            .bind(&credentials.access_token)
            .bind(&credentials.email)
            .bind(&credentials.provider)
            .bind(expires_at)
            .bind(&credentials.id_token)
            .bind(&credentials.token_type)
            .bind(&credentials.scope)
            .execute(&pool)
            .await
            .map_err(|e| self.fail(OP, e))?;

        self.log.record(
            "upsert",
            &self.names.credentials,
            format_args!("user {user_id}"),
        );
        Ok(())
    }

    async fn get_credentials(&self, user_id: &str) -> CalMirrorResult<Option<Credentials>> {
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT grant_id, access_token, email, provider, expires_at, id_token, token_type, scope \
             FROM {} WHERE user_id = $1",
            self.tables.credentials
        );

        let row: Option<CredentialRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| self.fail("Failed to get credentials", e))?;

        match &row {
            Some(_) => self
                .log
                .record("select", &self.names.credentials, format_args!("user {user_id}")),
            None => tracing::debug!("No credentials found for user {user_id}"),
        }
        Ok(row.map(Credentials::from))
    }

    async fn delete_credentials(&self, user_id: &str) -> CalMirrorResult<()> {
        let pool = self.pool().await?;
        let sql = format!("DELETE FROM {} WHERE user_id = $1", self.tables.credentials);

        sqlx::query(&sql)
            .bind(user_id)
            .execute(&pool)
            .await
            .map_err(|e| self.fail("Failed to delete credentials", e))?;

        self.log
            .record("delete", &self.names.credentials, format_args!("user {user_id}"));
        Ok(())
    }

    async fn mark_credential_expired(&self, user_id: &str) -> CalMirrorResult<()> {
        let pool = self.pool().await?;
        let sql = format!(
            "UPDATE {} SET grant_expired = TRUE, expires_at = to_timestamp(0), updated_at = NOW() \
             WHERE user_id = $1",
            self.tables.credentials
        );

        let result = sqlx::query(&sql)
            .bind(user_id)
            .execute(&pool)
            .await
            .map_err(|e| self.fail("Failed to mark credential as expired", e))?;

        if result.rows_affected() == 0 {
            tracing::warn!("No credentials found for user {user_id} to mark as expired");
        } else {
            self.log
                .record("expire", &self.names.credentials, format_args!("user {user_id}"));
        }
        Ok(())
    }

    async fn has_valid_credential(&self, user_id: &str) -> CalMirrorResult<bool> {
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT expires_at, grant_expired FROM {} WHERE user_id = $1",
            self.tables.credentials
        );

        let row: Option<(Option<DateTime<Utc>>, bool)> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| self.fail("Failed to check credential validity", e))?;

        let valid = match row {
            None => false,
            Some((_, true)) => false,
            Some((None, false)) => true,
            Some((Some(expires_at), false)) => Utc::now() < expires_at,
        };
        tracing::debug!(user_id, valid, "Checked credential validity");
        Ok(valid)
    }

    // Check-then-write inside one transaction. Two concurrent stores of the
    // same new upstream id can still both insert.
    async fn store_event(
        &self,
        event: &Event,
        user_id: &str,
        calendar_id: &str,
    ) -> CalMirrorResult<String> {
        const OP: &str = "Failed to store event";
        let pool = self.pool().await?;

        let event_id = if event.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            event.id.clone()
        };
        let columns = WhenColumns::from_when(&event.when)?;
        let now = Utc::now();
        let created_at = match event.created_at {
            0 => now,
            secs => epoch_to_datetime(secs)?,
        };
        let updated_at = match event.updated_at {
            0 => now,
            secs => epoch_to_datetime(secs)?,
        };

        let mut tx = pool.begin().await.map_err(|e| self.fail(OP, e))?;

        let existing: Option<(uuid::Uuid,)> = sqlx::query_as(&format!(
            "SELECT id FROM {} WHERE nylas_event_ids @> ARRAY[$1]::text[] LIMIT 1",
            self.tables.events
        ))
        .bind(&event_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| self.fail(OP, e))?;

        let (sql, operation) = match existing {
            Some(_) => (
                format!(
                    "UPDATE {} SET nylas_calendar_ids = ARRAY[$2]::text[], title = $3, \
                     description = $4, location = $5, start_datetime = $6, end_datetime = $7, \
                     start_timezone = $8, end_timezone = $9, busy = $10, read_only = $11, \
                     grant_id = $12, user_id = $13, when_object = $14, created_at = $15, \
                     updated_at = $16 \
                     WHERE nylas_event_ids @> ARRAY[$1]::text[]",
                    self.tables.events
                ),
                "update",
            ),
            None => (
                format!(
                    "INSERT INTO {} (nylas_event_ids, nylas_calendar_ids, title, description, \
                     location, start_datetime, end_datetime, start_timezone, end_timezone, busy, \
                     read_only, grant_id, user_id, when_object, created_at, updated_at) \
                     VALUES (ARRAY[$1]::text[], ARRAY[$2]::text[], $3, $4, $5, $6, $7, $8, $9, \
                     $10, $11, $12, $13, $14, $15, $16)",
                    self.tables.events
                ),
                "insert",
            ),
        };

        sqlx::query(&sql)
            .bind(&event_id)
            .bind(calendar_id)
            .bind(&event.title)
            .bind(&event.description)
            .bind(&event.location)
            .bind(columns.start)
            .bind(columns.end)
            .bind(&columns.start_timezone)
            .bind(&columns.end_timezone)
            .bind(event.busy)
            .bind(event.read_only)
            .bind(&event.grant_id)
            .bind(user_id)
            .bind(event.when.kind())
            .bind(created_at)
            .bind(updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| self.fail(OP, e))?;

        tx.commit().await.map_err(|e| self.fail(OP, e))?;

        self.log.record(
            operation,
            &self.names.events,
            format_args!("event {event_id} in calendar {calendar_id} for user {user_id}"),
        );
        Ok(event_id)
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> CalMirrorResult<()> {
        let pool = self.pool().await?;
        let mut qb = update_event_query(&self.tables.events, event_id, patch)?;

        let result = qb
            .build()
            .execute(&pool)
            .await
            .map_err(|e| self.fail("Failed to update event", e))?;

        if result.rows_affected() == 0 {
            let err = CalMirrorError::NotFound(format!("Event {event_id} not found"));
            self.log.failure("update", &err);
            return Err(err);
        }

        self.log
            .record("update", &self.names.events, format_args!("event {event_id}"));
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> CalMirrorResult<()> {
        let pool = self.pool().await?;
        let sql = format!(
            "DELETE FROM {} WHERE nylas_event_ids @> ARRAY[$1]::text[]",
            self.tables.events
        );

        let result = sqlx::query(&sql)
            .bind(event_id)
            .execute(&pool)
            .await
            .map_err(|e| self.fail("Failed to delete event", e))?;

        if result.rows_affected() == 0 {
            let err = CalMirrorError::NotFound(format!("Event {event_id} not found"));
            self.log.failure("delete", &err);
            return Err(err);
        }

        self.log
            .record("delete", &self.names.events, format_args!("event {event_id}"));
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> CalMirrorResult<Option<Event>> {
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM {} WHERE nylas_event_ids @> ARRAY[$1]::text[] LIMIT 1",
            self.tables.events
        );

        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(event_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| self.fail("Failed to get event", e))?;

        if row.is_none() {
            tracing::debug!("No event found with id {event_id}");
        }
        Ok(row.map(Event::from))
    }

    async fn get_events(&self, filter: &EventFilter) -> CalMirrorResult<Vec<Event>> {
        let pool = self.pool().await?;
        let mut qb = events_query(&self.tables.events, filter)?;

        let rows: Vec<EventRow> = qb
            .build_query_as()
            .fetch_all(&pool)
            .await
            .map_err(|e| self.fail("Failed to get events", e))?;

        self.log.record(
            "query",
            &self.names.events,
            format_args!("{} event(s)", rows.len()),
        );
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn store_calendar(&self, user_id: &str, calendar: &Calendar) -> CalMirrorResult<()> {
        let pool = self.pool().await?;
        let sql = format!(
            "INSERT INTO {} (id, user_id, name, description, timezone, hex_color, \
                hex_foreground_color, is_primary, is_read_only, is_owned_by_user, grant_id, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
             ON CONFLICT (id) DO UPDATE SET
                user_id = EXCLUDED.user_id,
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                timezone = EXCLUDED.timezone,
                hex_color = EXCLUDED.hex_color,
                hex_foreground_color = EXCLUDED.hex_foreground_color,
                is_primary = EXCLUDED.is_primary,
                is_read_only = EXCLUDED.is_read_only,
                is_owned_by_user = EXCLUDED.is_owned_by_user,
                grant_id = EXCLUDED.grant_id,
                updated_at = NOW()",
            self.tables.calendars
        );

        sqlx::query(&sql)
            .bind(&calendar.id)
            .bind(user_id)
            .bind(&calendar.name)
            .bind(&calendar.description)
            .bind(&calendar.timezone)
            .bind(&calendar.color)
            .bind(&calendar.foreground_color)
            .bind(calendar.is_primary)
            .bind(calendar.read_only)
            .bind(calendar.is_owned_by_user)
            .bind(&calendar.grant_id)
            .execute(&pool)
            .await
            .map_err(|e| self.fail("Failed to store calendar", e))?;

        self.log.record(
            "upsert",
            &self.names.calendars,
            format_args!("calendar {} for user {user_id}", calendar.id),
        );
        Ok(())
    }

    async fn get_calendars(&self, user_id: &str) -> CalMirrorResult<Vec<Calendar>> {
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT {CALENDAR_COLUMNS} FROM {} WHERE user_id = $1 ORDER BY id",
            self.tables.calendars
        );

        let rows: Vec<CalendarRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&pool)
            .await
            .map_err(|e| self.fail("Failed to get calendars", e))?;

        self.log.record(
            "query",
            &self.names.calendars,
            format_args!("{} calendar(s) for user {user_id}", rows.len()),
        );
        Ok(rows.into_iter().map(Calendar::from).collect())
    }

    async fn get_calendar(&self, calendar_id: &str) -> CalMirrorResult<Option<Calendar>> {
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT {CALENDAR_COLUMNS} FROM {} WHERE id = $1",
            self.tables.calendars
        );

        let row: Option<CalendarRow> = sqlx::query_as(&sql)
            .bind(calendar_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| self.fail("Failed to get calendar", e))?;

        Ok(row.map(Calendar::from))
    }

    async fn execute_query(
        &self,
        query: &str,
        params: &[serde_json::Value],
    ) -> CalMirrorResult<Vec<QueryRow>> {
        const OP: &str = "Failed to execute query";
        let pool = self.pool().await?;
        let query = query.trim().trim_end_matches(';');

        if !returns_rows(query) {
            let mut statement = sqlx::query(query);
            for param in params {
                statement = bind_json!(statement, param);
            }
            let result = statement
                .execute(&pool)
                .await
                .map_err(|e| self.fail(OP, e))?;
            self.log.record(
                "custom",
                "query",
                format_args!("{} row(s) affected", result.rows_affected()),
            );
            return Ok(Vec::new());
        }

        let wrapped = format!("SELECT row_to_json(q)::text AS row FROM ({query}) q");
        let mut statement = sqlx::query_scalar::<_, String>(&wrapped);
        for param in params {
            statement = bind_json!(statement, param);
        }

        let rows = statement
            .fetch_all(&pool)
            .await
            .map_err(|e| self.fail(OP, e))?;

        let rows = rows
            .iter()
            .map(|row| serde_json::from_str::<QueryRow>(row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| self.fail(OP, e))?;

        self.log
            .record("custom", "query", format_args!("{} row(s)", rows.len()));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(connection: ConnectionTarget) -> StoreConfig {
        StoreConfig {
            connection: Some(connection),
            ..Default::default()
        }
    }

    fn row(when_object: &str, start: Option<i64>, end: Option<i64>) -> EventRow {
        EventRow {
            nylas_event_ids: vec!["evt-1".into()],
            nylas_calendar_ids: vec!["cal-1".into()],
            title: Some("Planning".into()),
            description: None,
            location: Some("Room 4".into()),
            start_datetime: start.and_then(|s| DateTime::from_timestamp(s, 0)),
            end_datetime: end.and_then(|s| DateTime::from_timestamp(s, 0)),
            start_timezone: Some("Europe/Paris".into()),
            end_timezone: None,
            busy: true,
            read_only: false,
            grant_id: "grant".into(),
            when_object: when_object.into(),
            created_at: DateTime::from_timestamp(10, 0).unwrap(),
            updated_at: DateTime::from_timestamp(20, 0).unwrap(),
        }
    }

    #[test]
    fn test_connect_options_from_params() {
        let options = connect_options(&config_with(ConnectionTarget::Params {
            host: "db.internal".into(),
            port: Some(6543),
            database: "mirror".into(),
            user: "mirror_app".into(),
            password: "secret".into(),
        }))
        .unwrap();

        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("mirror"));
        assert_eq!(options.get_username(), "mirror_app");
    }

    #[test]
    fn test_connect_options_from_dsn() {
        let options = connect_options(&config_with(ConnectionTarget::Dsn(
            "postgresql://app:pw@localhost:5433/calendar".into(),
        )))
        .unwrap();
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("calendar"));
    }

    #[test]
    fn test_missing_certificate_falls_back_to_require() {
        let mut config = config_with(ConnectionTarget::Dsn("postgresql://localhost/db".into()));
        config.tls_certificate = Some("/nonexistent/root.crt".into());
        let options = connect_options(&config).unwrap();
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn test_present_certificate_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("root.crt");
        std::fs::write(&cert, "-----BEGIN CERTIFICATE-----\n").unwrap();

        let mut config = config_with(ConnectionTarget::Dsn("postgresql://localhost/db".into()));
        config.tls_certificate = Some(cert.to_string_lossy().into_owned());
        let options = connect_options(&config).unwrap();
        assert!(matches!(options.get_ssl_mode(), PgSslMode::VerifyFull));
    }

    #[test]
    fn test_missing_connection_is_config_error() {
        let err = connect_options(&StoreConfig::default()).unwrap_err();
        assert!(matches!(err, CalMirrorError::Config(_)));
    }

    #[test]
    fn test_timespan_row_maps_to_event() {
        let event = Event::from(row("timespan", Some(1_000), Some(4_600)));
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.calendar_id, "cal-1");
        assert_eq!(event.created_at, 10);
        assert_eq!(
            event.when,
            When::Timespan {
                start_time: Some(1_000),
                end_time: Some(4_600),
                start_timezone: Some("Europe/Paris".into()),
                end_timezone: None,
            }
        );
    }

    #[test]
    fn test_datespan_round_trips_through_columns() {
        let when = When::datespan("2025-03-01", "2025-03-02");
        let columns = WhenColumns::from_when(&when).unwrap();
        assert_eq!(columns.start.map(|d| d.timestamp()), Some(1_740_787_200));

        let mut row = row(
            "datespan",
            columns.start.map(|d| d.timestamp()),
            columns.end.map(|d| d.timestamp()),
        );
        row.start_timezone = None;
        assert_eq!(Event::from(row).when, when);
    }

    #[test]
    fn test_events_query_conditions() {
        let filter = EventFilter {
            user_id: Some("user".into()),
            calendar_id: Some("cal".into()),
            start_time: Some(0),
            end_time: Some(100),
            limit: Some(10),
        };
        let qb = events_query("\"calmirror_events\"", &filter).unwrap();
        let sql = qb.sql();

        assert!(sql.starts_with("SELECT nylas_event_ids"));
        assert!(sql.contains("FROM \"calmirror_events\" WHERE user_id = $1"));
        assert!(sql.contains("AND $2 = ANY(nylas_calendar_ids)"));
        assert!(sql.contains("AND end_datetime >= $3"));
        assert!(sql.contains("AND start_datetime <= $4"));
        assert!(sql.contains("ORDER BY start_datetime ASC"));
        assert!(sql.ends_with("LIMIT $5"));
    }

    #[test]
    fn test_limit_saturates_at_bigint_max() {
        assert_eq!(limit_param(25), 25);
        assert_eq!(limit_param(usize::MAX), i64::MAX);
    }

    #[test]
    fn test_events_query_without_filters() {
        let qb = events_query("\"e\"", &EventFilter::default()).unwrap();
        assert!(!qb.sql().contains("WHERE"));
        assert!(!qb.sql().contains("LIMIT"));
    }

    #[test]
    fn test_update_query_only_touches_patched_fields() {
        let patch = EventPatch {
            title: Some("New".into()),
            busy: Some(false),
            ..Default::default()
        };
        let qb = update_event_query("\"e\"", "evt", &patch).unwrap();
        let sql = qb.sql();

        assert!(sql.starts_with("UPDATE \"e\" SET updated_at = NOW(), title = $1, busy = $2"));
        assert!(!sql.contains("description"));
        assert!(sql.ends_with("WHERE nylas_event_ids @> ARRAY[$3]::text[]"));
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("  SELECT NOW() AS time"));
        assert!(returns_rows("with x as (select 1) select * from x"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
    }
}
