//! Relational schema for the Postgres store.

use sqlx::PgPool;

use crate::config::TableNames;
use crate::error::{CalMirrorError, CalMirrorResult};

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table names, quoted once for use in statements.
#[derive(Debug, Clone)]
pub(crate) struct SqlTables {
    pub credentials: String,
    pub calendars: String,
    pub events: String,
}

impl SqlTables {
    pub fn new(names: &TableNames) -> Self {
        SqlTables {
            credentials: quote_ident(&names.credentials),
            calendars: quote_ident(&names.calendars),
            events: quote_ident(&names.events),
        }
    }
}

pub(crate) fn create_statements(names: &TableNames) -> Vec<String> {
    let tables = SqlTables::new(names);
    let index = |table: &str, suffix: &str| quote_ident(&format!("{table}_{suffix}"));

    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                user_id TEXT PRIMARY KEY,
                grant_id TEXT NOT NULL,
                access_token TEXT NOT NULL,
                email TEXT NOT NULL,
                provider TEXT NOT NULL,
                expires_at TIMESTAMPTZ,
                id_token TEXT,
                token_type TEXT,
                scope TEXT,
                grant_expired BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            tables.credentials
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                timezone TEXT,
                hex_color TEXT,
                hex_foreground_color TEXT,
                is_primary BOOLEAN NOT NULL DEFAULT FALSE,
                is_read_only BOOLEAN NOT NULL DEFAULT FALSE,
                is_owned_by_user BOOLEAN NOT NULL DEFAULT FALSE,
                grant_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            tables.calendars
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                nylas_event_ids TEXT[] NOT NULL,
                nylas_calendar_ids TEXT[] NOT NULL,
                title TEXT,
                description TEXT,
                start_datetime TIMESTAMPTZ,
                end_datetime TIMESTAMPTZ,
                start_timezone TEXT,
                end_timezone TEXT,
                busy BOOLEAN NOT NULL DEFAULT TRUE,
                read_only BOOLEAN NOT NULL DEFAULT FALSE,
                grant_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                when_object TEXT NOT NULL,
                location TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            tables.events
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}(user_id)",
            index(&names.events, "user_id_idx"),
            tables.events
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}(start_datetime)",
            index(&names.events, "start_datetime_idx"),
            tables.events
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}(end_datetime)",
            index(&names.events, "end_datetime_idx"),
            tables.events
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (nylas_event_ids)",
            index(&names.events, "event_ids_idx"),
            tables.events
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {}(user_id)",
            index(&names.calendars, "user_id_idx"),
            tables.calendars
        ),
    ]
}

/// Create all tables and indexes in one transaction. Safe to rerun.
pub(crate) async fn create_tables(pool: &PgPool, names: &TableNames) -> CalMirrorResult<()> {
    let fail = |e: sqlx::Error| CalMirrorError::storage("Failed to create tables", e);

    let mut tx = pool.begin().await.map_err(fail)?;
    for statement in create_statements(names) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(fail)?;
    }
    tx.commit().await.map_err(fail)?;

    tracing::info!("Tables created or verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("events"), "\"events\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_statements_use_configured_names() {
        let names = TableNames::with_prefix("acme");
        let statements = create_statements(&names);

        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS \"acme_credentials\""));
        assert!(statements[1].contains("\"acme_calendars\""));
        assert!(statements[2].contains("\"acme_events\""));
        assert!(
            statements
                .iter()
                .any(|s| s.contains("\"acme_events_user_id_idx\" ON \"acme_events\"(user_id)"))
        );
        assert!(statements.iter().all(|s| s.contains("IF NOT EXISTS")));
    }
}
