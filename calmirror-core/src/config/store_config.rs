//! Storage backend configuration.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

/// Where the relational store lives: a DSN or discrete parameters.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConnectionTarget {
    Dsn(String),
    Params {
        host: String,
        port: Option<u16>,
        database: String,
        user: String,
        password: String,
    },
}

// Passwords stay out of logs.
impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Dsn(_) => f.write_str("Dsn(<redacted>)"),
            ConnectionTarget::Params {
                host,
                port,
                database,
                user,
                ..
            } => f
                .debug_struct("Params")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("user", user)
                .finish_non_exhaustive(),
        }
    }
}

/// Table names used by the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    pub credentials: String,
    pub calendars: String,
    pub events: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames::with_prefix("calmirror")
    }
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('_');
        TableNames {
            credentials: format!("{prefix}_credentials"),
            calendars: format!("{prefix}_calendars"),
            events: format!("{prefix}_events"),
        }
    }
}

/// The `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default)]
    pub connection: Option<ConnectionTarget>,

    /// Root certificate used to verify the server (`~` is expanded).
    #[serde(default)]
    pub tls_certificate: Option<String>,

    #[serde(default = "default_true")]
    pub auto_create_tables: bool,

    #[serde(default = "default_true")]
    pub auto_connect: bool,

    #[serde(default)]
    pub table_prefix: Option<String>,

    /// Explicit names win over `table_prefix`.
    #[serde(default)]
    pub tables: Option<TableNames>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::default(),
            connection: None,
            tls_certificate: None,
            auto_create_tables: true,
            auto_connect: true,
            table_prefix: None,
            tables: None,
        }
    }
}

impl StoreConfig {
    pub fn table_names(&self) -> TableNames {
        match (&self.tables, &self.table_prefix) {
            (Some(tables), _) => tables.clone(),
            (None, Some(prefix)) => TableNames::with_prefix(prefix),
            (None, None) => TableNames::default(),
        }
    }

    pub fn tls_certificate_path(&self) -> Option<PathBuf> {
        self.tls_certificate
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_resolution() {
        let mut config = StoreConfig::default();
        assert_eq!(config.table_names().events, "calmirror_events");

        config.table_prefix = Some("app_".into());
        assert_eq!(config.table_names().credentials, "app_credentials");

        config.tables = Some(TableNames {
            credentials: "creds".into(),
            calendars: "cals".into(),
            events: "evts".into(),
        });
        assert_eq!(config.table_names().calendars, "cals");
    }

    #[test]
    fn test_connection_debug_hides_secrets() {
        let target = ConnectionTarget::Params {
            host: "db.internal".into(),
            port: Some(5432),
            database: "mirror".into(),
            user: "mirror".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{target:?}");
        assert!(rendered.contains("db.internal"));
        assert!(!rendered.contains("hunter2"));

        let dsn = ConnectionTarget::Dsn("postgresql://u:hunter2@h/db".into());
        assert!(!format!("{dsn:?}").contains("hunter2"));
    }
}
