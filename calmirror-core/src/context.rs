//! Explicit wiring of store, remote and sync service.
//!
//! Callers build one context and pass it around; connecting and closing
//! the store is under their control.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::{MirrorConfig, StoreBackend, StoreConfig};
use crate::error::CalMirrorResult;
use crate::remote::{Provider, ProviderRemote, RemoteCalendar};
use crate::store::{CalendarStore, MemoryStore, PgStore};
use crate::sync::SyncService;

/// Outcome of a store round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    /// Server time, when the store reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct MirrorContext {
    store: Arc<dyn CalendarStore>,
    sync: SyncService,
    initialized: AtomicBool,
}

impl MirrorContext {
    pub fn new(store: Arc<dyn CalendarStore>, remote: Arc<dyn RemoteCalendar>) -> Self {
        MirrorContext {
            sync: SyncService::new(store.clone(), remote),
            store,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &MirrorConfig) -> CalMirrorResult<Self> {
        let store = build_store(&config.store, config.logging.enabled)?;
        let provider = Provider::from_name(&config.remote.provider, config.remote.timeout_secs);
        Ok(MirrorContext::new(store, Arc::new(ProviderRemote::new(provider))))
    }

    pub fn store(&self) -> &Arc<dyn CalendarStore> {
        &self.store
    }

    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    /// Connect the store, optionally verifying it with a round trip.
    /// A failed round trip is logged, not returned.
    pub async fn initialize(&self, test_connection: bool) -> CalMirrorResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        tracing::info!(store = self.store.name(), "Connecting to store");
        self.store.connect().await?;

        if test_connection {
            let result = self.test_connection().await;
            match (&result.error, &result.timestamp) {
                (Some(error), _) => tracing::error!("Connection test failed: {error}"),
                (None, Some(timestamp)) => {
                    tracing::info!("Connection test succeeded, server time {timestamp}")
                }
                (None, None) => tracing::info!("Connection test succeeded"),
            }
        }

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn shutdown(&self) -> CalMirrorResult<()> {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.store.disconnect().await
    }

    /// Connect if needed and ask the store for its current time.
    pub async fn test_connection(&self) -> ConnectionTestResult {
        let outcome = async {
            self.store.connect().await?;
            self.store.execute_query("SELECT NOW() AS time", &[]).await
        }
        .await;

        match outcome {
            Ok(rows) => ConnectionTestResult {
                success: true,
                timestamp: rows
                    .first()
                    .and_then(|row| row.get("time"))
                    .and_then(|time| time.as_str())
                    .map(str::to_string),
                error: None,
            },
            Err(e) => ConnectionTestResult {
                success: false,
                timestamp: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub fn build_store(config: &StoreConfig, log_operations: bool) -> CalMirrorResult<Arc<dyn CalendarStore>> {
    Ok(match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new(
            config.table_names(),
            config.auto_connect,
            log_operations,
        )),
        StoreBackend::Postgres => Arc::new(PgStore::new(config, log_operations)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionTarget;

    fn memory_context() -> MirrorContext {
        let config = MirrorConfig::default();
        MirrorContext::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_shutdown() {
        let context = memory_context();
        assert!(!context.store().is_connected());

        context.initialize(true).await.unwrap();
        assert!(context.store().is_connected());

        // Second initialize is a no-op.
        context.initialize(true).await.unwrap();

        context.shutdown().await.unwrap();
        assert!(!context.store().is_connected());
    }

    #[tokio::test]
    async fn test_connection_on_memory_store() {
        let context = memory_context();
        let result = context.test_connection().await;
        assert!(result.success);
        assert_eq!(result.timestamp, None);
        assert_eq!(result.error, None);
    }

    #[test]
    fn test_postgres_backend_requires_connection() {
        let mut config = MirrorConfig::default();
        config.store.backend = StoreBackend::Postgres;
        assert!(MirrorContext::from_config(&config).is_err());

        config.store.connection = Some(ConnectionTarget::Dsn("postgresql://localhost/db".into()));
        let context = MirrorContext::from_config(&config).unwrap();
        assert_eq!(context.store().name(), "postgres");
        assert!(!context.store().is_connected());
    }
}
