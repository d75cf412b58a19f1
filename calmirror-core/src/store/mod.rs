//! Local storage of mirrored credentials, calendars and events.
//!
//! Every backend implements [`CalendarStore`]; the sync service only ever
//! sees the trait object.

mod connection;
pub mod memory;
pub mod postgres;
mod schema;

use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::credentials::Credentials;
use crate::error::CalMirrorResult;
use crate::event::{Event, EventPatch};

pub use connection::ConnectionManager;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A row returned by [`CalendarStore::execute_query`], keyed by column name.
pub type QueryRow = serde_json::Map<String, serde_json::Value>;

/// Event listing filter. Every present field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub user_id: Option<String>,
    pub calendar_id: Option<String>,
    /// Epoch seconds; keeps events ending at or after this instant.
    pub start_time: Option<i64>,
    /// Epoch seconds; keeps events starting at or before this instant.
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn for_user(user_id: &str) -> Self {
        EventFilter {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn has_time_bounds(&self) -> bool {
        self.start_time.is_some() || self.end_time.is_some()
    }

    /// Whether `[start, end]` intersects the filter window, inclusively.
    pub fn matches_interval(&self, (start, end): (i64, i64)) -> bool {
        self.start_time.is_none_or(|from| end >= from) && self.end_time.is_none_or(|to| start <= to)
    }
}

#[async_trait]
pub trait CalendarStore: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    async fn connect(&self) -> CalMirrorResult<()>;
    async fn disconnect(&self) -> CalMirrorResult<()>;
    fn is_connected(&self) -> bool;

    async fn store_credentials(&self, user_id: &str, credentials: &Credentials)
    -> CalMirrorResult<()>;
    async fn get_credentials(&self, user_id: &str) -> CalMirrorResult<Option<Credentials>>;
    async fn delete_credentials(&self, user_id: &str) -> CalMirrorResult<()>;
    async fn mark_credential_expired(&self, user_id: &str) -> CalMirrorResult<()>;
    /// True when a credential exists, was never marked expired, and has no
    /// expiry or one still in the future.
    async fn has_valid_credential(&self, user_id: &str) -> CalMirrorResult<bool>;

    /// Store (or overwrite) an event, returning its id. An empty id is
    /// replaced by a generated one, and a zero `created_at`/`updated_at`
    /// by the current time.
    async fn store_event(&self, event: &Event, user_id: &str, calendar_id: &str)
    -> CalMirrorResult<String>;
    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> CalMirrorResult<()>;
    async fn delete_event(&self, event_id: &str) -> CalMirrorResult<()>;
    async fn get_event(&self, event_id: &str) -> CalMirrorResult<Option<Event>>;
    /// Events matching `filter`, ordered by start time ascending.
    async fn get_events(&self, filter: &EventFilter) -> CalMirrorResult<Vec<Event>>;

    async fn store_calendar(&self, user_id: &str, calendar: &Calendar) -> CalMirrorResult<()>;
    async fn get_calendars(&self, user_id: &str) -> CalMirrorResult<Vec<Calendar>>;
    async fn get_calendar(&self, calendar_id: &str) -> CalMirrorResult<Option<Calendar>>;

    /// Run a raw query for diagnostics. Backends without a query language
    /// return no rows.
    async fn execute_query(
        &self,
        query: &str,
        params: &[serde_json::Value],
    ) -> CalMirrorResult<Vec<QueryRow>>;
}

/// Per-operation logging for a store backend.
#[derive(Debug, Clone, Copy)]
pub struct OperationLog {
    store: &'static str,
    enabled: bool,
}

impl OperationLog {
    pub fn new(store: &'static str, enabled: bool) -> Self {
        OperationLog { store, enabled }
    }

    pub fn record(&self, operation: &str, target: &str, detail: impl Display) {
        if self.enabled {
            tracing::info!(store = self.store, operation, target, "{detail}");
        }
    }

    /// Failures are logged even when operation logging is off.
    pub fn failure(&self, operation: &str, error: impl Display) {
        tracing::error!(store = self.store, operation, "{error}");
    }
}

/// Ordering used by every backend for event listings: by start, undated
/// events last, ties broken by id.
pub(crate) fn sort_events(events: &mut [Event]) {
    events.sort_by(|a, b| {
        let key = |e: &Event| (e.when.start().is_none(), e.when.start(), e.id.clone());
        key(a).cmp(&key(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::When;

    #[test]
    fn test_filter_window_is_inclusive() {
        let filter = EventFilter {
            start_time: Some(100),
            end_time: Some(200),
            ..Default::default()
        };
        assert!(filter.matches_interval((50, 100)));
        assert!(filter.matches_interval((200, 300)));
        assert!(!filter.matches_interval((0, 99)));
        assert!(!filter.matches_interval((201, 300)));
    }

    #[test]
    fn test_sort_puts_undated_last() {
        let mk = |id: &str, when: When| Event {
            id: id.into(),
            calendar_id: "cal".into(),
            title: None,
            description: None,
            location: None,
            busy: true,
            read_only: false,
            grant_id: String::new(),
            created_at: 0,
            updated_at: 0,
            when,
        };
        let undated = When::Timespan {
            start_time: None,
            end_time: None,
            start_timezone: None,
            end_timezone: None,
        };
        let mut events = vec![
            mk("z", undated),
            mk("b", When::timespan(10, 20)),
            mk("a", When::timespan(10, 30)),
            mk("c", When::timespan(5, 6)),
        ];
        sort_events(&mut events);
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "z"]);
    }
}
