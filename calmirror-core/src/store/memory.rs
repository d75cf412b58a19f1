//! In-memory store, used for development and tests. Nothing is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::RwLock;

use super::{CalendarStore, ConnectionManager, EventFilter, OperationLog, QueryRow, sort_events};
use crate::calendar::Calendar;
use crate::config::TableNames;
use crate::credentials::Credentials;
use crate::error::{CalMirrorError, CalMirrorResult};
use crate::event::{Event, EventPatch};

struct StoredCredential {
    credentials: Credentials,
    grant_expired: bool,
}

struct StoredEvent {
    event: Event,
    user_id: String,
}

struct StoredCalendar {
    calendar: Calendar,
    user_id: String,
}

#[derive(Default)]
struct MemoryState {
    credentials: HashMap<String, StoredCredential>,
    events: HashMap<String, StoredEvent>,
    calendars: HashMap<String, StoredCalendar>,
    user_events: HashMap<String, HashSet<String>>,
    calendar_events: HashMap<String, HashSet<String>>,
    user_calendars: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    fn index_event(&mut self, event_id: &str, user_id: &str, calendar_id: &str) {
        self.user_events
            .entry(user_id.to_string())
            .or_default()
            .insert(event_id.to_string());
        self.calendar_events
            .entry(calendar_id.to_string())
            .or_default()
            .insert(event_id.to_string());
    }

    fn unindex_event(&mut self, event_id: &str, user_id: &str, calendar_id: &str) {
        remove_from_index(&mut self.user_events, user_id, event_id);
        remove_from_index(&mut self.calendar_events, calendar_id, event_id);
    }
}

fn remove_from_index(index: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

pub struct MemoryStore {
    connection: ConnectionManager,
    attempts: Arc<AtomicUsize>,
    tables: TableNames,
    log: OperationLog,
    state: RwLock<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new(TableNames::default(), true, true)
    }
}

impl MemoryStore {
    pub fn new(tables: TableNames, auto_connect: bool, log_operations: bool) -> Self {
        MemoryStore {
            connection: ConnectionManager::new(auto_connect),
            attempts: Arc::new(AtomicUsize::new(0)),
            tables,
            log: OperationLog::new("memory", log_operations),
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Number of connection attempts made so far.
    pub fn connection_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    async fn ensure_connected(&self) -> CalMirrorResult<()> {
        let attempts = self.attempts.clone();
        self.connection
            .ensure_connected(move || open(attempts).boxed())
            .await
    }
}

async fn open(attempts: Arc<AtomicUsize>) -> CalMirrorResult<()> {
    attempts.fetch_add(1, Ordering::SeqCst);
    tokio::task::yield_now().await;
    Ok(())
}

#[async_trait]
impl CalendarStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> CalMirrorResult<()> {
        let attempts = self.attempts.clone();
        self.connection.connect(move || open(attempts).boxed()).await?;
        tracing::info!("Memory store connected");
        Ok(())
    }

    async fn disconnect(&self) -> CalMirrorResult<()> {
        self.connection.mark_disconnected();
        tracing::info!("Memory store disconnected");
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
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        state.credentials.insert(
            user_id.to_string(),
            StoredCredential {
                credentials: credentials.clone(),
                grant_expired: false,
            },
        );
        self.log
            .record("store", &self.tables.credentials, format_args!("user {user_id}"));
        Ok(())
    }

    async fn get_credentials(&self, user_id: &str) -> CalMirrorResult<Option<Credentials>> {
        self.ensure_connected().await?;
        let state = self.state.read().await;
        let found = state.credentials.get(user_id).map(|c| c.credentials.clone());
        match &found {
            Some(_) => self
                .log
                .record("get", &self.tables.credentials, format_args!("user {user_id}")),
            None => tracing::debug!("No credentials found for user {user_id}"),
        }
        Ok(found)
    }

    async fn delete_credentials(&self, user_id: &str) -> CalMirrorResult<()> {
        self.ensure_connected().await?;
        let removed = self.state.write().await.credentials.remove(user_id);
        if removed.is_none() {
            tracing::debug!("No credentials to delete for user {user_id}");
        }
        self.log
            .record("delete", &self.tables.credentials, format_args!("user {user_id}"));
        Ok(())
    }

    async fn mark_credential_expired(&self, user_id: &str) -> CalMirrorResult<()> {
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        match state.credentials.get_mut(user_id) {
            Some(stored) => {
                stored.grant_expired = true;
                stored.credentials.expires_at = Some(0);
                self.log.record(
                    "expire",
                    &self.tables.credentials,
                    format_args!("user {user_id}"),
                );
            }
            None => tracing::warn!("No credentials found for user {user_id} to mark as expired"),
        }
        Ok(())
    }

    async fn has_valid_credential(&self, user_id: &str) -> CalMirrorResult<bool> {
        self.ensure_connected().await?;
        let state = self.state.read().await;
        let valid = state
            .credentials
            .get(user_id)
            .is_some_and(|c| !c.grant_expired && c.credentials.is_unexpired());
        tracing::debug!(user_id, valid, "Checked credential validity");
        Ok(valid)
    }

    async fn store_event(
        &self,
        event: &Event,
        user_id: &str,
        calendar_id: &str,
    ) -> CalMirrorResult<String> {
        self.ensure_connected().await?;

        let event_id = if event.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            event.id.clone()
        };
        let now = chrono::Utc::now().timestamp();
        let mut stored = event.clone();
        stored.id = event_id.clone();
        stored.calendar_id = calendar_id.to_string();
        if stored.created_at == 0 {
            stored.created_at = now;
        }
        if stored.updated_at == 0 {
            stored.updated_at = now;
        }

        let mut state = self.state.write().await;
        if let Some(previous) = state.events.remove(&event_id) {
            let (prev_user, prev_calendar) = (previous.user_id, previous.event.calendar_id);
            state.unindex_event(&event_id, &prev_user, &prev_calendar);
        }
        state.index_event(&event_id, user_id, calendar_id);
        state.events.insert(
            event_id.clone(),
            StoredEvent {
                event: stored,
                user_id: user_id.to_string(),
            },
        );

        self.log.record(
            "store",
            &self.tables.events,
            format_args!("event {event_id} in calendar {calendar_id} for user {user_id}"),
        );
        Ok(event_id)
    }

    async fn update_event(&self, event_id: &str, patch: &EventPatch) -> CalMirrorResult<()> {
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        let Some(stored) = state.events.get_mut(event_id) else {
            let err = CalMirrorError::NotFound(format!("Event {event_id} not found"));
            self.log.failure("update", &err);
            return Err(err);
        };
        patch.apply_to(&mut stored.event);
        stored.event.updated_at = chrono::Utc::now().timestamp();
        self.log
            .record("update", &self.tables.events, format_args!("event {event_id}"));
        Ok(())
    }

    async fn delete_event(&self, event_id: &str) -> CalMirrorResult<()> {
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        let Some(removed) = state.events.remove(event_id) else {
            let err = CalMirrorError::NotFound(format!("Event {event_id} not found"));
            self.log.failure("delete", &err);
            return Err(err);
        };
        state.unindex_event(event_id, &removed.user_id, &removed.event.calendar_id);
        self.log
            .record("delete", &self.tables.events, format_args!("event {event_id}"));
        Ok(())
    }

    async fn get_event(&self, event_id: &str) -> CalMirrorResult<Option<Event>> {
        self.ensure_connected().await?;
        let state = self.state.read().await;
        let found = state.events.get(event_id).map(|s| s.event.clone());
        if found.is_none() {
            tracing::debug!("No event found with id {event_id}");
        }
        Ok(found)
    }

    async fn get_events(&self, filter: &EventFilter) -> CalMirrorResult<Vec<Event>> {
        self.ensure_connected().await?;
        let state = self.state.read().await;

        let by_user = filter
            .user_id
            .as_ref()
            .map(|u| state.user_events.get(u).cloned().unwrap_or_default());
        let by_calendar = filter
            .calendar_id
            .as_ref()
            .map(|c| state.calendar_events.get(c).cloned().unwrap_or_default());

        let candidates: Vec<&String> = match (&by_user, &by_calendar) {
            (Some(users), Some(calendars)) => users.intersection(calendars).collect(),
            (Some(ids), None) | (None, Some(ids)) => ids.iter().collect(),
            (None, None) => state.events.keys().collect(),
        };

        let mut events: Vec<Event> = candidates
            .into_iter()
            .filter_map(|id| state.events.get(id))
            .map(|stored| &stored.event)
            .filter(|event| {
                !filter.has_time_bounds()
                    || event
                        .when
                        .interval()
                        .is_some_and(|interval| filter.matches_interval(interval))
            })
            .cloned()
            .collect();

        sort_events(&mut events);
        if let Some(limit) = filter.limit.filter(|l| *l > 0) {
            events.truncate(limit);
        }

        self.log.record(
            "query",
            &self.tables.events,
            format_args!("{} event(s)", events.len()),
        );
        Ok(events)
    }

    async fn store_calendar(&self, user_id: &str, calendar: &Calendar) -> CalMirrorResult<()> {
        self.ensure_connected().await?;
        let mut state = self.state.write().await;
        if let Some(previous) = state.calendars.remove(&calendar.id) {
            remove_from_index(&mut state.user_calendars, &previous.user_id, &calendar.id);
        }
        state
            .user_calendars
            .entry(user_id.to_string())
            .or_default()
            .insert(calendar.id.clone());
        state.calendars.insert(
            calendar.id.clone(),
            StoredCalendar {
                calendar: calendar.clone(),
                user_id: user_id.to_string(),
            },
        );
        self.log.record(
            "store",
            &self.tables.calendars,
            format_args!("calendar {} for user {user_id}", calendar.id),
        );
        Ok(())
    }

    async fn get_calendars(&self, user_id: &str) -> CalMirrorResult<Vec<Calendar>> {
        self.ensure_connected().await?;
        let state = self.state.read().await;
        let mut calendars: Vec<Calendar> = state
            .user_calendars
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.calendars.get(id))
            .map(|stored| stored.calendar.clone())
            .collect();
        calendars.sort_by(|a, b| a.id.cmp(&b.id));
        self.log.record(
            "query",
            &self.tables.calendars,
            format_args!("{} calendar(s) for user {user_id}", calendars.len()),
        );
        Ok(calendars)
    }

    async fn get_calendar(&self, calendar_id: &str) -> CalMirrorResult<Option<Calendar>> {
        self.ensure_connected().await?;
        let state = self.state.read().await;
        Ok(state.calendars.get(calendar_id).map(|s| s.calendar.clone()))
    }

    async fn execute_query(
        &self,
        _query: &str,
        _params: &[serde_json::Value],
    ) -> CalMirrorResult<Vec<QueryRow>> {
        self.ensure_connected().await?;
        tracing::warn!("Raw queries are not supported by the memory store");
        Ok(Vec::new())
    }
}
