//! One-way sync: writes go upstream first and the confirmed result is
//! mirrored into the local store.
//!
//! Nothing is rolled back. If the upstream write succeeds and the local
//! write fails, the error is returned and the two sides stay diverged until
//! the next write to that event.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::conflict::{self, ConflictResult};
use crate::credentials::Credentials;
use crate::error::{CalMirrorError, CalMirrorResult};
use crate::event::{Event, EventPatch, TimeBound};
use crate::remote::{EventQuery, RemoteCalendar};
use crate::store::{CalendarStore, EventFilter};

/// A candidate time window to check for conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictQuery {
    pub start: TimeBound,
    pub end: TimeBound,
    /// Calendar to check. Remote checks default to the primary calendar,
    /// local checks to every calendar of the user.
    pub calendar_id: Option<String>,
    /// Event to leave out, typically the one being moved.
    pub exclude_id: Option<String>,
}

pub struct SyncService {
    store: Arc<dyn CalendarStore>,
    remote: Arc<dyn RemoteCalendar>,
}

impl SyncService {
    pub fn new(store: Arc<dyn CalendarStore>, remote: Arc<dyn RemoteCalendar>) -> Self {
        SyncService { store, remote }
    }

    pub fn store(&self) -> &Arc<dyn CalendarStore> {
        &self.store
    }

    /// Create an event upstream, then store the confirmed copy locally.
    /// Returns the upstream id.
    pub async fn create_event(
        &self,
        user_id: &str,
        calendar_id: &str,
        event: &Event,
    ) -> CalMirrorResult<String> {
        require("calendar id", calendar_id)?;
        let credentials = self.credentials(user_id).await?;

        let created = self
            .remote
            .create_event(&credentials, calendar_id, event)
            .await
            .map_err(|e| e.prefixed("Failed to create event"))?;

        let event_id = self
            .store
            .store_event(&created, user_id, calendar_id)
            .await
            .map_err(|e| {
                tracing::error!(
                    event_id = %created.id,
                    "Event created upstream but not stored locally: {e}"
                );
                e.prefixed("Failed to store created event")
            })?;

        tracing::info!(user_id, calendar_id, event_id, "Created event");
        Ok(event_id)
    }

    /// Update an event upstream, then replace the local copy with the
    /// confirmed event. The event must already be mirrored: its calendar
    /// and creation time come from the local copy.
    pub async fn update_event(
        &self,
        user_id: &str,
        event_id: &str,
        patch: &EventPatch,
    ) -> CalMirrorResult<()> {
        require("event id", event_id)?;
        let current = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| CalMirrorError::NotFound(format!("Event {event_id} not found")))?;
        require("calendar id", &current.calendar_id)?;

        let credentials = self.credentials(user_id).await?;

        let updated = self
            .remote
            .update_event(&credentials, event_id, &current.calendar_id, patch)
            .await
            .map_err(|e| e.prefixed("Failed to update event"))?;

        let confirmed = Event {
            id: event_id.to_string(),
            calendar_id: current.calendar_id.clone(),
            created_at: current.created_at,
            updated_at: Utc::now().timestamp(),
            ..updated
        };

        self.store
            .store_event(&confirmed, user_id, &current.calendar_id)
            .await
            .map_err(|e| {
                tracing::error!(event_id, "Event updated upstream but not locally: {e}");
                e.prefixed("Failed to store updated event")
            })?;

        tracing::info!(user_id, event_id, "Updated event");
        Ok(())
    }

    /// Delete an event upstream, then locally. Without `calendar_id` the
    /// calendar is taken from the local copy.
    pub async fn delete_event(
        &self,
        user_id: &str,
        event_id: &str,
        calendar_id: Option<&str>,
    ) -> CalMirrorResult<()> {
        require("event id", event_id)?;
        let calendar_id = match calendar_id {
            Some(calendar_id) => calendar_id.to_string(),
            None => {
                self.store
                    .get_event(event_id)
                    .await?
                    .ok_or_else(|| CalMirrorError::NotFound(format!("Event {event_id} not found")))?
                    .calendar_id
            }
        };
        require("calendar id", &calendar_id)?;

        let credentials = self.credentials(user_id).await?;

        self.remote
            .delete_event(&credentials, event_id, &calendar_id)
            .await
            .map_err(|e| e.prefixed("Failed to delete event"))?;

        self.store.delete_event(event_id).await.map_err(|e| {
            tracing::error!(event_id, "Event deleted upstream but not locally: {e}");
            e.prefixed("Failed to delete stored event")
        })?;

        tracing::info!(user_id, event_id, "Deleted event");
        Ok(())
    }

    pub async fn get_event(&self, event_id: &str) -> CalMirrorResult<Option<Event>> {
        self.store.get_event(event_id).await
    }

    pub async fn get_events(&self, filter: &EventFilter) -> CalMirrorResult<Vec<Event>> {
        self.store.get_events(filter).await
    }

    /// The account's primary calendar, as listed upstream.
    pub async fn primary_calendar(&self, user_id: &str) -> CalMirrorResult<Calendar> {
        let credentials = self.credentials(user_id).await?;
        let calendars = self.list_calendars(&credentials).await?;
        Calendar::primary_of(&calendars)
            .cloned()
            .ok_or_else(|| CalMirrorError::NotFound(format!("No calendar found for user {user_id}")))
    }

    /// List calendars upstream and upsert each into the local store.
    pub async fn refresh_calendars(&self, user_id: &str) -> CalMirrorResult<Vec<Calendar>> {
        let credentials = self.credentials(user_id).await?;
        let calendars = self.list_calendars(&credentials).await?;

        for calendar in &calendars {
            self.store.store_calendar(user_id, calendar).await?;
        }

        tracing::info!(user_id, count = calendars.len(), "Refreshed calendars");
        Ok(calendars)
    }

    /// Whether the user's credential still works upstream. A credential the
    /// upstream rejects is marked expired.
    pub async fn validate_credentials(&self, user_id: &str) -> CalMirrorResult<bool> {
        if !self.store.has_valid_credential(user_id).await? {
            return Ok(false);
        }
        let credentials = self.credentials(user_id).await?;

        match self.remote.list_calendars(&credentials).await {
            Ok(_) => Ok(true),
            Err(CalMirrorError::Remote(cause)) => {
                tracing::warn!(user_id, "Upstream rejected credentials: {cause}");
                self.store.mark_credential_expired(user_id).await?;
                Ok(false)
            }
            Err(e) => Err(e.prefixed("Failed to validate credentials")),
        }
    }

    /// Forget the user's credentials.
    pub async fn disconnect_user(&self, user_id: &str) -> CalMirrorResult<()> {
        self.store.delete_credentials(user_id).await?;
        tracing::info!(user_id, "Disconnected user");
        Ok(())
    }

    /// Check a candidate window against the locally mirrored events.
    pub async fn check_conflicts(
        &self,
        user_id: &str,
        query: &ConflictQuery,
    ) -> CalMirrorResult<ConflictResult> {
        let filter = EventFilter {
            user_id: Some(user_id.to_string()),
            calendar_id: query.calendar_id.clone(),
            start_time: query.start.to_epoch(),
            end_time: query.end.to_epoch(),
            limit: None,
        };
        let existing = self.store.get_events(&filter).await?;

        Ok(conflict::check_conflicts(
            &query.start,
            &query.end,
            &existing,
            query.exclude_id.as_deref(),
        ))
    }

    /// Check a candidate window against the events listed upstream.
    pub async fn check_remote_conflicts(
        &self,
        user_id: &str,
        query: &ConflictQuery,
    ) -> CalMirrorResult<ConflictResult> {
        let credentials = self.credentials(user_id).await?;
        let calendar_id = match &query.calendar_id {
            Some(calendar_id) => calendar_id.clone(),
            None => {
                let calendars = self.list_calendars(&credentials).await?;
                Calendar::primary_of(&calendars)
                    .map(|c| c.id.clone())
                    .ok_or_else(|| {
                        CalMirrorError::NotFound(format!("No calendar found for user {user_id}"))
                    })?
            }
        };

        let window = EventQuery {
            start: query.start.to_epoch(),
            end: query.end.to_epoch(),
            limit: None,
        };
        let existing = self
            .remote
            .list_events(&credentials, &calendar_id, &window)
            .await
            .map_err(|e| e.prefixed("Failed to list events"))?;

        Ok(conflict::check_conflicts(
            &query.start,
            &query.end,
            &existing,
            query.exclude_id.as_deref(),
        ))
    }

    async fn list_calendars(&self, credentials: &Credentials) -> CalMirrorResult<Vec<Calendar>> {
        self.remote
            .list_calendars(credentials)
            .await
            .map_err(|e| e.prefixed("Failed to list calendars"))
    }

    async fn credentials(&self, user_id: &str) -> CalMirrorResult<Credentials> {
        self.store
            .get_credentials(user_id)
            .await?
            .ok_or_else(|| CalMirrorError::NotFound(format!("No credentials found for user {user_id}")))
    }
}

fn require(field: &str, value: &str) -> CalMirrorResult<()> {
    if value.trim().is_empty() {
        return Err(CalMirrorError::Validation(format!("A {field} is required")));
    }
    Ok(())
}
