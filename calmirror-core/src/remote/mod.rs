//! Access to the upstream calendar service.

pub mod protocol;
pub mod provider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::calendar::Calendar;
use crate::credentials::Credentials;
use crate::error::CalMirrorResult;
use crate::event::{Event, EventPatch};

pub use provider::{Provider, ProviderRemote};

/// Listing window for upstream events. Bounds are epoch seconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<usize>,
}

/// The upstream calendar service. Every call acts with the user's stored
/// credentials.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    async fn list_calendars(&self, credentials: &Credentials) -> CalMirrorResult<Vec<Calendar>>;

    async fn list_events(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        query: &EventQuery,
    ) -> CalMirrorResult<Vec<Event>>;

    /// Returns the event as confirmed upstream, with its assigned id.
    async fn create_event(
        &self,
        credentials: &Credentials,
        calendar_id: &str,
        event: &Event,
    ) -> CalMirrorResult<Event>;

    async fn update_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
        calendar_id: &str,
        patch: &EventPatch,
    ) -> CalMirrorResult<Event>;

    async fn delete_event(
        &self,
        credentials: &Credentials,
        event_id: &str,
        calendar_id: &str,
    ) -> CalMirrorResult<()>;
}
