//! JSON protocol spoken with provider binaries over stdin/stdout.
//!
//! One request line goes in, one response document comes out.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::calendar::Calendar;
use crate::credentials::Credentials;
use crate::event::{Event, EventPatch};

pub trait ProviderCommand: Serialize {
    type Response: DeserializeOwned;
    fn command() -> Command;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ListCalendars,
    ListEvents,
    CreateEvent,
    UpdateEvent,
    DeleteEvent,
}

/// Request sent to the provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Response read back from the provider.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    Success { data: T },
    Error { error: String },
}

/// Grant the provider acts on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub grant_id: String,
    pub access_token: String,
}

impl From<&Credentials> for Grant {
    fn from(credentials: &Credentials) -> Self {
        Grant {
            grant_id: credentials.grant_id.clone(),
            access_token: credentials.access_token.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListCalendars {
    #[serde(flatten)]
    pub grant: Grant,
}

impl ProviderCommand for ListCalendars {
    type Response = Vec<Calendar>;
    fn command() -> Command {
        Command::ListCalendars
    }
}

/// List events of one calendar. Bounds are epoch seconds.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListEvents {
    #[serde(flatten)]
    pub grant: Grant,
    pub calendar_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ProviderCommand for ListEvents {
    type Response = Vec<Event>;
    fn command() -> Command {
        Command::ListEvents
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEvent {
    #[serde(flatten)]
    pub grant: Grant,
    pub calendar_id: String,
    pub event: Event,
}

impl ProviderCommand for CreateEvent {
    type Response = Event;
    fn command() -> Command {
        Command::CreateEvent
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateEvent {
    #[serde(flatten)]
    pub grant: Grant,
    pub calendar_id: String,
    pub event_id: String,
    pub patch: EventPatch,
}

impl ProviderCommand for UpdateEvent {
    type Response = Event;
    fn command() -> Command {
        Command::UpdateEvent
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteEvent {
    #[serde(flatten)]
    pub grant: Grant,
    pub calendar_id: String,
    pub event_id: String,
}

impl ProviderCommand for DeleteEvent {
    type Response = ();
    fn command() -> Command {
        Command::DeleteEvent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let params = ListEvents {
            grant: Grant {
                grant_id: "g".into(),
                access_token: "t".into(),
            },
            calendar_id: "primary".into(),
            start: Some(0),
            end: None,
            limit: None,
        };
        let request = Request {
            command: ListEvents::command(),
            params: serde_json::to_value(params).unwrap(),
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["command"], "list_events");
        assert_eq!(json["params"]["grant_id"], "g");
        assert_eq!(json["params"]["calendar_id"], "primary");
        assert!(json["params"].get("end").is_none());
    }

    #[test]
    fn test_response_variants() {
        let ok: Response<Vec<String>> =
            serde_json::from_str(r#"{"status":"success","data":["a"]}"#).unwrap();
        assert!(matches!(ok, Response::Success { data } if data == vec!["a".to_string()]));

        let err: Response<()> =
            serde_json::from_str(r#"{"status":"error","error":"grant revoked"}"#).unwrap();
        assert!(matches!(err, Response::Error { error } if error == "grant revoked"));
    }
}
