//! Provider-neutral event types.
//!
//! Events arrive from the upstream calendar service and are mirrored
//! locally. Their time window is either a `Timespan` (epoch seconds) or a
//! `Datespan` (calendar dates), never both.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A calendar event as mirrored from the upstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Upstream-assigned id. Empty for events not yet created upstream.
    #[serde(default)]
    pub id: String,
    pub calendar_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default = "default_busy")]
    pub busy: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Grant of the provider account the event belongs to.
    pub grant_id: String,
    /// Epoch seconds
    #[serde(default)]
    pub created_at: i64,
    /// Epoch seconds
    #[serde(default)]
    pub updated_at: i64,
    pub when: When,
}

fn default_busy() -> bool {
    true
}

/// The time window of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum When {
    Timespan {
        start_time: Option<i64>,
        end_time: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_timezone: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_timezone: Option<String>,
    },
    Datespan {
        start_date: Option<String>,
        end_date: Option<String>,
    },
}

impl When {
    pub fn timespan(start_time: i64, end_time: i64) -> Self {
        When::Timespan {
            start_time: Some(start_time),
            end_time: Some(end_time),
            start_timezone: None,
            end_timezone: None,
        }
    }

    pub fn datespan(start_date: &str, end_date: &str) -> Self {
        When::Datespan {
            start_date: Some(start_date.to_string()),
            end_date: Some(end_date.to_string()),
        }
    }

    /// Build a window from raw candidate bounds. The start bound decides the
    /// shape; a bound of the other kind is dropped.
    pub fn from_bounds(start: &TimeBound, end: &TimeBound) -> Self {
        match start {
            TimeBound::Epoch(start_time) => When::Timespan {
                start_time: Some(*start_time),
                end_time: end.as_epoch(),
                start_timezone: None,
                end_timezone: None,
            },
            TimeBound::Date(start_date) => When::Datespan {
                start_date: Some(start_date.clone()),
                end_date: end.as_date().map(str::to_string),
            },
        }
    }

    /// Stored discriminator (`when_object` column).
    pub fn kind(&self) -> &'static str {
        match self {
            When::Timespan { .. } => "timespan",
            When::Datespan { .. } => "datespan",
        }
    }

    /// Comparable `(start, end)` in epoch seconds, if both bounds are known.
    pub fn interval(&self) -> Option<(i64, i64)> {
        match self {
            When::Timespan {
                start_time,
                end_time,
                ..
            } => Some(((*start_time)?, (*end_time)?)),
            When::Datespan {
                start_date,
                end_date,
            } => {
                let start = parse_instant(start_date.as_deref()?)?;
                let end = parse_instant(end_date.as_deref()?)?;
                Some((start.timestamp(), end.timestamp()))
            }
        }
    }

    /// Start in epoch seconds, used for ordering.
    pub fn start(&self) -> Option<i64> {
        match self {
            When::Timespan { start_time, .. } => *start_time,
            When::Datespan { start_date, .. } => {
                parse_instant(start_date.as_deref()?).map(|dt| dt.timestamp())
            }
        }
    }
}

/// Parse a date string as an instant: `YYYY-MM-DD` is midnight UTC,
/// anything else must be RFC 3339.
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A raw candidate bound: epoch seconds or a date string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeBound {
    Epoch(i64),
    Date(String),
}

impl TimeBound {
    pub fn as_epoch(&self) -> Option<i64> {
        match self {
            TimeBound::Epoch(secs) => Some(*secs),
            TimeBound::Date(_) => None,
        }
    }

    pub fn as_date(&self) -> Option<&str> {
        match self {
            TimeBound::Epoch(_) => None,
            TimeBound::Date(date) => Some(date),
        }
    }

    /// Epoch seconds for either shape, used to query a listing window.
    pub fn to_epoch(&self) -> Option<i64> {
        match self {
            TimeBound::Epoch(secs) => Some(*secs),
            TimeBound::Date(date) => parse_instant(date).map(|dt| dt.timestamp()),
        }
    }
}

impl FromStr for TimeBound {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().parse::<i64>() {
            Ok(secs) => TimeBound::Epoch(secs),
            Err(_) => TimeBound::Date(s.trim().to_string()),
        })
    }
}

impl fmt::Display for TimeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBound::Epoch(secs) => write!(f, "{secs}"),
            TimeBound::Date(date) => write!(f, "{date}"),
        }
    }
}

/// Partial update of an event. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<When>,
}

impl EventPatch {
    pub fn apply_to(&self, event: &mut Event) {
        if let Some(title) = &self.title {
            event.title = Some(title.clone());
        }
        if let Some(description) = &self.description {
            event.description = Some(description.clone());
        }
        if let Some(location) = &self.location {
            event.location = Some(location.clone());
        }
        if let Some(busy) = self.busy {
            event.busy = busy;
        }
        if let Some(read_only) = self.read_only {
            event.read_only = read_only;
        }
        if let Some(when) = &self.when {
            event.when = when.clone();
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.title.as_deref().unwrap_or("(untitled)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_when_serializes_with_kind_tag() {
        let json = serde_json::to_value(When::timespan(0, 100)).unwrap();
        assert_eq!(json["kind"], "timespan");
        assert_eq!(json["start_time"], 0);

        let when: When = serde_json::from_str(
            r#"{"kind":"datespan","start_date":"2025-03-01","end_date":"2025-03-02"}"#,
        )
        .unwrap();
        assert_eq!(when, When::datespan("2025-03-01", "2025-03-02"));
    }

    #[test]
    fn test_datespan_interval_uses_midnight_utc() {
        let when = When::datespan("1970-01-02", "1970-01-03");
        assert_eq!(when.interval(), Some((86_400, 172_800)));
    }

    #[test]
    fn test_interval_missing_bound() {
        let when = When::Timespan {
            start_time: Some(10),
            end_time: None,
            start_timezone: None,
            end_timezone: None,
        };
        assert_eq!(when.interval(), None);
        assert_eq!(when.start(), Some(10));
    }

    #[test]
    fn test_from_bounds_infers_shape_from_start() {
        let when = When::from_bounds(&TimeBound::Epoch(5), &TimeBound::Epoch(9));
        assert_eq!(when, When::timespan(5, 9));

        let when = When::from_bounds(
            &TimeBound::Date("2025-01-01".into()),
            &TimeBound::Epoch(9),
        );
        assert_eq!(
            when,
            When::Datespan {
                start_date: Some("2025-01-01".into()),
                end_date: None
            }
        );
    }

    #[test]
    fn test_time_bound_parse() {
        assert_eq!("1700000000".parse::<TimeBound>().unwrap(), TimeBound::Epoch(1_700_000_000));
        assert_eq!(
            "2025-03-20".parse::<TimeBound>().unwrap(),
            TimeBound::Date("2025-03-20".into())
        );
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut event = Event {
            id: "evt".into(),
            calendar_id: "cal".into(),
            title: Some("Standup".into()),
            description: Some("daily".into()),
            location: None,
            busy: true,
            read_only: false,
            grant_id: "grant".into(),
            created_at: 1,
            updated_at: 1,
            when: When::timespan(0, 900),
        };
        let patch = EventPatch {
            title: Some("Retro".into()),
            busy: Some(false),
            ..Default::default()
        };
        patch.apply_to(&mut event);

        assert_eq!(event.title.as_deref(), Some("Retro"));
        assert_eq!(event.description.as_deref(), Some("daily"));
        assert!(!event.busy);
        assert_eq!(event.when, When::timespan(0, 900));
    }
}
