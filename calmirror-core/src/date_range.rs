//! Date range for listing mirrored events.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::store::EventFilter;

/// Days either side of today listed when no range is given.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Date range for filtering events.
/// None values mean unbounded in that direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for DateRange {
    /// ±DEFAULT_WINDOW_DAYS from now
    fn default() -> Self {
        let now = Utc::now();
        DateRange {
            from: Some(now - Duration::days(DEFAULT_WINDOW_DAYS)),
            to: Some(now + Duration::days(DEFAULT_WINDOW_DAYS)),
        }
    }
}

impl DateRange {
    /// Build a range from command-line arguments.
    /// - `from`: "start" for unbounded, or YYYY-MM-DD
    /// - `to`: "end" for unbounded, or YYYY-MM-DD (inclusive)
    pub fn from_args(from: Option<&str>, to: Option<&str>) -> Result<Self, String> {
        let default = DateRange::default();

        let from = match from {
            Some("start") => None,
            Some(s) => Some(start_of_day(parse_date(s)?)),
            None => default.from,
        };

        let to = match to {
            Some("end") => None,
            Some(s) => Some(end_of_day(parse_date(s)?)),
            None => default.to,
        };

        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err("Range start is after range end".to_string());
            }
        }

        Ok(DateRange { from, to })
    }

    /// Narrow `filter` to this range.
    pub fn apply_to(&self, filter: EventFilter) -> EventFilter {
        EventFilter {
            start_time: self.from.map(|dt| dt.timestamp()),
            end_time: self.to.map(|dt| dt.timestamp()),
            ..filter
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{s}'. Expected YYYY-MM-DD"))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + Duration::days(1) - Duration::seconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_range_is_inclusive_of_last_day() {
        let range = DateRange::from_args(Some("2025-03-01"), Some("2025-03-01")).unwrap();
        assert_eq!(range.from.unwrap().timestamp(), 1_740_787_200);
        assert_eq!(range.to.unwrap().timestamp(), 1_740_787_200 + 86_399);
    }

    #[test]
    fn test_unbounded_keywords() {
        let range = DateRange::from_args(Some("start"), Some("end")).unwrap();
        assert_eq!(range, DateRange { from: None, to: None });

        let filter = range.apply_to(EventFilter::for_user("user"));
        assert_eq!(filter.start_time, None);
        assert_eq!(filter.user_id.as_deref(), Some("user"));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(DateRange::from_args(Some("03/01/2025"), None).is_err());
        assert!(DateRange::from_args(Some("2025-03-02"), Some("2025-03-01")).is_err());
    }
}
