//! Time-conflict detection between a candidate window and existing events.

use serde::{Deserialize, Serialize};

use crate::event::{Event, TimeBound, When};

/// An existing event that overlaps the candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictingEvent {
    pub id: String,
    pub title: Option<String>,
    pub when: When,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResult {
    pub has_conflict: bool,
    pub conflicting_events: Vec<ConflictingEvent>,
}

impl ConflictResult {
    fn from_events<'a>(events: impl Iterator<Item = &'a Event>) -> Self {
        let conflicting_events: Vec<ConflictingEvent> = events
            .map(|e| ConflictingEvent {
                id: e.id.clone(),
                title: e.title.clone(),
                when: e.when.clone(),
            })
            .collect();

        ConflictResult {
            has_conflict: !conflicting_events.is_empty(),
            conflicting_events,
        }
    }
}

/// Whether two events overlap in time.
///
/// Intervals are half-open: events that only touch at an endpoint do not
/// overlap. An event never overlaps itself, and an event missing either
/// bound overlaps nothing.
pub fn overlaps(a: &Event, b: &Event) -> bool {
    if a.id == b.id {
        return false;
    }
    match (a.when.interval(), b.when.interval()) {
        (Some(a), Some(b)) => intervals_overlap(a, b),
        _ => false,
    }
}

fn intervals_overlap((start_a, end_a): (i64, i64), (start_b, end_b): (i64, i64)) -> bool {
    start_a < end_b && start_b < end_a
}

/// Check a candidate window against `existing`, in input order.
///
/// `exclude_id` drops one event from the result, typically the pre-edit
/// copy of the event being moved.
pub fn check_conflicts(
    start: &TimeBound,
    end: &TimeBound,
    existing: &[Event],
    exclude_id: Option<&str>,
) -> ConflictResult {
    let candidate = Event {
        id: uuid::Uuid::new_v4().to_string(),
        calendar_id: String::new(),
        title: None,
        description: None,
        location: None,
        busy: true,
        read_only: false,
        grant_id: String::new(),
        created_at: 0,
        updated_at: 0,
        when: When::from_bounds(start, end),
    };

    ConflictResult::from_events(
        existing
            .iter()
            .filter(|e| exclude_id != Some(e.id.as_str()))
            .filter(|e| overlaps(&candidate, e)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, start: i64, end: i64) -> Event {
        Event {
            id: id.to_string(),
            calendar_id: "cal".into(),
            title: Some(format!("Event {id}")),
            description: None,
            location: None,
            busy: true,
            read_only: false,
            grant_id: "grant".into(),
            created_at: 0,
            updated_at: 0,
            when: When::timespan(start, end),
        }
    }

    #[test]
    fn test_touching_intervals_do_not_overlap() {
        assert!(!overlaps(&event("a", 0, 100), &event("b", 100, 200)));
        assert!(overlaps(&event("a", 0, 101), &event("b", 100, 200)));
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let pairs = [
            ((0, 100), (50, 150)),
            ((0, 100), (100, 200)),
            ((10, 20), (0, 30)),
            ((0, 10), (20, 30)),
            ((5, 5), (0, 10)),
        ];
        for ((s1, e1), (s2, e2)) in pairs {
            let a = event("a", s1, e1);
            let b = event("b", s2, e2);
            assert_eq!(overlaps(&a, &b), overlaps(&b, &a), "{s1}-{e1} vs {s2}-{e2}");
        }
    }

    #[test]
    fn test_event_never_overlaps_itself() {
        let e = event("a", 0, 100);
        assert!(!overlaps(&e, &e));
    }

    #[test]
    fn test_zero_duration_overlaps_nothing() {
        assert!(!overlaps(&event("a", 50, 50), &event("b", 0, 100)));
    }

    #[test]
    fn test_missing_bound_overlaps_nothing() {
        let mut open = event("a", 0, 100);
        open.when = When::Timespan {
            start_time: Some(0),
            end_time: None,
            start_timezone: None,
            end_timezone: None,
        };
        assert!(!overlaps(&open, &event("b", 0, 100)));
    }

    /// 2025-03-01T00:00:00Z
    const MARCH_1: i64 = 1_740_787_200;

    #[test]
    fn test_datespans_compare_as_instants() {
        let mut all_day = event("a", 0, 0);
        all_day.when = When::datespan("2025-03-01", "2025-03-02");
        let morning = event("b", MARCH_1 + 3_600, MARCH_1 + 7_200);
        assert!(overlaps(&all_day, &morning));

        let mut next_day = event("c", 0, 0);
        next_day.when = When::datespan("2025-03-02", "2025-03-03");
        assert!(!overlaps(&all_day, &next_day));
    }

    #[test]
    fn test_exclude_by_id() {
        let a = event("a", 0, 100);
        let b = event("b", 50, 150);
        let c = event("c", 90, 300);

        let result = check_conflicts(
            &TimeBound::Epoch(0),
            &TimeBound::Epoch(100),
            &[a.clone(), b, c],
            Some(a.id.as_str()),
        );

        assert!(result.has_conflict);
        let ids: Vec<_> = result.conflicting_events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_result_preserves_input_order() {
        let existing = vec![event("late", 80, 120), event("early", 10, 20), event("clear", 200, 300)];
        let result = check_conflicts(&TimeBound::Epoch(0), &TimeBound::Epoch(100), &existing, None);
        let ids: Vec<_> = result.conflicting_events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "early"]);
    }

    #[test]
    fn test_no_conflicts() {
        let result = check_conflicts(
            &TimeBound::Epoch(0),
            &TimeBound::Epoch(100),
            &[event("later", 100, 200)],
            None,
        );
        assert_eq!(result, ConflictResult::default());
    }

    #[test]
    fn test_date_string_candidate() {
        let existing = vec![event("noon", MARCH_1 + 43_200, MARCH_1 + 46_800)];
        let result = check_conflicts(
            &TimeBound::Date("2025-03-01".into()),
            &TimeBound::Date("2025-03-02".into()),
            &existing,
            None,
        );
        assert!(result.has_conflict);
    }

    #[test]
    fn test_mixed_bounds_never_conflict() {
        let result = check_conflicts(
            &TimeBound::Epoch(0),
            &TimeBound::Date("2025-03-02".into()),
            &[event("a", 0, 100)],
            None,
        );
        assert!(!result.has_conflict);
    }
}
