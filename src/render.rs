//! Colored terminal rendering for calmirror types.

use calmirror_core::conflict::{ConflictResult, ConflictingEvent};
use calmirror_core::context::ConnectionTestResult;
use calmirror_core::{Calendar, Event, When};
use chrono::{DateTime, Local};
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for Calendar {
    fn render(&self) -> String {
        let mut line = format!("📅 {}", self.name.bold());
        if self.is_primary {
            line.push_str(&format!(" {}", "(primary)".green()));
        }
        if self.read_only {
            line.push_str(&format!(" {}", "(read-only)".yellow()));
        }
        format!("{} {}", line, self.id.dimmed())
    }
}

impl Render for Event {
    fn render(&self) -> String {
        let title = if self.busy {
            self.to_string()
        } else {
            format!("{} {}", self, "(free)".dimmed())
        };
        format!("{} {} {}", render_when(&self.when).dimmed(), title, self.id.dimmed())
    }
}

impl Render for ConflictingEvent {
    fn render(&self) -> String {
        let title = self.title.as_deref().unwrap_or("(untitled)");
        format!("{} {} {}", render_when(&self.when).dimmed(), title.red(), self.id.dimmed())
    }
}

impl Render for ConflictResult {
    fn render(&self) -> String {
        if !self.has_conflict {
            return "No conflicts".green().to_string();
        }

        let mut lines = vec![format!(
            "{} {}",
            self.conflicting_events.len().to_string().red().bold(),
            pluralize("conflict", self.conflicting_events.len()).red()
        )];
        lines.extend(
            self.conflicting_events
                .iter()
                .map(|e| format!("   {}", e.render())),
        );
        lines.join("\n")
    }
}

impl Render for ConnectionTestResult {
    fn render(&self) -> String {
        match (&self.error, &self.timestamp) {
            (Some(error), _) => format!("{} {}", "✗".red(), error.red()),
            (None, Some(timestamp)) => {
                format!("{} Connected {}", "✓".green(), format!("(server time {timestamp})").dimmed())
            }
            (None, None) => format!("{} Connected", "✓".green()),
        }
    }
}

fn render_when(when: &When) -> String {
    match when {
        When::Timespan {
            start_time,
            end_time,
            ..
        } => match (start_time, end_time) {
            (Some(start), Some(end)) => format!("{} - {}", local_time(*start), local_time(*end)),
            (Some(start), None) => format!("{} -", local_time(*start)),
            _ => "(no time)".to_string(),
        },
        When::Datespan {
            start_date,
            end_date,
        } => match (start_date, end_date) {
            (Some(start), Some(end)) => format!("{start} - {end}"),
            (Some(start), None) => start.clone(),
            _ => "(no date)".to_string(),
        },
    }
}

fn local_time(epoch: i64) -> String {
    DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| epoch.to_string())
}

fn pluralize(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{word}s")
    }
}
