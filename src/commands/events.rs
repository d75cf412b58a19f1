use anyhow::Result;
use calmirror_core::date_range::DateRange;
use calmirror_core::{EventFilter, MirrorContext};
use owo_colors::OwoColorize;

use crate::render::Render;

pub async fn run(
    context: &MirrorContext,
    user: &str,
    calendar: Option<String>,
    range: DateRange,
    limit: Option<usize>,
) -> Result<()> {
    let filter = range.apply_to(EventFilter {
        calendar_id: calendar,
        limit,
        ..EventFilter::for_user(user)
    });

    let events = context.sync().get_events(&filter).await?;

    if events.is_empty() {
        println!("{}", "No events found".dimmed());
        return Ok(());
    }

    for event in &events {
        println!("{}", event.render());
    }

    Ok(())
}
