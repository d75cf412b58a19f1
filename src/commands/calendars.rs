use anyhow::Result;
use calmirror_core::MirrorContext;
use owo_colors::OwoColorize;

use crate::render::Render;

pub async fn run(context: &MirrorContext, user: &str, refresh: bool) -> Result<()> {
    let calendars = if refresh {
        context.sync().refresh_calendars(user).await?
    } else {
        context.store().get_calendars(user).await?
    };

    if calendars.is_empty() {
        println!("{}", "No calendars found".dimmed());
        if !refresh {
            println!("{}", "Run with --refresh to fetch them upstream".dimmed());
        }
        return Ok(());
    }

    for calendar in &calendars {
        println!("{}", calendar.render());
    }

    Ok(())
}
