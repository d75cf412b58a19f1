mod commands;
mod logging;
mod render;

use anyhow::Result;
use calmirror_core::config::MirrorConfig;
use calmirror_core::date_range::DateRange;
use calmirror_core::{ConflictQuery, MirrorContext, TimeBound};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "calmirror")]
#[command(about = "Inspect a calmirror store and check calendar conflicts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the store and report its server time
    Check {
        /// Also check this user's credentials upstream
        #[arg(short, long)]
        user: Option<String>,
    },
    /// List a user's mirrored calendars
    Calendars {
        #[arg(short, long)]
        user: String,

        /// Fetch calendars upstream and update the mirror first
        #[arg(long)]
        refresh: bool,
    },
    /// List a user's mirrored events
    Events {
        #[arg(short, long)]
        user: String,

        /// Only show events from this calendar (by id)
        #[arg(short, long)]
        calendar: Option<String>,

        /// Show events from this date (YYYY-MM-DD, or "start" for all past events)
        #[arg(long)]
        from: Option<String>,

        /// Show events until this date (YYYY-MM-DD, or "end" for all future events)
        #[arg(long)]
        to: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Check a time window against existing events
    Conflicts {
        #[arg(short, long)]
        user: String,

        /// Window start (epoch seconds or YYYY-MM-DD)
        #[arg(short, long)]
        start: String,

        /// Window end (epoch seconds or YYYY-MM-DD)
        #[arg(short, long)]
        end: String,

        #[arg(short, long)]
        calendar: Option<String>,

        /// Event id to leave out, e.g. the event being moved
        #[arg(long)]
        exclude: Option<String>,

        /// Check against events listed upstream instead of the mirror
        #[arg(long)]
        remote: bool,
    },
    /// Forget a user's stored credentials
    Disconnect {
        #[arg(short, long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MirrorConfig::load()?;
    logging::init(&config.logging);

    let context = MirrorContext::from_config(&config)?;
    let result = run(cli.command, &context).await;

    if let Err(e) = context.shutdown().await {
        tracing::warn!("Failed to close store: {e}");
    }

    result
}

async fn run(command: Commands, context: &MirrorContext) -> Result<()> {
    match command {
        Commands::Check { user } => commands::check::run(context, user.as_deref()).await,
        Commands::Calendars { user, refresh } => {
            context.initialize(false).await?;
            commands::calendars::run(context, &user, refresh).await
        }
        Commands::Events {
            user,
            calendar,
            from,
            to,
            limit,
        } => {
            let range = DateRange::from_args(from.as_deref(), to.as_deref())
                .map_err(|e| anyhow::anyhow!(e))?;
            context.initialize(false).await?;
            commands::events::run(context, &user, calendar, range, limit).await
        }
        Commands::Conflicts {
            user,
            start,
            end,
            calendar,
            exclude,
            remote,
        } => {
            let query = ConflictQuery {
                start: parse_bound(&start)?,
                end: parse_bound(&end)?,
                calendar_id: calendar,
                exclude_id: exclude,
            };
            context.initialize(false).await?;
            commands::conflicts::run(context, &user, &query, remote).await
        }
        Commands::Disconnect { user } => {
            context.initialize(false).await?;
            commands::disconnect::run(context, &user).await
        }
    }
}

fn parse_bound(s: &str) -> Result<TimeBound> {
    let bound: TimeBound = s.parse()?;
    if bound.to_epoch().is_none() {
        anyhow::bail!("Invalid time '{}': expected epoch seconds, YYYY-MM-DD or RFC 3339", s);
    }
    Ok(bound)
}
