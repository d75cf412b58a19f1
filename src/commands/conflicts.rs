use anyhow::Result;
use calmirror_core::{ConflictQuery, MirrorContext};

use crate::render::Render;

pub async fn run(
    context: &MirrorContext,
    user: &str,
    query: &ConflictQuery,
    remote: bool,
) -> Result<()> {
    let result = if remote {
        context.sync().check_remote_conflicts(user, query).await?
    } else {
        context.sync().check_conflicts(user, query).await?
    };

    println!("{}", result.render());
    Ok(())
}
