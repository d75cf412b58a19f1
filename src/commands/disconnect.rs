use anyhow::Result;
use calmirror_core::MirrorContext;
use owo_colors::OwoColorize;

pub async fn run(context: &MirrorContext, user: &str) -> Result<()> {
    context.sync().disconnect_user(user).await?;
    println!("{} Disconnected {}", "✓".green(), user);
    Ok(())
}
