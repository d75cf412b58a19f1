use anyhow::Result;
use calmirror_core::MirrorContext;
use owo_colors::OwoColorize;

use crate::render::Render;

pub async fn run(context: &MirrorContext, user: Option<&str>) -> Result<()> {
    let result = context.test_connection().await;
    println!("{} {}", context.store().name().bold(), result.render());

    if !result.success {
        anyhow::bail!("Store connection failed");
    }
    // Already connected; marks the context so shutdown closes the store.
    context.initialize(false).await?;

    if let Some(user) = user {
        match context.sync().validate_credentials(user).await {
            Ok(true) => println!("{} Credentials valid for {}", "✓".green(), user),
            Ok(false) => println!("{} No valid credentials for {}", "✗".red(), user),
            Err(e) => println!("{} {}", "✗".red(), e.to_string().red()),
        }
    }

    Ok(())
}
