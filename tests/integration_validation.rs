use anyhow::{anyhow, Result};
use club_relay_bot::config::Settings;
use dotenvy::dotenv;
use teloxide::prelude::*;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::test]
#[ignore = "Requires real credentials"]
async fn test_credentials_validation() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("Starting integration test for credentials validation...");
    let settings = Settings::new()?;
    if settings.telegram_token.is_empty() {
        return Err(anyhow!("TELEGRAM_TOKEN is not set"));
    }
    if settings.admin_ids().is_empty() {
        return Err(anyhow!("ADMIN_IDS is empty"));
    }

    let me = Bot::new(settings.telegram_token.clone()).get_me().await?;
    info!("Token belongs to @{}", me.username());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
