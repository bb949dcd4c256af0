use club_relay_bot::bot::handlers::load_catalog;
use club_relay_bot::bot::runner::run_bot;
use club_relay_bot::bot::transport::TelegramSender;
use club_relay_bot::config::Settings;
use club_relay_bot::distribution::Distributor;
use club_relay_bot::logging;
use club_relay_bot::media::MediaAggregator;
use club_relay_bot::relay::RelayQueue;
use club_relay_bot::storage::FlatFileStore;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenv().ok();

    logging::init().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?;

    info!("Starting club relay bot...");

    let settings = init_settings();
    let distributor = init_distributor(&settings).await;
    init_catalog(&settings, &distributor).await;

    let bot = Bot::new(settings.telegram_token.clone());

    let admins = admin_list(&settings);
    if admins.is_empty() {
        warn!("No admin ids configured; uploads will not be relayed anywhere.");
    }
    let (relay, relay_task) = RelayQueue::spawn(
        Arc::new(TelegramSender::new(bot.clone())),
        settings.relay_delay(),
    );
    let aggregator = MediaAggregator::new(
        relay,
        admins,
        settings.media_quiet(),
        settings.processed_media_ttl(),
    );

    run_bot(bot, settings, distributor, aggregator).await;

    // Undelivered notifications are dropped on shutdown
    relay_task.abort();
    info!("Bot stopped.");
    Ok(())
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) if s.telegram_token.is_empty() => {
            error!("TELEGRAM_TOKEN is not set");
            std::process::exit(1);
        }
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_distributor(settings: &Settings) -> Arc<Distributor> {
    let store = match FlatFileStore::open(&settings.data_dir).await {
        Ok(store) => store,
        Err(e) => {
            error!(
                "Failed to open data directory {}: {}",
                settings.data_dir.display(),
                e
            );
            std::process::exit(1);
        }
    };
    match Distributor::load(Arc::new(store), settings.ban_duration()).await {
        Ok(distributor) => Arc::new(distributor),
        Err(e) => {
            error!("Failed to load user tables: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_catalog(settings: &Settings, distributor: &Distributor) {
    if !settings.spreadsheet_path.exists() {
        warn!(
            "Spreadsheet {} not found; groups stay empty until /run",
            settings.spreadsheet_path.display()
        );
        return;
    }
    match load_catalog(settings).await {
        Ok(catalog) => {
            distributor.replace_catalog(catalog).await;
        }
        Err(e) => warn!("Failed to build groups at startup: {e:#}"),
    }
}

// Sorted so notifications go out in a fixed admin order
fn admin_list(settings: &Settings) -> Vec<i64> {
    let mut admins: Vec<i64> = settings.admin_ids().into_iter().collect();
    admins.sort_unstable();
    admins
}
