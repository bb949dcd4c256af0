//! `club_scraper`: builds the ranked club spreadsheet for the bot

use chrono::Utc;
use club_relay_bot::config::Settings;
use club_relay_bot::logging;
use club_relay_bot::scrape::{read_club_list, write_report, ClubScraper, HttpFetcher};
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init()?;

    let settings = Settings::new().map_err(|e| {
        error!("Failed to load configuration: {e}");
        e
    })?;

    let contents = tokio::fs::read_to_string(&settings.clubs_file)
        .await
        .map_err(|e| {
            error!(
                "Failed to read club list {}: {e}",
                settings.clubs_file.display()
            );
            e
        })?;
    let clubs = read_club_list(&contents);
    info!("Scraping {} clubs", clubs.len());

    let scraper = ClubScraper::new(Arc::new(HttpFetcher::new()?), &settings.scrape_base_url);
    let reports = scraper.scrape_all(&clubs, Utc::now()).await;

    let path = settings.spreadsheet_path.clone();
    tokio::task::spawn_blocking(move || write_report(&path, &reports)).await??;
    Ok(())
}
