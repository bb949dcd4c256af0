#![deny(missing_docs)]
//! Club relay bot
//!
//! A Telegram bot that hands out ranked lichess clubs to registered users
//! one at a time, tracks their progress and temporary bans in flat files,
//! and relays files users upload to the administrators. The `club_scraper`
//! binary produces the ranked spreadsheet the bot reads.

/// Telegram bot implementation
pub mod bot;
/// Ranked club catalog
pub mod catalog;
/// Configuration management
pub mod config;
/// Distribution cursors and the ban gate
pub mod distribution;
/// Logging setup
pub mod logging;
/// Media group aggregation
pub mod media;
/// Outbound relay queue
pub mod relay;
/// Club activity scraper
pub mod scrape;
/// Flat-file persistence
pub mod storage;
