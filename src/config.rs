//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the defaults the bot falls back to.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Application settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(default)]
    pub telegram_token: String,

    /// Comma-separated list of administrator Telegram IDs
    #[serde(rename = "admin_ids", default)]
    pub admin_ids_str: Option<String>,

    /// Directory holding the flat-file tables and the broadcast template
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Ranked spreadsheet produced by `club_scraper`
    #[serde(default = "default_spreadsheet_path")]
    pub spreadsheet_path: PathBuf,

    /// Zero-based column holding the activity sum (AF)
    #[serde(default = "default_weight_column")]
    pub weight_column: usize,

    /// PDF sent by the "instructions" button
    #[serde(default = "default_instruction_path")]
    pub instruction_path: PathBuf,

    /// Pause between two outbound admin notifications
    #[serde(default = "default_relay_delay_ms")]
    pub relay_delay_ms: u64,

    /// Quiet period after the last part before a media group is relayed
    #[serde(default = "default_media_quiet_ms")]
    pub media_quiet_ms: u64,

    /// Length of a ban in hours
    #[serde(default = "default_ban_hours")]
    pub ban_hours: i64,

    /// How long a relayed media group token is remembered
    #[serde(default = "default_processed_media_ttl_secs")]
    pub processed_media_ttl_secs: u64,

    /// Club URL list consumed by the scraper, one per line
    #[serde(default = "default_clubs_file")]
    pub clubs_file: PathBuf,

    /// Base URL prepended to relative admin profile links
    #[serde(default = "default_scrape_base_url")]
    pub scrape_base_url: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_spreadsheet_path() -> PathBuf {
    PathBuf::from("lichess_club_admins.xlsx")
}

const fn default_weight_column() -> usize {
    31
}

fn default_instruction_path() -> PathBuf {
    PathBuf::from("Инструкция.pdf")
}

const fn default_relay_delay_ms() -> u64 {
    1000
}

const fn default_media_quiet_ms() -> u64 {
    5000
}

const fn default_ban_hours() -> i64 {
    24
}

const fn default_processed_media_ttl_secs() -> u64 {
    6 * 60 * 60
}

fn default_clubs_file() -> PathBuf {
    PathBuf::from("clubs_domens.txt")
}

fn default_scrape_base_url() -> String {
    "https://lichess.org".to_string()
}

/// Builds the layered configuration source shared by both binaries.
///
/// # Errors
///
/// Returns a `ConfigError` if a present config file cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        // `APP__DATA_DIR=/var/lib/bot` style overrides
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Plain UPPER_SNAKE_CASE variables; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use club_relay_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Returns the set of administrator Telegram IDs
    #[must_use]
    pub fn admin_ids(&self) -> HashSet<i64> {
        self.admin_ids_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns true when `user_id` is on the administrator allow-list
    #[must_use]
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids().contains(&user_id)
    }

    /// Pause between two outbound admin notifications
    #[must_use]
    pub const fn relay_delay(&self) -> Duration {
        Duration::from_millis(self.relay_delay_ms)
    }

    /// Quiet period closing a media group
    #[must_use]
    pub const fn media_quiet(&self) -> Duration {
        Duration::from_millis(self.media_quiet_ms)
    }

    /// Length of a ban
    #[must_use]
    pub fn ban_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ban_hours)
    }

    /// Time-to-live of the relayed media group token set
    #[must_use]
    pub const fn processed_media_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_media_ttl_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            admin_ids_str: None,
            data_dir: default_data_dir(),
            spreadsheet_path: default_spreadsheet_path(),
            weight_column: default_weight_column(),
            instruction_path: default_instruction_path(),
            relay_delay_ms: default_relay_delay_ms(),
            media_quiet_ms: default_media_quiet_ms(),
            ban_hours: default_ban_hours(),
            processed_media_ttl_secs: default_processed_media_ttl_secs(),
            clubs_file: default_clubs_file(),
            scrape_base_url: default_scrape_base_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("ADMIN_IDS", "10,20");
        env::set_var("RELAY_DELAY_MS", "250");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_token, "dummy_token");
        assert!(settings.is_admin(10));
        assert!(settings.is_admin(20));
        assert_eq!(settings.relay_delay(), Duration::from_millis(250));
        // Untouched keys keep their defaults
        assert_eq!(settings.weight_column, 31);
        assert_eq!(settings.ban_duration(), chrono::Duration::hours(24));

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("ADMIN_IDS");
        env::remove_var("RELAY_DELAY_MS");
        Ok(())
    }

    #[test]
    fn test_list_parsing() {
        let mut settings = Settings::default();

        // Test comma
        settings.admin_ids_str = Some("123,456".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&123));
        assert!(admins.contains(&456));
        assert_eq!(admins.len(), 2);

        // Test space
        settings.admin_ids_str = Some("111 222".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&111));
        assert!(admins.contains(&222));
        assert_eq!(admins.len(), 2);

        // Test semicolon and mixed
        settings.admin_ids_str = Some("333; 444, 555".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&333));
        assert!(admins.contains(&444));
        assert!(admins.contains(&555));
        assert_eq!(admins.len(), 3);

        // Test empty/bad parsing
        settings.admin_ids_str = Some("abc, 777".to_string());
        let admins = settings.admin_ids();
        assert!(admins.contains(&777));
        assert_eq!(admins.len(), 1);
    }

    #[test]
    fn test_no_admins_configured() {
        let settings = Settings::default();
        assert!(settings.admin_ids().is_empty());
        assert!(!settings.is_admin(1));
    }
}
