//! Club activity scraper
//!
//! For every club page the scraper collects the admin profiles linked from
//! the club's meta section, checks when each admin was last seen, and writes
//! one spreadsheet row per club. The activity sum lands in column AF, where
//! the bot's catalog builder reads it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use rust_xlsxwriter::{Workbook, XlsxError};
use scraper::{Html, Selector};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Admins seen within this many days count as active
pub const ACTIVE_WINDOW_DAYS: i64 = 60;
/// Admin columns written per club
pub const MAX_ADMINS: usize = 10;
/// Zero-based column of the activity sum (AF)
pub const ACTIVITY_COLUMN: u16 = 31;

const ADMIN_LINK_SELECTOR: &str = r#"section.team-show__meta a[href^="/@/"]"#;
const LAST_SEEN_SELECTOR: &str = "div.stats time[datetime]";
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Errors raised while scraping or writing the report
#[derive(Error, Debug)]
pub enum ScrapeError {
    /// Transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success response
    #[error("{url} answered with status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },
    /// CSS selector failed to compile
    #[error("Invalid selector {0}")]
    Selector(String),
    /// Reading the club list failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Writing the spreadsheet failed
    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] XlsxError),
}

/// Admin profile linked from a club page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminLink {
    /// Absolute profile URL
    pub url: String,
    /// Username
    pub name: String,
}

/// Admin with the result of the activity check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminActivity {
    /// Profile
    pub link: AdminLink,
    /// Seen within the activity window
    pub active: bool,
}

/// One spreadsheet row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClubReport {
    /// Club page URL
    pub club_url: String,
    /// Admins in page order
    pub admins: Vec<AdminActivity>,
}

impl ClubReport {
    /// Number of active admins among the written columns
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.admins
            .iter()
            .take(MAX_ADMINS)
            .filter(|a| a.active)
            .count()
    }
}

fn selector(css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Selector(format!("{css}: {e}")))
}

/// Club URLs from the list file, one per line; blanks and `#` lines skipped
#[must_use]
pub fn read_club_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Admin profile links from a club page, deduplicated, in page order
///
/// # Errors
///
/// Returns an error if the selector fails to compile.
pub fn parse_admin_links(html: &str, base_url: &str) -> Result<Vec<AdminLink>, ScrapeError> {
    let document = Html::parse_document(html);
    let links = selector(ADMIN_LINK_SELECTOR)?;
    let base = base_url.trim_end_matches('/');

    let mut admins: Vec<AdminLink> = Vec::new();
    for href in document.select(&links).filter_map(|a| a.value().attr("href")) {
        let Some(name) = href.strip_prefix("/@/") else {
            continue;
        };
        let name = name.split(['/', '?', '#']).next().unwrap_or_default();
        if name.is_empty() || admins.iter().any(|a| a.name == name) {
            continue;
        }
        admins.push(AdminLink {
            url: format!("{base}/@/{name}"),
            name: name.to_string(),
        });
    }
    Ok(admins)
}

/// "Last seen" timestamp from a profile page
///
/// # Errors
///
/// Returns an error if the selector fails to compile.
pub fn parse_last_seen(html: &str) -> Result<Option<DateTime<Utc>>, ScrapeError> {
    let document = Html::parse_document(html);
    let time = selector(LAST_SEEN_SELECTOR)?;
    Ok(document
        .select(&time)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

/// True when `last_seen` lies within the activity window before `now`
#[must_use]
pub fn is_active(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_seen <= Duration::days(ACTIVE_WINDOW_DAYS)
}

/// Source of HTML pages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the body of `url`
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError>;
}

/// `reqwest` client with browser-like headers
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds the client
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Walks club pages and admin profiles
pub struct ClubScraper {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl ClubScraper {
    /// Creates a scraper resolving profile links against `base_url`
    #[must_use]
    pub fn new(fetcher: Arc<dyn PageFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
        }
    }

    /// Scrapes one club; `None` when the page fails or lists no admins
    pub async fn scrape_club(&self, club_url: &str, now: DateTime<Utc>) -> Option<ClubReport> {
        let page = match self.fetcher.fetch(club_url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch club {club_url}: {e}");
                return None;
            }
        };
        let links = match parse_admin_links(&page, &self.base_url) {
            Ok(links) if !links.is_empty() => links,
            Ok(_) => {
                warn!("No admins found for {club_url}");
                return None;
            }
            Err(e) => {
                warn!("Failed to parse club {club_url}: {e}");
                return None;
            }
        };

        let mut admins = Vec::with_capacity(links.len());
        for link in links {
            let active = self.admin_active(&link, now).await;
            admins.push(AdminActivity { link, active });
        }
        Some(ClubReport {
            club_url: club_url.to_string(),
            admins,
        })
    }

    // Any failure counts as inactive
    async fn admin_active(&self, link: &AdminLink, now: DateTime<Utc>) -> bool {
        let page = match self.fetcher.fetch(&link.url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch admin {}: {e}", link.url);
                return false;
            }
        };
        match parse_last_seen(&page) {
            Ok(Some(last_seen)) => is_active(last_seen, now),
            Ok(None) => {
                warn!("No last-seen time on {}", link.url);
                false
            }
            Err(e) => {
                warn!("Failed to parse admin {}: {e}", link.url);
                false
            }
        }
    }

    /// Scrapes every club in order, skipping the ones without a report
    pub async fn scrape_all(&self, clubs: &[String], now: DateTime<Utc>) -> Vec<ClubReport> {
        let mut reports = Vec::new();
        for (i, club) in clubs.iter().enumerate() {
            info!("Processing {club} ({}/{})", i + 1, clubs.len());
            if let Some(report) = self.scrape_club(club, now).await {
                reports.push(report);
            }
        }
        reports
    }
}

/// Column titles of the report
#[must_use]
pub fn header_row() -> Vec<String> {
    let mut header = vec!["Клуб URL".to_string()];
    for n in 1..=MAX_ADMINS {
        header.push(format!("Админ URL {n}"));
        header.push(format!("Имя админа {n}"));
        header.push(format!("Статус {n}"));
    }
    header.push("Активных админов".to_string());
    header
}

/// Writes the report spreadsheet read by the bot's catalog builder
///
/// # Errors
///
/// Returns an error if the workbook cannot be written.
pub fn write_report(path: &Path, reports: &[ClubReport]) -> Result<(), ScrapeError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Клубы и админы")?;

    for (title, col) in header_row().iter().zip(0u16..) {
        sheet.write_string(0, col, title)?;
    }

    for (report, row) in reports.iter().zip(1u32..) {
        sheet.write_string(row, 0, &report.club_url)?;
        for (admin, col) in report.admins.iter().take(MAX_ADMINS).zip((1u16..).step_by(3)) {
            sheet.write_string(row, col, &admin.link.url)?;
            sheet.write_string(row, col + 1, &admin.link.name)?;
            sheet.write_number(row, col + 2, u8::from(admin.active))?;
        }
        let active = u32::try_from(report.active_count()).unwrap_or(u32::MAX);
        sheet.write_number(row, ACTIVITY_COLUMN, active)?;
    }

    workbook.save(path)?;
    info!("Saved {} clubs to {}", reports.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUB_PAGE: &str = r#"
        <html><body>
          <section class="team-show__meta">
            <p>Leaders:
              <a class="user-link" href="/@/alice">alice</a>,
              <a class="user-link" href="/@/bob">bob</a>,
              <a class="user-link" href="/@/alice">alice</a>
            </p>
            <a href="/team/some-club/members">Members</a>
          </section>
          <div class="members"><a href="/@/carol">carol</a></div>
        </body></html>"#;

    fn profile(datetime: &str) -> String {
        format!(
            r#"<html><body><div class="stats"><p>Active <time class="timeago" datetime="{datetime}">x</time></p></div></body></html>"#
        )
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-02-01T00:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    #[test]
    fn test_parse_admin_links_only_reads_meta_section() -> Result<(), ScrapeError> {
        let admins = parse_admin_links(CLUB_PAGE, "https://lichess.org/")?;
        assert_eq!(
            admins,
            vec![
                AdminLink {
                    url: "https://lichess.org/@/alice".into(),
                    name: "alice".into()
                },
                AdminLink {
                    url: "https://lichess.org/@/bob".into(),
                    name: "bob".into()
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_parse_admin_links_without_section() -> Result<(), ScrapeError> {
        assert!(parse_admin_links("<html></html>", "https://lichess.org")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_last_seen_formats() -> Result<(), ScrapeError> {
        let expected = DateTime::parse_from_rfc3339("2025-01-10T08:30:00Z")
            .map(|t| t.with_timezone(&Utc))
            .ok();
        assert_eq!(parse_last_seen(&profile("2025-01-10T08:30:00.000Z"))?, expected);
        assert_eq!(parse_last_seen(&profile("2025-01-10T08:30:00"))?, expected);
        assert_eq!(parse_last_seen(&profile("yesterday"))?, None);
        assert_eq!(parse_last_seen("<div class=\"stats\"></div>")?, None);
        Ok(())
    }

    #[test]
    fn test_activity_window_is_inclusive() {
        let now = now();
        assert!(is_active(now - Duration::days(60), now));
        assert!(!is_active(now - Duration::days(60) - Duration::seconds(1), now));
        assert!(is_active(now, now));
    }

    #[test]
    fn test_read_club_list() {
        let list = read_club_list("https://lichess.org/team/a\n\n  https://lichess.org/team/b  \n# skipped\n");
        assert_eq!(list, ["https://lichess.org/team/a", "https://lichess.org/team/b"]);
    }

    #[test]
    fn test_header_places_sum_in_af() {
        let header = header_row();
        assert_eq!(header.len(), usize::from(ACTIVITY_COLUMN) + 1);
        assert_eq!(header[3], "Статус 1");
        assert_eq!(header[30], "Статус 10");
    }

    #[tokio::test]
    async fn test_scrape_club_classifies_admins() {
        let mut fetcher = MockPageFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|url| match url {
                "https://lichess.org/team/club" => Ok(CLUB_PAGE.to_string()),
                "https://lichess.org/@/alice" => Ok(profile("2025-01-20T10:00:00.000Z")),
                "https://lichess.org/@/bob" => Ok(profile("2024-06-01T10:00:00.000Z")),
                other => Err(ScrapeError::Status {
                    url: other.to_string(),
                    status: 404,
                }),
            });

        let scraper = ClubScraper::new(Arc::new(fetcher), "https://lichess.org");
        let report = scraper.scrape_club("https://lichess.org/team/club", now()).await;
        let Some(report) = report else {
            panic!("club with admins must produce a report");
        };
        let flags: Vec<_> = report
            .admins
            .iter()
            .map(|a| (a.link.name.as_str(), a.active))
            .collect();
        assert_eq!(flags, [("alice", true), ("bob", false)]);
        assert_eq!(report.active_count(), 1);
    }

    #[tokio::test]
    async fn test_scrape_all_skips_failing_clubs() {
        let mut fetcher = MockPageFetcher::new();
        fetcher.expect_fetch().returning(|url| match url {
            "https://lichess.org/team/empty" => Ok("<html></html>".to_string()),
            "https://lichess.org/team/ok" => Ok(CLUB_PAGE.to_string()),
            // Profiles fail to load: admins count as inactive
            other => Err(ScrapeError::Status {
                url: other.to_string(),
                status: 500,
            }),
        });

        let scraper = ClubScraper::new(Arc::new(fetcher), "https://lichess.org");
        let clubs = read_club_list(
            "https://lichess.org/team/empty\nhttps://lichess.org/team/down\nhttps://lichess.org/team/ok",
        );
        let reports = scraper.scrape_all(&clubs, now()).await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].club_url, "https://lichess.org/team/ok");
        assert_eq!(reports[0].active_count(), 0);
    }
}
