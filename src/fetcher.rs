//! HTTP fetcher for list sources.
//!
//! A source is either a literal address/range, returned as-is, or a URL whose
//! body is downloaded and normalized to one entry per line.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::SourceError;

/// One entry of a category list
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    /// A single address or range, used verbatim
    Literal(String),
    /// A remote list, one address or range per line
    Url(String),
}

impl Source {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.starts_with("http://") || s.starts_with("https://") {
            Source::Url(s.to_string())
        } else {
            Source::Literal(s.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Source::Literal(s) | Source::Url(s) => s,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, Source::Url(_))
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        match source {
            Source::Literal(s) | Source::Url(s) => s,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can turn a source into a list of entries.
///
/// The aggregator only depends on this trait, so tests can drive it without
/// a network.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, source: &Source) -> Result<Vec<String>, SourceError>;
}

/// User-Agent sent with every request
pub fn user_agent() -> String {
    format!(
        "Mozilla/5.0 (compatible; nft-blackhole/{})",
        env!("CARGO_PKG_VERSION")
    )
}

/// HTTP client for fetching lists
pub struct Fetcher {
    client: Client,
    retries: u32,
    skip_retrying: BTreeSet<u16>,
}

impl Fetcher {
    /// Create a fetcher from the timeout, retry and TLS settings of `config`
    pub fn new(config: &Config) -> Result<Self> {
        if config.ignore_certificate {
            warn!("TLS certificate validation is disabled (IGNORE_CERTIFICATE)");
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent())
            .danger_accept_invalid_certs(config.ignore_certificate)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            retries: config.retries,
            skip_retrying: config.status_skip_retrying.clone(),
        })
    }

    /// Resolve one source to its normalized entries
    pub async fn fetch(&self, source: &Source) -> Result<Vec<String>, SourceError> {
        match source {
            Source::Literal(entry) => Ok(vec![entry.clone()]),
            Source::Url(url) => self.fetch_url(url).await,
        }
    }

    /// Download a list, retrying immediately on failure.
    ///
    /// Statuses in the skip-retry set end the loop on the first hit.
    async fn fetch_url(&self, url: &str) -> Result<Vec<String>, SourceError> {
        for attempt in 1..=self.retries {
            match self.get(url).await {
                Ok(body) => {
                    let entries = normalize(&body);
                    debug!("Fetched {} - {} entries", url, format_count(entries.len()));
                    return Ok(entries);
                }
                Err(e) => {
                    warn!("{} {}", e, url);

                    if let Some(status) = e.status() {
                        if self.skip_retrying.contains(&status.as_u16()) {
                            error!("Failed to fetch {}: HTTP {}, not retrying", url, status);
                            return Err(SourceError::Status {
                                url: url.to_string(),
                                status: status.as_u16(),
                            });
                        }
                    }

                    if attempt < self.retries {
                        info!("Retrying {} ({}/{})", url, attempt + 1, self.retries);
                    }
                }
            }
        }

        error!("Failed to fetch {} after {} attempt(s)", url, self.retries);
        Err(SourceError::Exhausted {
            url: url.to_string(),
            attempts: self.retries,
        })
    }

    async fn get(&self, url: &str) -> reqwest::Result<String> {
        self.client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl Resolve for Fetcher {
    async fn resolve(&self, source: &Source) -> Result<Vec<String>, SourceError> {
        self.fetch(source).await
    }
}

/// Normalize list content: drop `#`/`;` comments, surrounding whitespace and
/// empty lines.
pub fn normalize(content: &str) -> Vec<String> {
    content
        .lines()
        .map(strip_comment)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

fn strip_comment(line: &str) -> &str {
    match line.find(|c: char| c == '#' || c == ';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

/// Format a count with K/M suffix
pub fn format_count(count: usize) -> String {
    if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1_000_000.0)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1_000.0)
    } else {
        count.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_comments() {
        let content = "# header\n192.168.1.1\n10.0.0.0/8 # trailing\n172.16.0.0/12;note\n";
        assert_eq!(
            normalize(content),
            vec!["192.168.1.1", "10.0.0.0/8", "172.16.0.0/12"]
        );
    }

    #[test]
    fn test_normalize_whitespace_and_empty_lines() {
        let content = "  192.168.1.1  \n\n\t10.0.0.0/8\t\r\n   \n;only comment\n";
        assert_eq!(normalize(content), vec!["192.168.1.1", "10.0.0.0/8"]);
    }

    #[test]
    fn test_normalize_keeps_unparsed_entries() {
        // Entries are not validated as CIDR
        let content = "not-an-ip\n2001:db8::/32\n";
        assert_eq!(normalize(content), vec!["not-an-ip", "2001:db8::/32"]);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize("").is_empty());
        assert!(normalize("# a\n; b\n\n").is_empty());
    }

    #[test]
    fn test_source_parse() {
        assert_eq!(
            Source::parse(" 10.0.0.0/8 "),
            Source::Literal("10.0.0.0/8".to_string())
        );
        assert_eq!(
            Source::parse("https://example.com/list"),
            Source::Url("https://example.com/list".to_string())
        );
        assert!(Source::parse("http://example.com/list").is_url());
        assert!(!Source::parse("ftp://example.com/list").is_url());
    }

    #[test]
    fn test_source_string_roundtrip() {
        let source = Source::from("https://example.com/list");
        assert_eq!(String::from(source.clone()), "https://example.com/list");
        assert_eq!(source.to_string(), "https://example.com/list");
    }

    #[test]
    fn test_user_agent() {
        let ua = user_agent();
        assert!(ua.contains("nft-blackhole/"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_literal_source_needs_no_network() {
        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let entries = fetcher.fetch(&Source::from("192.0.2.0/24")).await.unwrap();
        assert_eq!(entries, vec!["192.0.2.0/24"]);
    }

    #[tokio::test]
    async fn test_unreachable_url_exhausts_retries() {
        let config = Config {
            retries: 2,
            timeout: 0.5,
            ..Config::default()
        };
        let fetcher = Fetcher::new(&config).unwrap();
        // Port 9 on loopback refuses connections
        let result = fetcher.fetch(&Source::from("http://127.0.0.1:9/list")).await;
        assert_eq!(
            result,
            Err(SourceError::Exhausted {
                url: "http://127.0.0.1:9/list".to_string(),
                attempts: 2,
            })
        );
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1500), "1.5K");
        assert_eq!(format_count(1_500_000), "1.5M");
    }
}
