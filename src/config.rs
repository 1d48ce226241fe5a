//! Configuration management for nft-blackhole.
//!
//! The configuration is loaded once, validated, and then shared read-only
//! (behind an `Arc`) by every part of the pipeline.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::fetcher::Source;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nft-blackhole/nft-blackhole.conf";

const DEFAULT_GH_BASE_URL: &str = "https://raw.githubusercontent.com";
const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
const DEFAULT_RETRIES: u32 = 3;

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::V4, Family::V6];

    pub fn as_str(self) -> &'static str {
        match self {
            Family::V4 => "v4",
            Family::V6 => "v6",
        }
    }

    /// nftables set element type
    pub fn nft_type(self) -> &'static str {
        match self {
            Family::V4 => "ipv4_addr",
            Family::V6 => "ipv6_addr",
        }
    }

    /// The range covering the whole address space of this family
    pub fn whole_space(self) -> &'static str {
        match self {
            Family::V4 => "0.0.0.0/0",
            Family::V6 => "::/0",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent address-list categories, in processing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Whitelist,
    Blacklist,
    Country,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Whitelist, Category::Blacklist, Category::Country];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Whitelist => "whitelist",
            Category::Blacklist => "blacklist",
            Category::Country => "country",
        }
    }

    /// Name of the nftables set holding this category for `family`
    pub fn set_name(self, family: Family) -> String {
        format!("{}-{}", self.as_str(), family.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict used for blocked traffic
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockPolicy {
    #[default]
    Drop,
    Reject,
}

/// What membership in the country sets means
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CountryPolicy {
    /// Listed countries are blocked, everything else passes
    #[default]
    Block,
    /// Only listed countries pass
    Accept,
}

/// Enabled address families
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IpVersion {
    #[serde(deserialize_with = "deserialize_switch")]
    pub v4: bool,
    #[serde(deserialize_with = "deserialize_switch")]
    pub v6: bool,
}

impl Default for IpVersion {
    fn default() -> Self {
        Self {
            v4: true,
            v6: false,
        }
    }
}

/// Per-family source lists
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FamilyLists {
    pub v4: Vec<Source>,
    pub v6: Vec<Source>,
}

impl FamilyLists {
    pub fn get(&self, family: Family) -> &[Source] {
        match family {
            Family::V4 => &self.v4,
            Family::V6 => &self.v6,
        }
    }
}

/// Main configuration structure
///
/// Keys are upper-case to stay compatible with existing
/// `nft-blackhole.conf` files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub ip_version: IpVersion,
    pub block_policy: BlockPolicy,
    pub country_policy: CountryPolicy,
    #[serde(deserialize_with = "deserialize_country_codes")]
    pub country_list: Vec<String>,
    pub country_exclude_ports: Vec<u16>,
    #[serde(deserialize_with = "deserialize_switch")]
    pub block_output: bool,
    #[serde(deserialize_with = "deserialize_switch")]
    pub block_forward: bool,
    pub whitelist: FamilyLists,
    pub blacklist: FamilyLists,
    pub gh_base_url: String,
    /// HTTP timeout in seconds
    pub timeout: f64,
    /// Attempts per URL source
    pub retries: u32,
    pub status_skip_retrying: BTreeSet<u16>,
    #[serde(deserialize_with = "deserialize_switch")]
    pub ignore_certificate: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ip_version: IpVersion::default(),
            block_policy: BlockPolicy::Drop,
            country_policy: CountryPolicy::Block,
            country_list: Vec::new(),
            country_exclude_ports: Vec::new(),
            block_output: false,
            block_forward: false,
            whitelist: FamilyLists::default(),
            blacklist: FamilyLists::default(),
            gh_base_url: DEFAULT_GH_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
            status_skip_retrying: BTreeSet::from([404]),
            ignore_certificate: false,
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {:?}", path.as_ref()))
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.ip_version.v4 && !self.ip_version.v6 {
            anyhow::bail!("IP_VERSION: at least one of v4 or v6 must be enabled");
        }

        if self.retries == 0 {
            anyhow::bail!("RETRIES must be at least 1");
        }

        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            anyhow::bail!("TIMEOUT must be a positive number of seconds, got {}", self.timeout);
        }

        for code in &self.country_list {
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                anyhow::bail!("Invalid country code '{}' in COUNTRY_LIST", code);
            }
        }

        if self.country_exclude_ports.contains(&0) {
            anyhow::bail!("COUNTRY_EXCLUDE_PORTS must not contain port 0");
        }

        if !self.gh_base_url.starts_with("https://") && !self.gh_base_url.starts_with("http://") {
            anyhow::bail!("GH_BASE_URL must be an http(s) URL: {}", self.gh_base_url);
        }

        Ok(())
    }

    pub fn is_enabled(&self, family: Family) -> bool {
        match family {
            Family::V4 => self.ip_version.v4,
            Family::V6 => self.ip_version.v6,
        }
    }

    /// Enabled families, v4 first
    pub fn enabled_families(&self) -> Vec<Family> {
        Family::ALL
            .into_iter()
            .filter(|family| self.is_enabled(*family))
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Ordered sources for one category and family
    pub fn sources(&self, category: Category, family: Family) -> Vec<Source> {
        match category {
            Category::Whitelist => self.whitelist.get(family).to_vec(),
            Category::Blacklist => self.blacklist.get(family).to_vec(),
            Category::Country => self.country_sources(family),
        }
    }

    /// Country feeds: ipdeny, ipverse and herrbischoff for every configured code
    pub fn country_sources(&self, family: Family) -> Vec<Source> {
        let base = self.gh_base_url.trim_end_matches('/');
        let fam = family.as_str();

        self.country_list
            .iter()
            .flat_map(|code| {
                let ipdeny = match family {
                    Family::V4 => format!(
                        "https://www.ipdeny.com/ipblocks/data/aggregated/{code}-aggregated.zone"
                    ),
                    Family::V6 => format!(
                        "https://www.ipdeny.com/ipv6/ipaddresses/aggregated/{code}-aggregated.zone"
                    ),
                };
                [
                    ipdeny,
                    format!("{base}/ipverse/rir-ip/master/country/{code}/ip{fam}-aggregated.txt"),
                    format!("{base}/herrbischoff/country-ip-blocks/master/ip{fam}/{code}.cidr"),
                ]
            })
            .map(Source::from)
            .collect()
    }
}

/// Accept YAML 1.1 style switches (`on`, `off`, `yes`, `no`) as well as booleans.
fn deserialize_switch<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Switch {
        Bool(bool),
        Text(String),
    }

    match Switch::deserialize(deserializer)? {
        Switch::Bool(b) => Ok(b),
        Switch::Text(s) => match s.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "y" => Ok(true),
            "off" | "no" | "false" | "n" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "expected on/off, got '{}'",
                other
            ))),
        },
    }
}

/// Country codes are lower-cased. A bare `NO` read by a YAML 1.1 writer
/// ends up as boolean `false`; that is Norway.
fn deserialize_country_codes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Bool(bool),
    }

    Vec::<Code>::deserialize(deserializer)?
        .into_iter()
        .map(|code| match code {
            Code::Text(s) => Ok(s.trim().to_ascii_lowercase()),
            Code::Bool(false) => Ok("no".to_string()),
            Code::Bool(true) => Err(serde::de::Error::custom(
                "invalid country code 'true' in COUNTRY_LIST",
            )),
        })
        .collect()
}
