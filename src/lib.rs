//! # nft-blackhole - blocking IP addresses with nftables sets
//!
//! Builds an `inet blackhole` table holding six named sets (whitelist,
//! blacklist and country, each for IPv4 and IPv6) and keeps their contents
//! in sync with configured literals and remote lists.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI (clap): start, stop, restart, reload, dry-run          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Fetcher (reqwest + rustls)                                 │
//! │    └── retries, skip-retry statuses, line normalization     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Aggregator (tokio, 8 workers per category)                 │
//! │    └── all-or-nothing, sorted and de-duplicated             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Ruleset: table skeleton, set text, chain policies          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Orchestrator: per-set apply / skip / open fallback         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Enforcer (FirewallEngine trait) -> nft -f -                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use nft_blackhole::config::Config;
//! use nft_blackhole::enforcer::NftablesEngine;
//! use nft_blackhole::fetcher::Fetcher;
//! use nft_blackhole::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::load("/etc/nft-blackhole/nft-blackhole.conf")?);
//!     let fetcher = Arc::new(Fetcher::new(&config)?);
//!     let orchestrator = Orchestrator::new(config, fetcher, NftablesEngine::new());
//!
//!     let report = orchestrator.reload().await?;
//!     if report.has_failures() {
//!         eprintln!("some sets were not loaded");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`aggregator`] - Concurrent resolution of one category into a sorted set
//! - [`cli`] - Command-line interface definitions
//! - [`cmd_abstraction`] - Subprocess execution behind a mockable trait
//! - [`commands`] - CLI command implementations
//! - [`config`] - Configuration parsing and validation
//! - [`enforcer`] - Firewall engine abstraction and the nft engine
//! - [`error`] - Per-source failure type
//! - [`fetcher`] - Sources, HTTP retrieval and normalization
//! - [`lock`] - File locking for concurrent execution prevention
//! - [`orchestrator`] - Lifecycle actions and per-set outcomes
//! - [`ruleset`] - nftables text generation

pub mod aggregator;
pub mod cli;
pub mod cmd_abstraction;
pub mod commands;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod fetcher;
pub mod lock;
pub mod orchestrator;
pub mod ruleset;

pub use cli::{Cli, Commands};
pub use config::Config;
