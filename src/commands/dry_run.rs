//! dry-run: print the sets that would be loaded.

use anyhow::Result;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::load_config;
use crate::enforcer::NftablesEngine;
use crate::fetcher::Fetcher;
use crate::orchestrator::{Action, Orchestrator, RunReport};

/// Resolve every set and write it to stdout.
///
/// Needs neither root nor the lock; the engine is never called.
pub async fn run(config_path: &Path) -> Result<RunReport> {
    let config = load_config(config_path)?;
    let fetcher = Arc::new(Fetcher::new(&config)?);
    let orchestrator = Orchestrator::new(config, fetcher, NftablesEngine::new());

    let mut stdout = io::stdout().lock();
    orchestrator.run(Action::DryRun, &mut stdout).await
}
