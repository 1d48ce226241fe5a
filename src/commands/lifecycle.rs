//! start, stop, restart and reload.

use anyhow::Result;
use std::io;
use std::path::Path;
use std::sync::Arc;

use super::load_config;
use crate::enforcer::{check_root, NftablesEngine};
use crate::fetcher::Fetcher;
use crate::lock::LockGuard;
use crate::orchestrator::{Action, Orchestrator, RunReport};

/// Run a firewall-changing action under the instance lock
pub async fn run(action: Action, config_path: &Path) -> Result<RunReport> {
    check_root()?;
    let _lock = LockGuard::acquire()?;

    let config = load_config(config_path)?;
    let fetcher = Arc::new(Fetcher::new(&config)?);
    let orchestrator = Orchestrator::new(config, fetcher, NftablesEngine::new());

    orchestrator.run(action, &mut io::sink()).await
}
