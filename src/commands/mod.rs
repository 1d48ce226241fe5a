//! CLI command implementations.

pub mod dry_run;
pub mod lifecycle;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::orchestrator::{Action, RunReport};

/// Run one action against the configuration at `config_path`
pub async fn run(action: Action, config_path: &Path) -> Result<RunReport> {
    if action.mutates() {
        lifecycle::run(action, config_path).await
    } else {
        dry_run::run(config_path).await
    }
}

fn load_config(config_path: &Path) -> Result<Arc<Config>> {
    let config = Config::load(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    Ok(Arc::new(config))
}
