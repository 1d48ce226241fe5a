//! nftables engine: drives the `nft` binary.

use anyhow::{Context, Result};
use tracing::debug;

use super::{nft_path, FirewallEngine};
use crate::cmd_abstraction::{args_to_strings, CommandExecutor, RealCommandExecutor};
use crate::ruleset::{TABLE_FAMILY, TABLE_NAME};

/// nftables engine
pub struct NftablesEngine<E = RealCommandExecutor> {
    executor: E,
    nft: String,
}

impl NftablesEngine {
    pub fn new() -> Self {
        Self::with_executor(RealCommandExecutor::new())
    }
}

impl Default for NftablesEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> NftablesEngine<E> {
    /// Create an engine running commands through `executor`
    pub fn with_executor(executor: E) -> Self {
        Self {
            executor,
            nft: nft_path().to_string(),
        }
    }

    /// Run nft with `args`, failing on a non-zero exit
    fn exec_nft(&self, args: &[&str]) -> Result<()> {
        debug!("Executing nft {}", args.join(" "));
        let output = self
            .executor
            .execute(&self.nft, &args_to_strings(args))
            .context("Failed to execute nft")?;

        if !output.success {
            anyhow::bail!("nft {} failed: {}", args.join(" "), output.stderr.trim());
        }
        Ok(())
    }
}

impl<E: CommandExecutor> FirewallEngine for NftablesEngine<E> {
    fn load(&self, script: &str) -> Result<()> {
        debug!("Executing nft script:\n{}", script);
        let args = args_to_strings(&["-f", "-"]);
        let output = self
            .executor
            .execute_with_stdin(&self.nft, &args, script)
            .context("Failed to execute nft")?;

        if !output.success {
            anyhow::bail!("nft failed: {}", output.stderr.trim());
        }
        Ok(())
    }

    fn delete_table(&self) -> Result<()> {
        self.exec_nft(&["delete", "table", TABLE_FAMILY, TABLE_NAME])
    }

    fn flush_set(&self, set_name: &str) -> Result<()> {
        self.exec_nft(&["flush", "set", TABLE_FAMILY, TABLE_NAME, set_name])
    }
}
