//! Firewall engine boundary.
//!
//! The engine accepts declarative ruleset text and a couple of maintenance
//! commands. Calls are synchronous and never made concurrently.

mod nftables;

use anyhow::Result;
use std::path::Path;

pub use nftables::NftablesEngine;

/// Operations the orchestrator needs from the packet filter
pub trait FirewallEngine: Send + Sync {
    /// Load ruleset text, merging it into the live ruleset
    fn load(&self, script: &str) -> Result<()>;

    /// Delete the whole managed table
    fn delete_table(&self) -> Result<()>;

    /// Remove every element of one named set, keeping the set itself
    fn flush_set(&self, set_name: &str) -> Result<()>;
}

/// True when `err` is nft reporting that the table or set does not exist.
///
/// A missing nft binary also fails with ENOENT, but through the spawn error
/// text, which lacks nft's `Error:` prefix.
pub fn is_missing_table(err: &anyhow::Error) -> bool {
    format!("{:#}", err).contains("Error: No such file or directory")
}

/// Locations checked for the nft binary before falling back to `PATH`
const NFT_CANDIDATES: &[&str] = &["/usr/sbin/nft", "/sbin/nft"];

/// Path of the nft binary
pub fn nft_path() -> &'static str {
    NFT_CANDIDATES
        .iter()
        .copied()
        .find(|path| Path::new(path).exists())
        .unwrap_or("nft")
}

/// Check if running as root (effective UID == 0)
///
/// Loading nftables rules needs CAP_NET_ADMIN; UID 0 covers the usual case
/// of running from systemd or sudo.
pub fn check_root() -> Result<()> {
    // SAFETY: geteuid() has no preconditions, never fails and does not
    // modify any state.
    let euid = unsafe { libc::geteuid() };

    if euid != 0 {
        anyhow::bail!(
            "This operation requires root privileges. Please run with sudo.\n\
             Alternatively, ensure the process has the CAP_NET_ADMIN capability."
        )
    }
    Ok(())
}
