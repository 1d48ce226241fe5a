//! Error types for nft-blackhole.

use thiserror::Error;

/// Why a source (and therefore its whole category) could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The server answered with a status listed in `STATUS_SKIP_RETRYING`.
    #[error("HTTP {status} from {url}, not retrying")]
    Status { url: String, status: u16 },

    /// Every attempt failed with a retryable error.
    #[error("failed to fetch {url} after {attempts} attempt(s)")]
    Exhausted { url: String, attempts: u32 },

    /// The worker resolving the source died before reporting back.
    #[error("worker for {url} aborted: {reason}")]
    Worker { url: String, reason: String },
}

impl SourceError {
    /// URL of the source that failed.
    pub fn url(&self) -> &str {
        match self {
            Self::Status { url, .. } | Self::Exhausted { url, .. } | Self::Worker { url, .. } => {
                url
            }
        }
    }
}
