//! Category aggregation: resolve every source of a list concurrently and
//! merge the results.
//!
//! A category is all-or-nothing: the first unrecoverable source fails the
//! whole category and the applied set is left untouched.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::SourceError;
use crate::fetcher::{format_count, Resolve, Source};

/// Maximum number of sources resolved at the same time
pub const MAX_WORKERS: usize = 8;

/// Sorted, duplicate-free list of set elements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressList(Vec<String>);

impl AddressList {
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let unique: BTreeSet<String> = entries.into_iter().collect();
        Self(unique.into_iter().collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl FromIterator<String> for AddressList {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl From<BTreeSet<String>> for AddressList {
    fn from(set: BTreeSet<String>) -> Self {
        Self(set.into_iter().collect())
    }
}

/// Resolves category source lists through a bounded worker pool
pub struct Aggregator<R> {
    resolver: Arc<R>,
    workers: usize,
}

impl<R: Resolve + 'static> Aggregator<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self::with_workers(resolver, MAX_WORKERS)
    }

    pub fn with_workers(resolver: Arc<R>, workers: usize) -> Self {
        Self {
            resolver,
            workers: workers.max(1),
        }
    }

    /// Resolve and merge `sources`.
    ///
    /// Returns the first unrecoverable source error. From that point no
    /// further source is dispatched; workers already running are left to
    /// finish and their results are dropped.
    pub async fn resolve(&self, sources: &[Source]) -> Result<AddressList, SourceError> {
        let mut pending = sources.iter().cloned();
        let mut in_flight = FuturesUnordered::new();
        let mut merged = BTreeSet::new();

        loop {
            while in_flight.len() < self.workers {
                let Some(source) = pending.next() else { break };
                let url = source.to_string();
                let resolver = Arc::clone(&self.resolver);
                let handle = tokio::spawn(async move { resolver.resolve(&source).await });

                // Dropping the handle detaches the task instead of aborting it
                in_flight.push(async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(SourceError::Worker {
                            url,
                            reason: e.to_string(),
                        }),
                    }
                });
            }

            let Some(result) = in_flight.next().await else { break };

            match result {
                Ok(entries) => merged.extend(entries),
                Err(e) => {
                    error!("{}", e);
                    return Err(e);
                }
            }
        }

        let list = AddressList::from(merged);
        debug!(
            "Merged {} source(s) into {} entries",
            sources.len(),
            format_count(list.len())
        );
        Ok(list)
    }
}
