//! Lifecycle actions: start, stop, restart, reload and dry-run.
//!
//! Categories and families are processed one after the other; only the
//! sources inside one category are fetched concurrently. The live table is
//! touched exclusively from here, one engine call at a time.

use anyhow::{Context, Result};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::{Category, Config, Family};
use crate::enforcer::{is_missing_table, FirewallEngine};
use crate::error::SourceError;
use crate::fetcher::{format_count, Resolve};
use crate::ruleset::{base_ruleset, plan_update, render_set, SetUpdate, TABLE_FAMILY, TABLE_NAME};

/// Lifecycle action requested on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Reload,
    DryRun,
}

impl Action {
    /// Whether the action changes the live firewall
    pub fn mutates(self) -> bool {
        !matches!(self, Action::DryRun)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Reload => "reload",
            Action::DryRun => "dry-run",
        })
    }
}

/// How a single named set ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetStatus {
    /// Loaded into the firewall
    Applied { entries: usize },
    /// Written to the dry-run output
    Printed { entries: usize },
    /// Loaded or printed without entries rejected by the element filter
    Filtered { entries: usize, dropped: usize },
    /// Country data missing under the accept policy; the whole family is open
    OpenFallback,
    /// Not resolved; the applied set was left as it was
    Skipped(SourceError),
    /// The engine rejected the generated set
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    pub set_name: String,
    pub status: SetStatus,
}

/// Per-set results of one action
#[derive(Debug, Default)]
pub struct RunReport {
    pub outcomes: Vec<SetOutcome>,
}

impl RunReport {
    /// Outcome of one set, if it was processed
    pub fn status(&self, set_name: &str) -> Option<&SetStatus> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.set_name == set_name)
            .map(|outcome| &outcome.status)
    }

    /// True when the engine rejected at least one set
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| matches!(outcome.status, SetStatus::Failed(_)))
    }

    /// True when some set is stale or open
    pub fn is_degraded(&self) -> bool {
        self.outcomes.iter().any(|outcome| {
            matches!(
                outcome.status,
                SetStatus::Skipped(_) | SetStatus::OpenFallback | SetStatus::Filtered { .. }
            )
        })
    }

    fn count(&self, pred: impl Fn(&SetStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    fn log_summary(&self) {
        if self.outcomes.is_empty() {
            return;
        }
        let updated = self.count(|s| {
            matches!(
                s,
                SetStatus::Applied { .. } | SetStatus::Printed { .. }
            )
        });
        let filtered = self.count(|s| matches!(s, SetStatus::Filtered { .. }));
        let open = self.count(|s| matches!(s, SetStatus::OpenFallback));
        let skipped = self.count(|s| matches!(s, SetStatus::Skipped(_)));
        let failed = self.count(|s| matches!(s, SetStatus::Failed(_)));

        if self.has_failures() || self.is_degraded() {
            warn!(
                "Sets: {} updated, {} filtered, {} open fallback, {} skipped, {} failed",
                updated, filtered, open, skipped, failed
            );
        } else {
            info!("Sets: {} updated", updated);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Load into a freshly created table
    Apply,
    /// Flush each set before loading it
    Reload,
    /// Print only
    Print,
}

/// Drives the pipeline for every lifecycle action
pub struct Orchestrator<R, E> {
    config: Arc<Config>,
    aggregator: Aggregator<R>,
    engine: E,
}

impl<R, E> Orchestrator<R, E>
where
    R: Resolve + 'static,
    E: FirewallEngine,
{
    pub fn new(config: Arc<Config>, resolver: Arc<R>, engine: E) -> Self {
        Self {
            config,
            aggregator: Aggregator::new(resolver),
            engine,
        }
    }

    /// Run `action`; dry-run output goes to `out`
    pub async fn run(&self, action: Action, out: &mut dyn Write) -> Result<RunReport> {
        info!("nft-blackhole {}", action);
        let report = match action {
            Action::Start => self.start().await?,
            Action::Stop => {
                self.stop();
                RunReport::default()
            }
            Action::Restart => self.restart().await?,
            Action::Reload => self.reload().await?,
            Action::DryRun => self.dry_run(out).await?,
        };
        report.log_summary();
        Ok(report)
    }

    /// Create the table and chains, then fill every set
    pub async fn start(&self) -> Result<RunReport> {
        self.engine
            .load(&base_ruleset(&self.config))
            .context("Failed to load base ruleset")?;
        info!("Loaded table {} {}", TABLE_FAMILY, TABLE_NAME);

        self.sync_sets(Mode::Apply, &mut io::sink()).await
    }

    /// Delete the table; a missing table is not an error
    pub fn stop(&self) {
        match self.engine.delete_table() {
            Ok(()) => info!("Deleted table {} {}", TABLE_FAMILY, TABLE_NAME),
            Err(e) if is_missing_table(&e) => {
                debug!("Table {} {} not present", TABLE_FAMILY, TABLE_NAME)
            }
            Err(e) => warn!("Failed to delete table {} {}: {:#}", TABLE_FAMILY, TABLE_NAME, e),
        }
    }

    pub async fn restart(&self) -> Result<RunReport> {
        self.stop();
        self.start().await
    }

    /// Refresh set contents in place, leaving table and chains alone
    pub async fn reload(&self) -> Result<RunReport> {
        self.sync_sets(Mode::Reload, &mut io::sink()).await
    }

    /// Resolve everything and print the sets; the firewall is not touched
    pub async fn dry_run(&self, out: &mut dyn Write) -> Result<RunReport> {
        let report = self.sync_sets(Mode::Print, out).await?;
        out.flush().context("Failed to write dry-run output")?;
        Ok(report)
    }

    async fn sync_sets(&self, mode: Mode, out: &mut dyn Write) -> Result<RunReport> {
        let mut report = RunReport::default();
        for category in Category::ALL {
            for family in self.config.enabled_families() {
                let outcome = self.sync_set(category, family, mode, out).await?;
                report.outcomes.push(outcome);
            }
        }
        Ok(report)
    }

    /// Resolve one set and apply, print or skip it.
    ///
    /// Only a failure to write dry-run output is returned as `Err`.
    async fn sync_set(
        &self,
        category: Category,
        family: Family,
        mode: Mode,
        out: &mut dyn Write,
    ) -> Result<SetOutcome> {
        let set_name = category.set_name(family);
        let sources = self.config.sources(category, family);
        debug!("Resolving {} from {} source(s)", set_name, sources.len());

        let resolution = self.aggregator.resolve(&sources).await;
        let (list, open_fallback) =
            match plan_update(category, family, resolution, self.config.country_policy) {
                SetUpdate::Replace(list) => (list, false),
                SetUpdate::OpenFallback(list) => {
                    warn!(
                        "FAILED to build {}, allowing everything in {}",
                        set_name, set_name
                    );
                    (list, true)
                }
                SetUpdate::Skip(e) => {
                    error!("FAILED to build {}, skip update {}: {}", category, set_name, e);
                    return Ok(SetOutcome {
                        set_name,
                        status: SetStatus::Skipped(e),
                    });
                }
            };

        let rendered = render_set(category, family, &list);
        let filtered = if rendered.dropped.is_empty() || open_fallback {
            None
        } else {
            error!(
                "{} built without {} unsafe entries from its sources",
                set_name,
                rendered.dropped.len()
            );
            Some(SetStatus::Filtered {
                entries: rendered.elements,
                dropped: rendered.dropped.len(),
            })
        };

        if mode == Mode::Print {
            out.write_all(rendered.script.as_bytes())
                .context("Failed to write dry-run output")?;
            let status = if open_fallback {
                SetStatus::OpenFallback
            } else {
                filtered.unwrap_or(SetStatus::Printed {
                    entries: rendered.elements,
                })
            };
            return Ok(SetOutcome { set_name, status });
        }

        if mode == Mode::Reload {
            if let Err(e) = self.engine.flush_set(&set_name) {
                warn!("Could not flush {}: {:#}", set_name, e);
            }
        }

        let status = match self.engine.load(&rendered.script) {
            Ok(()) if open_fallback => SetStatus::OpenFallback,
            Ok(()) => {
                info!(
                    "Updated {} - {} entries",
                    set_name,
                    format_count(rendered.elements)
                );
                filtered.unwrap_or(SetStatus::Applied {
                    entries: rendered.elements,
                })
            }
            Err(e) => {
                error!("Failed to load {}: {:#}", set_name, e);
                SetStatus::Failed(format!("{:#}", e))
            }
        };
        Ok(SetOutcome { set_name, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CountryPolicy, FamilyLists, IpVersion};
    use crate::enforcer::mock::{EngineCall, RecordingEngine};
    use crate::fetcher::mock::StaticResolver;
    use crate::fetcher::Source;

    fn resolver() -> StaticResolver {
        StaticResolver::new()
            .with_list("http://example/list", &["192.168.1.1"])
            .with_list("https://bl.example/v4", &["203.0.113.7", "198.51.100.0/24"])
            .with_list("https://bl.example/v6", &["2001:db8::/32"])
    }

    fn config() -> Config {
        Config {
            ip_version: IpVersion { v4: true, v6: true },
            whitelist: FamilyLists {
                v4: vec![Source::from("10.0.0.0/8"), Source::from("http://example/list")],
                v6: vec![Source::from("::1")],
            },
            blacklist: FamilyLists {
                v4: vec![Source::from("https://bl.example/v4")],
                v6: vec![Source::from("https://bl.example/v6")],
            },
            ..Config::default()
        }
    }

    fn orchestrator(
        config: Config,
        engine: RecordingEngine,
    ) -> Orchestrator<StaticResolver, RecordingEngine> {
        Orchestrator::new(Arc::new(config), Arc::new(resolver()), engine)
    }

    #[tokio::test]
    async fn test_dry_run_prints_without_engine() {
        let orch = orchestrator(config(), RecordingEngine::new());
        let mut out = Vec::new();

        let report = orch.run(Action::DryRun, &mut out).await.unwrap();
        let printed = String::from_utf8(out).unwrap();

        assert!(orch.engine.calls().is_empty());
        assert!(printed.contains("set whitelist-v4 {"));
        assert!(printed.contains("elements = { 10.0.0.0/8, 192.168.1.1 }"));
        assert!(printed.contains("elements = { 198.51.100.0/24, 203.0.113.7 }"));
        assert!(printed.contains("set country-v6 {"));
        assert!(!printed.contains("chain"));
        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(
            report.status("whitelist-v4"),
            Some(&SetStatus::Printed { entries: 2 })
        );
    }

    #[tokio::test]
    async fn test_start_loads_skeleton_then_sets() {
        let orch = orchestrator(config(), RecordingEngine::new());
        let report = orch.run(Action::Start, &mut io::sink()).await.unwrap();

        let loads = orch.engine.loads();
        assert_eq!(loads.len(), 7);
        assert!(loads[0].contains("chain input"));
        let order: Vec<&str> = [
            "set whitelist-v4",
            "set whitelist-v6",
            "set blacklist-v4",
            "set blacklist-v6",
            "set country-v4",
            "set country-v6",
        ]
        .to_vec();
        for (load, set) in loads[1..].iter().zip(order) {
            assert!(load.contains(set), "expected {} in {}", set, load);
            assert!(!load.contains("chain"));
        }
        assert!(!report.has_failures());
        assert!(!report.is_degraded());
    }

    #[tokio::test]
    async fn test_start_skeleton_failure_is_fatal() {
        let orch = orchestrator(config(), RecordingEngine::failing_loads("chain input"));
        let result = orch.run(Action::Start, &mut io::sink()).await;

        assert!(result.is_err());
        assert_eq!(orch.engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_set_failure_does_not_abort_siblings() {
        let orch = orchestrator(config(), RecordingEngine::failing_loads("203.0.113.7"));
        let report = orch.run(Action::Start, &mut io::sink()).await.unwrap();

        assert!(matches!(
            report.status("blacklist-v4"),
            Some(SetStatus::Failed(_))
        ));
        assert_eq!(
            report.status("blacklist-v6"),
            Some(&SetStatus::Applied { entries: 1 })
        );
        assert!(matches!(
            report.status("country-v4"),
            Some(SetStatus::Applied { .. })
        ));
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_reload_flushes_and_never_loads_skeleton() {
        let config = Config {
            ip_version: IpVersion { v4: true, v6: false },
            ..config()
        };
        let orch = orchestrator(config, RecordingEngine::new());
        orch.run(Action::Reload, &mut io::sink()).await.unwrap();

        let calls = orch.engine.calls();
        assert_eq!(calls.len(), 6);
        for (pair, set) in calls.chunks(2).zip(["whitelist-v4", "blacklist-v4", "country-v4"]) {
            assert_eq!(pair[0], EngineCall::FlushSet(set.to_string()));
            match &pair[1] {
                EngineCall::Load(script) => {
                    assert!(script.contains(&format!("set {} {{", set)));
                    assert!(!script.contains("chain"));
                }
                other => panic!("expected load, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_reload_flush_failure_is_not_fatal() {
        let engine = RecordingEngine {
            fail_flush: true,
            ..RecordingEngine::new()
        };
        let orch = orchestrator(config(), engine);
        let report = orch.run(Action::Reload, &mut io::sink()).await.unwrap();

        assert_eq!(orch.engine.loads().len(), 6);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_failed_whitelist_keeps_previous_state() {
        let mut config = config();
        config.whitelist.v4.push(Source::from("https://down.example/list"));
        let orch = orchestrator(config, RecordingEngine::new());

        let report = orch.run(Action::Reload, &mut io::sink()).await.unwrap();

        assert!(matches!(
            report.status("whitelist-v4"),
            Some(SetStatus::Skipped(SourceError::Exhausted { .. }))
        ));
        let calls = orch.engine.calls();
        assert!(!calls.contains(&EngineCall::FlushSet("whitelist-v4".to_string())));
        assert!(!orch
            .engine
            .loads()
            .iter()
            .any(|s| s.contains("set whitelist-v4")));
        assert!(report.is_degraded());
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_country_block_failure_skips() {
        let config = Config {
            country_list: vec!["pl".to_string()],
            country_policy: CountryPolicy::Block,
            ..config()
        };
        let orch = orchestrator(config, RecordingEngine::new());
        let report = orch.run(Action::Start, &mut io::sink()).await.unwrap();

        assert!(matches!(report.status("country-v4"), Some(SetStatus::Skipped(_))));
        assert!(matches!(report.status("country-v6"), Some(SetStatus::Skipped(_))));
        // skeleton + whitelist + blacklist for both families
        assert_eq!(orch.engine.loads().len(), 5);
    }

    #[tokio::test]
    async fn test_country_accept_failure_opens() {
        let config = Config {
            country_list: vec!["pl".to_string()],
            country_policy: CountryPolicy::Accept,
            ..config()
        };
        let orch = orchestrator(config, RecordingEngine::new());
        let report = orch.run(Action::Start, &mut io::sink()).await.unwrap();

        assert_eq!(report.status("country-v4"), Some(&SetStatus::OpenFallback));
        assert_eq!(report.status("country-v6"), Some(&SetStatus::OpenFallback));

        let loads = orch.engine.loads();
        assert!(loads
            .iter()
            .any(|s| s.contains("set country-v4") && s.contains("elements = { 0.0.0.0/0 }")));
        assert!(loads
            .iter()
            .any(|s| s.contains("set country-v6") && s.contains("elements = { ::/0 }")));
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_country_accept_fallback_in_dry_run() {
        let config = Config {
            country_list: vec!["pl".to_string()],
            country_policy: CountryPolicy::Accept,
            ..config()
        };
        let orch = orchestrator(config, RecordingEngine::new());
        let mut out = Vec::new();
        orch.run(Action::DryRun, &mut out).await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("elements = { 0.0.0.0/0 }"));
        assert!(orch.engine.calls().is_empty());
    }

    fn html_whitelist() -> Config {
        Config {
            ip_version: IpVersion { v4: true, v6: false },
            whitelist: FamilyLists {
                v4: vec![Source::from("https://html.example/list")],
                v6: Vec::new(),
            },
            ..config()
        }
    }

    #[tokio::test]
    async fn test_unsafe_entries_reported_as_filtered() {
        let resolver = resolver().with_list("https://html.example/list", &["10.0.0.1", "<html>"]);
        let orch = Orchestrator::new(
            Arc::new(html_whitelist()),
            Arc::new(resolver),
            RecordingEngine::new(),
        );

        let report = orch.run(Action::Reload, &mut io::sink()).await.unwrap();

        assert_eq!(
            report.status("whitelist-v4"),
            Some(&SetStatus::Filtered {
                entries: 1,
                dropped: 1
            })
        );
        let loads = orch.engine.loads();
        assert!(loads[0].contains("elements = { 10.0.0.1 }"));
        assert!(!loads[0].contains("<html>"));
        assert!(report.is_degraded());
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_printed_count_excludes_filtered_entries() {
        let resolver = resolver().with_list("https://html.example/list", &["10.0.0.1", "<html>"]);
        let orch = Orchestrator::new(
            Arc::new(html_whitelist()),
            Arc::new(resolver),
            RecordingEngine::new(),
        );
        let mut out = Vec::new();

        let report = orch.run(Action::DryRun, &mut out).await.unwrap();

        assert_eq!(
            report.status("whitelist-v4"),
            Some(&SetStatus::Filtered {
                entries: 1,
                dropped: 1
            })
        );
        assert_eq!(
            report.status("blacklist-v4"),
            Some(&SetStatus::Printed { entries: 2 })
        );
    }

    #[tokio::test]
    async fn test_empty_blacklist_still_applied() {
        let mut config = config();
        config.blacklist = FamilyLists::default();
        let orch = orchestrator(config, RecordingEngine::new());
        let report = orch.run(Action::Start, &mut io::sink()).await.unwrap();

        assert_eq!(
            report.status("blacklist-v4"),
            Some(&SetStatus::Applied { entries: 0 })
        );
    }

    #[tokio::test]
    async fn test_stop_ignores_missing_table() {
        let engine = RecordingEngine {
            fail_delete: true,
            ..RecordingEngine::new()
        };
        let orch = orchestrator(config(), engine);
        let report = orch.run(Action::Stop, &mut io::sink()).await.unwrap();

        assert_eq!(orch.engine.calls(), vec![EngineCall::DeleteTable]);
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_restart_deletes_then_starts() {
        let orch = orchestrator(config(), RecordingEngine::new());
        orch.run(Action::Restart, &mut io::sink()).await.unwrap();

        let calls = orch.engine.calls();
        assert_eq!(calls[0], EngineCall::DeleteTable);
        match &calls[1] {
            EngineCall::Load(script) => assert!(script.contains("chain input")),
            other => panic!("expected skeleton load, got {:?}", other),
        }
        assert_eq!(calls.len(), 8);
    }

    #[tokio::test]
    async fn test_disabled_family_is_not_processed() {
        let config = Config {
            ip_version: IpVersion { v4: false, v6: true },
            ..config()
        };
        let orch = orchestrator(config, RecordingEngine::new());
        let report = orch.run(Action::DryRun, &mut io::sink()).await.unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes.iter().all(|o| o.set_name.ends_with("-v6")));
    }

    #[test]
    fn test_action_mutates() {
        assert!(Action::Start.mutates());
        assert!(Action::Reload.mutates());
        assert!(!Action::DryRun.mutates());
        assert_eq!(Action::DryRun.to_string(), "dry-run");
    }
}
