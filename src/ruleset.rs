//! nftables ruleset generation.
//!
//! Everything here is pure text generation: the base table skeleton, one
//! script per named set, and the decision of what to load when a category
//! could not be resolved.

use std::fmt;
use tracing::warn;

use crate::aggregator::AddressList;
use crate::config::{BlockPolicy, Category, Config, CountryPolicy, Family};
use crate::error::SourceError;

pub const TABLE_FAMILY: &str = "inet";
pub const TABLE_NAME: &str = "blackhole";

/// Hook priority of every chain, just ahead of the default filter chains
const CHAIN_PRIORITY: i32 = -1;

/// Rule verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
    Reject,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accept => "accept",
            Verdict::Drop => "drop",
            Verdict::Reject => "reject",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<BlockPolicy> for Verdict {
    fn from(policy: BlockPolicy) -> Self {
        match policy {
            BlockPolicy::Drop => Verdict::Drop,
            BlockPolicy::Reject => Verdict::Reject,
        }
    }
}

/// Verdicts used by the generated chains.
///
/// With country policy `block` the chains default to accept and country
/// matches get the block verdict; with `accept` it is the other way round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPolicy {
    /// Chain default policy
    pub default: Verdict,
    /// Verdict for blacklisted addresses
    pub block: Verdict,
    /// Verdict for addresses in the country sets
    pub country: Verdict,
}

impl ChainPolicy {
    pub fn new(block_policy: BlockPolicy, country_policy: CountryPolicy) -> Self {
        let block = Verdict::from(block_policy);
        match country_policy {
            CountryPolicy::Block => Self {
                default: Verdict::Accept,
                block,
                country: block,
            },
            CountryPolicy::Accept => Self {
                default: block,
                block,
                country: Verdict::Accept,
            },
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.block_policy, config.country_policy)
    }
}

/// What to do with one named set after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetUpdate {
    /// Replace the set contents with the resolved list
    Replace(AddressList),
    /// Country data is missing under an accept policy: open the whole family
    OpenFallback(AddressList),
    /// Leave the applied set untouched
    Skip(SourceError),
}

/// Decide how a resolved (or failed) category is applied.
///
/// A failed whitelist or blacklist is never replaced. A failed country list
/// is skipped under the block policy, but under the accept policy it falls
/// back to the whole address space: an unresolvable allow list must not
/// turn into a full block.
pub fn plan_update(
    category: Category,
    family: Family,
    resolution: Result<AddressList, SourceError>,
    country_policy: CountryPolicy,
) -> SetUpdate {
    match (resolution, category, country_policy) {
        (Ok(list), _, _) => SetUpdate::Replace(list),
        (Err(_), Category::Country, CountryPolicy::Accept) => {
            SetUpdate::OpenFallback(AddressList::new([family.whole_space().to_string()]))
        }
        (Err(e), _, _) => SetUpdate::Skip(e),
    }
}

/// Only digits, hex letters, dots, colons, slashes and range dashes may
/// reach an nft script.
fn is_safe_nft_element(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | '/' | '-'))
}

fn push_set(script: &mut String, name: &str, family: Family, elements: &[&str]) {
    script.push_str(&format!("    set {} {{\n", name));
    script.push_str(&format!("        type {}\n", family.nft_type()));
    script.push_str("        flags interval\n");
    script.push_str("        auto-merge\n");
    // nft rejects an empty element list
    if !elements.is_empty() {
        script.push_str(&format!("        elements = {{ {} }}\n", elements.join(", ")));
    }
    script.push_str("    }\n");
}

/// Script for one named set, with the entries that could not be rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSet {
    pub script: String,
    /// Elements written into the script
    pub elements: usize,
    /// Entries rejected by the element filter
    pub dropped: Vec<String>,
}

/// Render the script loading `list` into the named set for `category`/`family`
pub fn render_set(category: Category, family: Family, list: &AddressList) -> RenderedSet {
    let name = category.set_name(family);
    let (elements, dropped): (Vec<&str>, Vec<&str>) =
        list.iter().partition(|entry| is_safe_nft_element(entry));

    for entry in &dropped {
        warn!("Filtered unsafe nftables element in {}: {:?}", name, entry);
    }

    let mut script = format!("table {} {} {{\n", TABLE_FAMILY, TABLE_NAME);
    push_set(&mut script, &name, family, &elements);
    script.push_str("}\n");

    RenderedSet {
        script,
        elements: elements.len(),
        dropped: dropped.into_iter().map(String::from).collect(),
    }
}

/// `meta l4proto` rule letting excluded ports bypass the country sets
fn country_exclude_ports_rule(ports: &[u16]) -> Option<String> {
    if ports.is_empty() {
        return None;
    }
    let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
    Some(format!(
        "meta l4proto {{ tcp, udp }} th dport {{ {} }} counter accept",
        ports.join(", ")
    ))
}

/// nft chain policies are accept or drop only; a reject default becomes a
/// drop policy plus a trailing reject rule (see `push_chain_tail`).
fn push_chain_header(script: &mut String, hook: &str, default: Verdict) {
    let policy = match default {
        Verdict::Reject => Verdict::Drop,
        other => other,
    };
    script.push_str(&format!(
        "    chain {} {{\n        type filter hook {} priority {}; policy {};\n",
        hook, hook, CHAIN_PRIORITY, policy
    ));
}

fn push_chain_tail(script: &mut String, default: Verdict) {
    match default {
        Verdict::Reject => push_rule(script, "counter reject"),
        _ => push_rule(script, "counter"),
    }
    script.push_str("    }\n");
}

fn push_rule(script: &mut String, rule: &str) {
    script.push_str("        ");
    script.push_str(rule);
    script.push('\n');
}

/// Filtering of traffic for this host, or routed through it
fn push_source_chain(
    script: &mut String,
    hook: &str,
    policy: ChainPolicy,
    exclude_ports: Option<&str>,
) {
    push_chain_header(script, hook, policy.default);
    if hook == "input" {
        push_rule(script, "iifname \"lo\" accept");
    }
    push_rule(script, "ct state established,related accept");
    push_rule(script, "ip saddr @whitelist-v4 counter accept");
    push_rule(script, "ip6 saddr @whitelist-v6 counter accept");
    push_rule(script, &format!("ip saddr @blacklist-v4 counter {}", policy.block));
    push_rule(script, &format!("ip6 saddr @blacklist-v6 counter {}", policy.block));
    if let Some(rule) = exclude_ports {
        push_rule(script, rule);
    }
    push_rule(script, &format!("ip saddr @country-v4 counter {}", policy.country));
    push_rule(script, &format!("ip6 saddr @country-v6 counter {}", policy.country));
    push_chain_tail(script, policy.default);
}

/// Filtering of traffic leaving this host: black/white lists only
fn push_output_chain(script: &mut String, policy: ChainPolicy) {
    push_chain_header(script, "output", Verdict::Accept);
    push_rule(script, "ip daddr @whitelist-v4 counter accept");
    push_rule(script, "ip6 daddr @whitelist-v6 counter accept");
    push_rule(script, &format!("ip daddr @blacklist-v4 counter {}", policy.block));
    push_rule(script, &format!("ip6 daddr @blacklist-v6 counter {}", policy.block));
    script.push_str("    }\n");
}

/// Render the managed table: all six sets (empty) plus the chains enabled
/// in `config`.
pub fn base_ruleset(config: &Config) -> String {
    let policy = ChainPolicy::from_config(config);
    let exclude_ports = country_exclude_ports_rule(&config.country_exclude_ports);

    let mut script = format!("table {} {} {{\n", TABLE_FAMILY, TABLE_NAME);

    for category in Category::ALL {
        for family in Family::ALL {
            push_set(&mut script, &category.set_name(family), family, &[]);
            script.push('\n');
        }
    }

    push_source_chain(&mut script, "input", policy, exclude_ports.as_deref());

    if config.block_output {
        script.push('\n');
        push_output_chain(&mut script, policy);
    }

    if config.block_forward {
        script.push('\n');
        push_source_chain(&mut script, "forward", policy, exclude_ports.as_deref());
    }

    script.push_str("}\n");
    script
}
