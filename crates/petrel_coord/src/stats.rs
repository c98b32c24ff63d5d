//! Process-wide pchannel load statistics.
//!
//! Streaming data paths report vchannel placement here; the vchannel
//! allocator reads a load-ordered snapshot. Writers and readers race freely:
//! the allocator tolerates stale counts, but each snapshot is internally
//! consistent.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use parking_lot::RwLock;

/// Load statistics of one physical channel.
#[derive(Debug, Default, Clone)]
pub struct PChannelStats {
    vchannels: HashSet<String>,
    collections: HashMap<u64, usize>,
}

impl PChannelStats {
    pub fn vchannel_count(&self) -> usize {
        self.vchannels.len()
    }

    pub fn collection_count(&self) -> usize {
        self.collections.len()
    }
}

/// Registry mapping pchannel name → load statistics.
#[derive(Default)]
pub struct PChannelStatsRegistry {
    inner: RwLock<HashMap<String, PChannelStats>>,
}

static PCHANNEL_STATS: OnceLock<PChannelStatsRegistry> = OnceLock::new();

/// The process-global stats registry.
pub fn pchannel_stats() -> &'static PChannelStatsRegistry {
    PCHANNEL_STATS.get_or_init(PChannelStatsRegistry::default)
}

impl PChannelStatsRegistry {
    /// Drop all statistics. Test initialization.
    pub fn reset(&self) {
        self.inner.write().clear();
    }

    /// Seed zeroed statistics for a known pchannel set.
    pub fn recover(&self, pchannels: &[String]) {
        let mut inner = self.inner.write();
        inner.clear();
        for name in pchannels {
            inner.entry(name.clone()).or_default();
        }
    }

    /// Register a pchannel with zero load if unseen.
    pub fn add_pchannel(&self, pchannel: &str) {
        self.inner.write().entry(pchannel.to_string()).or_default();
    }

    /// Record vchannels coming into service. Each name is parsed as
    /// `<pchannel>_<collection>v<idx>`; unparseable names are ignored.
    pub fn add_vchannels<I, S>(&self, vchannels: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write();
        for vchannel in vchannels {
            let vchannel = vchannel.as_ref();
            let Some((pchannel, collection_id)) = parse_vchannel(vchannel) else {
                tracing::warn!(vchannel, "ignoring malformed vchannel name");
                continue;
            };
            let stats = inner.entry(pchannel.to_string()).or_default();
            if stats.vchannels.insert(vchannel.to_string()) {
                *stats.collections.entry(collection_id).or_insert(0) += 1;
            }
        }
    }

    /// Record vchannels going out of service.
    pub fn remove_vchannels<I, S>(&self, vchannels: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.inner.write();
        for vchannel in vchannels {
            let vchannel = vchannel.as_ref();
            let Some((pchannel, collection_id)) = parse_vchannel(vchannel) else {
                continue;
            };
            let Some(stats) = inner.get_mut(pchannel) else {
                continue;
            };
            if stats.vchannels.remove(vchannel) {
                if let Some(count) = stats.collections.get_mut(&collection_id) {
                    *count -= 1;
                    if *count == 0 {
                        stats.collections.remove(&collection_id);
                    }
                }
            }
        }
    }

    /// Stats snapshot of one pchannel.
    pub fn stats_of(&self, pchannel: &str) -> Option<PChannelStats> {
        self.inner.read().get(pchannel).cloned()
    }

    /// The eligible pchannels ordered by (vchannel count asc, name asc).
    /// Unknown names count as zero load. Consistent within the call.
    pub fn sorted_by_load(&self, eligible: &[String]) -> Vec<String> {
        let inner = self.inner.read();
        let mut loads: Vec<(usize, &String)> = eligible
            .iter()
            .map(|name| {
                let count = inner.get(name).map(|s| s.vchannels.len()).unwrap_or(0);
                (count, name)
            })
            .collect();
        loads.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        loads.into_iter().map(|(_, name)| name.clone()).collect()
    }
}

/// Split a vchannel name into its pchannel prefix and collection id.
/// The wire form is `<pchannel>_<collection>v<idx>`.
pub fn parse_vchannel(vchannel: &str) -> Option<(&str, u64)> {
    let (pchannel, suffix) = vchannel.rsplit_once('_')?;
    if pchannel.is_empty() {
        return None;
    }
    let (collection, index) = suffix.split_once('v')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let collection_id: u64 = collection.parse().ok()?;
    Some((pchannel, collection_id))
}
