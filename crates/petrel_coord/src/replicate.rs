//! Replication-topology derivations: the local cluster's role, per-channel
//! replication availability, and the replicating tasks to materialize when
//! the local cluster is a replication source.

use std::collections::{HashMap, HashSet};

use petrel_common::error::{PetrelError, PetrelResult};
use petrel_common::types::{AppendResult, ReplicateCheckpoint, ReplicateConfiguration};
use petrel_meta::records::ReplicatingChannelRecord;

/// The local cluster's role under a replicate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateRole {
    /// Source of at least one cross-cluster edge.
    Primary,
    /// Target of at least one cross-cluster edge (and source of none).
    Secondary,
    /// No cross-cluster topology involves this cluster.
    Standalone,
}

/// The broadcast envelope carrying a proposed configuration together with
/// the per-channel WAL append results of the config-change broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastAlterReplicateConfig {
    pub configuration: ReplicateConfiguration,
    /// Append result per local pchannel the broadcast was written to.
    pub append_results: HashMap<String, AppendResult>,
}

/// A validated replicate configuration viewed from one cluster.
#[derive(Debug, Clone)]
pub struct ConfigHelper {
    local_cluster_id: String,
    config: ReplicateConfiguration,
}

impl ConfigHelper {
    /// Validate `config` and bind it to the local cluster id.
    ///
    /// Rejected configurations: duplicate cluster ids, edges referencing
    /// undeclared clusters, self-edges, and edges whose endpoints declare
    /// pchannel lists of different lengths (replication pairs channels
    /// index by index).
    pub fn new(local_cluster_id: &str, config: &ReplicateConfiguration) -> PetrelResult<Self> {
        let mut seen = HashSet::new();
        for cluster in &config.clusters {
            if !seen.insert(cluster.cluster_id.as_str()) {
                return Err(PetrelError::ReplicationConfigInvalid(format!(
                    "duplicate cluster id {}",
                    cluster.cluster_id
                )));
            }
        }
        for edge in &config.cross_cluster_topology {
            if edge.source_cluster_id == edge.target_cluster_id {
                return Err(PetrelError::ReplicationConfigInvalid(format!(
                    "self edge on cluster {}",
                    edge.source_cluster_id
                )));
            }
            let source = config.cluster(&edge.source_cluster_id).ok_or_else(|| {
                PetrelError::ReplicationConfigInvalid(format!(
                    "edge references undeclared cluster {}",
                    edge.source_cluster_id
                ))
            })?;
            let target = config.cluster(&edge.target_cluster_id).ok_or_else(|| {
                PetrelError::ReplicationConfigInvalid(format!(
                    "edge references undeclared cluster {}",
                    edge.target_cluster_id
                ))
            })?;
            if source.pchannels.len() != target.pchannels.len() {
                return Err(PetrelError::ReplicationConfigInvalid(format!(
                    "pchannel count mismatch on edge {} -> {}: {} vs {}",
                    edge.source_cluster_id,
                    edge.target_cluster_id,
                    source.pchannels.len(),
                    target.pchannels.len()
                )));
            }
        }
        Ok(Self {
            local_cluster_id: local_cluster_id.to_string(),
            config: config.clone(),
        })
    }

    pub fn local_cluster_id(&self) -> &str {
        &self.local_cluster_id
    }

    pub fn config(&self) -> &ReplicateConfiguration {
        &self.config
    }

    /// The local cluster's role: primary beats secondary when a cluster is
    /// both a source and a target.
    pub fn role(&self) -> ReplicateRole {
        let mut is_target = false;
        for edge in &self.config.cross_cluster_topology {
            if edge.source_cluster_id == self.local_cluster_id {
                return ReplicateRole::Primary;
            }
            if edge.target_cluster_id == self.local_cluster_id {
                is_target = true;
            }
        }
        if is_target {
            ReplicateRole::Secondary
        } else {
            ReplicateRole::Standalone
        }
    }

    /// Whether `pchannel` participates in replication under this
    /// configuration. With no cross-cluster topology every channel does;
    /// otherwise only the local cluster's declared channels do.
    pub fn available_in_replication(&self, pchannel: &str) -> bool {
        if !self.config.has_topology() {
            return true;
        }
        self.config
            .cluster(&self.local_cluster_id)
            .is_some_and(|c| c.pchannels.iter().any(|p| p == pchannel))
    }

    /// The replicating tasks this configuration requires that are not in
    /// `existing` (keyed by (source channel, target cluster)). For each edge
    /// sourced at the local cluster, local channel `i` replicates into the
    /// peer's channel `i`; the initialized checkpoint is the broadcast's
    /// last-confirmed append position on the source channel.
    pub fn replicating_tasks(
        &self,
        broadcast: &BroadcastAlterReplicateConfig,
        existing: &HashSet<(String, String)>,
    ) -> PetrelResult<Vec<ReplicatingChannelRecord>> {
        let Some(local) = self.config.cluster(&self.local_cluster_id) else {
            return Ok(Vec::new());
        };
        let mut tasks = Vec::new();
        for edge in &self.config.cross_cluster_topology {
            if edge.source_cluster_id != self.local_cluster_id {
                continue;
            }
            // Validated at construction: the target exists and its channel
            // list has the same length as the local one.
            let Some(peer) = self.config.cluster(&edge.target_cluster_id) else {
                continue;
            };
            for (i, source) in local.pchannels.iter().enumerate() {
                let key = (source.clone(), edge.target_cluster_id.clone());
                if existing.contains(&key) {
                    continue;
                }
                let result = broadcast.append_results.get(source).ok_or_else(|| {
                    PetrelError::ReplicationConfigInvalid(format!(
                        "no append result for source channel {source}"
                    ))
                })?;
                tasks.push(ReplicatingChannelRecord {
                    source_channel_name: source.clone(),
                    target_channel_name: peer.pchannels[i].clone(),
                    target_cluster_id: edge.target_cluster_id.clone(),
                    initialized_checkpoint: ReplicateCheckpoint {
                        message_id: result.last_confirmed_message_id.clone(),
                        time_tick: result.time_tick,
                    },
                });
            }
        }
        Ok(tasks)
    }
}

/// Availability of a channel under an optional helper: no persisted
/// configuration means every channel is available.
pub fn is_channel_available(pchannel: &str, helper: Option<&ConfigHelper>) -> bool {
    match helper {
        None => true,
        Some(helper) => helper.available_in_replication(pchannel),
    }
}

#[cfg(test)]
mod tests {
    use petrel_common::types::{ClusterTopology, MessageId, TopologyEdge};

    use super::*;

    fn config(
        clusters: &[(&str, &[&str])],
        edges: &[(&str, &str)],
    ) -> ReplicateConfiguration {
        ReplicateConfiguration {
            clusters: clusters
                .iter()
                .map(|(id, pchannels)| ClusterTopology {
                    cluster_id: id.to_string(),
                    pchannels: pchannels.iter().map(|p| p.to_string()).collect(),
                })
                .collect(),
            cross_cluster_topology: edges
                .iter()
                .map(|(source, target)| TopologyEdge {
                    source_cluster_id: source.to_string(),
                    target_cluster_id: target.to_string(),
                })
                .collect(),
        }
    }

    fn append_result(tick: u64) -> AppendResult {
        AppendResult {
            message_id: MessageId(format!("m-{tick}")),
            last_confirmed_message_id: MessageId(format!("c-{tick}")),
            time_tick: tick,
        }
    }

    // ── Validation ───────────────────────────────────────────────────────────

    #[test]
    fn test_duplicate_cluster_rejected() {
        let cfg = config(&[("dc-a", &["wal-0"]), ("dc-a", &["wal-1"])], &[]);
        let err = ConfigHelper::new("dc-a", &cfg).unwrap_err();
        assert!(matches!(err, PetrelError::ReplicationConfigInvalid(_)));
    }

    #[test]
    fn test_edge_to_undeclared_cluster_rejected() {
        let cfg = config(&[("dc-a", &["wal-0"])], &[("dc-a", "dc-ghost")]);
        assert!(ConfigHelper::new("dc-a", &cfg).is_err());
    }

    #[test]
    fn test_self_edge_rejected() {
        let cfg = config(&[("dc-a", &["wal-0"])], &[("dc-a", "dc-a")]);
        assert!(ConfigHelper::new("dc-a", &cfg).is_err());
    }

    #[test]
    fn test_channel_count_mismatch_rejected() {
        let cfg = config(
            &[("dc-a", &["wal-0", "wal-1"]), ("dc-b", &["wal-0-s"])],
            &[("dc-a", "dc-b")],
        );
        let err = ConfigHelper::new("dc-a", &cfg).unwrap_err();
        assert!(err.to_string().contains("count mismatch"));
    }

    // ── Role ─────────────────────────────────────────────────────────────────

    #[test]
    fn test_role_primary() {
        let cfg = config(
            &[("dc-a", &["wal-0"]), ("dc-b", &["wal-0-s"])],
            &[("dc-a", "dc-b")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        assert_eq!(helper.role(), ReplicateRole::Primary);
    }

    #[test]
    fn test_role_secondary() {
        let cfg = config(
            &[("dc-a", &["wal-0"]), ("dc-b", &["wal-0-s"])],
            &[("dc-b", "dc-a")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        assert_eq!(helper.role(), ReplicateRole::Secondary);
    }

    #[test]
    fn test_role_standalone_without_topology() {
        let cfg = config(&[("dc-a", &["wal-0"])], &[]);
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        assert_eq!(helper.role(), ReplicateRole::Standalone);
    }

    #[test]
    fn test_role_standalone_when_uninvolved() {
        let cfg = config(
            &[
                ("dc-a", &["wal-0"]),
                ("dc-b", &["wal-0-s"]),
                ("dc-c", &["wal-0-t"]),
            ],
            &[("dc-b", "dc-c")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        assert_eq!(helper.role(), ReplicateRole::Standalone);
    }

    #[test]
    fn test_role_primary_beats_secondary() {
        let cfg = config(
            &[
                ("dc-a", &["wal-0"]),
                ("dc-b", &["wal-0-s"]),
                ("dc-c", &["wal-0-t"]),
            ],
            &[("dc-b", "dc-a"), ("dc-a", "dc-c")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        assert_eq!(helper.role(), ReplicateRole::Primary);
    }

    // ── Availability ─────────────────────────────────────────────────────────

    #[test]
    fn test_availability_no_helper() {
        assert!(is_channel_available("wal-0", None));
    }

    #[test]
    fn test_availability_no_topology() {
        let cfg = config(&[("dc-a", &["wal-0", "wal-1"])], &[]);
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        assert!(helper.available_in_replication("wal-0"));
        // Undeclared channels are still available without a topology.
        assert!(helper.available_in_replication("wal-99"));
    }

    #[test]
    fn test_availability_with_topology() {
        let cfg = config(
            &[("dc-a", &["wal-0", "wal-1"]), ("dc-b", &["wal-2", "wal-3"])],
            &[("dc-a", "dc-b")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        assert!(helper.available_in_replication("wal-0"));
        assert!(helper.available_in_replication("wal-1"));
        assert!(!helper.available_in_replication("wal-4"));
        assert!(!helper.available_in_replication("freshly-added"));
    }

    // ── Task derivation ──────────────────────────────────────────────────────

    #[test]
    fn test_tasks_for_primary() {
        let cfg = config(
            &[
                ("dc-a", &["wal-0", "wal-1"]),
                ("dc-b", &["wal-0-s", "wal-1-s"]),
            ],
            &[("dc-a", "dc-b")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        let broadcast = BroadcastAlterReplicateConfig {
            configuration: cfg,
            append_results: HashMap::from([
                ("wal-0".to_string(), append_result(1)),
                ("wal-1".to_string(), append_result(2)),
            ]),
        };
        let tasks = helper
            .replicating_tasks(&broadcast, &HashSet::new())
            .unwrap();
        assert_eq!(tasks.len(), 2);
        for task in &tasks {
            assert_eq!(task.target_cluster_id, "dc-b");
            let expected_target = format!("{}-s", task.source_channel_name);
            assert_eq!(task.target_channel_name, expected_target);
            let result = &broadcast.append_results[&task.source_channel_name];
            assert_eq!(
                task.initialized_checkpoint.message_id,
                result.last_confirmed_message_id
            );
            assert_eq!(task.initialized_checkpoint.time_tick, result.time_tick);
        }
    }

    #[test]
    fn test_tasks_skip_existing() {
        let cfg = config(
            &[
                ("dc-a", &["wal-0", "wal-1"]),
                ("dc-b", &["wal-0-s", "wal-1-s"]),
            ],
            &[("dc-a", "dc-b")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        let broadcast = BroadcastAlterReplicateConfig {
            configuration: cfg,
            append_results: HashMap::from([
                ("wal-0".to_string(), append_result(1)),
                ("wal-1".to_string(), append_result(2)),
            ]),
        };
        let existing = HashSet::from([("wal-0".to_string(), "dc-b".to_string())]);
        let tasks = helper.replicating_tasks(&broadcast, &existing).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].source_channel_name, "wal-1");
    }

    #[test]
    fn test_no_tasks_for_secondary() {
        let cfg = config(
            &[("dc-a", &["wal-0"]), ("dc-b", &["wal-0-s"])],
            &[("dc-b", "dc-a")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        let broadcast = BroadcastAlterReplicateConfig {
            configuration: cfg,
            append_results: HashMap::from([("wal-0".to_string(), append_result(1))]),
        };
        let tasks = helper
            .replicating_tasks(&broadcast, &HashSet::new())
            .unwrap();
        assert!(tasks.is_empty());
    }

    #[test]
    fn test_missing_append_result_rejected() {
        let cfg = config(
            &[("dc-a", &["wal-0"]), ("dc-b", &["wal-0-s"])],
            &[("dc-a", "dc-b")],
        );
        let helper = ConfigHelper::new("dc-a", &cfg).unwrap();
        let broadcast = BroadcastAlterReplicateConfig {
            configuration: cfg,
            append_results: HashMap::new(),
        };
        let err = helper
            .replicating_tasks(&broadcast, &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, PetrelError::ReplicationConfigInvalid(_)));
    }
}
