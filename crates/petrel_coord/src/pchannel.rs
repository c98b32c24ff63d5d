//! Physical-channel metadata: an immutable value object mutated through a
//! copy-for-write clone.
//!
//! The manager validates a full transition on the clone, persists it, and
//! only then commits the clone into the registry. Watchers can therefore
//! share references to prior snapshots without observing torn state.
//!
//! ## Invariants
//! - Term is strictly monotone; +1 on every transition into `Assigning`.
//! - At most one node is the current assignee; superseded assignees are
//!   retired into the history until the next `assign_done` purges them.
//! - The history holds one slot per retired node, refreshed with the term it
//!   last held; no entry ever carries the current term.

use petrel_common::types::{
    AccessMode, ChannelState, NodeId, PChannelAssignment, PChannelInfo, ReplicateCheckpoint,
};
use petrel_meta::records::{AssignmentLogRecord, PChannelRecord};

use crate::replicate::{is_channel_available, ConfigHelper};

/// Immutable metadata of one physical channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PChannelMeta {
    info: PChannelInfo,
    node: NodeId,
    state: ChannelState,
    histories: Vec<AssignmentLogRecord>,
    available_in_replication: bool,
    replicate_checkpoint: Option<ReplicateCheckpoint>,
}

impl PChannelMeta {
    /// A brand-new channel: term 1, no node, uninitialized, available.
    pub fn new(name: impl Into<String>, access_mode: AccessMode) -> Self {
        Self::new_with_availability(name, access_mode, true)
    }

    pub fn new_with_availability(
        name: impl Into<String>,
        access_mode: AccessMode,
        available_in_replication: bool,
    ) -> Self {
        Self {
            info: PChannelInfo {
                name: name.into(),
                term: 1,
                access_mode,
            },
            node: NodeId::NONE,
            state: ChannelState::Uninitialized,
            histories: Vec::new(),
            available_in_replication,
            replicate_checkpoint: None,
        }
    }

    /// Rebuild a channel from its persisted record, deriving the
    /// replication-availability bit from the given config helper (`None`
    /// means no replicate configuration, so the channel is available).
    pub fn from_record(record: PChannelRecord, helper: Option<&ConfigHelper>) -> Self {
        let available = is_channel_available(&record.channel.name, helper);
        Self {
            info: record.channel,
            node: record.node,
            state: record.state,
            histories: record.histories,
            available_in_replication: available,
            replicate_checkpoint: record.replicate_checkpoint,
        }
    }

    pub fn to_record(&self) -> PChannelRecord {
        PChannelRecord {
            channel: self.info.clone(),
            node: self.node,
            state: self.state,
            histories: self.histories.clone(),
            replicate_checkpoint: self.replicate_checkpoint.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn channel_info(&self) -> &PChannelInfo {
        &self.info
    }

    pub fn current_term(&self) -> u64 {
        self.info.term
    }

    pub fn current_node(&self) -> NodeId {
        self.node
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn access_mode(&self) -> AccessMode {
        self.info.access_mode
    }

    pub fn is_assigned(&self) -> bool {
        self.state == ChannelState::Assigned
    }

    pub fn available_in_replication(&self) -> bool {
        self.available_in_replication
    }

    /// Superseded assignments not yet purged by `assign_done`.
    pub fn assign_histories(&self) -> Vec<PChannelAssignment> {
        self.histories
            .iter()
            .map(|h| PChannelAssignment {
                channel: PChannelInfo {
                    name: self.info.name.clone(),
                    term: h.term,
                    access_mode: self.info.access_mode,
                },
                node: h.node,
            })
            .collect()
    }

    /// The current `(channel, term, node)` tuple.
    pub fn current_assignment(&self) -> PChannelAssignment {
        PChannelAssignment {
            channel: self.info.clone(),
            node: self.node,
        }
    }

    /// Obtain a mutable clone; transitions applied to it become visible only
    /// once the manager commits it.
    pub fn copy_for_write(&self) -> MutablePChannel {
        MutablePChannel { meta: self.clone() }
    }

    /// Same channel with the replication-availability bit recomputed.
    pub(crate) fn with_availability(&self, available: bool) -> Self {
        let mut meta = self.clone();
        meta.available_in_replication = available;
        meta
    }
}

/// A mutable clone of a `PChannelMeta` pending commit.
#[derive(Debug, Clone)]
pub struct MutablePChannel {
    meta: PChannelMeta,
}

impl MutablePChannel {
    /// Begin assigning the channel to `node` with the given access mode.
    ///
    /// Returns false (no transition) iff the channel is already `Assigned`
    /// to that same node. Otherwise the current assignee is retired into the
    /// history (one slot per node, term refreshed), the term is bumped and
    /// the state becomes `Assigning`.
    pub fn try_assign_to_node(&mut self, access_mode: AccessMode, node: NodeId) -> bool {
        if self.meta.state == ChannelState::Assigned && self.meta.node == node {
            return false;
        }
        if self.meta.state != ChannelState::Uninitialized {
            let retired = self.meta.node;
            self.meta.histories.retain(|h| h.node != retired);
            self.meta.histories.push(AssignmentLogRecord {
                term: self.meta.info.term,
                node: retired,
            });
        }
        self.meta.info.term += 1;
        self.meta.info.access_mode = access_mode;
        self.meta.node = node;
        self.meta.state = ChannelState::Assigning;
        true
    }

    /// Acknowledge the in-flight assignment: `Assigning` → `Assigned`,
    /// purging every history entry superseded by the current term.
    pub fn assign_done(&mut self) {
        self.meta.state = ChannelState::Assigned;
        let term = self.meta.info.term;
        self.meta.histories.retain(|h| h.term >= term);
    }

    /// Mark the channel unavailable. A stale term (`term < current`) is a
    /// silent no-op; returns whether the transition was applied.
    pub fn mark_as_unavailable(&mut self, term: u64) -> bool {
        if term < self.meta.info.term {
            return false;
        }
        self.meta.state = ChannelState::Unavailable;
        true
    }

    pub fn current_term(&self) -> u64 {
        self.meta.current_term()
    }

    pub fn assign_histories(&self) -> Vec<PChannelAssignment> {
        self.meta.assign_histories()
    }

    /// Finish the write: the immutable meta to persist and commit.
    pub fn into_meta(self) -> PChannelMeta {
        self.meta
    }
}

#[cfg(test)]
mod tests {
    use petrel_common::types::{ClusterTopology, ReplicateConfiguration, TopologyEdge};

    use super::*;

    fn record(name: &str, term: u64, node: u64, state: ChannelState) -> PChannelRecord {
        PChannelRecord {
            channel: PChannelInfo {
                name: name.into(),
                term,
                access_mode: AccessMode::Rw,
            },
            node: NodeId(node),
            state,
            histories: vec![],
            replicate_checkpoint: None,
        }
    }

    fn replicated_helper() -> ConfigHelper {
        ConfigHelper::new(
            "dc-a",
            &ReplicateConfiguration {
                clusters: vec![
                    ClusterTopology {
                        cluster_id: "dc-a".into(),
                        pchannels: vec!["wal-0".into(), "wal-1".into()],
                    },
                    ClusterTopology {
                        cluster_id: "dc-b".into(),
                        pchannels: vec!["wal-0-s".into(), "wal-1-s".into()],
                    },
                ],
                cross_cluster_topology: vec![TopologyEdge {
                    source_cluster_id: "dc-a".into(),
                    target_cluster_id: "dc-b".into(),
                }],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_availability_defaults() {
        let meta = PChannelMeta::new("wal-0", AccessMode::Rw);
        assert!(meta.available_in_replication());

        let meta = PChannelMeta::new_with_availability("wal-0", AccessMode::Rw, false);
        assert!(!meta.available_in_replication());

        // From record with no config: available.
        let meta = PChannelMeta::from_record(
            record("wal-0", 1, 0, ChannelState::Uninitialized),
            None,
        );
        assert!(meta.available_in_replication());
    }

    #[test]
    fn test_availability_from_replicate_config() {
        let helper = replicated_helper();

        let meta = PChannelMeta::from_record(
            record("wal-0", 1, 0, ChannelState::Uninitialized),
            Some(&helper),
        );
        assert!(meta.available_in_replication());

        let meta = PChannelMeta::from_record(
            record("wal-9", 1, 0, ChannelState::Uninitialized),
            Some(&helper),
        );
        assert!(!meta.available_in_replication());
    }

    #[test]
    fn test_availability_no_topology_always_available() {
        let helper = ConfigHelper::new(
            "dc-a",
            &ReplicateConfiguration {
                clusters: vec![ClusterTopology {
                    cluster_id: "dc-a".into(),
                    pchannels: vec!["wal-0".into()],
                }],
                cross_cluster_topology: vec![],
            },
        )
        .unwrap();
        let meta = PChannelMeta::from_record(
            record("anything", 1, 0, ChannelState::Uninitialized),
            Some(&helper),
        );
        assert!(meta.available_in_replication());
    }

    #[test]
    fn test_recovered_accessors() {
        let meta = PChannelMeta::from_record(
            record("wal-7", 1, 123, ChannelState::Uninitialized),
            None,
        );
        assert_eq!(meta.name(), "wal-7");
        assert_eq!(meta.current_term(), 1);
        assert_eq!(meta.current_node(), NodeId(123));
        assert_eq!(meta.state(), ChannelState::Uninitialized);
        assert!(!meta.is_assigned());
        assert!(meta.assign_histories().is_empty());
        assert_eq!(
            meta.current_assignment(),
            PChannelAssignment {
                channel: PChannelInfo {
                    name: "wal-7".into(),
                    term: 1,
                    access_mode: AccessMode::Rw,
                },
                node: NodeId(123),
            }
        );
    }

    #[test]
    fn test_assign_lifecycle() {
        let meta = PChannelMeta::new("wal-0", AccessMode::Rw);
        assert_eq!(meta.current_term(), 1);

        // First assignment: uninitialized channels leave no history behind.
        let mut mutable = meta.copy_for_write();
        assert!(mutable.try_assign_to_node(AccessMode::Rw, NodeId(456)));
        let updated = mutable.into_meta();
        // The original snapshot is untouched.
        assert_eq!(meta.current_term(), 1);
        assert_eq!(meta.current_node(), NodeId::NONE);

        assert_eq!(updated.current_term(), 2);
        assert_eq!(updated.current_node(), NodeId(456));
        assert_eq!(updated.state(), ChannelState::Assigning);
        assert!(updated.assign_histories().is_empty());

        // Reassign before the first ack: the prior assignee is retired.
        let mut mutable = updated.copy_for_write();
        assert!(mutable.try_assign_to_node(AccessMode::Rw, NodeId(789)));
        let updated = mutable.into_meta();
        assert_eq!(updated.current_term(), 3);
        assert_eq!(updated.current_node(), NodeId(789));
        let histories = updated.assign_histories();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].channel.name, "wal-0");
        assert_eq!(histories[0].channel.term, 2);
        assert_eq!(histories[0].node, NodeId(456));
        assert_eq!(updated.state(), ChannelState::Assigning);

        // Ack: assigned, superseded history purged.
        let mut mutable = updated.copy_for_write();
        mutable.assign_done();
        let updated = mutable.into_meta();
        assert_eq!(updated.current_term(), 3);
        assert!(updated.is_assigned());
        assert!(updated.assign_histories().is_empty());

        // Assigning to the node that already holds the channel is a no-op.
        let mut mutable = updated.copy_for_write();
        assert!(!mutable.try_assign_to_node(AccessMode::Rw, NodeId(789)));

        // Stale term: unavailable is ignored.
        let mut mutable = updated.copy_for_write();
        assert!(!mutable.mark_as_unavailable(2));
        assert!(mutable.into_meta().is_assigned());

        // Equal term transitions.
        let mut mutable = updated.copy_for_write();
        assert!(mutable.mark_as_unavailable(3));
        let updated = mutable.into_meta();
        assert!(!updated.is_assigned());
        assert_eq!(updated.state(), ChannelState::Unavailable);
    }

    #[test]
    fn test_history_one_slot_per_node() {
        // Start from an unavailable channel: term 3, node 789, no history.
        let mut start = PChannelMeta::new("wal-0", AccessMode::Rw).copy_for_write();
        assert!(start.try_assign_to_node(AccessMode::Rw, NodeId(789)));
        start.assign_done();
        assert!(start.mark_as_unavailable(2));
        let meta = start.into_meta();
        assert_eq!(meta.current_term(), 2);

        let mut mutable = meta.copy_for_write();
        // Resume on the same node: it is retired into the history first.
        assert!(mutable.try_assign_to_node(AccessMode::Rw, NodeId(789)));
        assert_eq!(mutable.assign_histories().len(), 1);

        // A different node: 789's slot is refreshed, not duplicated.
        assert!(mutable.try_assign_to_node(AccessMode::Rw, NodeId(790)));
        assert_eq!(mutable.assign_histories().len(), 1);

        // Re-bumping 790 adds its own slot...
        assert!(mutable.try_assign_to_node(AccessMode::Rw, NodeId(790)));
        assert_eq!(mutable.assign_histories().len(), 2);
        // ...and a further bump refreshes it in place.
        assert!(mutable.try_assign_to_node(AccessMode::Rw, NodeId(790)));
        assert_eq!(mutable.assign_histories().len(), 2);

        for history in mutable.assign_histories() {
            if history.node == NodeId(790) {
                assert_eq!(history.channel.term, mutable.current_term() - 1);
            }
            // No history entry ever carries the current term.
            assert!(history.channel.term < mutable.current_term());
        }
    }

    #[test]
    fn test_record_roundtrip_preserves_state() {
        let mut mutable = PChannelMeta::new("wal-0", AccessMode::Ro).copy_for_write();
        mutable.try_assign_to_node(AccessMode::Rw, NodeId(5));
        let meta = mutable.into_meta();

        let rebuilt = PChannelMeta::from_record(meta.to_record(), None);
        assert_eq!(rebuilt.current_term(), meta.current_term());
        assert_eq!(rebuilt.current_node(), meta.current_node());
        assert_eq!(rebuilt.state(), meta.state());
        assert_eq!(rebuilt.access_mode(), AccessMode::Rw);
    }
}
