//! Record types persisted by the streaming catalog. These are the durable
//! unit of coordinator state; every field is stable across releases.

use serde::{Deserialize, Serialize};

use petrel_common::types::{
    ChannelState, NodeId, PChannelInfo, ReplicateCheckpoint, ReplicateConfiguration,
};

/// One superseded assignment of a pchannel: the writer at a prior term that
/// has not yet been purged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentLogRecord {
    pub term: u64,
    pub node: NodeId,
}

/// Durable state of one physical channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PChannelRecord {
    pub channel: PChannelInfo,
    pub node: NodeId,
    pub state: ChannelState,
    #[serde(default)]
    pub histories: Vec<AssignmentLogRecord>,
    /// Replication resume position, present once this channel has acted as a
    /// replication target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate_checkpoint: Option<ReplicateCheckpoint>,
}

/// Presence of this record signals that streaming has been enabled at some
/// point in the deployment's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingVersionRecord {
    pub version: u64,
}

/// The control-channel marker seeding the cluster view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlChannelRecord {
    pub pchannel: String,
}

/// The persisted replicate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateConfigRecord {
    pub configuration: ReplicateConfiguration,
}

/// One replicating channel pair, materialized when the local cluster becomes
/// a replication source toward another cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatingChannelRecord {
    pub source_channel_name: String,
    pub target_channel_name: String,
    pub target_cluster_id: String,
    pub initialized_checkpoint: ReplicateCheckpoint,
}

impl ReplicatingChannelRecord {
    /// The identity of a replicating task: one task per (source channel,
    /// target cluster) pair.
    pub fn task_key(&self) -> (String, String) {
        (
            self.source_channel_name.clone(),
            self.target_cluster_id.clone(),
        )
    }
}
