use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a streaming worker node. `NodeId(0)` means
/// "no node" on a channel that has never been assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const NONE: NodeId = NodeId(0);
}

/// Unique identifier for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(pub u64);

/// Identifier of a physical WAL channel, globally unique within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn new(name: impl Into<String>) -> Self {
        ChannelId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coll:{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Access mode of a physical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Read-write: the channel accepts appends from its assigned node.
    Rw,
    /// Read-only: streaming has never been enabled for this deployment.
    Ro,
}

/// Lifecycle state of a physical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Uninitialized,
    Assigning,
    Assigned,
    Unavailable,
}

/// The identity of a physical channel at a given term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PChannelInfo {
    pub name: String,
    pub term: u64,
    pub access_mode: AccessMode,
}

/// The `(channel, term, node)` tuple designating a writer. The unit exposed
/// to assignment watchers and persisted by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PChannelAssignment {
    pub channel: PChannelInfo,
    pub node: NodeId,
}

/// Version of the coordinator state: `global` is the session service's
/// registered revision, `local` the per-process epoch bumped on each
/// externally visible coordinator change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VersionPair {
    pub global: u64,
    pub local: u64,
}

impl fmt::Display for VersionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.global, self.local)
    }
}

/// Opaque WAL message identifier. The coordinator never interprets it; it is
/// produced by the WAL service and carried through replication checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg:{}", self.0)
    }
}

/// Result of a WAL append, as reported by the broadcast layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResult {
    pub message_id: MessageId,
    pub last_confirmed_message_id: MessageId,
    pub time_tick: u64,
}

/// Replication start position for a channel pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateCheckpoint {
    pub message_id: MessageId,
    pub time_tick: u64,
}

/// One cluster's declaration inside a replicate configuration: its id and
/// the ordered pchannel list. Channel replication pairs clusters index by
/// index over these lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    pub cluster_id: String,
    pub pchannels: Vec<String>,
}

/// A directed replication edge between two clusters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub source_cluster_id: String,
    pub target_cluster_id: String,
}

/// The cross-cluster replication configuration: declared clusters plus the
/// directed topology over them. An empty topology means no replication.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicateConfiguration {
    #[serde(default)]
    pub clusters: Vec<ClusterTopology>,
    #[serde(default)]
    pub cross_cluster_topology: Vec<TopologyEdge>,
}

impl ReplicateConfiguration {
    /// Whether the configuration declares any cross-cluster edge.
    pub fn has_topology(&self) -> bool {
        !self.cross_cluster_topology.is_empty()
    }

    /// Look up a declared cluster by id.
    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterTopology> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }
}
