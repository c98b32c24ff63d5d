//! Metadata catalog for the streaming coordinator.
//!
//! Layering:
//! - `MetaStore`: a linearizable transactional KV abstraction (etcd-shaped;
//!   an in-memory implementation ships for single-node and tests).
//! - `StreamingCatalog`: the typed facade the coordinator talks to. Values
//!   are the serde record types in `records`; keys live under a fixed
//!   `streamingcoord-meta/` schema.
//!
//! The catalog does not serialize callers; the channel manager owns the
//! single mutation path and the catalog only guarantees that each
//! `multi_save` batch is atomic.

pub mod catalog;
pub mod kv;
pub mod records;

pub use catalog::{KvStreamingCatalog, StreamingCatalog};
pub use kv::{FaultInjectedMetaStore, MemoryMetaStore, MetaStore};
pub use records::{
    AssignmentLogRecord, ControlChannelRecord, PChannelRecord, ReplicateConfigRecord,
    ReplicatingChannelRecord, StreamingVersionRecord,
};
