//! Typed streaming-catalog facade over the transactional KV store.

use std::sync::Arc;

use async_trait::async_trait;

use petrel_common::error::{CatalogError, PetrelResult};

use crate::kv::MetaStore;
use crate::records::{
    ControlChannelRecord, PChannelRecord, ReplicateConfigRecord, ReplicatingChannelRecord,
    StreamingVersionRecord,
};

const KEY_VERSION: &str = "streamingcoord-meta/version";
const KEY_CCHANNEL: &str = "streamingcoord-meta/cchannel";
const KEY_REPLICATE_CONFIG: &str = "streamingcoord-meta/replicate-config";
const PREFIX_PCHANNEL: &str = "streamingcoord-meta/pchannel/";
const PREFIX_REPLICATING: &str = "streamingcoord-meta/replicating-channel/";

/// The catalog operations the coordinator relies on. All fallible; batched
/// saves are atomic over their batch.
#[async_trait]
pub trait StreamingCatalog: Send + Sync {
    /// Whether streaming has ever been enabled. `None` means never.
    async fn get_version(&self) -> PetrelResult<Option<StreamingVersionRecord>>;

    /// Idempotent.
    async fn save_version(&self, version: StreamingVersionRecord) -> PetrelResult<()>;

    async fn list_pchannels(&self) -> PetrelResult<Vec<PChannelRecord>>;

    /// Atomic over the whole batch.
    async fn save_pchannels(&self, records: Vec<PChannelRecord>) -> PetrelResult<()>;

    async fn get_control_channel(&self) -> PetrelResult<Option<ControlChannelRecord>>;

    async fn save_control_channel(&self, record: ControlChannelRecord) -> PetrelResult<()>;

    /// The persisted replicate configuration plus all materialized
    /// replicating tasks, or `None` when no configuration was ever saved.
    async fn get_replicate_configuration(
        &self,
    ) -> PetrelResult<Option<(ReplicateConfigRecord, Vec<ReplicatingChannelRecord>)>>;

    /// Atomic over the configuration and every new task.
    async fn save_replicate_configuration(
        &self,
        config: ReplicateConfigRecord,
        new_tasks: Vec<ReplicatingChannelRecord>,
    ) -> PetrelResult<()>;
}

/// `StreamingCatalog` over any `MetaStore`, JSON-encoding the record types
/// under a fixed key schema.
pub struct KvStreamingCatalog<S> {
    store: Arc<S>,
}

impl<S: MetaStore> KvStreamingCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    fn pchannel_key(name: &str) -> String {
        format!("{PREFIX_PCHANNEL}{name}")
    }

    fn replicating_key(source: &str, target_cluster: &str) -> String {
        format!("{PREFIX_REPLICATING}{source}/{target_cluster}")
    }

    fn encode<T: serde::Serialize>(value: &T) -> PetrelResult<Vec<u8>> {
        Ok(serde_json::to_vec(value).map_err(CatalogError::Serialization)?)
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> PetrelResult<T> {
        Ok(serde_json::from_slice(bytes).map_err(CatalogError::Serialization)?)
    }
}

#[async_trait]
impl<S: MetaStore> StreamingCatalog for KvStreamingCatalog<S> {
    async fn get_version(&self) -> PetrelResult<Option<StreamingVersionRecord>> {
        match self.store.load(KEY_VERSION).await? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_version(&self, version: StreamingVersionRecord) -> PetrelResult<()> {
        self.store
            .multi_save(vec![(KEY_VERSION.into(), Self::encode(&version)?)])
            .await
    }

    async fn list_pchannels(&self) -> PetrelResult<Vec<PChannelRecord>> {
        let kvs = self.store.load_prefix(PREFIX_PCHANNEL).await?;
        let mut records = Vec::with_capacity(kvs.len());
        for (_, bytes) in kvs {
            records.push(Self::decode(&bytes)?);
        }
        Ok(records)
    }

    async fn save_pchannels(&self, records: Vec<PChannelRecord>) -> PetrelResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut kvs = Vec::with_capacity(records.len());
        for record in &records {
            kvs.push((Self::pchannel_key(&record.channel.name), Self::encode(record)?));
        }
        tracing::debug!(count = kvs.len(), "saving pchannel metas");
        self.store.multi_save(kvs).await
    }

    async fn get_control_channel(&self) -> PetrelResult<Option<ControlChannelRecord>> {
        match self.store.load(KEY_CCHANNEL).await? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save_control_channel(&self, record: ControlChannelRecord) -> PetrelResult<()> {
        self.store
            .multi_save(vec![(KEY_CCHANNEL.into(), Self::encode(&record)?)])
            .await
    }

    async fn get_replicate_configuration(
        &self,
    ) -> PetrelResult<Option<(ReplicateConfigRecord, Vec<ReplicatingChannelRecord>)>> {
        let config = match self.store.load(KEY_REPLICATE_CONFIG).await? {
            Some(bytes) => Self::decode::<ReplicateConfigRecord>(&bytes)?,
            None => return Ok(None),
        };
        let kvs = self.store.load_prefix(PREFIX_REPLICATING).await?;
        let mut tasks = Vec::with_capacity(kvs.len());
        for (_, bytes) in kvs {
            tasks.push(Self::decode(&bytes)?);
        }
        Ok(Some((config, tasks)))
    }

    async fn save_replicate_configuration(
        &self,
        config: ReplicateConfigRecord,
        new_tasks: Vec<ReplicatingChannelRecord>,
    ) -> PetrelResult<()> {
        let mut kvs = vec![(KEY_REPLICATE_CONFIG.to_string(), Self::encode(&config)?)];
        for task in &new_tasks {
            kvs.push((
                Self::replicating_key(&task.source_channel_name, &task.target_cluster_id),
                Self::encode(task)?,
            ));
        }
        tracing::debug!(
            new_tasks = new_tasks.len(),
            "saving replicate configuration"
        );
        self.store.multi_save(kvs).await
    }
}
