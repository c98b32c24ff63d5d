//! The channel manager: owner of the authoritative pchannel registry and the
//! sole mutation path over it.
//!
//! Every mutation follows the same shape under the write lock: build the
//! next state on copy-for-write clones, persist the batch through the
//! catalog, commit the clones into the registry, bump the local version.
//! Watchers are woken only after the lock is released. Either the whole
//! batch persists and commits or none of it does; a catalog failure leaves
//! the registry and the local version untouched.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::RwLock;

use petrel_common::config::CoordConfig;
use petrel_common::error::{PetrelError, PetrelResult};
use petrel_common::shutdown::ShutdownSignal;
use petrel_common::types::{
    AccessMode, ChannelId, NodeId, PChannelAssignment, ReplicateConfiguration, VersionPair,
};
use petrel_meta::catalog::StreamingCatalog;
use petrel_meta::records::{ReplicateConfigRecord, StreamingVersionRecord};

use crate::alloc::{self, AllocVChannelRequest};
use crate::metrics::CoordMetrics;
use crate::pchannel::PChannelMeta;
use crate::replicate::{
    is_channel_available, BroadcastAlterReplicateConfig, ConfigHelper, ReplicateRole,
};
use crate::singleton;
use crate::stats::pchannel_stats;
use crate::watch::{AssignmentNotifier, AssignmentSnapshot};

/// A channel referenced at a specific term, as reported by a worker node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTerm {
    pub name: String,
    pub term: u64,
}

/// Point-in-time view of the whole registry.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub channels: HashMap<ChannelId, PChannelMeta>,
    pub version: VersionPair,
}

/// The cluster channel topology exposed to external consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterChannels {
    pub control_channel: String,
    pub channels: Vec<String>,
}

/// Options for [`ChannelManager::cluster_channels`]. The default view hides
/// channels excluded from replication.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetClusterChannelsOptions {
    pub include_unavailable_in_replication: bool,
}

impl GetClusterChannelsOptions {
    pub fn include_unavailable_in_replication(mut self) -> Self {
        self.include_unavailable_in_replication = true;
        self
    }
}

struct ManagerInner {
    channels: HashMap<ChannelId, PChannelMeta>,
    /// The local epoch: +1 per externally visible coordinator change.
    local_version: u64,
    control_channel: Option<String>,
    streaming_enabled: bool,
    replicate_config: Option<ReplicateConfiguration>,
    config_helper: Option<ConfigHelper>,
    /// Identities of every persisted replicating task, for derivation dedup.
    replicating_tasks: HashSet<(String, String)>,
    /// Fired once streaming flips to enabled.
    enabled_notifiers: Vec<ShutdownSignal>,
}

impl ManagerInner {
    fn default_access_mode(&self) -> AccessMode {
        if self.streaming_enabled {
            AccessMode::Rw
        } else {
            AccessMode::Ro
        }
    }
}

/// The streaming coordinator's channel manager. Construct via
/// [`ChannelManager::recover`].
pub struct ChannelManager {
    catalog: Arc<dyn StreamingCatalog>,
    cluster_id: String,
    /// The session service's registered revision, paired with the local
    /// epoch in every exposed version.
    global_rev: u64,
    inner: RwLock<ManagerInner>,
    notifier: AssignmentNotifier,
    metrics: CoordMetrics,
}

impl ChannelManager {
    /// Recover the manager from persisted state, seeding any provider
    /// channels the catalog has never seen (in memory only; they are
    /// persisted on their first assignment or explicit add). Registers the
    /// process singleton on success. Any catalog read failure aborts the
    /// whole recovery.
    pub async fn recover(
        catalog: Arc<dyn StreamingCatalog>,
        config: &CoordConfig,
        global_rev: u64,
        initial_channels: &[String],
    ) -> PetrelResult<Arc<Self>> {
        let version = catalog.get_version().await?;
        let streaming_enabled = version.is_some();
        let control_channel = catalog.get_control_channel().await?.map(|r| r.pchannel);
        let records = catalog.list_pchannels().await?;

        let mut replicate_config = None;
        let mut config_helper = None;
        let mut replicating_tasks = HashSet::new();
        if let Some((config_record, tasks)) = catalog.get_replicate_configuration().await? {
            let helper = ConfigHelper::new(&config.cluster_id, &config_record.configuration)?;
            replicate_config = Some(config_record.configuration);
            config_helper = Some(helper);
            replicating_tasks = tasks.iter().map(|t| t.task_key()).collect();
        }

        let mut channels = HashMap::new();
        for record in records {
            let meta = PChannelMeta::from_record(record, config_helper.as_ref());
            channels.insert(ChannelId::new(meta.name()), meta);
        }
        let default_mode = if streaming_enabled {
            AccessMode::Rw
        } else {
            AccessMode::Ro
        };
        for name in initial_channels {
            let id = ChannelId::new(name.clone());
            if channels.contains_key(&id) {
                continue;
            }
            let available = is_channel_available(name, config_helper.as_ref());
            channels.insert(
                id,
                PChannelMeta::new_with_availability(name.clone(), default_mode, available),
            );
        }
        for id in channels.keys() {
            pchannel_stats().add_pchannel(id.as_str());
        }

        tracing::info!(
            cluster_id = %config.cluster_id,
            channels = channels.len(),
            streaming_enabled,
            replicated = replicate_config.is_some(),
            "channel manager recovered"
        );

        let manager = Arc::new(Self {
            catalog,
            cluster_id: config.cluster_id.clone(),
            global_rev,
            inner: RwLock::new(ManagerInner {
                channels,
                local_version: 0,
                control_channel,
                streaming_enabled,
                replicate_config,
                config_helper,
                replicating_tasks,
                enabled_notifiers: Vec::new(),
            }),
            notifier: AssignmentNotifier::default(),
            metrics: CoordMetrics::default(),
        });
        singleton::register(manager.clone());
        Ok(manager)
    }

    fn version_pair(&self, inner: &ManagerInner) -> VersionPair {
        VersionPair {
            global: self.global_rev,
            local: inner.local_version,
        }
    }

    /// Activity counters of this manager instance.
    pub fn metrics(&self) -> &CoordMetrics {
        &self.metrics
    }

    /// Persist a batch of channel metas, counting write failures.
    async fn persist_pchannels(&self, metas: &[PChannelMeta]) -> PetrelResult<()> {
        let result = self
            .catalog
            .save_pchannels(metas.iter().map(|m| m.to_record()).collect())
            .await;
        if result.is_err() {
            self.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Register pchannels discovered after recovery. Unknown names are
    /// created uninitialized and persisted as one atomic batch; known names
    /// are ignored. A failed persist commits nothing.
    pub async fn add_pchannels(&self, names: &[String]) -> PetrelResult<()> {
        let mut inner = self.inner.write().await;
        let default_mode = inner.default_access_mode();
        let mut fresh: Vec<PChannelMeta> = Vec::new();
        for name in names {
            if inner.channels.contains_key(&ChannelId::new(name.clone()))
                || fresh.iter().any(|m| m.name() == name)
            {
                continue;
            }
            let available = is_channel_available(name, inner.config_helper.as_ref());
            fresh.push(PChannelMeta::new_with_availability(
                name.clone(),
                default_mode,
                available,
            ));
        }
        if fresh.is_empty() {
            return Ok(());
        }

        self.persist_pchannels(&fresh).await?;

        tracing::info!(count = fresh.len(), "added pchannels");
        self.metrics
            .added_pchannels
            .fetch_add(fresh.len() as u64, Ordering::Relaxed);
        for meta in fresh {
            pchannel_stats().add_pchannel(meta.name());
            inner.channels.insert(ChannelId::new(meta.name()), meta);
        }
        inner.local_version += 1;
        drop(inner);
        self.notifier.notify_watchers();
        Ok(())
    }

    /// Begin assigning channels to nodes. Every referenced channel must
    /// exist; entries whose channel is already assigned to the requested
    /// node are skipped. Returns the committed metas.
    pub async fn assign_pchannels(
        &self,
        assignments: &HashMap<ChannelId, PChannelAssignment>,
    ) -> PetrelResult<Vec<PChannelMeta>> {
        let mut inner = self.inner.write().await;
        for id in assignments.keys() {
            if !inner.channels.contains_key(id) {
                return Err(PetrelError::ChannelNotExist(id.0.clone()));
            }
        }

        let mut modified = Vec::new();
        for (id, assignment) in assignments {
            let mut mutable = inner.channels[id].copy_for_write();
            if mutable.try_assign_to_node(assignment.channel.access_mode, assignment.node) {
                modified.push(mutable.into_meta());
            }
        }
        if modified.is_empty() {
            return Ok(Vec::new());
        }

        self.persist_pchannels(&modified).await?;

        self.metrics
            .assign_count
            .fetch_add(modified.len() as u64, Ordering::Relaxed);
        for meta in &modified {
            tracing::info!(
                channel = meta.name(),
                term = meta.current_term(),
                node = %meta.current_node(),
                "pchannel assigning"
            );
            inner.channels.insert(ChannelId::new(meta.name()), meta.clone());
        }
        inner.local_version += 1;
        drop(inner);
        self.notifier.notify_watchers();
        Ok(modified)
    }

    /// Acknowledge in-flight assignments: `Assigning` → `Assigned`.
    pub async fn assign_pchannels_done(&self, ids: &[ChannelId]) -> PetrelResult<()> {
        let mut inner = self.inner.write().await;
        for id in ids {
            if !inner.channels.contains_key(id) {
                return Err(PetrelError::ChannelNotExist(id.0.clone()));
            }
        }

        let mut modified = Vec::new();
        for id in ids {
            let mut mutable = inner.channels[id].copy_for_write();
            mutable.assign_done();
            modified.push(mutable.into_meta());
        }
        if modified.is_empty() {
            return Ok(());
        }

        self.persist_pchannels(&modified).await?;

        self.metrics
            .assign_done_count
            .fetch_add(modified.len() as u64, Ordering::Relaxed);
        for meta in &modified {
            tracing::info!(
                channel = meta.name(),
                term = meta.current_term(),
                node = %meta.current_node(),
                "pchannel assigned"
            );
            inner.channels.insert(ChannelId::new(meta.name()), meta.clone());
        }
        inner.local_version += 1;
        drop(inner);
        self.notifier.notify_watchers();
        Ok(())
    }

    /// Mark channels unavailable. Every referenced channel must exist;
    /// entries carrying a stale term are silently ignored. When every entry
    /// is stale nothing is persisted and the version does not move.
    pub async fn mark_as_unavailable(&self, channels: &[ChannelTerm]) -> PetrelResult<()> {
        let mut inner = self.inner.write().await;
        for channel in channels {
            if !inner
                .channels
                .contains_key(&ChannelId::new(channel.name.clone()))
            {
                return Err(PetrelError::ChannelNotExist(channel.name.clone()));
            }
        }

        let mut modified = Vec::new();
        for channel in channels {
            let id = ChannelId::new(channel.name.clone());
            let mut mutable = inner.channels[&id].copy_for_write();
            if mutable.mark_as_unavailable(channel.term) {
                modified.push(mutable.into_meta());
            }
        }
        if modified.is_empty() {
            return Ok(());
        }

        self.persist_pchannels(&modified).await?;

        self.metrics
            .unavailable_count
            .fetch_add(modified.len() as u64, Ordering::Relaxed);
        for meta in &modified {
            tracing::warn!(
                channel = meta.name(),
                term = meta.current_term(),
                "pchannel unavailable"
            );
            inner.channels.insert(ChannelId::new(meta.name()), meta.clone());
        }
        inner.local_version += 1;
        drop(inner);
        self.notifier.notify_watchers();
        Ok(())
    }

    /// Allocate `num` vchannels for a collection, load-balanced over the
    /// replication-available pchannels. Fails without a partial result when
    /// fewer channels are eligible than requested. Not durable.
    pub async fn alloc_virtual_channels(
        &self,
        request: AllocVChannelRequest,
    ) -> PetrelResult<Vec<String>> {
        let inner = self.inner.read().await;
        let eligible: Vec<String> = inner
            .channels
            .values()
            .filter(|m| m.available_in_replication())
            .map(|m| m.name().to_string())
            .collect();
        drop(inner);

        if request.num > eligible.len() {
            return Err(PetrelError::AllocShortfall {
                requested: request.num,
                available: eligible.len(),
            });
        }
        let ordered = pchannel_stats().sorted_by_load(&eligible);
        Ok(alloc::vchannel_names(
            &ordered[..request.num],
            request.collection_id,
        ))
    }

    /// The node currently holding the WAL of `pchannel`, if it is assigned.
    pub async fn latest_wal_located(&self, pchannel: &str) -> Option<NodeId> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(&ChannelId::new(pchannel))
            .filter(|m| m.is_assigned())
            .map(|m| m.current_node())
    }

    /// Snapshot of the full registry.
    pub async fn current_pchannels_view(&self) -> ClusterView {
        let inner = self.inner.read().await;
        ClusterView {
            channels: inner.channels.clone(),
            version: self.version_pair(&inner),
        }
    }

    /// The assigned relations, the replicate configuration and the version
    /// that stamps them.
    pub async fn latest_assignment(&self) -> AssignmentSnapshot {
        let inner = self.inner.read().await;
        let assignments = inner
            .channels
            .values()
            .filter(|m| m.is_assigned())
            .map(|m| m.current_assignment())
            .collect();
        AssignmentSnapshot {
            version: self.version_pair(&inner),
            assignments,
            replicate_config: inner.replicate_config.clone(),
        }
    }

    /// The cluster channel topology. By default only channels available in
    /// replication are listed.
    pub async fn cluster_channels(&self, options: GetClusterChannelsOptions) -> ClusterChannels {
        let inner = self.inner.read().await;
        let mut channels: Vec<String> = inner
            .channels
            .values()
            .filter(|m| {
                options.include_unavailable_in_replication || m.available_in_replication()
            })
            .map(|m| m.name().to_string())
            .collect();
        channels.sort();
        ClusterChannels {
            control_channel: inner.control_channel.clone().unwrap_or_default(),
            channels,
        }
    }

    /// The local cluster's replication role under the persisted
    /// configuration. Standalone when none was ever persisted.
    pub async fn replicate_role(&self) -> ReplicateRole {
        let inner = self.inner.read().await;
        inner
            .config_helper
            .as_ref()
            .map(|h| h.role())
            .unwrap_or(ReplicateRole::Standalone)
    }

    /// Whether streaming has ever been enabled on this deployment.
    pub async fn is_streaming_enabled_once(&self) -> bool {
        self.inner.read().await.streaming_enabled
    }

    /// Register a signal fired once streaming becomes enabled. Fires
    /// immediately if it already is.
    pub async fn register_streaming_enabled_notifier(&self, notifier: ShutdownSignal) {
        let mut inner = self.inner.write().await;
        if inner.streaming_enabled {
            notifier.shutdown();
        } else {
            inner.enabled_notifiers.push(notifier);
        }
    }

    /// Persist that streaming is enabled (idempotent) and fire every
    /// registered notifier on the first transition.
    pub async fn mark_streaming_has_enabled(&self) -> PetrelResult<()> {
        let mut inner = self.inner.write().await;
        self.catalog
            .save_version(StreamingVersionRecord { version: 1 })
            .await?;
        if !inner.streaming_enabled {
            inner.streaming_enabled = true;
            for notifier in inner.enabled_notifiers.drain(..) {
                notifier.shutdown();
            }
            tracing::info!("streaming enabled");
        }
        Ok(())
    }

    /// Apply a broadcast replicate-configuration change: validate, derive
    /// the not-yet-persisted replicating tasks, persist config + tasks
    /// atomically, refresh every channel's replication availability, and
    /// bump the local version only when the configuration actually changed.
    pub async fn update_replicate_configuration(
        &self,
        broadcast: BroadcastAlterReplicateConfig,
    ) -> PetrelResult<()> {
        let mut inner = self.inner.write().await;
        let helper = ConfigHelper::new(&self.cluster_id, &broadcast.configuration)?;
        let changed = inner.replicate_config.as_ref() != Some(&broadcast.configuration);
        let new_tasks = helper.replicating_tasks(&broadcast, &inner.replicating_tasks)?;

        if let Err(err) = self
            .catalog
            .save_replicate_configuration(
                ReplicateConfigRecord {
                    configuration: broadcast.configuration.clone(),
                },
                new_tasks.clone(),
            )
            .await
        {
            self.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
            return Err(err);
        }

        tracing::info!(
            role = ?helper.role(),
            new_tasks = new_tasks.len(),
            changed,
            "replicate configuration updated"
        );
        self.metrics.config_updates.fetch_add(1, Ordering::Relaxed);
        for task in &new_tasks {
            inner.replicating_tasks.insert(task.task_key());
        }

        let availability: Vec<(ChannelId, bool)> = inner
            .channels
            .iter()
            .map(|(id, meta)| (id.clone(), helper.available_in_replication(meta.name())))
            .collect();
        for (id, available) in availability {
            let Some(meta) = inner.channels.get(&id) else {
                continue;
            };
            if meta.available_in_replication() != available {
                let updated = meta.with_availability(available);
                inner.channels.insert(id, updated);
            }
        }

        inner.replicate_config = Some(broadcast.configuration);
        inner.config_helper = Some(helper);
        if changed {
            inner.local_version += 1;
            drop(inner);
            self.notifier.notify_watchers();
        }
        Ok(())
    }

    /// Deliver assignment snapshots to `callback` until `signal` fires.
    ///
    /// The current snapshot is delivered on entry, then once per observed
    /// local-version bump; intermediate versions may be coalesced. Returns
    /// `Cancelled` when the signal fires, or the callback's error.
    pub async fn watch_assignment<F>(
        &self,
        signal: &ShutdownSignal,
        mut callback: F,
    ) -> PetrelResult<()>
    where
        F: FnMut(AssignmentSnapshot) -> PetrelResult<()> + Send,
    {
        let mut last_local: Option<u64> = None;
        loop {
            // Register before snapshotting: a bump landing in between still
            // wakes the select below.
            let changed = self.notifier.changed();
            let snapshot = self.latest_assignment().await;
            if last_local.map_or(true, |v| snapshot.version.local > v) {
                last_local = Some(snapshot.version.local);
                callback(snapshot)?;
            }
            tokio::select! {
                _ = changed => {}
                _ = signal.cancelled() => return Err(PetrelError::Cancelled),
            }
        }
    }
}
