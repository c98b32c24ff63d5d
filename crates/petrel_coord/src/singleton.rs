//! Process-global exposure of the channel manager.
//!
//! The manager is registered once recovery succeeds; consumers that start
//! earlier (wire handlers, replication services) await registration instead
//! of polling. Re-recovery re-registers and replaces the value.

use std::sync::{Arc, OnceLock};

use petrel_common::sync::FutureCell;

use crate::manager::{ChannelManager, ClusterChannels, GetClusterChannelsOptions};

static SINGLETON: OnceLock<FutureCell<Arc<ChannelManager>>> = OnceLock::new();

fn cell() -> &'static FutureCell<Arc<ChannelManager>> {
    SINGLETON.get_or_init(FutureCell::new)
}

/// Called by `ChannelManager::recover`.
pub(crate) fn register(manager: Arc<ChannelManager>) {
    cell().set(manager);
}

/// The registered manager, if recovery has completed (non-blocking).
pub fn registered_manager() -> Option<Arc<ChannelManager>> {
    cell().try_get()
}

/// Wait for recovery, then return the manager.
pub async fn channel_manager() -> Arc<ChannelManager> {
    cell().get().await
}

/// Block until the manager is registered, then return the cluster channel
/// topology. By default only channels available in replication are listed;
/// use [`GetClusterChannelsOptions::include_unavailable_in_replication`] for
/// all of them.
pub async fn get_cluster_channels(options: GetClusterChannelsOptions) -> ClusterChannels {
    cell().get().await.cluster_channels(options).await
}
