//! Edge-triggered assignment notification.
//!
//! Mutations bump the manager's local version under its write lock, then
//! wake every registered watcher. Watchers register a waiter *before*
//! snapshotting, so a bump between the snapshot and the wait still wakes
//! them; intermediate versions may be coalesced but a watcher never observes
//! a snapshot older than one it has already seen.

use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use petrel_common::types::{PChannelAssignment, ReplicateConfiguration, VersionPair};

/// What a watcher receives on each pickup: the assigned relations, the
/// replicate configuration, and the version pair that stamps them.
#[derive(Debug, Clone)]
pub struct AssignmentSnapshot {
    pub version: VersionPair,
    pub assignments: Vec<PChannelAssignment>,
    pub replicate_config: Option<ReplicateConfiguration>,
}

/// Wakes assignment watchers after each committed mutation.
#[derive(Default)]
pub(crate) struct AssignmentNotifier {
    notify: Notify,
}

impl AssignmentNotifier {
    /// Register interest in the next bump. Must be created before reading
    /// the snapshot it guards.
    pub(crate) fn changed(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Wake all registered watchers. Called after the write lock is
    /// released.
    pub(crate) fn notify_watchers(&self) {
        self.notify.notify_waiters();
    }
}
