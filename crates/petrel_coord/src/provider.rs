//! Dynamic pchannel discovery.
//!
//! A `ChannelProvider` yields the initial pchannel set at recovery plus a
//! stream of later-added names; the `ProviderRunner` drains that stream into
//! `ChannelManager::add_pchannels` in the background. Any backing source
//! works (config watcher, metadata watch, operator); the coordinator only
//! sees the trait.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use petrel_common::config::CoordConfig;
use petrel_common::shutdown::ShutdownSignal;

use crate::manager::ChannelManager;

/// Source of pchannel names.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// The names known at startup. Called once during recovery.
    fn initial_channels(&self) -> Vec<String>;

    /// The next batch of newly discovered names; each batch contains only
    /// names never reported before. `None` once the provider is closed.
    async fn next_incoming(&self) -> Option<Vec<String>>;

    /// Stop the provider. Idempotent; unblocks pending senders and any
    /// consumer waiting in `next_incoming`.
    fn close(&self);
}

/// `ChannelProvider` fed by the coordinator configuration's WAL topic
/// layout. `observe_topics` is invoked by the config watcher whenever the
/// topic set may have changed; only never-seen names are forwarded.
pub struct ConfigChannelProvider {
    initial: Vec<String>,
    known: Mutex<HashSet<String>>,
    tx: mpsc::Sender<Vec<String>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<String>>>,
    shutdown: ShutdownSignal,
}

impl ConfigChannelProvider {
    pub fn new(config: &CoordConfig) -> Self {
        let initial = config.all_topics();
        let known: HashSet<String> = initial.iter().cloned().collect();
        let (tx, rx) = mpsc::channel(16);
        Self {
            initial,
            known: Mutex::new(known),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Report the current topic set. Unseen names are forwarded to the
    /// incoming stream; the send is abandoned if the provider closes first.
    pub async fn observe_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fresh: Vec<String> = {
            let mut known = self.known.lock();
            topics
                .into_iter()
                .map(Into::into)
                .filter(|name| known.insert(name.clone()))
                .collect()
        };
        if fresh.is_empty() {
            return;
        }
        fresh.sort();
        tracing::info!(new_channels = ?fresh, "provider discovered new pchannels");
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.tx.send(fresh) => {}
        }
    }
}

#[async_trait]
impl ChannelProvider for ConfigChannelProvider {
    fn initial_channels(&self) -> Vec<String> {
        self.initial.clone()
    }

    async fn next_incoming(&self) -> Option<Vec<String>> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            batch = rx.recv() => batch,
        }
    }

    fn close(&self) {
        self.shutdown.shutdown();
    }
}

const ADD_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Background loop feeding provider discoveries into the manager.
pub struct ProviderRunner {
    provider: Arc<dyn ChannelProvider>,
    manager: Arc<ChannelManager>,
}

impl ProviderRunner {
    pub fn new(provider: Arc<dyn ChannelProvider>, manager: Arc<ChannelManager>) -> Self {
        Self { provider, manager }
    }

    /// Spawn the loop as a tokio task; the handle stops and joins it.
    pub fn start(self) -> ProviderRunnerHandle {
        let shutdown = ShutdownSignal::new();
        let provider = self.provider.clone();
        let shutdown_clone = shutdown.clone();
        let join = tokio::spawn(async move {
            self.run_loop(shutdown_clone).await;
        });
        ProviderRunnerHandle {
            shutdown,
            provider,
            join: Some(join),
        }
    }

    async fn run_loop(self, shutdown: ShutdownSignal) {
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => return,
                batch = self.provider.next_incoming() => batch,
            };
            let Some(batch) = batch else {
                tracing::info!("channel provider closed, runner exiting");
                return;
            };
            // The catalog may be briefly unreachable; keep the batch until
            // it lands or the runner stops.
            loop {
                match self.manager.add_pchannels(&batch).await {
                    Ok(()) => break,
                    Err(error) => {
                        tracing::warn!(
                            %error,
                            count = batch.len(),
                            "failed to register incoming pchannels, retrying"
                        );
                        tokio::select! {
                            _ = shutdown.cancelled() => return,
                            _ = tokio::time::sleep(ADD_RETRY_BACKOFF) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Handle for a running `ProviderRunner`.
pub struct ProviderRunnerHandle {
    shutdown: ShutdownSignal,
    provider: Arc<dyn ChannelProvider>,
    join: Option<JoinHandle<()>>,
}

impl ProviderRunnerHandle {
    /// Stop the runner and the provider, then wait for the task to finish.
    pub async fn stop(mut self) {
        self.shutdown.shutdown();
        self.provider.close();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Whether the loop is still alive.
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}
