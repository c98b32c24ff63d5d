//! Transactional KV abstraction under the streaming catalog.
//!
//! The production deployment backs this with the cluster's metadata service;
//! `MemoryMetaStore` ships for single-node deployments and tests, and
//! `FaultInjectedMetaStore` wraps any store to force failures on the write
//! path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use petrel_common::error::{CatalogError, PetrelResult};

/// A linearizable transactional KV store.
///
/// `multi_save` is atomic over its batch: after a failure, none of the keys
/// in the batch have been written.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn load(&self, key: &str) -> PetrelResult<Option<Vec<u8>>>;

    async fn load_prefix(&self, prefix: &str) -> PetrelResult<Vec<(String, Vec<u8>)>>;

    async fn multi_save(&self, kvs: Vec<(String, Vec<u8>)>) -> PetrelResult<()>;
}

/// In-memory `MetaStore`: a BTreeMap under a RwLock. Prefix scans come out
/// in key order, matching the range-scan semantics of the production store.
#[derive(Default)]
pub struct MemoryMetaStore {
    kv: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.kv.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kv.read().is_empty()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn load(&self, key: &str) -> PetrelResult<Option<Vec<u8>>> {
        Ok(self.kv.read().get(key).cloned())
    }

    async fn load_prefix(&self, prefix: &str) -> PetrelResult<Vec<(String, Vec<u8>)>> {
        let kv = self.kv.read();
        Ok(kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn multi_save(&self, kvs: Vec<(String, Vec<u8>)>) -> PetrelResult<()> {
        let mut kv = self.kv.write();
        for (k, v) in kvs {
            kv.insert(k, v);
        }
        Ok(())
    }
}

/// Failure-injection wrapper around any `MetaStore`.
///
/// Reads pass through; writes fail while `fail_saves` is armed. Used by
/// tests that exercise the coordinator's rollback paths.
pub struct FaultInjectedMetaStore<S> {
    inner: Arc<S>,
    fail_saves: AtomicBool,
    rejected_saves: AtomicU64,
}

impl<S: MetaStore> FaultInjectedMetaStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            fail_saves: AtomicBool::new(false),
            rejected_saves: AtomicU64::new(0),
        }
    }

    /// Arm or disarm save failures.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of saves rejected since construction.
    pub fn rejected_saves(&self) -> u64 {
        self.rejected_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: MetaStore> MetaStore for FaultInjectedMetaStore<S> {
    async fn load(&self, key: &str) -> PetrelResult<Option<Vec<u8>>> {
        self.inner.load(key).await
    }

    async fn load_prefix(&self, prefix: &str) -> PetrelResult<Vec<(String, Vec<u8>)>> {
        self.inner.load_prefix(prefix).await
    }

    async fn multi_save(&self, kvs: Vec<(String, Vec<u8>)>) -> PetrelResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            self.rejected_saves.fetch_add(1, Ordering::SeqCst);
            return Err(CatalogError::Store("injected save failure".into()).into());
        }
        self.inner.multi_save(kvs).await
    }
}
