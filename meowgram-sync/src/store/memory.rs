//! In-process document store with broadcast change fan-out.
//!
//! ```text
//!   write ──► collections (RwLock) ──► ChangeNotice ──► broadcast::Sender
//!                                                         │
//!                      ┌──────────────────────────────────┼─────────┐
//!                      ▼                                  ▼         ▼
//!               feeder task (query A)            feeder task (B)   ...
//!                      │ recompute full result set
//!                      ▼
//!               mpsc ──► Subscription
//! ```
//!
//! Besides serving as the test double for [`DocumentStore`], it can hold
//! writes (to keep a mutation in flight), fail scripted writes, and push
//! delivery faults into subscriptions.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meowgram_core::{DocPath, Document, Fields};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, RwLock};

use super::{AtomicUpdate, DocumentStore, Query, Snapshot, Subscription};
use crate::error::StoreError;

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// Memory store configuration.
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Change notices buffered per feeder before it lags (and resyncs).
    pub change_capacity: usize,
    /// Snapshots buffered per subscription.
    pub subscription_buffer: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            change_capacity: 1024,
            subscription_buffer: 64,
        }
    }
}

impl MemoryStoreConfig {
    pub fn for_testing() -> Self {
        Self {
            change_capacity: 64,
            subscription_buffer: 16,
        }
    }
}

/// Operation counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub sets: u64,
    pub deletes: u64,
    pub updates: u64,
    pub creates: u64,
    pub failed_writes: u64,
    pub active_subscriptions: usize,
}

impl StoreStats {
    /// Successful writes of every kind.
    pub fn writes(&self) -> u64 {
        self.sets + self.deletes + self.updates + self.creates
    }
}

/// Lock-free counters, read through `stats()`.
#[derive(Default)]
struct AtomicStoreStats {
    reads: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    updates: AtomicU64,
    creates: AtomicU64,
    failed_writes: AtomicU64,
}

#[derive(Debug)]
enum ChangeNotice {
    Changed { collection: String },
    Fault { collection: String, reason: String },
}

#[derive(Default)]
struct FaultPlan {
    fail_all: Option<StoreError>,
    /// Keyed by write sequence number.
    fail_at: BTreeMap<u64, StoreError>,
}

/// Decrements the live subscription count when the feeder task ends.
struct FeederGuard(Arc<AtomicUsize>);

impl Drop for FeederGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct MemoryStore {
    collections: Arc<RwLock<Collections>>,
    changes: broadcast::Sender<Arc<ChangeNotice>>,
    config: MemoryStoreConfig,
    stats: AtomicStoreStats,
    /// `true` while writes are held.
    write_gate: watch::Sender<bool>,
    write_seq: AtomicU64,
    faults: Mutex<FaultPlan>,
    active_subscriptions: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new(config: MemoryStoreConfig) -> Self {
        let (changes, _) = broadcast::channel(config.change_capacity);
        let (write_gate, _) = watch::channel(false);
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            changes,
            config,
            stats: AtomicStoreStats::default(),
            write_gate,
            write_seq: AtomicU64::new(0),
            faults: Mutex::new(FaultPlan::default()),
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Insert a document directly, bypassing stats, faults and the gate.
    /// Subscribers are still notified.
    pub async fn seed(&self, path: &DocPath, fields: Fields) {
        {
            let mut collections = self.collections.write().await;
            collections
                .entry(path.collection().to_string())
                .or_default()
                .insert(path.id().to_string(), Document::new(path.id(), fields));
        }
        self.notify(path.collection());
    }

    /// Read a document without counting it.
    pub async fn peek(&self, path: &DocPath) -> Option<Document> {
        let collections = self.collections.read().await;
        collections
            .get(path.collection())
            .and_then(|docs| docs.get(path.id()))
            .cloned()
    }

    /// All documents of a collection, in id order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Hold every subsequent write until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.write_gate.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.write_gate.send_replace(false);
    }

    /// Fail every write with `error` until cleared with `None`.
    pub fn fail_all_writes(&self, error: Option<StoreError>) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_all = error;
        }
    }

    /// Fail the `n`-th write attempted from now on (1-based).
    pub fn fail_nth_write(&self, n: u64, error: StoreError) {
        let seq = self.write_seq.load(Ordering::SeqCst) + n;
        if let Ok(mut faults) = self.faults.lock() {
            faults.fail_at.insert(seq, error);
        }
    }

    /// Deliver a stream error to every subscription on `collection`.
    pub fn inject_subscription_error(&self, collection: &str, reason: impl Into<String>) {
        let _ = self.changes.send(Arc::new(ChangeNotice::Fault {
            collection: collection.to_string(),
            reason: reason.into(),
        }));
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.stats.reads.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            updates: self.stats.updates.load(Ordering::Relaxed),
            creates: self.stats.creates.load(Ordering::Relaxed),
            failed_writes: self.stats.failed_writes.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &MemoryStoreConfig {
        &self.config
    }

    fn notify(&self, collection: &str) {
        // No receivers is fine: nobody is subscribed yet.
        let _ = self.changes.send(Arc::new(ChangeNotice::Changed {
            collection: collection.to_string(),
        }));
    }

    /// Wait out the write gate, then consume one write sequence number and
    /// check it against the fault plan.
    async fn begin_write(&self) -> Result<(), StoreError> {
        let mut gate = self.write_gate.subscribe();
        loop {
            let paused = *gate.borrow_and_update();
            if !paused {
                break;
            }
            if gate.changed().await.is_err() {
                break;
            }
        }

        let seq = self.write_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let injected = match self.faults.lock() {
            Ok(mut faults) => match faults.fail_at.remove(&seq) {
                Some(e) => Some(e),
                None => faults.fail_all.clone(),
            },
            Err(_) => None,
        };
        match injected {
            Some(e) => {
                self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
                log::debug!("Injected failure on write #{seq}: {e}");
                Err(e)
            }
            None => Ok(()),
        }
    }

    async fn result_set(collections: &RwLock<Collections>, query: &Query) -> Vec<Document> {
        let collections = collections.read().await;
        match collections.get(&query.collection) {
            Some(docs) => query.run(docs.values()),
            None => Vec::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Document, StoreError> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.peek(path)
            .await
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> Result<(), StoreError> {
        self.begin_write().await?;
        {
            let mut collections = self.collections.write().await;
            collections
                .entry(path.collection().to_string())
                .or_default()
                .insert(path.id().to_string(), Document::new(path.id(), fields));
        }
        self.stats.sets.fetch_add(1, Ordering::Relaxed);
        self.notify(path.collection());
        Ok(())
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.begin_write().await?;
        let removed = {
            let mut collections = self.collections.write().await;
            collections
                .get_mut(path.collection())
                .and_then(|docs| docs.remove(path.id()))
                .is_some()
        };
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        if removed {
            self.notify(path.collection());
        }
        Ok(())
    }

    async fn atomic_update(&self, path: &DocPath, update: &AtomicUpdate) -> Result<(), StoreError> {
        self.begin_write().await?;
        let applied = {
            let mut collections = self.collections.write().await;
            match collections
                .get_mut(path.collection())
                .and_then(|docs| docs.get_mut(path.id()))
            {
                Some(doc) => {
                    update.apply(&mut doc.fields);
                    true
                }
                None => false,
            }
        };
        if !applied {
            self.stats.failed_writes.fetch_add(1, Ordering::Relaxed);
            return Err(StoreError::NotFound(path.to_string()));
        }
        self.stats.updates.fetch_add(1, Ordering::Relaxed);
        self.notify(path.collection());
        Ok(())
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        let path = DocPath::new(collection, meowgram_core::new_document_id())?;
        self.begin_write().await?;
        {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(path.id().to_string(), Document::new(path.id(), fields));
        }
        self.stats.creates.fetch_add(1, Ordering::Relaxed);
        self.notify(collection);
        Ok(path.id().to_string())
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(self.config.subscription_buffer);
        // Subscribe to changes before the first read so nothing slips
        // between the initial snapshot and the feed.
        let mut changes = self.changes.subscribe();
        let collections = self.collections.clone();
        let active = self.active_subscriptions.clone();
        active.fetch_add(1, Ordering::Relaxed);

        let feeder = tokio::spawn(async move {
            let _guard = FeederGuard(active);
            let mut sequence = 1u64;
            let docs = Self::result_set(&collections, &query).await;
            let first = Snapshot {
                collection: query.collection.clone(),
                sequence,
                docs,
            };
            if tx.send(Ok(first)).await.is_err() {
                return;
            }

            loop {
                let resync = match changes.recv().await {
                    Ok(notice) => match notice.as_ref() {
                        ChangeNotice::Changed { collection } => *collection == query.collection,
                        ChangeNotice::Fault { collection, reason } => {
                            if *collection == query.collection
                                && tx.send(Err(StoreError::Unavailable(reason.clone()))).await.is_err()
                            {
                                break;
                            }
                            false
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Subscription on {} lagged by {skipped} changes, resyncing", query.collection);
                        true
                    }
                    Err(RecvError::Closed) => break,
                };

                if resync {
                    sequence += 1;
                    let docs = Self::result_set(&collections, &query).await;
                    let snapshot = Snapshot {
                        collection: query.collection.clone(),
                        sequence,
                        docs,
                    };
                    if tx.send(Ok(snapshot)).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, Some(feeder.abort_handle())))
    }
}
