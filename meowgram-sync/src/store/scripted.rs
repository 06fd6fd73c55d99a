//! Store double for failure modes `MemoryStore` cannot produce: failing
//! reads and writes that never complete.

use async_trait::async_trait;
use meowgram_core::{DocPath, Document, Fields};
use std::sync::Mutex;

use super::{AtomicUpdate, DocumentStore, MemoryStore, Query, Subscription};
use crate::error::StoreError;

#[derive(Default)]
pub(crate) struct ScriptedStore {
    pub inner: MemoryStore,
    get_error: Mutex<Option<StoreError>>,
    stall_creates: bool,
}

impl ScriptedStore {
    /// Every `get` fails with `error` until cleared.
    pub fn failing_reads(error: StoreError) -> Self {
        Self {
            get_error: Mutex::new(Some(error)),
            ..Self::default()
        }
    }

    /// `create` never resolves.
    pub fn stalled_creates() -> Self {
        Self {
            stall_creates: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl DocumentStore for ScriptedStore {
    async fn get(&self, path: &DocPath) -> Result<Document, StoreError> {
        let scripted = self.get_error.lock().unwrap().clone();
        match scripted {
            Some(error) => Err(error),
            None => self.inner.get(path).await,
        }
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> Result<(), StoreError> {
        self.inner.set(path, fields).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.inner.delete(path).await
    }

    async fn atomic_update(&self, path: &DocPath, update: &AtomicUpdate) -> Result<(), StoreError> {
        self.inner.atomic_update(path, update).await
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        if self.stall_creates {
            std::future::pending::<()>().await;
        }
        self.inner.create(collection, fields).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.inner.subscribe(query).await
    }
}
