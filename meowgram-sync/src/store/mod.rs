//! Remote document store contract.
//!
//! ```text
//! ┌──────────────────┐  get / set / delete   ┌─────────────────┐
//! │ ToggleController │ ────────────────────► │  DocumentStore  │
//! │ CommentService   │  atomic_update        │  (injected,     │
//! │ NotificationCtr  │  create               │   Arc<dyn ..>)  │
//! └────────▲─────────┘                       └────────┬────────┘
//!          │        Subscription (full snapshots)     │
//!          └──────────────────────────────────────────┘
//! ```
//!
//! The store is always passed in explicitly. [`MemoryStore`] is the
//! in-process implementation used by tests and the demo.

pub mod memory;
#[cfg(test)]
pub(crate) mod scripted;
pub mod update;

pub use memory::{MemoryStore, MemoryStoreConfig, StoreStats};
pub use update::AtomicUpdate;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meowgram_core::{DocPath, Document, Fields};
use serde_json::Value;
use std::cmp::Ordering;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StoreError;

/// Document database operations consumed by the sync layer.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch one document. `StoreError::NotFound` when absent.
    async fn get(&self, path: &DocPath) -> Result<Document, StoreError>;

    /// Create or overwrite a document.
    async fn set(&self, path: &DocPath, fields: Fields) -> Result<(), StoreError>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;

    /// Apply every part of `update` indivisibly. `StoreError::NotFound`
    /// when the document does not exist; nothing is applied on failure.
    async fn atomic_update(&self, path: &DocPath, update: &AtomicUpdate) -> Result<(), StoreError>;

    /// Create a document with a store-generated id and return the id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    /// Stream full result sets of `query`: one immediately, then one after
    /// every change to the queried collection.
    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;
}

/// Current result set of `query`: the first snapshot of a subscription
/// that is dropped right after.
pub async fn fetch_once(store: &dyn DocumentStore, query: Query) -> Result<Vec<Document>, StoreError> {
    let collection = query.collection.clone();
    let mut subscription = store.subscribe(query).await?;
    match subscription.next_snapshot().await {
        Some(Ok(snapshot)) => Ok(snapshot.docs),
        Some(Err(e)) => Err(e),
        None => Err(StoreError::Unavailable(format!("subscription on {collection} ended early"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A query over one collection: optional equality filter, ordering and
/// limit, or a single-document watch.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub doc_id: Option<String>,
    pub filter: Option<(String, Value)>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            doc_id: None,
            filter: None,
            order_by: None,
            limit: None,
        }
    }

    /// Watch exactly one document.
    pub fn document(path: &DocPath) -> Self {
        Self {
            doc_id: Some(path.id().to_string()),
            ..Self::collection(path.collection())
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(id) = &self.doc_id {
            if &doc.id != id {
                return false;
            }
        }
        match &self.filter {
            Some((field, value)) => doc.get(field) == Some(value),
            None => true,
        }
    }

    /// Filter, order and limit `docs` into a result set.
    pub fn run<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).cloned().collect();
        if let Some((field, direction)) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_values(a.get(field), b.get(field));
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }
        if let Some(n) = self.limit {
            out.truncate(n);
        }
        out
    }
}

/// Numbers numerically, RFC 3339 timestamps chronologically, other
/// strings lexically; missing values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// One delivery of a subscription: the complete current result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub collection: String,
    /// Per-subscription delivery counter, starting at 1.
    pub sequence: u64,
    pub docs: Vec<Document>,
}

impl Snapshot {
    pub fn find(&self, id: &str) -> Option<&Document> {
        self.docs.iter().find(|d| d.id == id)
    }
}

/// Live result-set stream. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Result<Snapshot, StoreError>>,
    feeder: Option<tokio::task::AbortHandle>,
}

impl Subscription {
    /// Wrap a receiver fed by a store-side task. `feeder` is aborted on
    /// unsubscribe.
    pub fn new(
        rx: mpsc::Receiver<Result<Snapshot, StoreError>>,
        feeder: Option<tokio::task::AbortHandle>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            rx,
            feeder,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next snapshot, or `None` once the stream ended.
    pub async fn next_snapshot(&mut self) -> Option<Result<Snapshot, StoreError>> {
        self.rx.recv().await
    }

    /// Stop deliveries. Equivalent to dropping the subscription.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl futures_util::Stream for Subscription {
    type Item = Result<Snapshot, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, v: Value) -> Document {
        match v {
            Value::Object(fields) => Document::new(id, fields),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_query_filter_order_limit() {
        let docs = vec![
            doc("n1", json!({ "userId": "u2", "createdAt": "2026-01-01T10:00:00Z" })),
            doc("n2", json!({ "userId": "u1", "createdAt": "2026-01-01T11:00:00Z" })),
            doc("n3", json!({ "userId": "u2", "createdAt": "2026-01-01T10:00:00.5Z" })),
            doc("n4", json!({ "userId": "u2", "createdAt": "2026-01-01T09:00:00Z" })),
        ];

        let q = Query::collection("notifications")
            .where_eq("userId", "u2")
            .order_by("createdAt", Direction::Descending)
            .limit(2);
        let ids: Vec<_> = q.run(&docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["n3", "n1"]);
    }

    #[test]
    fn test_document_query() {
        let path = DocPath::new("posts", "p1").unwrap();
        let q = Query::document(&path);
        assert_eq!(q.collection, "posts");
        assert!(q.matches(&doc("p1", json!({}))));
        assert!(!q.matches(&doc("p2", json!({}))));
    }

    #[test]
    fn test_numeric_ordering() {
        let docs = vec![
            doc("a", json!({ "n": 10 })),
            doc("b", json!({ "n": 2 })),
            doc("c", json!({})),
        ];
        let q = Query::collection("x").order_by("n", Direction::Ascending);
        let ids: Vec<_> = q.run(&docs).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_fetch_once_returns_current_result_set() {
        let store = MemoryStore::default();
        let mut fields = Fields::new();
        fields.insert("n".into(), json!(1));
        store.seed(&DocPath::parse("users/u1/followers/u2").unwrap(), fields.clone()).await;
        store.seed(&DocPath::parse("users/u1/followers/u3").unwrap(), fields).await;

        let docs = fetch_once(&store, Query::collection("users/u1/followers")).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(fetch_once(&store, Query::collection("users/u9/followers")).await.unwrap().is_empty());
    }
}
