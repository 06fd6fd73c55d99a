//! Activity feed for the signed-in user.
//!
//! Notifications are written by other users' actions (likes, follows,
//! comments) and read here through a live query, newest first.

use std::sync::Arc;

use meowgram_core::{collections, fields, DocPath, Document, Notification, UserId};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::session::Session;
use crate::store::{AtomicUpdate, Direction, DocumentStore, Query, Snapshot};

/// Write `notification` with a store-generated id.
pub(crate) async fn deliver(store: &dyn DocumentStore, notification: &Notification) -> Result<String, SyncError> {
    let fields = Document::fields_of(notification)?;
    Ok(store.create(collections::NOTIFICATIONS, fields).await?)
}

/// A notification together with its document id.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEntry {
    pub id: String,
    pub notification: Notification,
}

/// Notifications addressed to `user`, newest first.
pub fn feed_query(user: &UserId) -> Query {
    Query::collection(collections::NOTIFICATIONS)
        .where_eq(fields::USER_ID, user.as_str())
        .order_by(fields::CREATED_AT, Direction::Descending)
}

fn decode(snapshot: &Snapshot) -> Vec<NotificationEntry> {
    snapshot
        .docs
        .iter()
        .filter_map(|doc| match doc.to_model::<Notification>() {
            Ok(notification) => Some(NotificationEntry {
                id: doc.id.clone(),
                notification,
            }),
            Err(e) => {
                log::warn!("Skipping malformed notification {}: {e}", doc.id);
                None
            }
        })
        .collect()
}

pub struct NotificationCenter {
    store: Arc<dyn DocumentStore>,
    session: Session,
    entries: Arc<Mutex<Vec<NotificationEntry>>>,
    unread_tx: watch::Sender<usize>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NotificationCenter {
    pub fn new(store: Arc<dyn DocumentStore>, session: Session) -> Self {
        let (unread_tx, _) = watch::channel(0);
        Self {
            store,
            session,
            entries: Arc::new(Mutex::new(Vec::new())),
            unread_tx,
            watcher: std::sync::Mutex::new(None),
        }
    }

    /// Start following the signed-in user's feed. A previous watch is
    /// replaced.
    pub async fn watch(&self) -> Result<(), SyncError> {
        let user = self.session.require_user()?;
        let mut subscription = self
            .store
            .subscribe(feed_query(&user))
            .await
            .map_err(|e| SyncError::SubscriptionError(e.to_string()))?;

        let entries = self.entries.clone();
        let unread_tx = self.unread_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = subscription.next_snapshot().await {
                match item {
                    Ok(snapshot) => {
                        let decoded = decode(&snapshot);
                        let unread = decoded.iter().filter(|e| !e.notification.read).count();
                        *entries.lock().await = decoded;
                        unread_tx.send_replace(unread);
                    }
                    // Last known feed stays visible.
                    Err(e) => log::warn!("Notification feed for {user}: {e}"),
                }
            }
        });

        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(previous) = watcher.replace(task) {
                previous.abort();
            }
        }
        Ok(())
    }

    pub async fn entries(&self) -> Vec<NotificationEntry> {
        self.entries.lock().await.clone()
    }

    pub fn unread_count(&self) -> usize {
        *self.unread_tx.borrow()
    }

    /// Receiver that observes every change of the unread count.
    pub fn subscribe_unread(&self) -> watch::Receiver<usize> {
        self.unread_tx.subscribe()
    }

    /// Flag one notification as read. Failures are logged and returned;
    /// the feed is left as it was.
    pub async fn mark_as_read(&self, id: &str) -> Result<(), SyncError> {
        let path = DocPath::new(collections::NOTIFICATIONS, id)?;
        let update = AtomicUpdate::new().set(fields::READ, true);
        self.store.atomic_update(&path, &update).await.map_err(|e| {
            log::warn!("Could not mark notification {id} as read: {e}");
            SyncError::from(e)
        })
    }

    /// Mark every unread entry as read. Returns how many were updated.
    pub async fn mark_all_as_read(&self) -> usize {
        let unread: Vec<String> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|e| !e.notification.read)
            .map(|e| e.id.clone())
            .collect();
        let mut marked = 0;
        for id in unread {
            if self.mark_as_read(&id).await.is_ok() {
                marked += 1;
            }
        }
        marked
    }

    pub fn stop(&self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(task) = watcher.take() {
                task.abort();
            }
        }
    }
}

impl Drop for NotificationCenter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use meowgram_core::NotificationKind;
    use tokio::time::{timeout, Duration};

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    async fn push(store: &MemoryStore, to: &str, minutes_ago: i64, read: bool) -> String {
        let mut n = Notification::new(NotificationKind::Follow, uid(to), uid("someone"));
        n.created_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
        n.read = read;
        deliver(store, &n).await.unwrap()
    }

    #[tokio::test]
    async fn test_feed_is_filtered_and_newest_first() {
        let store = Arc::new(MemoryStore::default());
        let old = push(&store, "u1", 30, true).await;
        let new = push(&store, "u1", 1, false).await;
        push(&store, "u2", 5, false).await;

        let center = NotificationCenter::new(store.clone(), Session::signed_in(uid("u1")));
        let mut unread = center.subscribe_unread();
        center.watch().await.unwrap();
        timeout(Duration::from_secs(1), unread.changed()).await.unwrap().unwrap();

        let ids: Vec<String> = center.entries().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![new, old]);
        assert_eq!(center.unread_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_as_read_updates_unread_count() {
        let store = Arc::new(MemoryStore::default());
        let id = push(&store, "u1", 1, false).await;

        let center = NotificationCenter::new(store.clone(), Session::signed_in(uid("u1")));
        let mut unread = center.subscribe_unread();
        center.watch().await.unwrap();
        timeout(Duration::from_secs(1), unread.changed()).await.unwrap().unwrap();
        assert_eq!(*unread.borrow_and_update(), 1);

        center.mark_as_read(&id).await.unwrap();
        timeout(Duration::from_secs(1), unread.changed()).await.unwrap().unwrap();
        assert_eq!(*unread.borrow(), 0);

        let doc = store.peek(&DocPath::new("notifications", id.as_str()).unwrap()).await.unwrap();
        assert_eq!(doc.get_bool("read"), Some(true));
    }

    #[tokio::test]
    async fn test_mark_missing_notification_is_not_found() {
        let store = Arc::new(MemoryStore::default());
        let center = NotificationCenter::new(store, Session::signed_in(uid("u1")));
        assert!(matches!(center.mark_as_read("gone").await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_watch_requires_sign_in() {
        let center = NotificationCenter::new(Arc::new(MemoryStore::default()), Session::new());
        assert_eq!(center.watch().await, Err(SyncError::Unauthenticated));
    }
}
