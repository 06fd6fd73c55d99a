//! Optimistic toggle controller.
//!
//! One controller per action type per UI surface. It owns the overlays
//! for every `(entity, actor)` pair it has seen and reconciles them
//! against store snapshots.
//!
//! ```text
//!  tap ──► toggle() ──► overlay.begin() ──► ViewChanged (optimistic)
//!                           │
//!                           ▼
//!                    plan::execute(store) ──ok──► overlay.succeed() ──► notification
//!                           │
//!                           └──err──► overlay.fail() ──► Error event
//!
//!  Subscription ──► apply_snapshot() ──► Settled: replace / InFlight: buffer
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meowgram_core::{EntityId, UserId};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::actions::{ToggleAction, ToggleTarget};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::notifications;
use crate::overlay::{EntityView, OverlayState, SnapshotEffect, ViewPatch};
use crate::plan;
use crate::session::Session;
use crate::store::{DocumentStore, Query, Snapshot};

/// Events for the rendering layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    /// Re-render this entity with `view`.
    ViewChanged { entity_id: EntityId, view: EntityView },
    /// A user-initiated action failed; show a dismissible message.
    Error { entity_id: EntityId, message: String },
    /// Live updates failed; last known state stays on screen.
    SubscriptionError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Remote write acknowledged; carries the settled view.
    Committed(EntityView),
    /// A toggle for the same entity and actor was still in flight.
    Ignored,
}

type OverlayKey = (EntityId, UserId);

struct Inner<A: ToggleAction> {
    action: A,
    store: Arc<dyn DocumentStore>,
    session: Session,
    config: SyncConfig,
    overlays: Mutex<HashMap<OverlayKey, OverlayState>>,
    events: mpsc::Sender<ControllerEvent>,
    mounted: AtomicBool,
    watchers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<A: ToggleAction> Inner<A> {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    fn emit(&self, event: ControllerEvent) {
        if !self.is_mounted() {
            return;
        }
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.events.try_send(event) {
            log::warn!("[{}] Event queue full, dropping {dropped:?}", self.action.name());
        }
    }

    /// Events are emitted while the overlay lock is held so their order
    /// matches the order of state changes.
    async fn apply_patch(&self, entity_id: EntityId, actor: UserId, patch: ViewPatch) {
        let mut overlays = self.overlays.lock().await;
        let key = (entity_id.clone(), actor);
        let fresh = !overlays.contains_key(&key);
        let state = overlays
            .entry(key)
            .or_insert_with(|| OverlayState::Settled(EntityView::default()));
        let before = state.visible();
        if let SnapshotEffect::Applied(view) = state.observe(patch) {
            if fresh || view != before {
                self.emit(ControllerEvent::ViewChanged { entity_id, view });
            }
        }
    }

    async fn apply_snapshot(&self, snapshot: &Snapshot) -> usize {
        if !self.is_mounted() {
            return 0;
        }
        let Some(actor) = self.session.current_user() else {
            return 0;
        };
        let tracked: Vec<EntityId> = {
            let overlays = self.overlays.lock().await;
            overlays
                .keys()
                .filter(|(_, a)| *a == actor)
                .map(|(e, _)| e.clone())
                .collect()
        };
        let patches = self.action.read_snapshot(snapshot, &actor, &tracked);
        let applied = patches.len();
        for (entity_id, patch) in patches {
            self.apply_patch(entity_id, actor.clone(), patch).await;
        }
        applied
    }

    /// Settle the overlay after the remote write resolved. `None` when the
    /// controller was unmounted meanwhile.
    async fn settle(&self, key: &OverlayKey, succeeded: bool) -> Option<EntityView> {
        let mut overlays = self.overlays.lock().await;
        if !self.is_mounted() {
            overlays.remove(key);
            return None;
        }
        let state = overlays.get_mut(key)?;
        let view = if succeeded { state.succeed() } else { state.fail() };
        self.emit(ControllerEvent::ViewChanged {
            entity_id: key.0.clone(),
            view,
        });
        Some(view)
    }

    /// Fire-and-forget: the write runs on its own task, failures are logged
    /// and never undo the toggle.
    fn send_notification(&self, target: &ToggleTarget, actor: &UserId) {
        if !self.config.notifications_enabled {
            return;
        }
        let Some(notification) = self.action.notification(target, actor) else {
            return;
        };
        let store = self.store.clone();
        let name = self.action.name();
        tokio::spawn(async move {
            let owner = &notification.user_id;
            match notifications::deliver(store.as_ref(), &notification).await {
                Ok(id) => log::debug!("[{name}] Notification {id} sent to {owner}"),
                Err(e) => log::warn!("[{name}] Notification for {owner} failed: {e}"),
            }
        });
    }
}

/// Reusable optimistic toggle for one [`ToggleAction`].
pub struct ToggleController<A: ToggleAction> {
    inner: Arc<Inner<A>>,
    event_rx: Option<mpsc::Receiver<ControllerEvent>>,
}

impl<A: ToggleAction> ToggleController<A> {
    pub fn new(action: A, store: Arc<dyn DocumentStore>, session: Session, config: SyncConfig) -> Self {
        let (events, event_rx) = mpsc::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                action,
                store,
                session,
                config,
                overlays: Mutex::new(HashMap::new()),
                events,
                mounted: AtomicBool::new(true),
                watchers: std::sync::Mutex::new(Vec::new()),
            }),
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ControllerEvent>> {
        self.event_rx.take()
    }

    pub fn action(&self) -> &A {
        &self.inner.action
    }

    /// Flip the signed-in user's state on `target`.
    ///
    /// The optimistic view is published before the store is touched. A
    /// second call for the same entity while the first is in flight is
    /// ignored. On failure the view reverts and the error is returned;
    /// `NotFound` reverts without a user-facing message.
    pub async fn toggle(&self, target: &ToggleTarget, current_on: bool) -> Result<ToggleOutcome, SyncError> {
        let inner = &self.inner;
        let actor = inner.session.require_user()?;
        inner.action.validate(target, &actor)?;
        let turn_on = !current_on;
        let plan = inner.action.plan(target, &actor, turn_on)?;
        let key: OverlayKey = (target.entity_id.clone(), actor.clone());

        let optimistic = {
            let mut overlays = inner.overlays.lock().await;
            let state = overlays
                .entry(key.clone())
                .or_insert_with(|| OverlayState::Settled(EntityView::new(current_on, target.known_count)));
            match state.begin(current_on) {
                Some((_, target_view)) => {
                    inner.emit(ControllerEvent::ViewChanged {
                        entity_id: target.entity_id.clone(),
                        view: target_view,
                    });
                    target_view
                }
                None => {
                    log::debug!(
                        "[{}] Ignoring toggle on {}: previous toggle still in flight",
                        inner.action.name(),
                        target.entity_id
                    );
                    return Ok(ToggleOutcome::Ignored);
                }
            }
        };

        match plan::execute(inner.store.as_ref(), &plan).await {
            Ok(report) => {
                log::debug!(
                    "[{}] {} -> {} by {actor} ({} writes)",
                    inner.action.name(),
                    target.entity_id,
                    if turn_on { "on" } else { "off" },
                    report.applied
                );
                let settled = inner.settle(&key, true).await;
                if turn_on && target.owner_id != actor {
                    inner.send_notification(target, &actor);
                }
                Ok(ToggleOutcome::Committed(settled.unwrap_or(optimistic)))
            }
            Err(failure) => {
                let error = SyncError::from(failure.error);
                log::warn!(
                    "[{}] Toggle on {} failed, reverting: {error}",
                    inner.action.name(),
                    target.entity_id
                );
                inner.settle(&key, false).await;
                if let Some(message) = error.user_message() {
                    inner.emit(ControllerEvent::Error {
                        entity_id: target.entity_id.clone(),
                        message,
                    });
                }
                Err(error)
            }
        }
    }

    /// Feed one snapshot. Returns the number of entity patches read from it.
    pub async fn apply_snapshot(&self, snapshot: &Snapshot) -> usize {
        self.inner.apply_snapshot(snapshot).await
    }

    /// Subscribe to `query` and feed every snapshot until unmount.
    pub async fn watch(&self, query: Query) -> Result<(), SyncError> {
        let mut subscription = self
            .inner
            .store
            .subscribe(query)
            .await
            .map_err(|e| SyncError::SubscriptionError(e.to_string()))?;

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = subscription.next_snapshot().await {
                if !inner.is_mounted() {
                    break;
                }
                match item {
                    Ok(snapshot) => {
                        inner.apply_snapshot(&snapshot).await;
                    }
                    Err(e) => {
                        let error = SyncError::SubscriptionError(e.to_string());
                        log::warn!("[{}] {error}", inner.action.name());
                        if let Some(message) = error.user_message() {
                            inner.emit(ControllerEvent::SubscriptionError { message });
                        }
                    }
                }
            }
        });

        if let Ok(mut watchers) = self.inner.watchers.lock() {
            watchers.push(task);
        }
        Ok(())
    }

    /// Seed a settled view, e.g. from the view cache. Entities that already
    /// have state are left alone.
    pub async fn seed(&self, entity_id: EntityId, actor: UserId, view: EntityView) {
        let mut overlays = self.inner.overlays.lock().await;
        overlays
            .entry((entity_id, actor))
            .or_insert(OverlayState::Settled(view));
    }

    /// Current visible view for the signed-in user.
    pub async fn view(&self, entity_id: &EntityId) -> Option<EntityView> {
        let actor = self.inner.session.current_user()?;
        let overlays = self.inner.overlays.lock().await;
        overlays
            .get(&(entity_id.clone(), actor))
            .map(OverlayState::visible)
    }

    pub async fn is_in_flight(&self, entity_id: &EntityId) -> bool {
        let Some(actor) = self.inner.session.current_user() else {
            return false;
        };
        let overlays = self.inner.overlays.lock().await;
        overlays
            .get(&(entity_id.clone(), actor))
            .is_some_and(OverlayState::is_in_flight)
    }

    /// Every settled view, for persisting.
    pub async fn settled_views(&self) -> Vec<(EntityId, UserId, EntityView)> {
        let overlays = self.inner.overlays.lock().await;
        overlays
            .iter()
            .filter_map(|((entity, actor), state)| match state {
                OverlayState::Settled(view) => Some((entity.clone(), actor.clone(), *view)),
                OverlayState::InFlight { .. } => None,
            })
            .collect()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    /// Tear down: stop subscriptions and make in-flight continuations
    /// leave view state alone.
    pub async fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::Release);
        self.abort_watchers();
        self.inner.overlays.lock().await.retain(|_, state| state.is_in_flight());
    }

    fn abort_watchers(&self) {
        if let Ok(mut watchers) = self.inner.watchers.lock() {
            for task in watchers.drain(..) {
                task.abort();
            }
        }
    }
}

impl<A: ToggleAction> Drop for ToggleController<A> {
    fn drop(&mut self) {
        self.abort_watchers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{CommentLike, PostLike};
    use crate::error::StoreError;
    use crate::store::scripted::ScriptedStore;
    use crate::store::MemoryStore;
    use meowgram_core::{DocPath, Document, Fields};
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn eid(s: &str) -> EntityId {
        EntityId::new(s).unwrap()
    }

    fn post_fields(likes: i64) -> Fields {
        let mut fields = Fields::new();
        fields.insert("userId".into(), json!("owner"));
        fields.insert("likesCount".into(), json!(likes));
        fields.insert("likedByUsers".into(), json!([]));
        fields
    }

    async fn store_with_post(likes: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        store.seed(&DocPath::new("posts", "p1").unwrap(), post_fields(likes)).await;
        store
    }

    /// Notifications are written on their own task; poll until `n` landed.
    async fn wait_for_notifications(store: &MemoryStore, n: usize) -> Vec<Document> {
        let landed = timeout(Duration::from_secs(2), async {
            loop {
                let notes = store.documents("notifications").await;
                if notes.len() >= n {
                    return notes;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        landed.expect("notification never written")
    }

    fn controller(store: Arc<MemoryStore>, user: Option<&str>) -> ToggleController<PostLike> {
        let session = match user {
            Some(u) => Session::signed_in(uid(u)),
            None => Session::new(),
        };
        ToggleController::new(PostLike, store, session, SyncConfig::for_testing())
    }

    fn target(count: i64) -> ToggleTarget {
        ToggleTarget::new(eid("p1"), uid("owner")).with_count(count)
    }

    #[tokio::test]
    async fn test_unauthenticated_makes_no_change() {
        let store = store_with_post(3).await;
        let ctl = controller(store.clone(), None);
        assert_eq!(ctl.toggle(&target(3), false).await, Err(SyncError::Unauthenticated));
        assert_eq!(store.stats().updates, 0);
    }

    #[tokio::test]
    async fn test_optimistic_event_precedes_settle() {
        let store = store_with_post(3).await;
        let mut ctl = controller(store.clone(), Some("u1"));
        let mut events = ctl.take_event_rx().unwrap();

        let outcome = ctl.toggle(&target(3), false).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::Committed(EntityView::new(true, 4)));

        let first = events.recv().await.unwrap();
        assert_eq!(
            first,
            ControllerEvent::ViewChanged {
                entity_id: eid("p1"),
                view: EntityView::new(true, 4),
            }
        );
    }

    #[tokio::test]
    async fn test_in_flight_guard_ignores_second_toggle() {
        let store = store_with_post(3).await;
        let ctl = Arc::new(controller(store.clone(), Some("u1")));
        store.pause_writes();

        let first = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.toggle(&target(3), false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ctl.is_in_flight(&eid("p1")).await);

        let second = ctl.toggle(&target(4), true).await.unwrap();
        assert_eq!(second, ToggleOutcome::Ignored);

        store.resume_writes();
        first.await.unwrap().unwrap();
        assert_eq!(store.stats().updates, 1);
        assert_eq!(ctl.view(&eid("p1")).await, Some(EntityView::new(true, 4)));
    }

    #[tokio::test]
    async fn test_failure_reverts_and_reports() {
        let store = store_with_post(3).await;
        let mut ctl = controller(store.clone(), Some("u1"));
        let mut events = ctl.take_event_rx().unwrap();
        store.fail_all_writes(Some(StoreError::Unavailable("offline".into())));

        let result = ctl.toggle(&target(3), false).await;
        assert!(matches!(result, Err(SyncError::RemoteWriteFailed(_))));
        assert_eq!(ctl.view(&eid("p1")).await, Some(EntityView::new(false, 3)));

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ControllerEvent::Error { .. }) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_missing_entity_reverts_silently() {
        let store = Arc::new(MemoryStore::default());
        let mut ctl = controller(store.clone(), Some("u1"));
        let mut events = ctl.take_event_rx().unwrap();

        let result = ctl.toggle(&target(3), false).await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
        assert_eq!(ctl.view(&eid("p1")).await, Some(EntityView::new(false, 3)));

        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, ControllerEvent::Error { .. }));
        }
    }

    #[tokio::test]
    async fn test_own_post_like_sends_no_notification() {
        let store = store_with_post(0).await;
        let ctl = controller(store.clone(), Some("owner"));
        ctl.toggle(&target(0), false).await.unwrap();
        assert_eq!(store.stats().creates, 0);
    }

    #[tokio::test]
    async fn test_unmount_during_flight_leaves_view_alone() {
        let store = store_with_post(3).await;
        let mut ctl = controller(store.clone(), Some("u1"));
        let mut events = ctl.take_event_rx().unwrap();
        let ctl = Arc::new(ctl);
        store.pause_writes();

        let pending = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.toggle(&target(3), false).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _optimistic = events.recv().await.unwrap();

        ctl.unmount().await;
        store.resume_writes();
        let outcome = pending.await.unwrap().unwrap();
        assert_eq!(outcome, ToggleOutcome::Committed(EntityView::new(true, 4)));

        // The write landed but nothing is rendered after teardown.
        assert_eq!(store.stats().updates, 1);
        assert!(timeout(Duration::from_millis(50), events.recv()).await.map_or(true, |e| e.is_none()));
        assert_eq!(ctl.view(&eid("p1")).await, None);
    }

    #[tokio::test]
    async fn test_watch_seeds_from_snapshot() {
        let store = store_with_post(7).await;
        let mut ctl = controller(store.clone(), Some("u1"));
        let mut events = ctl.take_event_rx().unwrap();

        ctl.watch(Query::collection("posts")).await.unwrap();
        let event = timeout(Duration::from_secs(1), events.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            ControllerEvent::ViewChanged {
                entity_id: eid("p1"),
                view: EntityView::new(false, 7),
            }
        );
    }

    #[tokio::test]
    async fn test_comment_like_controller() {
        let store = Arc::new(MemoryStore::default());
        let mut fields = Fields::new();
        fields.insert("authorId".into(), json!("author"));
        fields.insert("likes".into(), json!(["u9"]));
        store.seed(&DocPath::new("comments", "c1").unwrap(), fields).await;

        let ctl = ToggleController::new(
            CommentLike,
            store.clone(),
            Session::signed_in(uid("u1")),
            SyncConfig::for_testing(),
        );
        let target = ToggleTarget::new(eid("c1"), uid("author")).with_count(1);
        let outcome = ctl.toggle(&target, false).await.unwrap();
        assert_eq!(outcome, ToggleOutcome::Committed(EntityView::new(true, 2)));

        let doc = store.peek(&DocPath::new("comments", "c1").unwrap()).await.unwrap();
        assert!(doc.array_contains("likes", "u1"));
        assert_eq!(wait_for_notifications(&store, 1).await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_last_event_matches_state_under_concurrent_snapshots() {
        let store = store_with_post(0).await;
        let mut ctl = controller(store, Some("u1"));
        let mut events = ctl.take_event_rx().unwrap();
        let ctl = Arc::new(ctl);

        for round in 0..20 {
            let tasks: Vec<_> = (1..=16i64)
                .map(|n| {
                    let ctl = ctl.clone();
                    let likes = round * 100 + n;
                    tokio::spawn(async move {
                        let snapshot = Snapshot {
                            collection: "posts".to_string(),
                            sequence: n as u64,
                            docs: vec![Document::new("p1", post_fields(likes))],
                        };
                        ctl.apply_snapshot(&snapshot).await
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            let mut last = None;
            while let Ok(event) = events.try_recv() {
                if let ControllerEvent::ViewChanged { view, .. } = event {
                    last = Some(view);
                }
            }
            if last.is_some() {
                assert_eq!(last, ctl.view(&eid("p1")).await, "round {round}");
            }
        }
    }

    #[tokio::test]
    async fn test_stalled_notification_does_not_hold_toggle() {
        let store = Arc::new(ScriptedStore::stalled_creates());
        store.inner.seed(&DocPath::new("posts", "p1").unwrap(), post_fields(3)).await;
        let ctl = ToggleController::new(PostLike, store.clone(), Session::signed_in(uid("u1")), SyncConfig::for_testing());

        let outcome = timeout(Duration::from_secs(2), ctl.toggle(&target(3), false)).await;
        assert_eq!(
            outcome.expect("toggle waited on the notification write"),
            Ok(ToggleOutcome::Committed(EntityView::new(true, 4)))
        );
        assert!(!ctl.is_in_flight(&eid("p1")).await);
        assert!(store.inner.documents("notifications").await.is_empty());
    }
}
