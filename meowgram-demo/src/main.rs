//! Meowgram demo: walks the optimistic like and follow flows against an
//! in-memory store and logs what a screen would render at each step.
//!
//! Run with `RUST_LOG=info` (or `debug` for store-level detail).

use log::{info, warn};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::mpsc;

use meowgram_core::{DocPath, Document, EntityId, Post, UserId, UserProfile};
use meowgram_sync::{
    ControllerEvent, Follow, MemoryStore, PostLike, Query, Session, StoreError, SyncConfig,
    ToggleController, ToggleTarget, ViewCache,
};

type DemoResult = Result<(), Box<dyn Error>>;

fn log_events(label: &str, events: &mut mpsc::Receiver<ControllerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            ControllerEvent::ViewChanged { entity_id, view } => {
                info!("[{label}] {entity_id}: on={} count={}", view.on, view.count)
            }
            ControllerEvent::Error { entity_id, message } => warn!("[{label}] {entity_id}: {message}"),
            ControllerEvent::SubscriptionError { message } => warn!("[{label}] {message}"),
        }
    }
}

async fn seed_world(store: &MemoryStore) -> Result<(Post, UserProfile), Box<dyn Error>> {
    let mut post = Post::new(EntityId::new("p1")?, UserId::new("owner")?, "first loaf of the day");
    post.likes_count = 3;
    store
        .seed(&DocPath::new("posts", "p1")?, Document::fields_of(&post)?)
        .await;

    let u1 = UserProfile::new(UserId::new("u1")?, "mittens");
    let mut u2 = UserProfile::new(UserId::new("u2")?, "whiskers");
    u2.followers_count = 10;
    for profile in [&u1, &u2] {
        store
            .seed(&DocPath::new("users", profile.uid.as_str())?, Document::fields_of(profile)?)
            .await;
    }
    Ok((post, u2))
}

async fn like_scenarios(store: Arc<MemoryStore>, post: &Post, config: &SyncConfig) -> DemoResult {
    let session = Session::signed_in(UserId::new("u1")?);
    let mut likes = ToggleController::new(PostLike, store.clone(), session, config.clone());
    let mut events = likes.take_event_rx().ok_or("event receiver already taken")?;
    likes.watch(Query::collection("posts")).await?;
    tokio::task::yield_now().await;

    if let Some(path) = &config.cache_path {
        let restored = ViewCache::new(path).restore(&likes).await?;
        info!("Restored {restored} cached like views");
    }

    info!("-- Like a post --");
    let target = ToggleTarget::post(post);
    let outcome = likes.toggle(&target, false).await?;
    info!("Committed: {outcome:?}");
    log_events("like", &mut events);

    info!("-- Double tap while the write is held --");
    store.pause_writes();
    let likes = Arc::new(likes);
    let first = {
        let likes = likes.clone();
        let target = target.clone().with_count(4);
        tokio::spawn(async move { likes.toggle(&target, true).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = likes.toggle(&target.clone().with_count(3), false).await?;
    info!("Second tap: {second:?}");
    store.resume_writes();
    info!("First tap: {:?}", first.await??);
    log_events("double-tap", &mut events);

    info!("-- Like while offline --");
    store.fail_all_writes(Some(StoreError::Unavailable("offline".into())));
    if let Err(e) = likes.toggle(&target, false).await {
        info!("Toggle failed as expected: {e}");
    }
    store.fail_all_writes(None);
    log_events("offline", &mut events);

    if let Some(path) = &config.cache_path {
        let saved = ViewCache::new(path).persist(&*likes).await?;
        info!("Cached {saved} like views at {}", path.display());
    }
    likes.unmount().await;
    Ok(())
}

async fn follow_scenario(store: Arc<MemoryStore>, u2: &UserProfile, config: &SyncConfig) -> DemoResult {
    let session = Session::signed_in(UserId::new("u1")?);
    let mut follows = ToggleController::new(Follow, store.clone(), session, config.clone());
    let mut events = follows.take_event_rx().ok_or("event receiver already taken")?;

    info!("-- Follow and unfollow --");
    let target = ToggleTarget::user(u2);
    info!("Follow: {:?}", follows.toggle(&target, false).await?);
    info!("Unfollow: {:?}", follows.toggle(&target.clone().with_count(11), true).await?);

    info!("-- Follow with a failing counter write --");
    store.fail_nth_write(3, StoreError::Unavailable("timeout".into()));
    if let Err(e) = follows.toggle(&target, false).await {
        info!("Follow failed and was compensated: {e}");
    }
    let following = store.documents("users/u1/following").await.len();
    let followers = store.documents("users/u2/followers").await.len();
    info!("Relationship records left behind: following={following} followers={followers}");
    log_events("follow", &mut events);
    Ok(())
}

#[tokio::main]
async fn main() -> DemoResult {
    env_logger::init();

    info!("Starting Meowgram demo...");
    let config = SyncConfig::from_env();
    let store = Arc::new(MemoryStore::default());
    let (post, u2) = seed_world(&store).await?;

    like_scenarios(store.clone(), &post, &config).await?;
    follow_scenario(store.clone(), &u2, &config).await?;

    let stats = store.stats();
    info!(
        "Store totals: {} writes ({} failed), {} notifications",
        stats.writes(),
        stats.failed_writes,
        store.documents("notifications").await.len()
    );
    Ok(())
}
