//! Binary social actions driven by [`ToggleController`](crate::ToggleController).
//!
//! Each action knows, for one entity type, which writes turn it on or off,
//! how to read the actor's view back out of a snapshot, and what to tell
//! the owner when it is turned on.

use chrono::Utc;
use meowgram_core::{
    collections, fields, Comment, DocPath, Document, EntityId, FollowRecord, Notification,
    NotificationKind, Post, UserId, UserProfile,
};

use crate::error::SyncError;
use crate::overlay::{EntityView, ViewPatch};
use crate::plan::MutationPlan;
use crate::store::{self, AtomicUpdate, Direction, DocumentStore, Query, Snapshot};

/// The entity a toggle acts on, as known locally when the user taps.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleTarget {
    pub entity_id: EntityId,
    /// Receives the notification when the action is turned on.
    pub owner_id: UserId,
    /// Last known counter, used until a snapshot has been seen.
    pub known_count: i64,
    /// Post the entity belongs to (the post itself for post likes).
    pub post_id: Option<EntityId>,
    /// Caption or comment text quoted in the notification.
    pub excerpt: Option<String>,
}

impl ToggleTarget {
    pub fn new(entity_id: EntityId, owner_id: UserId) -> Self {
        Self {
            entity_id,
            owner_id,
            known_count: 0,
            post_id: None,
            excerpt: None,
        }
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.known_count = count;
        self
    }

    pub fn post(post: &Post) -> Self {
        Self {
            entity_id: post.id.clone(),
            owner_id: post.user_id.clone(),
            known_count: post.likes_count,
            post_id: Some(post.id.clone()),
            excerpt: Some(post.caption.clone()),
        }
    }

    pub fn comment(comment: &Comment) -> Self {
        Self {
            entity_id: comment.id.clone(),
            owner_id: comment.author_id.clone(),
            known_count: comment.like_count(),
            post_id: Some(comment.post_id.clone()),
            excerpt: Some(comment.text.clone()),
        }
    }

    /// Follow target: the profile's owner, counted by followers.
    pub fn user(profile: &UserProfile) -> Self {
        Self {
            entity_id: profile.uid.clone().into(),
            owner_id: profile.uid.clone(),
            known_count: profile.followers_count,
            post_id: None,
            excerpt: None,
        }
    }
}

/// Describes one kind of toggle.
pub trait ToggleAction: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Reject targets the action can never apply to, before any local change.
    fn validate(&self, _target: &ToggleTarget, _actor: &UserId) -> Result<(), SyncError> {
        Ok(())
    }

    /// Writes that move the actor to `turn_on`.
    fn plan(&self, target: &ToggleTarget, actor: &UserId, turn_on: bool) -> Result<MutationPlan, SyncError>;

    /// Notification for the owner when the action is turned on.
    fn notification(&self, target: &ToggleTarget, actor: &UserId) -> Option<Notification>;

    /// View patches carried by `snapshot` for `actor`. `tracked` lists the
    /// entities the controller currently holds state for.
    fn read_snapshot(&self, snapshot: &Snapshot, actor: &UserId, tracked: &[EntityId]) -> Vec<(EntityId, ViewPatch)>;
}

fn entity_of(doc: &Document) -> Option<EntityId> {
    EntityId::new(doc.id.clone()).ok()
}

/// Membership set, plus its counter when the document keeps one, changed
/// by a single atomic update.
fn like_update(path: DocPath, count_field: Option<&str>, set_field: &str, actor: &UserId, turn_on: bool) -> MutationPlan {
    let mut update = if turn_on {
        AtomicUpdate::new().array_union(set_field, actor.as_str())
    } else {
        AtomicUpdate::new().array_remove(set_field, actor.as_str())
    };
    if let Some(field) = count_field {
        update = update.increment(field, if turn_on { 1 } else { -1 });
    }
    MutationPlan::new().update(path, update)
}

/// Like on a post: `likesCount` + `likedByUsers`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostLike;

impl ToggleAction for PostLike {
    fn name(&self) -> &'static str {
        "post-like"
    }

    fn plan(&self, target: &ToggleTarget, actor: &UserId, turn_on: bool) -> Result<MutationPlan, SyncError> {
        let path = DocPath::new(collections::POSTS, target.entity_id.as_str())?;
        Ok(like_update(path, Some(fields::LIKES_COUNT), fields::LIKED_BY_USERS, actor, turn_on))
    }

    fn notification(&self, target: &ToggleTarget, actor: &UserId) -> Option<Notification> {
        Some(
            Notification::new(NotificationKind::Like, target.owner_id.clone(), actor.clone())
                .with_post(target.entity_id.clone(), target.excerpt.clone()),
        )
    }

    fn read_snapshot(&self, snapshot: &Snapshot, actor: &UserId, _tracked: &[EntityId]) -> Vec<(EntityId, ViewPatch)> {
        if snapshot.collection != collections::POSTS {
            return Vec::new();
        }
        snapshot
            .docs
            .iter()
            .filter_map(|doc| {
                let view = EntityView::new(
                    doc.array_contains(fields::LIKED_BY_USERS, actor.as_str()),
                    doc.get_i64(fields::LIKES_COUNT).unwrap_or(0),
                );
                entity_of(doc).map(|id| (id, ViewPatch::full(view)))
            })
            .collect()
    }
}

/// Like on a comment: the `likes` set, whose size is the count.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentLike;

impl ToggleAction for CommentLike {
    fn name(&self) -> &'static str {
        "comment-like"
    }

    fn plan(&self, target: &ToggleTarget, actor: &UserId, turn_on: bool) -> Result<MutationPlan, SyncError> {
        let path = DocPath::new(collections::COMMENTS, target.entity_id.as_str())?;
        Ok(like_update(path, None, fields::COMMENT_LIKES, actor, turn_on))
    }

    fn notification(&self, target: &ToggleTarget, actor: &UserId) -> Option<Notification> {
        let mut n = Notification::new(NotificationKind::CommentLike, target.owner_id.clone(), actor.clone());
        if let Some(post_id) = &target.post_id {
            n = n.with_post(post_id.clone(), None);
        }
        Some(n.with_comment(Some(target.entity_id.clone()), target.excerpt.clone().unwrap_or_default()))
    }

    fn read_snapshot(&self, snapshot: &Snapshot, actor: &UserId, _tracked: &[EntityId]) -> Vec<(EntityId, ViewPatch)> {
        if snapshot.collection != collections::COMMENTS {
            return Vec::new();
        }
        snapshot
            .docs
            .iter()
            .filter_map(|doc| {
                let count = doc.array_len(fields::COMMENT_LIKES) as i64;
                let view = EntityView::new(doc.array_contains(fields::COMMENT_LIKES, actor.as_str()), count);
                entity_of(doc).map(|id| (id, ViewPatch::full(view)))
            })
            .collect()
    }
}

/// Follow between users: two relationship records and two counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Follow;

/// Which side of a user's relationships to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowList {
    Followers,
    Following,
}

impl FollowList {
    fn collection(self) -> &'static str {
        match self {
            FollowList::Followers => collections::FOLLOWERS,
            FollowList::Following => collections::FOLLOWING,
        }
    }
}

impl Follow {
    /// Relationship records of `user`, most recent first. Each record's
    /// `uid` is the user on the other side.
    pub fn list_query(user: &UserId, list: FollowList) -> Query {
        Query::collection(format!("{}/{}/{}", collections::USERS, user, list.collection()))
            .order_by(fields::FOLLOWED_AT, Direction::Descending)
    }

    /// Current followers or followees of `user`.
    pub async fn list(store: &dyn DocumentStore, user: &UserId, list: FollowList) -> Result<Vec<FollowRecord>, SyncError> {
        let docs = store::fetch_once(store, Self::list_query(user, list)).await?;
        docs.iter()
            .map(|doc| doc.to_model::<FollowRecord>().map_err(SyncError::from))
            .collect()
    }

    /// Queries a profile screen watches: the target's user document (for
    /// its follower count) and the actor's following records.
    pub fn profile_queries(actor: &UserId, target: &UserId) -> Result<Vec<Query>, SyncError> {
        let target_doc = DocPath::new(collections::USERS, target.as_str())?;
        Ok(vec![
            Query::document(&target_doc),
            Query::collection(Self::following_collection(actor)),
        ])
    }

    fn following_collection(actor: &UserId) -> String {
        Self::list_query(actor, FollowList::Following).collection
    }
}

impl ToggleAction for Follow {
    fn name(&self) -> &'static str {
        "follow"
    }

    fn validate(&self, target: &ToggleTarget, actor: &UserId) -> Result<(), SyncError> {
        if target.entity_id.as_str() == actor.as_str() {
            return Err(SyncError::InvalidTarget("You can't follow yourself.".to_string()));
        }
        Ok(())
    }

    fn plan(&self, target: &ToggleTarget, actor: &UserId, turn_on: bool) -> Result<MutationPlan, SyncError> {
        let followee = UserId::new(target.entity_id.as_str())?;
        let actor_doc = DocPath::new(collections::USERS, actor.as_str())?;
        let target_doc = DocPath::new(collections::USERS, followee.as_str())?;
        let following = actor_doc.child(collections::FOLLOWING, followee.as_str())?;
        let follower = target_doc.child(collections::FOLLOWERS, actor.as_str())?;
        let delta = if turn_on { 1 } else { -1 };

        let plan = if turn_on {
            let now = Utc::now();
            let following_record = FollowRecord {
                uid: followee.clone(),
                followed_at: now,
            };
            let follower_record = FollowRecord {
                uid: actor.clone(),
                followed_at: now,
            };
            MutationPlan::new()
                .create_record(following, Document::fields_of(&following_record)?)
                .create_record(follower, Document::fields_of(&follower_record)?)
        } else {
            MutationPlan::new().remove_record(following).remove_record(follower)
        };

        Ok(plan
            .update(actor_doc, AtomicUpdate::new().increment(fields::FOLLOWING_COUNT, delta))
            .update(target_doc, AtomicUpdate::new().increment(fields::FOLLOWERS_COUNT, delta)))
    }

    fn notification(&self, target: &ToggleTarget, actor: &UserId) -> Option<Notification> {
        Some(Notification::new(
            NotificationKind::Follow,
            target.owner_id.clone(),
            actor.clone(),
        ))
    }

    fn read_snapshot(&self, snapshot: &Snapshot, actor: &UserId, tracked: &[EntityId]) -> Vec<(EntityId, ViewPatch)> {
        if snapshot.collection == collections::USERS {
            return snapshot
                .docs
                .iter()
                .filter_map(|doc| {
                    let count = doc.get_i64(fields::FOLLOWERS_COUNT).unwrap_or(0);
                    entity_of(doc).map(|id| (id, ViewPatch::count(count)))
                })
                .collect();
        }

        if snapshot.collection == Self::following_collection(actor) {
            // The full following set: tracked users missing from it are
            // not followed.
            let mut patches: Vec<(EntityId, ViewPatch)> = snapshot
                .docs
                .iter()
                .filter_map(|doc| entity_of(doc).map(|id| (id, ViewPatch::on(true))))
                .collect();
            for id in tracked {
                if snapshot.find(id.as_str()).is_none() {
                    patches.push((id.clone(), ViewPatch::on(false)));
                }
            }
            return patches;
        }

        Vec::new()
    }
}
