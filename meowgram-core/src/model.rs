//! Social entities as stored in the document database.
//!
//! Field names follow the stored camelCase layout so that documents
//! written by older clients decode unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{EntityId, UserId};

/// Top-level and nested collection names.
pub mod collections {
    pub const POSTS: &str = "posts";
    pub const COMMENTS: &str = "comments";
    pub const USERS: &str = "users";
    pub const NOTIFICATIONS: &str = "notifications";
    /// Sub-collection of `users/{uid}`: who `uid` follows.
    pub const FOLLOWING: &str = "following";
    /// Sub-collection of `users/{uid}`: who follows `uid`.
    pub const FOLLOWERS: &str = "followers";
}

/// Stored field names touched by counters and membership sets.
pub mod fields {
    pub const LIKES_COUNT: &str = "likesCount";
    pub const LIKED_BY_USERS: &str = "likedByUsers";
    /// Comments keep no separate counter: the set is the count.
    pub const COMMENT_LIKES: &str = "likes";
    pub const COMMENTS_COUNT: &str = "commentsCount";
    pub const FOLLOWERS_COUNT: &str = "followersCount";
    pub const FOLLOWING_COUNT: &str = "followingCount";
    pub const CAPTION: &str = "caption";
    pub const FOLLOWED_AT: &str = "followedAt";
    pub const READ: &str = "read";
    pub const USER_ID: &str = "userId";
    pub const POST_ID: &str = "postId";
    pub const CREATED_AT: &str = "createdAt";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    #[serde(skip_serializing)]
    pub id: EntityId,
    /// Owner of the post.
    pub user_id: UserId,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub likes_count: i64,
    #[serde(default)]
    pub liked_by_users: Vec<UserId>,
    #[serde(default)]
    pub comments_count: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn new(id: EntityId, owner: UserId, caption: impl Into<String>) -> Self {
        Self {
            id,
            user_id: owner,
            caption: caption.into(),
            image_url: String::new(),
            likes_count: 0,
            liked_by_users: Vec::new(),
            comments_count: 0,
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = url.into();
        self
    }

    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.liked_by_users.contains(user)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(skip_serializing)]
    pub id: EntityId,
    pub post_id: EntityId,
    pub author_id: UserId,
    pub text: String,
    /// Users who liked the comment; its length is the like count.
    #[serde(default)]
    pub likes: Vec<UserId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Comment {
    pub fn new(id: EntityId, post_id: EntityId, author: UserId, text: impl Into<String>) -> Self {
        Self {
            id,
            post_id,
            author_id: author,
            text: text.into(),
            likes: Vec::new(),
            created_at: Some(Utc::now()),
        }
    }

    pub fn like_count(&self) -> i64 {
        self.likes.len() as i64
    }

    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.likes.contains(user)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
}

impl UserProfile {
    pub fn new(uid: UserId, username: impl Into<String>) -> Self {
        Self {
            uid,
            username: username.into(),
            followers_count: 0,
            following_count: 0,
        }
    }
}

/// One side of a follow relationship. The follower side lives under
/// `users/{follower}/following/{followee}` with `uid = followee`, the
/// followee side under `users/{followee}/followers/{follower}` with
/// `uid = follower`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRecord {
    pub uid: UserId,
    pub followed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    Like,
    CommentLike,
    Follow,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Recipient.
    pub user_id: UserId,
    pub from_user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_text: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}

impl Notification {
    /// Unread notification of `kind` from `from` to `to`, stamped now.
    pub fn new(kind: NotificationKind, to: UserId, from: UserId) -> Self {
        Self {
            user_id: to,
            from_user_id: from,
            kind,
            post_id: None,
            post_caption: None,
            comment_id: None,
            comment_text: None,
            created_at: Utc::now(),
            read: false,
        }
    }

    pub fn with_post(mut self, post_id: EntityId, caption: Option<String>) -> Self {
        self.post_id = Some(post_id);
        self.post_caption = caption;
        self
    }

    pub fn with_comment(mut self, comment_id: Option<EntityId>, text: impl Into<String>) -> Self {
        self.comment_id = comment_id;
        self.comment_text = Some(text.into());
        self
    }
}

/// Anything carrying a like counter and the set of users behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeableEntity {
    pub id: EntityId,
    pub like_count: i64,
    pub liked_by: BTreeSet<UserId>,
}

impl LikeableEntity {
    /// Counter and membership agree. Holds whenever the store is
    /// consistent; an optimistic local overlay may break it briefly.
    pub fn is_consistent(&self) -> bool {
        self.like_count >= 0 && self.like_count as usize == self.liked_by.len()
    }

    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.liked_by.contains(user)
    }
}

impl From<&Post> for LikeableEntity {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            like_count: post.likes_count,
            liked_by: post.liked_by_users.iter().cloned().collect(),
        }
    }
}

impl From<&Comment> for LikeableEntity {
    fn from(comment: &Comment) -> Self {
        Self {
            id: comment.id.clone(),
            like_count: comment.like_count(),
            liked_by: comment.likes.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[test]
    fn test_post_document_roundtrip_keeps_id_out_of_fields() {
        let post = Post::new(EntityId::new("p1").unwrap(), uid("owner"), "a cat");
        let doc = Document::from_model("p1", &post).unwrap();

        assert!(doc.get("id").is_none());
        assert_eq!(doc.get_str("userId"), Some("owner"));
        assert_eq!(doc.get_i64("likesCount"), Some(0));

        let back: Post = doc.to_model().unwrap();
        assert_eq!(back, post);
    }

    #[test]
    fn test_comment_counts_from_likes() {
        let doc = Document::new(
            "c1",
            serde_json::from_str(r#"{"postId":"p1","authorId":"a","text":"hi","likes":["u1","u2"]}"#)
                .unwrap(),
        );
        let comment: Comment = doc.to_model().unwrap();
        assert_eq!(comment.like_count(), 2);
        assert!(comment.is_liked_by(&uid("u1")));

        let entity = LikeableEntity::from(&comment);
        assert!(entity.is_consistent());
    }

    #[test]
    fn test_notification_kind_wire_names() {
        let n = Notification::new(NotificationKind::CommentLike, uid("to"), uid("from"));
        let doc = Document::from_model("n1", &n).unwrap();
        assert_eq!(doc.get_str("type"), Some("commentLike"));
        assert_eq!(doc.get_bool("read"), Some(false));
        assert!(doc.get("postId").is_none());
    }

    #[test]
    fn test_likeable_consistency() {
        let mut entity = LikeableEntity {
            id: EntityId::new("p1").unwrap(),
            like_count: 3,
            liked_by: BTreeSet::new(),
        };
        assert!(!entity.is_consistent());

        entity.like_count = 0;
        assert!(entity.is_consistent());
    }
}
