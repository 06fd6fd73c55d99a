//! Posting and deleting comments.
//!
//! A comment and the post's `commentsCount` move together through one
//! [`MutationPlan`]: if the counter write fails, the comment is removed
//! again.

use std::sync::Arc;

use meowgram_core::{
    collections, fields, new_document_id, Comment, DocPath, Document, EntityId, Notification,
    NotificationKind, Post,
};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::notifications;
use crate::plan::{self, MutationPlan};
use crate::session::Session;
use crate::store::{AtomicUpdate, Direction, DocumentStore, Query};

pub struct CommentService {
    store: Arc<dyn DocumentStore>,
    session: Session,
    config: SyncConfig,
}

impl CommentService {
    pub fn new(store: Arc<dyn DocumentStore>, session: Session, config: SyncConfig) -> Self {
        Self { store, session, config }
    }

    /// Comments on `post_id`, oldest first.
    pub fn thread_query(post_id: &EntityId) -> Query {
        Query::collection(collections::COMMENTS)
            .where_eq(fields::POST_ID, post_id.as_str())
            .order_by(fields::CREATED_AT, Direction::Ascending)
    }

    /// Publish `text` under `post` as the signed-in user.
    pub async fn post_comment(&self, post: &Post, text: &str) -> Result<Comment, SyncError> {
        let actor = self.session.require_user()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SyncError::InvalidArgument("Comment cannot be empty.".to_string()));
        }
        if text.chars().count() > self.config.max_comment_len {
            return Err(SyncError::InvalidArgument(format!(
                "Comments are limited to {} characters.",
                self.config.max_comment_len
            )));
        }

        let comment = Comment::new(EntityId::new(new_document_id())?, post.id.clone(), actor.clone(), text);
        let comment_path = DocPath::new(collections::COMMENTS, comment.id.as_str())?;
        let post_path = DocPath::new(collections::POSTS, post.id.as_str())?;
        let plan = MutationPlan::new()
            .create_record(comment_path, Document::fields_of(&comment)?)
            .update(post_path, AtomicUpdate::new().increment(fields::COMMENTS_COUNT, 1));

        plan::execute(self.store.as_ref(), &plan)
            .await
            .map_err(|failure| SyncError::from(failure.error))?;
        log::debug!("Comment {} posted on {} by {actor}", comment.id, post.id);

        if self.config.notifications_enabled && post.user_id != actor {
            let notification = Notification::new(NotificationKind::Comment, post.user_id.clone(), actor)
                .with_post(post.id.clone(), Some(post.caption.clone()))
                .with_comment(Some(comment.id.clone()), text);
            if let Err(e) = notifications::deliver(self.store.as_ref(), &notification).await {
                log::warn!("Comment notification for {} failed: {e}", post.user_id);
            }
        }
        Ok(comment)
    }

    /// Remove `comment` from `post`. Only the post owner or the comment's
    /// author may do this.
    pub async fn delete_comment(&self, post: &Post, comment: &Comment) -> Result<(), SyncError> {
        let actor = self.session.require_user()?;
        if actor != post.user_id && actor != comment.author_id {
            return Err(SyncError::PermissionDenied(
                "Only the post owner or the comment author can delete this comment.".to_string(),
            ));
        }
        if comment.post_id != post.id {
            return Err(SyncError::InvalidTarget(format!(
                "comment {} does not belong to post {}",
                comment.id, post.id
            )));
        }

        let plan = MutationPlan::new()
            .remove_record(DocPath::new(collections::COMMENTS, comment.id.as_str())?)
            .update(
                DocPath::new(collections::POSTS, post.id.as_str())?,
                AtomicUpdate::new().increment(fields::COMMENTS_COUNT, -1),
            );
        plan::execute(self.store.as_ref(), &plan)
            .await
            .map_err(|failure| SyncError::from(failure.error))?;
        log::debug!("Comment {} deleted from {} by {actor}", comment.id, post.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;
    use meowgram_core::UserId;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    async fn setup(user: &str) -> (Arc<MemoryStore>, CommentService, Post) {
        let store = Arc::new(MemoryStore::default());
        let post = Post::new(EntityId::new("p1").unwrap(), uid("owner"), "sleepy cat");
        store
            .seed(
                &DocPath::new("posts", "p1").unwrap(),
                Document::fields_of(&post).unwrap(),
            )
            .await;
        let service = CommentService::new(store.clone(), Session::signed_in(uid(user)), SyncConfig::for_testing());
        (store, service, post)
    }

    async fn comments_count(store: &MemoryStore) -> Option<i64> {
        store
            .peek(&DocPath::new("posts", "p1").unwrap())
            .await
            .and_then(|d| d.get_i64("commentsCount"))
    }

    #[tokio::test]
    async fn test_post_comment_counts_and_notifies() {
        let (store, service, post) = setup("u1").await;
        let comment = service.post_comment(&post, "  so fluffy  ").await.unwrap();

        assert_eq!(comment.text, "so fluffy");
        assert!(comment.likes.is_empty());
        assert_eq!(comments_count(&store).await, Some(1));

        let stored = store
            .peek(&DocPath::new("comments", comment.id.as_str()).unwrap())
            .await
            .unwrap();
        assert_eq!(stored.get_str("postId"), Some("p1"));
        assert_eq!(stored.array_len("likes"), 0);

        let notes = store.documents("notifications").await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].get_str("type"), Some("comment"));
        assert_eq!(notes[0].get_str("commentText"), Some("so fluffy"));
    }

    #[tokio::test]
    async fn test_owner_comment_sends_no_notification() {
        let (store, service, post) = setup("owner").await;
        service.post_comment(&post, "thanks").await.unwrap();
        assert!(store.documents("notifications").await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_and_oversized_comments_rejected() {
        let (store, service, post) = setup("u1").await;
        assert!(matches!(service.post_comment(&post, "   ").await, Err(SyncError::InvalidArgument(_))));
        let long = "m".repeat(SyncConfig::for_testing().max_comment_len + 1);
        assert!(matches!(service.post_comment(&post, &long).await, Err(SyncError::InvalidArgument(_))));
        assert_eq!(store.stats().writes(), 0);
    }

    #[tokio::test]
    async fn test_counter_failure_removes_comment() {
        let (store, service, post) = setup("u1").await;
        store.fail_nth_write(2, StoreError::Unavailable("flaky".into()));

        let result = service.post_comment(&post, "hi").await;
        assert!(matches!(result, Err(SyncError::RemoteWriteFailed(_))));
        assert!(store.documents("comments").await.is_empty());
        assert_eq!(comments_count(&store).await, Some(0));
    }

    #[tokio::test]
    async fn test_delete_permissions() {
        let (store, service, post) = setup("u1").await;
        let comment = service.post_comment(&post, "mine").await.unwrap();

        let stranger = CommentService::new(store.clone(), Session::signed_in(uid("u2")), SyncConfig::for_testing());
        assert!(matches!(
            stranger.delete_comment(&post, &comment).await,
            Err(SyncError::PermissionDenied(_))
        ));

        let owner = CommentService::new(store.clone(), Session::signed_in(uid("owner")), SyncConfig::for_testing());
        owner.delete_comment(&post, &comment).await.unwrap();
        assert!(store.documents("comments").await.is_empty());
        assert_eq!(comments_count(&store).await, Some(0));
    }
}
