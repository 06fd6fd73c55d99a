//! Post lifecycle: publishing, deleting, and who liked what.
//!
//! A post is created with its like counter at zero and an empty liker set.
//! Deleting a post takes its comments (and their likes) with it through
//! one [`MutationPlan`], so a failure halfway puts everything back.

use std::sync::Arc;

use meowgram_core::{
    collections, fields, new_document_id, Comment, DocPath, Document, EntityId, LikeableEntity,
    Post, UserId, UserProfile,
};
use serde_json::Value;

use crate::comments::CommentService;
use crate::error::SyncError;
use crate::plan::{self, MutationPlan};
use crate::session::Session;
use crate::store::{self, Direction, DocumentStore, Query};

pub struct PostService {
    store: Arc<dyn DocumentStore>,
    session: Session,
}

impl PostService {
    pub fn new(store: Arc<dyn DocumentStore>, session: Session) -> Self {
        Self { store, session }
    }

    /// Home feed, newest first.
    pub fn feed_query() -> Query {
        Query::collection(collections::POSTS).order_by(fields::CREATED_AT, Direction::Descending)
    }

    /// Publish a post owned by the signed-in user.
    pub async fn create_post(&self, caption: &str, image_url: &str) -> Result<Post, SyncError> {
        let owner = self.session.require_user()?;
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(SyncError::InvalidArgument("Please select an image.".to_string()));
        }
        let caption = caption.trim();
        if caption.is_empty() {
            return Err(SyncError::InvalidArgument("Please add a caption.".to_string()));
        }

        let post = Post::new(EntityId::new(new_document_id())?, owner, caption).with_image(image_url);
        let path = DocPath::new(collections::POSTS, post.id.as_str())?;
        let plan = MutationPlan::new().create_record(path, Document::fields_of(&post)?);
        plan::execute(self.store.as_ref(), &plan)
            .await
            .map_err(|failure| SyncError::from(failure.error))?;
        log::info!("Post {} published by {}", post.id, post.user_id);
        Ok(post)
    }

    /// Delete `post` and its comment thread. Owner only. Returns how many
    /// comments went with it.
    pub async fn delete_post(&self, post: &Post) -> Result<usize, SyncError> {
        let actor = self.session.require_user()?;
        if actor != post.user_id {
            return Err(SyncError::PermissionDenied(
                "Only the owner can delete this post.".to_string(),
            ));
        }

        let thread = store::fetch_once(self.store.as_ref(), CommentService::thread_query(&post.id)).await?;
        let mut plan = MutationPlan::new();
        for comment in &thread {
            plan = plan.remove_record(DocPath::new(collections::COMMENTS, comment.id.as_str())?);
        }
        plan = plan.remove_record(DocPath::new(collections::POSTS, post.id.as_str())?);

        plan::execute(self.store.as_ref(), &plan)
            .await
            .map_err(|failure| SyncError::from(failure.error))?;
        log::info!("Post {} deleted by {actor} with {} comments", post.id, thread.len());
        Ok(thread.len())
    }

    /// Like counter and liker set of a post as stored.
    pub async fn post_likes(&self, post_id: &EntityId) -> Result<LikeableEntity, SyncError> {
        let doc = self.store.get(&DocPath::new(collections::POSTS, post_id.as_str())?).await?;
        let post: Post = doc.to_model()?;
        Ok(checked(LikeableEntity::from(&post)))
    }

    /// Like set of a comment; its size is the count.
    pub async fn comment_likes(&self, comment_id: &EntityId) -> Result<LikeableEntity, SyncError> {
        let doc = self
            .store
            .get(&DocPath::new(collections::COMMENTS, comment_id.as_str())?)
            .await?;
        let comment: Comment = doc.to_model()?;
        Ok(LikeableEntity::from(&comment))
    }

    /// Profiles of everyone in `entity`'s liker set, in id order. Likers
    /// whose profile no longer exists are skipped.
    pub async fn liker_profiles(&self, entity: &LikeableEntity) -> Result<Vec<UserProfile>, SyncError> {
        let mut profiles = Vec::with_capacity(entity.liked_by.len());
        for uid in &entity.liked_by {
            match self.profile(uid).await {
                Ok(profile) => profiles.push(profile),
                Err(SyncError::NotFound(_)) => log::debug!("Liker {uid} of {} has no profile", entity.id),
                Err(e) => return Err(e),
            }
        }
        Ok(profiles)
    }

    async fn profile(&self, uid: &UserId) -> Result<UserProfile, SyncError> {
        let mut doc = self.store.get(&DocPath::new(collections::USERS, uid.as_str())?).await?;
        // Older profiles carry the uid only as the document id.
        doc.fields
            .entry("uid")
            .or_insert_with(|| Value::String(uid.to_string()));
        Ok(doc.to_model()?)
    }
}

fn checked(entity: LikeableEntity) -> LikeableEntity {
    if !entity.is_consistent() {
        log::warn!(
            "Post {} has likesCount {} but {} likers",
            entity.id,
            entity.like_count,
            entity.liked_by.len()
        );
    }
    entity
}
