//! Optimistic caption editing for the signed-in user's own posts.

use std::collections::HashMap;
use std::sync::Arc;

use meowgram_core::{collections, fields, DocPath, EntityId, Post};
use tokio::sync::Mutex;

use crate::error::SyncError;
use crate::session::Session;
use crate::store::{AtomicUpdate, DocumentStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionEdit {
    /// The new caption was written.
    Saved(String),
    /// Same caption as before; nothing was written.
    Unchanged,
}

pub struct CaptionEditor {
    store: Arc<dyn DocumentStore>,
    session: Session,
    /// Locally displayed captions that differ from the last loaded post.
    local: Mutex<HashMap<EntityId, String>>,
}

impl CaptionEditor {
    pub fn new(store: Arc<dyn DocumentStore>, session: Session) -> Self {
        Self {
            store,
            session,
            local: Mutex::new(HashMap::new()),
        }
    }

    /// Caption to render for `post`.
    pub async fn caption(&self, post: &Post) -> String {
        self.local
            .lock()
            .await
            .get(&post.id)
            .cloned()
            .unwrap_or_else(|| post.caption.clone())
    }

    /// Replace the caption of `post`. The new caption shows immediately
    /// and is rolled back if the write fails.
    pub async fn save(&self, post: &Post, caption: &str) -> Result<CaptionEdit, SyncError> {
        let actor = self.session.require_user()?;
        if actor != post.user_id {
            return Err(SyncError::PermissionDenied("Only the author can edit this caption.".to_string()));
        }
        let caption = caption.trim();
        if caption.is_empty() {
            return Err(SyncError::InvalidArgument("Caption cannot be empty.".to_string()));
        }

        let previous = {
            let mut local = self.local.lock().await;
            let previous = local.get(&post.id).cloned().unwrap_or_else(|| post.caption.clone());
            if previous == caption {
                return Ok(CaptionEdit::Unchanged);
            }
            local.insert(post.id.clone(), caption.to_string());
            previous
        };

        let path = DocPath::new(collections::POSTS, post.id.as_str())?;
        let update = AtomicUpdate::new().set(fields::CAPTION, caption);
        match self.store.atomic_update(&path, &update).await {
            Ok(()) => Ok(CaptionEdit::Saved(caption.to_string())),
            Err(e) => {
                log::warn!("Caption edit on {} failed, reverting: {e}", post.id);
                let mut local = self.local.lock().await;
                // A later edit may already have replaced ours.
                if local.get(&post.id).map(String::as_str) == Some(caption) {
                    local.insert(post.id.clone(), previous);
                }
                Err(e.into())
            }
        }
    }

    /// Forget local edits once a fresh copy of `post` has been loaded.
    pub async fn refresh(&self, post: &Post) {
        self.local.lock().await.remove(&post.id);
    }
}
