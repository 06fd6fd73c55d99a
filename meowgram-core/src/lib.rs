//! # meowgram-core: data model for the Meowgram client
//!
//! Ids, schemaless documents and the social entities (posts, comments,
//! users, follow records, notifications) exchanged with the document
//! store. No I/O lives here; `meowgram-sync` owns the store contract.

pub mod document;
pub mod ids;
pub mod model;

pub use document::{DocPath, Document, DocumentError, Fields};
pub use ids::{EmptyId, EntityId, UserId};
pub use model::{
    collections, fields, Comment, FollowRecord, LikeableEntity, Notification, NotificationKind,
    Post, UserProfile,
};

/// Fresh id for a document created client-side.
pub fn new_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
