//! # meowgram-sync: optimistic social actions for Meowgram
//!
//! Likes, comment likes and follows change on screen the moment the user
//! taps, are written to the remote document store in the background, and
//! are reconciled with live snapshots without flicker.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  toggle()   ┌──────────────────────┐   MutationPlan   ┌───────────────┐
//! │   UI layer   │ ──────────► │ ToggleController<A>  │ ───────────────► │ DocumentStore │
//! │              │ ◄────────── │  OverlayState per    │ ◄─────────────── │ (Arc<dyn ..>) │
//! └──────────────┘ Controller  │  (entity, actor)     │   Subscription   └───────┬───────┘
//!                  Event       └──────────┬───────────┘   snapshots              │
//!                                         │ notification                         │
//!                                         └──────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`controller`]: the reusable optimistic toggle
//! - [`actions`]: post likes, comment likes, follows
//! - [`overlay`]: per-entity optimistic state machine
//! - [`plan`]: multi-document writes with compensation
//! - [`store`]: store contract, atomic updates, in-memory store
//! - [`posts`], [`comments`], [`caption`], [`notifications`]: the remaining post flows
//! - [`cache`]: settled views persisted between runs

pub mod actions;
pub mod cache;
pub mod caption;
pub mod comments;
pub mod config;
pub mod controller;
pub mod error;
pub mod notifications;
pub mod overlay;
pub mod plan;
pub mod posts;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use actions::{CommentLike, Follow, FollowList, PostLike, ToggleAction, ToggleTarget};
pub use cache::ViewCache;
pub use caption::{CaptionEdit, CaptionEditor};
pub use comments::CommentService;
pub use config::SyncConfig;
pub use controller::{ControllerEvent, ToggleController, ToggleOutcome};
pub use error::{StoreError, SyncError};
pub use notifications::{NotificationCenter, NotificationEntry};
pub use overlay::{EntityView, OverlayState, ViewPatch};
pub use plan::{ExecutionReport, MutationPlan, PlanFailure};
pub use posts::PostService;
pub use session::Session;
pub use store::{
    fetch_once, AtomicUpdate, Direction, DocumentStore, MemoryStore, MemoryStoreConfig, Query,
    Snapshot, StoreStats, Subscription,
};
