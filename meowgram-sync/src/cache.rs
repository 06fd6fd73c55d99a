//! On-disk cache of settled views.
//!
//! Lets a cold start render last known like/follow state before the first
//! snapshot arrives. Only settled views are written; the file is a
//! bincode-encoded [`CacheFile`] compressed with LZ4.
//!
//! ```text
//! ToggleController::settled_views() ──► encode ──► lz4 ──► tmp file ──► rename
//! file ──► lz4 ──► decode ──► ToggleController::seed()
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use meowgram_core::{EntityId, UserId};
use serde::{Deserialize, Serialize};

use crate::actions::ToggleAction;
use crate::controller::ToggleController;
use crate::error::SyncError;
use crate::overlay::EntityView;

/// Bumped whenever [`CacheFile`] changes shape.
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CachedView {
    entity_id: String,
    actor: String,
    view: EntityView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    /// Action name the views belong to, e.g. `post-like`.
    action: String,
    saved_at: i64,
    views: Vec<CachedView>,
}

pub type CachedEntry = (EntityId, UserId, EntityView);

pub struct ViewCache {
    path: PathBuf,
}

impl ViewCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the cache with `views` for `action`.
    pub fn save(&self, action: &str, views: &[CachedEntry]) -> Result<usize, SyncError> {
        let file = CacheFile {
            version: CACHE_VERSION,
            action: action.to_string(),
            saved_at: chrono::Utc::now().timestamp(),
            views: views
                .iter()
                .map(|(entity, actor, view)| CachedView {
                    entity_id: entity.to_string(),
                    actor: actor.to_string(),
                    view: *view,
                })
                .collect(),
        };
        let encoded = bincode::serde::encode_to_vec(&file, bincode::config::standard())
            .map_err(|e| SyncError::Cache(format!("encode: {e}")))?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| SyncError::Cache(format!("{}: {e}", dir.display())))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &compressed).map_err(|e| SyncError::Cache(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path).map_err(|e| SyncError::Cache(format!("{}: {e}", self.path.display())))?;

        log::debug!(
            "Cached {} {action} views ({} bytes) at {}",
            file.views.len(),
            compressed.len(),
            self.path.display()
        );
        Ok(file.views.len())
    }

    /// Views previously saved for `action`. A missing file, or one written
    /// for another action or cache version, yields nothing.
    pub fn load(&self, action: &str) -> Result<Vec<CachedEntry>, SyncError> {
        let compressed = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncError::Cache(format!("{}: {e}", self.path.display()))),
        };
        let encoded = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| SyncError::Cache(format!("decompress: {e}")))?;
        let (file, _): (CacheFile, usize) =
            bincode::serde::decode_from_slice(&encoded, bincode::config::standard())
                .map_err(|e| SyncError::Cache(format!("decode: {e}")))?;

        if file.version != CACHE_VERSION || file.action != action {
            log::info!(
                "Ignoring view cache at {} (version {}, action {})",
                self.path.display(),
                file.version,
                file.action
            );
            return Ok(Vec::new());
        }
        log::debug!(
            "Loaded {} {action} views saved at {}",
            file.views.len(),
            chrono::DateTime::from_timestamp(file.saved_at, 0).map_or_else(|| file.saved_at.to_string(), |t| t.to_rfc3339())
        );

        Ok(file
            .views
            .into_iter()
            .filter_map(|cached| {
                let entity = EntityId::new(cached.entity_id).ok()?;
                let actor = UserId::new(cached.actor).ok()?;
                Some((entity, actor, cached.view))
            })
            .collect())
    }

    /// Write the controller's settled views.
    pub async fn persist<A: ToggleAction>(&self, controller: &ToggleController<A>) -> Result<usize, SyncError> {
        let views = controller.settled_views().await;
        self.save(controller.action().name(), &views)
    }

    /// Seed `controller` with cached views. Entities it already tracks
    /// keep their state.
    pub async fn restore<A: ToggleAction>(&self, controller: &ToggleController<A>) -> Result<usize, SyncError> {
        let views = self.load(controller.action().name())?;
        let restored = views.len();
        for (entity, actor, view) in views {
            controller.seed(entity, actor, view).await;
        }
        Ok(restored)
    }
}
