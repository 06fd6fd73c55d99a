//! Sync layer configuration.
//!
//! Defaults suit the app; `for_testing()` shrinks buffers, `from_env()`
//! reads `MEOWGRAM_*` overrides. Unparsable values fall back to the
//! default with a warning.

use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Controller events buffered before new ones are dropped.
    pub event_capacity: usize,
    /// Write notification documents for likes, follows and comments.
    pub notifications_enabled: bool,
    /// Longest comment accepted, in characters.
    pub max_comment_len: usize,
    /// Where settled views are persisted between runs, if anywhere.
    pub cache_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            notifications_enabled: true,
            max_comment_len: 2200,
            cache_path: None,
        }
    }
}

impl SyncConfig {
    pub fn for_testing() -> Self {
        Self {
            event_capacity: 64,
            ..Self::default()
        }
    }

    /// Defaults overridden by `MEOWGRAM_EVENT_CAPACITY`,
    /// `MEOWGRAM_NOTIFICATIONS`, `MEOWGRAM_MAX_COMMENT_LEN` and
    /// `MEOWGRAM_CACHE_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            event_capacity: parse_or(&lookup, "MEOWGRAM_EVENT_CAPACITY", defaults.event_capacity),
            notifications_enabled: lookup("MEOWGRAM_NOTIFICATIONS")
                .map(|v| parse_flag(&v, defaults.notifications_enabled))
                .unwrap_or(defaults.notifications_enabled),
            max_comment_len: parse_or(&lookup, "MEOWGRAM_MAX_COMMENT_LEN", defaults.max_comment_len),
            cache_path: lookup("MEOWGRAM_CACHE_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring {key}={raw:?}: not a valid value");
            default
        }),
        None => default,
    }
}

fn parse_flag(raw: &str, default: bool) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            log::warn!("Ignoring flag value {raw:?}");
            default
        }
    }
}
