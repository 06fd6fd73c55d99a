//! Who is signed in.
//!
//! Authentication itself belongs to the identity provider. The session
//! only mirrors its current user so controllers can stamp actions.

use std::sync::{Arc, RwLock};

use meowgram_core::UserId;

use crate::error::SyncError;

#[derive(Debug, Clone, Default)]
pub struct Session {
    current: Arc<RwLock<Option<UserId>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: UserId) -> Self {
        Self {
            current: Arc::new(RwLock::new(Some(user))),
        }
    }

    pub fn sign_in(&self, user: UserId) {
        log::info!("Signed in as {user}");
        if let Ok(mut current) = self.current.write() {
            *current = Some(user);
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }

    pub fn current_user(&self) -> Option<UserId> {
        self.current.read().ok().and_then(|u| u.clone())
    }

    pub fn require_user(&self) -> Result<UserId, SyncError> {
        self.current_user().ok_or(SyncError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_out_shared_between_clones() {
        let session = Session::new();
        let view = session.clone();
        assert_eq!(view.require_user(), Err(SyncError::Unauthenticated));

        session.sign_in(UserId::new("u1").unwrap());
        assert_eq!(view.current_user().unwrap().as_str(), "u1");

        session.sign_out();
        assert!(view.current_user().is_none());
    }
}
