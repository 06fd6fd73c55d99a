//! Identifier newtypes.
//!
//! Both ids wrap a non-empty string. The identity provider hands out user
//! ids and the document store hands out entity ids, so neither is parsed
//! further than "not empty".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Returned when an identifier is built from an empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("identifier must not be empty")]
pub struct EmptyId;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Result<Self, EmptyId> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(EmptyId);
                }
                Ok(Self(id))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = EmptyId;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = EmptyId;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// An authenticated user, as issued by the identity provider.
    UserId
);

string_id!(
    /// A post, comment or user document targeted by a social action.
    EntityId
);

impl From<UserId> for EntityId {
    /// Users are follow targets, so a user id is also an entity id.
    fn from(id: UserId) -> Self {
        EntityId(id.0)
    }
}
