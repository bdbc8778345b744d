//! Opaque identifiers for conversations, messages and actors.
//!
//! Ids are generated client-side (a conversation id exists before any
//! network call is made), so they are random v4 UUID strings rather
//! than store-assigned keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a conversation; also names its sync channel.
    ConversationId
);
string_id!(
    /// Globally unique message identifier.
    MessageId
);
string_id!(
    /// Identity of the acting user, stamped on writes.
    ActorId
);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Id of the copy of this message inside branch `branch`.
    pub fn branch_copy(&self, branch: &ConversationId) -> Self {
        Self(format!("{}-branch-{}", self.0, branch.as_str()))
    }
}
