//! Strongly typed identifiers for marketplace entities.
//!
//! Every entity is keyed by a UUID wrapped in its own newtype so a `TackId` can never be passed
//! where an `OfferId` is expected. The wrappers are transparent for serde and sqlx.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declare a UUID-backed identifier newtype.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub ::uuid::Uuid);

        impl $name {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Access the underlying UUID
            pub fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(value: ::uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Opaque user identity supplied by the surrounding system
    UserId
);
define_id!(
    /// Group that scopes tack visibility
    GroupId
);
define_id!(
    /// Tack (task posting) identifier
    TackId
);
define_id!(
    /// Offer identifier
    OfferId
);
define_id!(
    /// Review identifier
    ReviewId
);

/// Reference to any entity, used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Tack(TackId),
    Offer(OfferId),
    User(UserId),
    Group(GroupId),
    Review(ReviewId),
}

impl EntityRef {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tack(_) => "tack",
            Self::Offer(_) => "offer",
            Self::User(_) => "user",
            Self::Group(_) => "group",
            Self::Review(_) => "review",
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Tack(id) => id.0,
            Self::Offer(id) => id.0,
            Self::User(id) => id.0,
            Self::Group(id) => id.0,
            Self::Review(id) => id.0,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.uuid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_and_display_as_uuid() {
        let a = TackId::new();
        let b = TackId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_id_serde_is_transparent() {
        let id = OfferId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
    }

    #[test]
    fn test_entity_ref_display() {
        let id = UserId::new();
        assert_eq!(EntityRef::User(id).to_string(), format!("user {id}"));
    }
}
