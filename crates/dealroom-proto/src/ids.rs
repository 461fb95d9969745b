//! Normalized identifiers.
//!
//! The server issues numeric identifiers, the client mints string temporary
//! identifiers, and JSON bodies may carry either representation. Every id is
//! stored in its string form so that `42` and `"42"` compare equal.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Prefix of client-minted message ids.
const TEMPORARY_PREFIX: &str = "tmp-";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Create an id from its string form.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Normalized string form.
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
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id.to_string())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(NormalizedId).map(Self)
            }
        }
    };
}

string_id!(
    /// Conversation identifier.
    ConversationId
);

string_id!(
    /// User (participant) identifier.
    UserId
);

string_id!(
    /// Message identifier: server-issued or client-minted temporary.
    MessageId
);

impl MessageId {
    /// Client-minted temporary id for an optimistic message.
    pub fn temporary(nonce: u64) -> Self {
        Self(format!("{TEMPORARY_PREFIX}{nonce:016x}"))
    }

    /// Whether this id was minted by the client and not yet replaced.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_PREFIX)
    }
}

/// Accepts a JSON string or integer and yields its string form.
struct NormalizedId;

impl de::Visitor<'_> for NormalizedId {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer identifier")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }
}
