//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw identifier.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for the empty identifier, which the server never sends.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
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
    /// A room identifier such as `!abc:example.org`.
    RoomId
);
string_id!(
    /// A server-assigned event identifier such as `$xyz`.
    EventId
);
string_id!(
    /// A user identifier such as `@alice:example.org`.
    UserId
);
string_id!(
    /// A device identifier.
    DeviceId
);
string_id!(
    /// A client transaction identifier, unique per device.
    ///
    /// The server echoes it back in the `unsigned` section of events this
    /// device sent, which is how local echoes are matched.
    TransactionId
);

impl UserId {
    /// The part between `@` and `:`.
    ///
    /// Returns the whole id when it is not in `@local:server` form.
    pub fn localpart(&self) -> &str {
        let raw = self.0.strip_prefix('@').unwrap_or(&self.0);
        raw.split(':').next().unwrap_or(raw)
    }
}

/// Identifies one megolm session: the unit keys arrive in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    /// Room the session belongs to.
    pub room_id: RoomId,
    /// Session id taken from the encrypted event content.
    pub session_id: String,
}

impl SessionRef {
    /// Creates a session reference.
    pub fn new(room_id: RoomId, session_id: impl Into<String>) -> Self {
        Self {
            room_id,
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room_id, self.session_id)
    }
}
