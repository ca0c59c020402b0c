//! Event type tags the engine understands.

/// Plain message.
pub const ROOM_MESSAGE: &str = "m.room.message";
/// Megolm-encrypted payload.
pub const ROOM_ENCRYPTED: &str = "m.room.encrypted";
/// Membership change (state).
pub const ROOM_MEMBER: &str = "m.room.member";
/// Enables encryption for a room (state).
pub const ROOM_ENCRYPTION: &str = "m.room.encryption";
/// Room display name (state).
pub const ROOM_NAME: &str = "m.room.name";
/// First event of every room (state).
pub const ROOM_CREATE: &str = "m.room.create";
/// Removes the content of another event.
pub const ROOM_REDACTION: &str = "m.room.redaction";
/// Annotation on another event.
pub const REACTION: &str = "m.reaction";
/// Typing notification (ephemeral, never stored).
pub const TYPING: &str = "m.typing";
/// Fully-read marker (room account data).
pub const FULLY_READ: &str = "m.fully_read";
