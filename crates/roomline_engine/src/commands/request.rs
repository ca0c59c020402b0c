//! Command requests and responses.

use crate::error::{EngineError, EngineResult};
use roomline_protocol::{types, EventId, RoomId, TransactionId, UserId};
use roomline_store::TimelinePosition;
use serde_json::{json, Value};
use std::time::Duration;

/// Shared behavior of command requests.
pub trait Command {
    /// Name used in notifications and logs.
    const NAME: &'static str;

    /// Checks required fields without touching any state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] naming the first problem.
    fn validate(&self) -> EngineResult<()>;

    /// Caller deadline, if set.
    fn deadline(&self) -> Option<Duration>;
}

fn check_room(room_id: &RoomId) -> EngineResult<()> {
    if room_id.is_empty() {
        return Err(EngineError::validation("room id is required"));
    }
    if !room_id.as_str().starts_with('!') {
        return Err(EngineError::validation(format!("malformed room id {room_id}")));
    }
    Ok(())
}

fn check_object(content: &Value) -> EngineResult<()> {
    if !content.is_object() {
        return Err(EngineError::validation("content must be a JSON object"));
    }
    Ok(())
}

macro_rules! deadline_builder {
    ($ty:ty) => {
        impl $ty {
            /// Sets how long the caller waits.
            pub fn with_deadline(mut self, deadline: Duration) -> Self {
                self.deadline = Some(deadline);
                self
            }
        }
    };
}

/// Send a text message.
#[derive(Debug, Clone, PartialEq)]
pub struct SendMessage {
    /// Target room.
    pub room_id: RoomId,
    /// Message text.
    pub body: String,
    /// `msgtype`, `m.text` unless set.
    pub msgtype: String,
    /// Client transaction id; a fresh UUID when unset.
    pub txn_id: Option<TransactionId>,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl SendMessage {
    /// A text message to `room_id`.
    pub fn new(room_id: RoomId, body: impl Into<String>) -> Self {
        Self {
            room_id,
            body: body.into(),
            msgtype: "m.text".into(),
            txn_id: None,
            deadline: None,
        }
    }

    /// Uses the given transaction id.
    pub fn with_txn_id(mut self, txn_id: impl Into<TransactionId>) -> Self {
        self.txn_id = Some(txn_id.into());
        self
    }

    /// Sends an `m.notice` or `m.emote` instead.
    pub fn with_msgtype(mut self, msgtype: impl Into<String>) -> Self {
        self.msgtype = msgtype.into();
        self
    }

    /// The event content this message sends.
    pub fn content(&self) -> Value {
        json!({"msgtype": self.msgtype, "body": self.body})
    }
}

deadline_builder!(SendMessage);

impl Command for SendMessage {
    const NAME: &'static str = "send_message";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)?;
        if self.body.trim().is_empty() {
            return Err(EngineError::validation("message body is empty"));
        }
        if self.msgtype.is_empty() {
            return Err(EngineError::validation("msgtype is required"));
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Send any timeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct SendEvent {
    /// Target room.
    pub room_id: RoomId,
    /// Event type.
    pub event_type: String,
    /// Event content.
    pub content: Value,
    /// Client transaction id; a fresh UUID when unset.
    pub txn_id: Option<TransactionId>,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl SendEvent {
    /// An event of `event_type` to `room_id`.
    pub fn new(room_id: RoomId, event_type: impl Into<String>, content: Value) -> Self {
        Self {
            room_id,
            event_type: event_type.into(),
            content,
            txn_id: None,
            deadline: None,
        }
    }

    /// Uses the given transaction id.
    pub fn with_txn_id(mut self, txn_id: impl Into<TransactionId>) -> Self {
        self.txn_id = Some(txn_id.into());
        self
    }
}

deadline_builder!(SendEvent);

impl Command for SendEvent {
    const NAME: &'static str = "send_event";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)?;
        if self.event_type.is_empty() {
            return Err(EngineError::validation("event type is required"));
        }
        if self.event_type == types::ROOM_ENCRYPTED {
            return Err(EngineError::validation(
                "send plaintext; encryption is applied automatically",
            ));
        }
        check_object(&self.content)
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Join a room.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRoom {
    /// Room to join.
    pub room_id: RoomId,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl JoinRoom {
    /// Joins `room_id`.
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            deadline: None,
        }
    }
}

deadline_builder!(JoinRoom);

impl Command for JoinRoom {
    const NAME: &'static str = "join_room";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Leave a room.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveRoom {
    /// Room to leave.
    pub room_id: RoomId,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl LeaveRoom {
    /// Leaves `room_id`.
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            deadline: None,
        }
    }
}

deadline_builder!(LeaveRoom);

impl Command for LeaveRoom {
    const NAME: &'static str = "leave_room";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Create a room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateRoom {
    /// Initial name.
    pub name: Option<String>,
    /// Enable encryption from the start.
    pub encrypted: bool,
    /// Users to invite.
    pub invite: Vec<UserId>,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl CreateRoom {
    /// An unnamed, unencrypted room.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enables encryption.
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    /// Invites `user_id`.
    pub fn invite(mut self, user_id: UserId) -> Self {
        self.invite.push(user_id);
        self
    }
}

deadline_builder!(CreateRoom);

impl Command for CreateRoom {
    const NAME: &'static str = "create_room";

    fn validate(&self) -> EngineResult<()> {
        if let Some(bad) = self
            .invite
            .iter()
            .find(|u| !u.as_str().starts_with('@') || !u.as_str().contains(':'))
        {
            return Err(EngineError::validation(format!("malformed user id {bad}")));
        }
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(EngineError::validation("room name is blank"));
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Set a state event.
#[derive(Debug, Clone, PartialEq)]
pub struct SetState {
    /// Target room.
    pub room_id: RoomId,
    /// State event type.
    pub event_type: String,
    /// State key, often empty.
    pub state_key: String,
    /// Content.
    pub content: Value,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl SetState {
    /// Sets `(event_type, state_key)` in `room_id`.
    pub fn new(
        room_id: RoomId,
        event_type: impl Into<String>,
        state_key: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            room_id,
            event_type: event_type.into(),
            state_key: state_key.into(),
            content,
            deadline: None,
        }
    }
}

deadline_builder!(SetState);

impl Command for SetState {
    const NAME: &'static str = "set_state";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)?;
        if self.event_type.is_empty() {
            return Err(EngineError::validation("event type is required"));
        }
        check_object(&self.content)
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Move the read marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRead {
    /// Target room.
    pub room_id: RoomId,
    /// Newest event read.
    pub event_id: EventId,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl MarkRead {
    /// Marks `room_id` read up to `event_id`.
    pub fn new(room_id: RoomId, event_id: EventId) -> Self {
        Self {
            room_id,
            event_id,
            deadline: None,
        }
    }
}

deadline_builder!(MarkRead);

impl Command for MarkRead {
    const NAME: &'static str = "mark_read";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)?;
        if self.event_id.is_empty() {
            return Err(EngineError::validation("event id is required"));
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Start or stop typing.
#[derive(Debug, Clone, PartialEq)]
pub struct SetTyping {
    /// Target room.
    pub room_id: RoomId,
    /// Whether the user is typing.
    pub typing: bool,
    /// Server-side expiry; the configured default when unset.
    pub timeout: Option<Duration>,
    /// Caller deadline.
    pub deadline: Option<Duration>,
}

impl SetTyping {
    /// Sets typing state in `room_id`.
    pub fn new(room_id: RoomId, typing: bool) -> Self {
        Self {
            room_id,
            typing,
            timeout: None,
            deadline: None,
        }
    }

    /// Sets the server-side expiry.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

deadline_builder!(SetTyping);

impl Command for SetTyping {
    const NAME: &'static str = "set_typing";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)
    }

    fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Read a page of timeline from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Paginate {
    /// Room to read.
    pub room_id: RoomId,
    /// Page back from this position; newest events when unset.
    pub before: Option<TimelinePosition>,
    /// Maximum events.
    pub limit: usize,
}

impl Paginate {
    /// The newest `limit` events of `room_id`.
    pub fn new(room_id: RoomId, limit: usize) -> Self {
        Self {
            room_id,
            before: None,
            limit,
        }
    }

    /// Continues before `position`.
    pub fn before(mut self, position: TimelinePosition) -> Self {
        self.before = Some(position);
        self
    }
}

impl Command for Paginate {
    const NAME: &'static str = "paginate";

    fn validate(&self) -> EngineResult<()> {
        check_room(&self.room_id)?;
        if self.limit == 0 {
            return Err(EngineError::validation("limit must be positive"));
        }
        Ok(())
    }

    fn deadline(&self) -> Option<Duration> {
        None
    }
}

/// Response to a send-type command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Room sent to.
    pub room_id: RoomId,
    /// Client transaction id used.
    pub txn_id: TransactionId,
    /// Server event id.
    pub event_id: EventId,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> RoomId {
        RoomId::from("!room:x")
    }

    #[test]
    fn send_message_validation() {
        assert!(SendMessage::new(room(), "hi").validate().is_ok());
        assert!(matches!(
            SendMessage::new(room(), "   ").validate(),
            Err(EngineError::Validation(_))
        ));
        assert!(SendMessage::new(RoomId::from(""), "hi").validate().is_err());
        assert!(SendMessage::new(RoomId::from("#alias:x"), "hi")
            .validate()
            .is_err());
    }

    #[test]
    fn send_event_rejects_ciphertext_and_non_objects() {
        assert!(SendEvent::new(room(), "m.reaction", json!({})).validate().is_ok());
        assert!(SendEvent::new(room(), types::ROOM_ENCRYPTED, json!({}))
            .validate()
            .is_err());
        assert!(SendEvent::new(room(), "m.reaction", json!("text"))
            .validate()
            .is_err());
        assert!(SendEvent::new(room(), "", json!({})).validate().is_err());
    }

    #[test]
    fn create_room_checks_invites() {
        assert!(CreateRoom::new()
            .invite(UserId::from("@bob:x"))
            .validate()
            .is_ok());
        assert!(CreateRoom::new()
            .invite(UserId::from("bob"))
            .validate()
            .is_err());
        assert!(CreateRoom::new().with_name(" ").validate().is_err());
    }

    #[test]
    fn paginate_needs_a_limit() {
        assert!(Paginate::new(room(), 0).validate().is_err());
        assert!(Paginate::new(room(), 10)
            .before(TimelinePosition(4))
            .validate()
            .is_ok());
    }

    #[test]
    fn builders_set_fields() {
        let send = SendMessage::new(room(), "hi")
            .with_txn_id("t1")
            .with_msgtype("m.notice")
            .with_deadline(Duration::from_secs(2));
        assert_eq!(send.txn_id, Some(TransactionId::from("t1")));
        assert_eq!(send.deadline(), Some(Duration::from_secs(2)));
        assert_eq!(send.content(), json!({"msgtype": "m.notice", "body": "hi"}));
    }
}
