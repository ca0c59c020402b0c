//! Timeline positions and read-side views.

use crate::tables::{EchoStatus, StoredEvent};
use roomline_protocol::{DecryptionResult, Event, EventId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-room slot number. Strictly increasing with insertion, never reused.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TimelinePosition(pub u64);

impl TimelinePosition {
    /// The first slot of every room.
    pub const FIRST: TimelinePosition = TimelinePosition(1);

    /// The slot after this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TimelinePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A stored event as read APIs present it: redactions applied, plaintext
/// attached.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    /// Timeline slot.
    pub position: TimelinePosition,
    /// Envelope; content is stripped when redacted.
    pub event: Event,
    /// Decryption outcome; dropped when redacted.
    pub decryption: Option<DecryptionResult>,
    /// Local echo status.
    pub echo: Option<EchoStatus>,
    /// Redaction that applies, if any.
    pub redacted_by: Option<EventId>,
}

impl TimelineEvent {
    pub(crate) fn from_row(
        row: &StoredEvent,
        redacted_by: Option<&EventId>,
        preserved: &[&str],
    ) -> Self {
        match redacted_by {
            Some(redaction) => Self {
                position: row.position,
                event: row.event.redacted(preserved),
                decryption: None,
                echo: row.echo.clone(),
                redacted_by: Some(redaction.clone()),
            },
            None => Self {
                position: row.position,
                event: row.event.clone(),
                decryption: row.decryption.clone(),
                echo: row.echo.clone(),
                redacted_by: None,
            },
        }
    }

    /// True when a redaction applies.
    pub fn is_redacted(&self) -> bool {
        self.redacted_by.is_some()
    }

    /// Event id shortcut.
    pub fn event_id(&self) -> &EventId {
        &self.event.event_id
    }

    /// Plaintext type when decrypted, envelope type otherwise.
    pub fn effective_type(&self) -> &str {
        match &self.decryption {
            Some(DecryptionResult::Decrypted { event_type, .. }) => event_type,
            _ => &self.event.event_type,
        }
    }

    /// Plaintext `body`, when there is one.
    pub fn body(&self) -> Option<&str> {
        match &self.decryption {
            Some(DecryptionResult::Decrypted { content, .. }) => {
                content.get("body").and_then(serde_json::Value::as_str)
            }
            _ => self.event.body(),
        }
    }
}

/// Why a page stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEnd {
    /// Older local events exist; pass `next_before` to continue.
    More {
        /// Position to page back from.
        next_before: TimelinePosition,
    },
    /// The room's creation event was reached.
    StartOfHistory,
    /// Local history is exhausted but the server has older events.
    NeedsBackfill {
        /// Token for requesting older events, if the server gave one.
        prev_batch: Option<String>,
    },
}

/// One page of a room timeline, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePage {
    /// Events in strictly descending position order.
    pub events: Vec<TimelineEvent>,
    /// How the page ended.
    pub end: TimelineEnd,
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomline_protocol::{RoomId, UserId};
    use serde_json::json;

    #[test]
    fn redacted_view_strips_content_and_plaintext() {
        let row = StoredEvent {
            event: Event::new(
                EventId::from("$e"),
                RoomId::from("!r:x"),
                UserId::from("@a:x"),
                "m.room.encrypted",
                json!({"ciphertext": "abc", "session_id": "S"}),
            ),
            position: TimelinePosition(4),
            decryption: Some(DecryptionResult::Decrypted {
                event_type: "m.room.message".into(),
                content: json!({"body": "secret"}),
            }),
            echo: None,
        };

        let clear = TimelineEvent::from_row(&row, None, &[]);
        assert_eq!(clear.body(), Some("secret"));
        assert_eq!(clear.effective_type(), "m.room.message");

        let redacted = TimelineEvent::from_row(&row, Some(&EventId::from("$r")), &[]);
        assert!(redacted.is_redacted());
        assert_eq!(redacted.body(), None);
        assert_eq!(redacted.event.content, json!({}));
        assert_eq!(redacted.position, TimelinePosition(4));
    }

    #[test]
    fn positions_order_numerically() {
        assert!(TimelinePosition(9) < TimelinePosition(10));
        assert_eq!(TimelinePosition::FIRST.next(), TimelinePosition(2));
        assert_eq!(TimelinePosition(3).to_string(), "#3");
    }
}
