//! Event Broadcasting
//!
//! Fans engine notifications out to any number of subscribers over a bounded
//! broadcast channel. Emitting never blocks: a subscriber that falls behind
//! loses its oldest buffered notifications and is told how many.

use crate::sync::SyncState;
use roomline_protocol::{EventId, RoomId, RoomSummary, SyncCursor, TransactionId};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Something the application may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A sync batch was committed.
    SyncComplete {
        /// Cursor the batch moved to.
        cursor: SyncCursor,
        /// Summaries of the rooms it changed.
        rooms: Vec<RoomSummary>,
    },
    /// A decryption batch was committed.
    EventsDecrypted {
        /// Events that now have plaintext.
        events: Vec<(RoomId, EventId)>,
        /// Events marked as undecryptable.
        failed: Vec<(RoomId, EventId)>,
        /// Summaries of affected rooms.
        summaries: Vec<RoomSummary>,
    },
    /// The sync loop changed state.
    SyncStatus {
        /// New state.
        state: SyncState,
        /// Error that caused it, for `Backoff` and `Failed`.
        error: Option<String>,
    },
    /// A send-type command was accepted by the server.
    SendComplete {
        /// Room sent to.
        room_id: RoomId,
        /// Client transaction id.
        txn_id: TransactionId,
        /// Server event id.
        event_id: EventId,
    },
    /// A send-type command failed.
    SendFailed {
        /// Room sent to.
        room_id: RoomId,
        /// Client transaction id.
        txn_id: TransactionId,
        /// What went wrong.
        error: String,
    },
    /// Any other command succeeded.
    CommandComplete {
        /// Command name.
        command: &'static str,
        /// Room it applied to or created.
        room_id: Option<RoomId>,
    },
    /// Any other command failed.
    CommandFailed {
        /// Command name.
        command: &'static str,
        /// Room it applied to.
        room_id: Option<RoomId>,
        /// What went wrong.
        error: String,
    },
}

/// One item read from an [`EventFeed`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// The next notification.
    Notification(Notification),
    /// This many notifications were dropped because the subscriber fell
    /// behind.
    Lagged(u64),
}

/// Event broadcaster for engine notifications.
#[derive(Debug, Clone)]
pub struct Emitter {
    tx: broadcast::Sender<Notification>,
}

impl Emitter {
    /// Creates an emitter buffering `capacity` notifications per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emits a notification. Returns how many subscribers will see it.
    pub fn emit(&self, notification: Notification) -> usize {
        self.tx.send(notification).unwrap_or(0)
    }

    /// Subscribes to notifications emitted from now on.
    pub fn subscribe(&self) -> EventFeed {
        EventFeed {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// A subscriber's view of the notification stream.
#[derive(Debug)]
pub struct EventFeed {
    rx: broadcast::Receiver<Notification>,
}

impl EventFeed {
    /// Waits for the next item. `None` once the engine is gone.
    pub async fn next(&mut self) -> Option<FeedItem> {
        match self.rx.recv().await {
            Ok(notification) => Some(FeedItem::Notification(notification)),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "notification subscriber lagging");
                Some(FeedItem::Lagged(skipped))
            }
            Err(RecvError::Closed) => None,
        }
    }

    /// The next item if one is buffered.
    pub fn try_next(&mut self) -> Option<FeedItem> {
        match self.rx.try_recv() {
            Ok(notification) => Some(FeedItem::Notification(notification)),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "notification subscriber lagging");
                Some(FeedItem::Lagged(skipped))
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => None,
        }
    }

    /// Waits for the next notification, skipping lag markers.
    pub async fn next_notification(&mut self) -> Option<Notification> {
        loop {
            match self.next().await? {
                FeedItem::Notification(notification) => return Some(notification),
                FeedItem::Lagged(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: SyncState) -> Notification {
        Notification::SyncStatus { state, error: None }
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_fine() {
        let emitter = Emitter::new(4);
        assert_eq!(emitter.subscriber_count(), 0);
        assert_eq!(emitter.emit(status(SyncState::Idle)), 0);
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_notification() {
        let emitter = Emitter::new(8);
        let mut a = emitter.subscribe();
        let mut b = emitter.subscribe();

        assert_eq!(emitter.emit(status(SyncState::Requesting)), 2);
        assert_eq!(
            a.next().await,
            Some(FeedItem::Notification(status(SyncState::Requesting)))
        );
        assert_eq!(
            b.next_notification().await,
            Some(status(SyncState::Requesting))
        );
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest() {
        let emitter = Emitter::new(2);
        let mut feed = emitter.subscribe();

        for state in [
            SyncState::Idle,
            SyncState::Requesting,
            SyncState::Applying,
            SyncState::Idle,
        ] {
            emitter.emit(status(state));
        }

        assert_eq!(feed.next().await, Some(FeedItem::Lagged(2)));
        assert_eq!(
            feed.next().await,
            Some(FeedItem::Notification(status(SyncState::Applying)))
        );
        assert_eq!(
            feed.try_next(),
            Some(FeedItem::Notification(status(SyncState::Idle)))
        );
        assert_eq!(feed.try_next(), None);
    }

    #[tokio::test]
    async fn feed_ends_when_emitter_dropped() {
        let emitter = Emitter::new(2);
        let mut feed = emitter.subscribe();
        drop(emitter);
        assert_eq!(feed.next().await, None);
    }
}
