//! The command dispatcher.
//!
//! Every command follows the same order: validate the request, wait for the
//! room's lane, check preconditions against the store, encrypt when the room
//! requires it, then issue exactly one network operation from a detached
//! task. The task records the local effect and emits the outcome even when
//! the caller has already stopped waiting.
//!
//! Validation and precondition failures return before any I/O and emit
//! nothing.

mod lanes;
mod request;

pub use lanes::{LaneGuard, RoomLanes};
pub use request::{
    Command, CreateRoom, JoinRoom, LeaveRoom, MarkRead, Paginate, SendEvent, SendMessage,
    SendReceipt, SetState, SetTyping,
};

use crate::context::AccountContext;
use crate::crypto::CryptoEngine;
use crate::emitter::Notification;
use crate::error::{EngineError, EngineResult};
use crate::transport::SyncTransport;
use roomline_protocol::{
    types, Event, EventId, Membership, Operation, OperationAck, RoomId, RoomSummary,
    TransactionId,
};
use roomline_store::{StoreError, TimelinePage};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

/// Executes commands for one account.
///
/// Cloning is cheap; clones share the room lanes, so ordering holds across
/// every clone.
#[derive(Clone)]
pub struct CommandDispatcher {
    ctx: AccountContext,
    transport: Arc<dyn SyncTransport>,
    crypto: Arc<dyn CryptoEngine>,
    lanes: Arc<RoomLanes>,
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("user_id", self.ctx.user_id())
            .field("lanes", &self.lanes.len())
            .finish()
    }
}

/// A plaintext event about to be sent.
struct Outgoing {
    room_id: RoomId,
    event_type: String,
    content: Value,
    txn_id: TransactionId,
}

impl CommandDispatcher {
    /// Creates a dispatcher sending through `transport`.
    pub fn new(
        ctx: AccountContext,
        transport: Arc<dyn SyncTransport>,
        crypto: Arc<dyn CryptoEngine>,
    ) -> Self {
        Self {
            ctx,
            transport,
            crypto,
            lanes: Arc::new(RoomLanes::default()),
        }
    }

    /// Sends a text message and records its local echo.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] for an empty body or bad room id,
    /// [`EngineError::Precondition`] when not joined, and the transport,
    /// encryption or timeout error of the send itself.
    pub async fn send_message(&self, request: SendMessage) -> EngineResult<SendReceipt> {
        request.validate()?;
        let content = request.content();
        let outgoing = Outgoing {
            room_id: request.room_id,
            event_type: types::ROOM_MESSAGE.to_string(),
            content,
            txn_id: request.txn_id.unwrap_or_else(new_txn_id),
        };
        self.send(SendMessage::NAME, outgoing, request.deadline).await
    }

    /// Sends an arbitrary timeline event and records its local echo.
    ///
    /// # Errors
    ///
    /// Same as [`send_message`](Self::send_message).
    pub async fn send_event(&self, request: SendEvent) -> EngineResult<SendReceipt> {
        request.validate()?;
        let outgoing = Outgoing {
            room_id: request.room_id,
            event_type: request.event_type,
            content: request.content,
            txn_id: request.txn_id.unwrap_or_else(new_txn_id),
        };
        self.send(SendEvent::NAME, outgoing, request.deadline).await
    }

    /// Joins a room. Returns the room the server joined.
    ///
    /// # Errors
    ///
    /// [`EngineError::Precondition`] when already joined or banned.
    pub async fn join_room(&self, request: JoinRoom) -> EngineResult<RoomId> {
        request.validate()?;
        let deadline = self.deadline(request.deadline);
        let room_id = request.room_id;
        let lane = self.lane(&room_id, deadline).await?;
        self.ensure_open()?;
        match self.membership(&room_id).await? {
            Some(Membership::Joined) => {
                return Err(EngineError::precondition(format!("already joined {room_id}")))
            }
            Some(Membership::Banned) => {
                return Err(EngineError::precondition(format!("banned from {room_id}")))
            }
            _ => {}
        }

        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();
        self.detach(JoinRoom::NAME, deadline, async move {
            let _lane = lane;
            let joined = transport
                .send_operation(Some(&room_id), &Operation::Join)
                .await
                .map(|ack| ack.room_id.unwrap_or_else(|| room_id.clone()))
                .map_err(EngineError::from);
            finish_command(&ctx, JoinRoom::NAME, Some(room_id), joined, |r| Some(r.clone()))
        })
        .await
    }

    /// Leaves a joined room or rejects an invite.
    ///
    /// # Errors
    ///
    /// [`EngineError::Precondition`] unless joined or invited.
    pub async fn leave_room(&self, request: LeaveRoom) -> EngineResult<()> {
        request.validate()?;
        let deadline = self.deadline(request.deadline);
        let room_id = request.room_id;
        let lane = self.lane(&room_id, deadline).await?;
        self.ensure_open()?;
        match self.membership(&room_id).await? {
            Some(Membership::Joined | Membership::Invited) => {}
            other => return Err(not_member("leave", &room_id, other)),
        }

        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();
        self.detach(LeaveRoom::NAME, deadline, async move {
            let _lane = lane;
            let left = transport.send_operation(Some(&room_id), &Operation::Leave).await;
            let left = left.map(drop).map_err(EngineError::from);
            finish_command(&ctx, LeaveRoom::NAME, Some(room_id), left, |_| None)
        })
        .await
    }

    /// Creates a room. Returns the new room id.
    ///
    /// The room appears in the store once sync delivers it.
    ///
    /// # Errors
    ///
    /// The transport or timeout error of the request.
    pub async fn create_room(&self, request: CreateRoom) -> EngineResult<RoomId> {
        request.validate()?;
        self.ensure_open()?;
        let deadline = self.deadline(request.deadline);
        let operation = Operation::CreateRoom {
            name: request.name,
            encrypted: request.encrypted,
            invite: request.invite,
        };

        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();
        self.detach(CreateRoom::NAME, deadline, async move {
            let created = match transport.send_operation(None, &operation).await {
                Ok(OperationAck {
                    room_id: Some(room_id),
                    ..
                }) => Ok(room_id),
                Ok(_) => Err(missing_in_ack("room id")),
                Err(e) => Err(e.into()),
            };
            finish_command(&ctx, CreateRoom::NAME, None, created, |r| Some(r.clone()))
        })
        .await
    }

    /// Sets a state event and records it locally. Returns the server event
    /// id.
    ///
    /// # Errors
    ///
    /// [`EngineError::Precondition`] when not joined.
    pub async fn set_state(&self, request: SetState) -> EngineResult<EventId> {
        request.validate()?;
        let SetState {
            room_id,
            event_type,
            state_key,
            content,
            deadline,
        } = request;
        let deadline = self.deadline(deadline);
        let lane = self.lane(&room_id, deadline).await?;
        self.ensure_open()?;
        self.require_joined(&room_id, "set state").await?;

        let operation = Operation::SetState {
            event_type: event_type.clone(),
            state_key: state_key.clone(),
            content: content.clone(),
        };
        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();
        self.detach(SetState::NAME, deadline, async move {
            let _lane = lane;
            let sent = match transport.send_operation(Some(&room_id), &operation).await {
                Ok(OperationAck {
                    event_id: Some(event_id),
                    ..
                }) => {
                    let event = Event::new(
                        event_id.clone(),
                        room_id.clone(),
                        ctx.user_id().clone(),
                        event_type,
                        content,
                    )
                    .with_state_key(state_key)
                    .with_timestamp(now_ms());
                    record_echo(&ctx, event, new_txn_id()).await;
                    Ok(event_id)
                }
                Ok(_) => Err(missing_in_ack("event id")),
                Err(e) => Err(e.into()),
            };
            finish_command(&ctx, SetState::NAME, Some(room_id), sent, |_| None)
        })
        .await
    }

    /// Moves the read marker on the server and locally. Returns the room
    /// summary afterwards.
    ///
    /// # Errors
    ///
    /// [`EngineError::Precondition`] when not joined or the event is not
    /// stored.
    pub async fn mark_read(&self, request: MarkRead) -> EngineResult<RoomSummary> {
        request.validate()?;
        let deadline = self.deadline(request.deadline);
        let MarkRead {
            room_id, event_id, ..
        } = request;
        let lane = self.lane(&room_id, deadline).await?;
        self.ensure_open()?;
        self.require_joined(&room_id, "mark read").await?;
        let (room, event) = (room_id.clone(), event_id.clone());
        let stored = self
            .ctx
            .read_store(move |store| store.get_event(&room, &event).is_some())
            .await?;
        if !stored {
            return Err(EngineError::precondition(format!(
                "event {event_id} is not stored in {room_id}"
            )));
        }

        let operation = Operation::ReadMarker {
            event_id: event_id.clone(),
        };
        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();
        self.detach(MarkRead::NAME, deadline, async move {
            let _lane = lane;
            let marked = match transport.send_operation(Some(&room_id), &operation).await {
                Ok(_) => Ok(move_read_marker(&ctx, &room_id, &event_id).await),
                Err(e) => Err(e.into()),
            };
            finish_command(&ctx, MarkRead::NAME, Some(room_id), marked, |_| None)
        })
        .await
    }

    /// Tells the room the user is (or stopped) typing.
    ///
    /// Typing does not touch the timeline, so it does not wait for the
    /// room's lane.
    ///
    /// # Errors
    ///
    /// [`EngineError::Precondition`] when not joined.
    pub async fn set_typing(&self, request: SetTyping) -> EngineResult<()> {
        request.validate()?;
        self.ensure_open()?;
        let deadline = self.deadline(request.deadline);
        let room_id = request.room_id;
        self.require_joined(&room_id, "type").await?;

        let timeout = request
            .timeout
            .unwrap_or(self.ctx.config().commands.typing_timeout);
        let operation = Operation::Typing {
            typing: request.typing,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();
        self.detach(SetTyping::NAME, deadline, async move {
            let sent = transport
                .send_operation(Some(&room_id), &operation)
                .await
                .map(drop)
                .map_err(EngineError::from);
            finish_command(&ctx, SetTyping::NAME, Some(room_id), sent, |_| None)
        })
        .await
    }

    /// Reads a page of timeline from the store, newest first.
    ///
    /// Never touches the network; a page ending in
    /// [`TimelineEnd::NeedsBackfill`](roomline_store::TimelineEnd::NeedsBackfill)
    /// carries the token for fetching older history.
    ///
    /// # Errors
    ///
    /// [`EngineError::Precondition`] for a room the store has never seen.
    pub async fn paginate(&self, request: Paginate) -> EngineResult<TimelinePage> {
        request.validate()?;
        self.ensure_open()?;
        let Paginate {
            room_id,
            before,
            limit,
        } = request;
        self.ctx
            .read_store(move |store| store.get_timeline(&room_id, before, limit))
            .await?
            .map_err(|e| match e {
                StoreError::UnknownRoom(room_id) => {
                    EngineError::precondition(format!("unknown room {room_id}"))
                }
                other => other.into(),
            })
    }

    /// Rooms that have had a lane so far.
    pub fn lanes(&self) -> &RoomLanes {
        &self.lanes
    }

    async fn send(
        &self,
        command: &'static str,
        outgoing: Outgoing,
        deadline: Option<Duration>,
    ) -> EngineResult<SendReceipt> {
        let deadline = self.deadline(deadline);
        let lane = self.lane(&outgoing.room_id, deadline).await?;
        self.ensure_open()?;
        self.require_joined(&outgoing.room_id, "send").await?;

        let (wire_type, wire_content) = match self.encrypt(&outgoing, deadline).await {
            Ok(wire) => wire,
            Err(EngineError::TimedOut) => return Err(EngineError::TimedOut),
            Err(e) => {
                warn!(room_id = %outgoing.room_id, txn_id = %outgoing.txn_id, error = %e, "encryption failed");
                self.ctx.emitter().emit(Notification::SendFailed {
                    room_id: outgoing.room_id,
                    txn_id: outgoing.txn_id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        let operation = Operation::SendEvent {
            event_type: wire_type,
            content: wire_content,
            txn_id: outgoing.txn_id.clone(),
        };

        let transport = Arc::clone(&self.transport);
        let ctx = self.ctx.clone();
        self.detach(command, deadline, async move {
            let _lane = lane;
            let Outgoing {
                room_id,
                event_type,
                content,
                txn_id,
            } = outgoing;
            let sent = match transport.send_operation(Some(&room_id), &operation).await {
                Ok(OperationAck {
                    event_id: Some(event_id),
                    ..
                }) => Ok(event_id),
                Ok(_) => Err(missing_in_ack("event id")),
                Err(e) => Err(EngineError::from(e)),
            };

            match sent {
                Ok(event_id) => {
                    let echo = Event::new(
                        event_id.clone(),
                        room_id.clone(),
                        ctx.user_id().clone(),
                        event_type,
                        content,
                    )
                    .with_timestamp(now_ms())
                    .with_txn_id(txn_id.clone());
                    record_echo(&ctx, echo, txn_id.clone()).await;
                    debug!(room_id = %room_id, txn_id = %txn_id, event_id = %event_id, "send complete");
                    ctx.emitter().emit(Notification::SendComplete {
                        room_id: room_id.clone(),
                        txn_id: txn_id.clone(),
                        event_id: event_id.clone(),
                    });
                    Ok(SendReceipt {
                        room_id,
                        txn_id,
                        event_id,
                    })
                }
                Err(e) => {
                    warn!(room_id = %room_id, txn_id = %txn_id, error = %e, "send failed");
                    ctx.emitter().emit(Notification::SendFailed {
                        room_id,
                        txn_id,
                        error: e.to_string(),
                    });
                    Err(e)
                }
            }
        })
        .await
    }

    /// Ciphertext type and content for encrypted rooms, the plaintext
    /// otherwise.
    async fn encrypt(
        &self,
        outgoing: &Outgoing,
        deadline: Instant,
    ) -> EngineResult<(String, Value)> {
        let room_id = outgoing.room_id.clone();
        let encrypted = self
            .ctx
            .read_store(move |store| store.is_encrypted(&room_id))
            .await?;
        if !encrypted {
            return Ok((outgoing.event_type.clone(), outgoing.content.clone()));
        }
        let ciphertext = timeout_at(
            deadline,
            self.crypto
                .encrypt(&outgoing.room_id, &outgoing.event_type, &outgoing.content),
        )
        .await
        .map_err(|_| EngineError::TimedOut)??;
        Ok((types::ROOM_ENCRYPTED.to_string(), ciphertext))
    }

    /// Runs `work` in its own task and waits for it until `deadline`.
    ///
    /// On timeout the task keeps running; only the caller stops waiting.
    async fn detach<T, F>(&self, command: &'static str, deadline: Instant, work: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: Future<Output = EngineResult<T>> + Send + 'static,
    {
        let task = tokio::spawn(work);
        match timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                debug!(command, "caller deadline passed, operation continues");
                Err(EngineError::TimedOut)
            }
        }
    }

    async fn lane(&self, room_id: &RoomId, deadline: Instant) -> EngineResult<LaneGuard> {
        timeout_at(deadline, self.lanes.acquire(room_id))
            .await
            .map_err(|_| EngineError::TimedOut)
    }

    fn deadline(&self, requested: Option<Duration>) -> Instant {
        Instant::now() + requested.unwrap_or(self.ctx.config().commands.default_deadline)
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.ctx.is_shut_down() {
            return Err(EngineError::Shutdown);
        }
        Ok(())
    }

    async fn membership(&self, room_id: &RoomId) -> EngineResult<Option<Membership>> {
        let room_id = room_id.clone();
        self.ctx
            .read_store(move |store| store.own_membership(&room_id))
            .await
    }

    async fn require_joined(&self, room_id: &RoomId, action: &str) -> EngineResult<()> {
        match self.membership(room_id).await? {
            Some(Membership::Joined) => Ok(()),
            other => Err(not_member(action, room_id, other)),
        }
    }
}

fn not_member(action: &str, room_id: &RoomId, membership: Option<Membership>) -> EngineError {
    match membership {
        Some(m) => EngineError::precondition(format!(
            "cannot {action} in {room_id}: membership is {}",
            m.as_content()
        )),
        None => EngineError::precondition(format!("cannot {action} in unknown room {room_id}")),
    }
}

fn missing_in_ack(what: &str) -> EngineError {
    EngineError::Transport {
        status: None,
        message: format!("server acknowledged without {what}"),
        retryable: false,
    }
}

/// Emits `CommandComplete` or `CommandFailed` for `result` and passes it on.
fn finish_command<T>(
    ctx: &AccountContext,
    command: &'static str,
    room_id: Option<RoomId>,
    result: EngineResult<T>,
    room_of: impl FnOnce(&T) -> Option<RoomId>,
) -> EngineResult<T> {
    match &result {
        Ok(value) => {
            let room_id = room_of(value).or(room_id);
            debug!(command, room_id = ?room_id, "command complete");
            ctx.emitter()
                .emit(Notification::CommandComplete { command, room_id });
        }
        Err(e) => {
            warn!(command, room_id = ?room_id, error = %e, "command failed");
            ctx.emitter().emit(Notification::CommandFailed {
                command,
                room_id,
                error: e.to_string(),
            });
        }
    }
    result
}

/// Stores the local echo of an accepted operation.
///
/// The server already holds the event, so a failure here is logged and the
/// event arrives through sync instead.
async fn record_echo(ctx: &AccountContext, event: Event, txn_id: TransactionId) {
    let store = Arc::clone(ctx.store());
    let room_id = event.room_id.clone();
    let stored =
        tokio::task::spawn_blocking(move || store.insert_local_event(event, txn_id)).await;
    match stored {
        Ok(Ok(row)) => debug!(room_id = %room_id, position = %row.position, "local echo stored"),
        Ok(Err(e)) => error!(room_id = %room_id, error = %e, "failed to store local echo"),
        Err(e) => error!(room_id = %room_id, error = %e, "local echo task failed"),
    }
}

async fn move_read_marker(ctx: &AccountContext, room_id: &RoomId, event_id: &EventId) -> RoomSummary {
    let store = Arc::clone(ctx.store());
    let (room, event) = (room_id.clone(), event_id.clone());
    let moved = tokio::task::spawn_blocking(move || store.set_read_marker(&room, &event)).await;
    match moved {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            error!(room_id = %room_id, event_id = %event_id, error = %e, "failed to store read marker");
            current_summary(ctx, room_id).await
        }
        Err(e) => {
            error!(room_id = %room_id, error = %e, "read marker task failed");
            current_summary(ctx, room_id).await
        }
    }
}

async fn current_summary(ctx: &AccountContext, room_id: &RoomId) -> RoomSummary {
    let room = room_id.clone();
    ctx.read_store(move |store| store.get_room_summary(&room))
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| RoomSummary::empty(room_id.clone()))
}

fn new_txn_id() -> TransactionId {
    TransactionId::new(uuid::Uuid::new_v4().simple().to_string())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
