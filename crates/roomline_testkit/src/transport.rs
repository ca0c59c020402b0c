//! A sync transport driven by a script.

use async_trait::async_trait;
use parking_lot::Mutex;
use roomline_engine::{SyncResponse, SyncTransport, TransportError, TransportResult};
use roomline_protocol::{EventId, Operation, OperationAck, RoomId, SyncBatch, SyncCursor};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// An operation the engine sent, with the room it was addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct SentOperation {
    /// Target room, `None` for room creation.
    pub room_id: Option<RoomId>,
    /// The operation.
    pub operation: Operation,
}

/// Serves queued sync responses in order and records everything sent.
///
/// A sync request with nothing queued waits until a response is pushed,
/// like a long-poll with no new events. Operations are acknowledged from
/// the ack queue, or with generated ids when it is empty.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<TransportResult<SyncResponse>>>,
    pushed: Notify,
    sync_requests: Mutex<Vec<Option<SyncCursor>>>,
    acks: Mutex<VecDeque<TransportResult<OperationAck>>>,
    operations: Mutex<Vec<SentOperation>>,
    operation_delay: Mutex<Option<Duration>>,
    next_id: AtomicU64,
}

impl ScriptedTransport {
    /// An empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful sync response.
    pub fn push_sync(&self, batch: SyncBatch, next_cursor: SyncCursor) {
        self.push(Ok(SyncResponse::new(batch, next_cursor)));
    }

    /// Queues a failed sync request.
    pub fn push_sync_error(&self, error: TransportError) {
        self.push(Err(error));
    }

    fn push(&self, step: TransportResult<SyncResponse>) {
        self.script.lock().push_back(step);
        self.pushed.notify_waiters();
    }

    /// Queues the result of the next operation.
    pub fn push_ack(&self, ack: TransportResult<OperationAck>) {
        self.acks.lock().push_back(ack);
    }

    /// Makes every operation take `delay` before it is acknowledged.
    pub fn set_operation_delay(&self, delay: Duration) {
        *self.operation_delay.lock() = Some(delay);
    }

    /// Cursors of every sync request so far.
    pub fn sync_requests(&self) -> Vec<Option<SyncCursor>> {
        self.sync_requests.lock().clone()
    }

    /// Operations sent so far, in order.
    pub fn operations(&self) -> Vec<SentOperation> {
        self.operations.lock().clone()
    }

    /// Queued sync responses not yet served.
    pub fn pending_syncs(&self) -> usize {
        self.script.lock().len()
    }

    fn generated_ack(&self, room_id: Option<&RoomId>, operation: &Operation) -> OperationAck {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        match operation {
            Operation::SendEvent { .. } | Operation::SetState { .. } => {
                OperationAck::event(EventId::new(format!("$server-{n}")))
            }
            Operation::CreateRoom { .. } => OperationAck::room(RoomId::new(format!("!created-{n}:test"))),
            Operation::Join => room_id.cloned().map(OperationAck::room).unwrap_or_default(),
            _ => OperationAck::default(),
        }
    }
}

#[async_trait]
impl SyncTransport for ScriptedTransport {
    async fn request_sync(
        &self,
        cursor: Option<&SyncCursor>,
        _timeout: Duration,
    ) -> TransportResult<SyncResponse> {
        self.sync_requests.lock().push(cursor.cloned());
        loop {
            let pushed = self.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();
            let step = self.script.lock().pop_front();
            if let Some(step) = step {
                return step;
            }
            pushed.await;
        }
    }

    async fn send_operation(
        &self,
        room_id: Option<&RoomId>,
        operation: &Operation,
    ) -> TransportResult<OperationAck> {
        self.operations.lock().push(SentOperation {
            room_id: room_id.cloned(),
            operation: operation.clone(),
        });
        let delay = *self.operation_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.acks.lock().pop_front();
        queued.unwrap_or_else(|| Ok(self.generated_ack(room_id, operation)))
    }
}
