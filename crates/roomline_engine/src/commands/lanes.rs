//! Per-room command lanes.

use parking_lot::Mutex;
use roomline_protocol::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Held while a command owns its room's lane.
pub type LaneGuard = OwnedMutexGuard<()>;

/// One FIFO lane per room.
///
/// Commands on the same room run one at a time in the order they asked for
/// the lane; commands on different rooms do not wait for each other.
#[derive(Debug, Default)]
pub struct RoomLanes {
    lanes: Mutex<HashMap<RoomId, Arc<AsyncMutex<()>>>>,
}

impl RoomLanes {
    /// Waits for the lane of `room_id`.
    pub async fn acquire(&self, room_id: &RoomId) -> LaneGuard {
        let lane = Arc::clone(self.lanes.lock().entry(room_id.clone()).or_default());
        lane.lock_owned().await
    }

    /// Rooms that have had a lane.
    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }

    /// True before any command used a lane.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
