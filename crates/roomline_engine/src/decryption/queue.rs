//! In-memory decryption task queue.
//!
//! Tasks move between three places: the ready queue, in flight with a
//! worker, and parked on the session whose key they wait for. A task exists
//! at most once, so re-enqueueing a known event does nothing.

use roomline_protocol::{EventId, RoomId, SessionRef};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Identifies one task.
pub(crate) type TaskKey = (RoomId, EventId);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Ready,
    InFlight,
    Parked { session: SessionRef, since: u64 },
}

#[derive(Debug)]
struct Task {
    attempts: u32,
    slot: Slot,
}

/// What happened to a task whose key was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parked {
    /// Waiting for its key or the cycle timer.
    Waiting,
    /// The key arrived while the attempt was running; queued again.
    Requeued,
    /// Out of attempts; the task was removed.
    Exhausted,
}

#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: HashMap<TaskKey, Task>,
    ready: VecDeque<TaskKey>,
    parked: HashMap<SessionRef, BTreeSet<TaskKey>>,
    /// Keys that arrived while tasks were in flight.
    arrived_in_flight: HashSet<SessionRef>,
    in_flight: usize,
    cycle: u64,
}

impl TaskQueue {
    /// Adds a task. False if the event already has one.
    pub fn enqueue(&mut self, key: TaskKey) -> bool {
        if self.tasks.contains_key(&key) {
            return false;
        }
        self.tasks.insert(
            key.clone(),
            Task {
                attempts: 0,
                slot: Slot::Ready,
            },
        );
        self.ready.push_back(key);
        true
    }

    /// Moves up to `max` ready tasks in flight, oldest first.
    pub fn take_batch(&mut self, max: usize) -> Vec<TaskKey> {
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(key) = self.ready.pop_front() else {
                break;
            };
            if let Some(task) = self.tasks.get_mut(&key) {
                if task.slot == Slot::Ready {
                    task.slot = Slot::InFlight;
                    self.in_flight += 1;
                    batch.push(key);
                }
            }
        }
        batch
    }

    /// Drops a finished task (resolved, skipped or failed for good).
    pub fn complete(&mut self, key: &TaskKey) {
        if let Some(task) = self.tasks.remove(key) {
            match task.slot {
                Slot::InFlight => self.land(),
                Slot::Parked { session, .. } => self.unpark(&session, key),
                Slot::Ready => self.ready.retain(|k| k != key),
            }
        }
    }

    /// Records a key-missing attempt for an in-flight task.
    pub fn park(&mut self, key: &TaskKey, session: SessionRef, max_attempts: u32) -> Parked {
        let Some(task) = self.tasks.get_mut(key) else {
            return Parked::Exhausted;
        };
        if task.slot == Slot::InFlight {
            self.in_flight -= 1;
        }
        task.attempts += 1;

        let outcome = if task.attempts >= max_attempts {
            self.tasks.remove(key);
            Parked::Exhausted
        } else if self.arrived_in_flight.contains(&session) {
            task.slot = Slot::Ready;
            self.ready.push_back(key.clone());
            Parked::Requeued
        } else {
            task.slot = Slot::Parked {
                session: session.clone(),
                since: self.cycle,
            };
            self.parked.entry(session).or_default().insert(key.clone());
            Parked::Waiting
        };
        if self.in_flight == 0 {
            self.arrived_in_flight.clear();
        }
        outcome
    }

    /// Releases every task parked on `session`. Returns how many.
    pub fn key_arrived(&mut self, session: &SessionRef) -> usize {
        if self.in_flight > 0 {
            self.arrived_in_flight.insert(session.clone());
        }
        let Some(keys) = self.parked.remove(session) else {
            return 0;
        };
        let mut released = 0;
        for key in keys {
            if let Some(task) = self.tasks.get_mut(&key) {
                task.slot = Slot::Ready;
                self.ready.push_back(key);
                released += 1;
            }
        }
        released
    }

    /// Counts a sync cycle and releases tasks parked for `retry_after`
    /// cycles. Returns how many.
    pub fn tick(&mut self, retry_after: u64) -> usize {
        self.cycle += 1;
        let due: Vec<(SessionRef, TaskKey)> = self
            .tasks
            .iter()
            .filter_map(|(key, task)| match &task.slot {
                Slot::Parked { session, since } if self.cycle - since >= retry_after => {
                    Some((session.clone(), key.clone()))
                }
                _ => None,
            })
            .collect();

        for (session, key) in &due {
            self.unpark(session, key);
            if let Some(task) = self.tasks.get_mut(key) {
                task.slot = Slot::Ready;
                self.ready.push_back(key.clone());
            }
        }
        due.len()
    }

    /// Attempts recorded for a task.
    #[cfg(test)]
    pub fn attempts(&self, key: &TaskKey) -> Option<u32> {
        self.tasks.get(key).map(|t| t.attempts)
    }

    /// Tasks in any state.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks waiting for a key.
    pub fn parked_len(&self) -> usize {
        self.parked.values().map(BTreeSet::len).sum()
    }

    /// Tasks ready for a worker.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    fn land(&mut self) {
        self.in_flight -= 1;
        if self.in_flight == 0 {
            self.arrived_in_flight.clear();
        }
    }

    fn unpark(&mut self, session: &SessionRef, key: &TaskKey) {
        if let Some(keys) = self.parked.get_mut(session) {
            keys.remove(key);
            if keys.is_empty() {
                self.parked.remove(session);
            }
        }
    }
}
