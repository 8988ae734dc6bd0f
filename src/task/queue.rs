//! Bounded dispatch queue shared by the worker pool.
//!
//! In FIFO mode every entry has the same rank, so the heap degenerates to
//! submission order. In priority mode higher priorities are dispatched
//! first and equal priorities keep submission order.

use crate::task::types::{TaskId, TaskPriority};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// How workers choose the next task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOrder {
    /// Strict submission order; priority is advisory only
    #[default]
    Fifo,
    /// Highest priority first, FIFO among equal priorities
    Priority,
}

#[derive(Debug, PartialEq, Eq)]
struct QueuedTask {
    rank: u8,
    sequence: Reverse<u64>,
    task_id: TaskId,
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Why an id was handed back by [`DispatchQueue::try_push`]
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushError {
    Full(TaskId),
    Closed(TaskId),
}

#[derive(Debug)]
struct QueueState {
    heap: BinaryHeap<QueuedTask>,
    closed: bool,
}

#[derive(Debug)]
pub(crate) struct DispatchQueue {
    order: DispatchOrder,
    capacity: usize,
    state: Mutex<QueueState>,
    available: Notify,
}

impl DispatchQueue {
    pub(crate) fn new(order: DispatchOrder, capacity: usize) -> Self {
        Self {
            order,
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                heap: BinaryHeap::with_capacity(capacity.clamp(1, 4096)),
                closed: false,
            }),
            available: Notify::new(),
        }
    }

    /// Enqueue without waiting. Hands the id back when the queue is full or closed.
    pub(crate) fn try_push(
        &self,
        task_id: TaskId,
        priority: TaskPriority,
        sequence: u64,
    ) -> Result<(), PushError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(PushError::Closed(task_id));
            }
            if state.heap.len() >= self.capacity {
                return Err(PushError::Full(task_id));
            }
            let rank = match self.order {
                DispatchOrder::Fifo => 0,
                DispatchOrder::Priority => priority.value(),
            };
            state.heap.push(QueuedTask {
                rank,
                sequence: Reverse(sequence),
                task_id,
            });
        }
        self.available.notify_one();
        Ok(())
    }

    /// Wait for the next task id
    pub(crate) async fn pop(&self) -> TaskId {
        loop {
            if let Some(entry) = self.lock().heap.pop() {
                return entry.task_id;
            }
            self.available.notified().await;
        }
    }

    /// Refuse further pushes and remove every queued id, in dispatch order
    ///
    /// Closing and pushing share the lock, so an id is either returned here
    /// or rejected with [`PushError::Closed`].
    pub(crate) fn close(&self) -> Vec<TaskId> {
        let heap = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.heap)
        };
        heap.into_sorted_vec()
            .into_iter()
            .rev()
            .map(|entry| entry.task_id)
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
