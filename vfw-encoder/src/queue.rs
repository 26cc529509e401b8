//! Bounded FIFO shared by the pipeline stages.
//!
//! An item popped by a worker stays counted against its queue ("in flight")
//! until the worker forwards it downstream or releases it with
//! [`StageQueue::finish`]. That keeps [`StageQueue::len`] honest for the
//! admission check while the slow part of a stage runs without the lock.
//!
//! Locks are always taken in pipeline order (pre → compress → post → final);
//! [`admit`] and [`StageQueue::forward`] both follow it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::frame::FrameItem;

pub struct StageQueue {
    name: &'static str,
    // None = unbounded
    capacity: Option<usize>,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<FrameItem>,
    in_flight: usize,
}

impl QueueState {
    fn len(&self) -> usize {
        self.items.len() + self.in_flight
    }
}

impl StageQueue {
    pub fn bounded(name: &'static str, capacity: usize, shutdown: CancellationToken) -> Self {
        Self::with_capacity(name, Some(capacity), shutdown)
    }

    pub fn unbounded(name: &'static str, shutdown: CancellationToken) -> Self {
        Self::with_capacity(name, None, shutdown)
    }

    fn with_capacity(
        name: &'static str,
        capacity: Option<usize>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            name,
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.unwrap_or(8).min(1024)),
                in_flight: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Queued plus in-flight items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A worker that panicked mid-stage must not wedge shutdown.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn has_room(&self, state: &QueueState) -> bool {
        self.capacity.is_none_or(|cap| state.len() < cap)
    }

    /// Appends `item` unless the queue is full or shut down, in which case
    /// the item is handed back untouched.
    pub fn try_push(&self, item: FrameItem) -> Result<(), FrameItem> {
        if self.is_shutdown() {
            return Err(item);
        }
        let mut state = self.lock();
        if !self.has_room(&state) {
            return Err(item);
        }
        state.items.push_back(item);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Waits for the next item. Returns `None` once shutdown is signalled,
    /// even if items are still queued.
    ///
    /// The returned item counts as in flight until [`forward`](Self::forward)
    /// or [`finish`](Self::finish).
    pub fn pop_blocking(&self) -> Option<FrameItem> {
        let mut state = self.lock();
        loop {
            if self.is_shutdown() {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                state.in_flight += 1;
                return Some(item);
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Moves an in-flight item into `next`, waiting while `next` is full.
    ///
    /// Returns `false` if shutdown fired first; the item is discarded.
    pub fn forward(&self, next: &StageQueue, item: FrameItem) -> bool {
        loop {
            let mut src = self.lock();
            let mut dst = next.lock();
            if self.is_shutdown() {
                src.in_flight = src.in_flight.saturating_sub(1);
                self.not_full.notify_all();
                return false;
            }
            if next.has_room(&dst) {
                dst.items.push_back(item);
                src.in_flight = src.in_flight.saturating_sub(1);
                next.not_empty.notify_all();
                self.not_full.notify_all();
                return true;
            }
            drop(src);
            // Waking re-takes the locks in order, so `dst` is released first.
            let dst = next
                .not_full
                .wait(dst)
                .unwrap_or_else(PoisonError::into_inner);
            drop(dst);
        }
    }

    /// Releases an in-flight slot whose item was dropped.
    pub fn finish(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.not_full.notify_all();
    }

    /// Pops the oldest item, but only when more than `threshold` items are
    /// queued. Never blocks.
    pub fn pop_if_deeper_than(&self, threshold: usize) -> Option<FrameItem> {
        let mut state = self.lock();
        if state.items.len() <= threshold {
            return None;
        }
        let item = state.items.pop_front();
        self.not_full.notify_all();
        item
    }

    /// Wakes every waiter so it can observe shutdown.
    pub fn wake(&self) {
        let _state = self.lock();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Pushes `item` onto the first queue of `chain`, but only if every queue in
/// `chain` has room. All locks are held for the check and the push.
pub fn admit(chain: &[&StageQueue], item: FrameItem) -> Result<(), FrameItem> {
    let Some(first) = chain.first() else {
        return Err(item);
    };
    if first.is_shutdown() {
        return Err(item);
    }
    let mut guards: Vec<MutexGuard<'_, QueueState>> = chain.iter().map(|q| q.lock()).collect();
    let room = chain
        .iter()
        .zip(guards.iter())
        .all(|(queue, state)| queue.has_room(state));
    if !room {
        return Err(item);
    }
    guards[0].items.push_back(item);
    first.not_empty.notify_all();
    Ok(())
}

/// The three bounded stage queues plus the unbounded final queue.
pub struct StageQueues {
    pub pre: StageQueue,
    pub compress: StageQueue,
    pub post: StageQueue,
    pub output: StageQueue,
}

impl StageQueues {
    pub fn new(max_queue_size: usize, shutdown: CancellationToken) -> Self {
        Self {
            pre: StageQueue::bounded("pre-process", max_queue_size, shutdown.clone()),
            compress: StageQueue::bounded("compress", max_queue_size, shutdown.clone()),
            post: StageQueue::bounded("post-process", max_queue_size, shutdown.clone()),
            output: StageQueue::unbounded("final", shutdown),
        }
    }

    /// Queues a new frame must fit into, in lock order.
    pub fn admission_chain(&self) -> [&StageQueue; 3] {
        [&self.pre, &self.compress, &self.post]
    }

    pub fn wake_all(&self) {
        self.pre.wake();
        self.compress.wake();
        self.post.wake();
        self.output.wake();
    }

    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            pre: self.pre.len(),
            compress: self.compress.len(),
            post: self.post.len(),
            output: self.output.len(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub pre: usize,
    pub compress: usize,
    pub post: usize,
    pub output: usize,
}

impl QueueDepths {
    /// Deepest of the three bounded stages.
    pub fn max_stage(&self) -> usize {
        self.pre.max(self.compress).max(self.post)
    }
}
