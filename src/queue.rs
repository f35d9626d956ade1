//! Bounded blocking queue bridging the mixer thread and its consumers.
//!
//! Producers block while the queue is full and consumers block while it is
//! empty, unless the queue has been stopped: a stopped queue discards
//! enqueued items and never blocks a dequeue. Non-blocking variants move
//! whatever fits or is available and return immediately.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    running: bool,
}

/// Bounded multi-producer multi-consumer queue.
pub struct RwQueue<T> {
    state: Mutex<QueueState<T>>,
    has_room: Condvar,
    has_items: Condvar,
}

impl<T: Copy> RwQueue<T> {
    /// Create a running queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                capacity,
                running: true,
            }),
            has_room: Condvar::new(),
            has_items: Condvar::new(),
        }
    }

    /// Change the capacity, dropping the oldest items that no longer fit.
    pub fn resize(&self, capacity: usize) {
        let mut state = self.state.lock();
        state.capacity = capacity;
        while state.items.len() > capacity {
            state.items.pop_front();
        }
        let additional = capacity.saturating_sub(state.items.len());
        state.items.reserve(additional);
        drop(state);
        self.has_room.notify_all();
    }

    /// Resume normal blocking behaviour.
    pub fn start(&self) {
        self.state.lock().running = true;
    }

    /// Stop the queue, waking every blocked producer and consumer.
    pub fn stop(&self) {
        self.state.lock().running = false;
        self.has_room.notify_all();
        self.has_items.notify_all();
    }

    /// Whether the queue is running.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Items currently queued.
    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Capacity in items.
    pub fn max_capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Drop every queued item.
    pub fn clear(&self) {
        self.state.lock().items.clear();
        self.has_room.notify_all();
    }

    /// Enqueue all of `items`, blocking for room as needed.
    ///
    /// Returns the number of items enqueued; a stopped queue accepts nothing.
    pub fn bulk_enqueue(&self, items: &[T]) -> usize {
        let mut state = self.state.lock();
        let mut written = 0;
        while written < items.len() {
            if !state.running {
                break;
            }
            let room = state.capacity.saturating_sub(state.items.len());
            if room == 0 {
                self.has_room.wait(&mut state);
                continue;
            }
            let take = room.min(items.len() - written);
            state.items.extend(&items[written..written + take]);
            written += take;
            self.has_items.notify_all();
        }
        written
    }

    /// Enqueue as many of `items` as currently fit without blocking.
    pub fn nonblocking_bulk_enqueue(&self, items: &[T]) -> usize {
        let mut state = self.state.lock();
        if !state.running {
            return 0;
        }
        let take = state.capacity.saturating_sub(state.items.len()).min(items.len());
        state.items.extend(&items[..take]);
        drop(state);
        if take > 0 {
            self.has_items.notify_all();
        }
        take
    }

    /// Dequeue `count` items into `out`, blocking until they arrive.
    ///
    /// Returns early with fewer items if the queue is stopped.
    pub fn bulk_dequeue(&self, out: &mut Vec<T>, count: usize) -> usize {
        let mut state = self.state.lock();
        let mut read = 0;
        while read < count {
            if state.items.is_empty() {
                if !state.running {
                    break;
                }
                self.has_items.wait(&mut state);
                continue;
            }
            let take = state.items.len().min(count - read);
            out.extend(state.items.drain(..take));
            read += take;
            self.has_room.notify_all();
        }
        read
    }

    /// Fill the front of `out` with whatever is queued, without blocking.
    pub fn nonblocking_bulk_dequeue(&self, out: &mut [T]) -> usize {
        let mut state = self.state.lock();
        let take = state.items.len().min(out.len());
        for (slot, item) in out.iter_mut().zip(state.items.drain(..take)) {
            *slot = item;
        }
        drop(state);
        if take > 0 {
            self.has_room.notify_all();
        }
        take
    }
}
