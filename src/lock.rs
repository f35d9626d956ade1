//! Pause-then-lock guard for engine-wide reconfiguration.
//!
//! Some devices produce audio on their own threads and block on the mixer
//! while doing so. Before the engine lock is taken every registered producer
//! is paused; after the lock is released they are resumed in reverse order.

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};

/// A producer that can be paused while the mixer is reconfigured.
pub trait ProducerPause: Send + Sync {
    /// Stop producing and release any mixer-facing locks.
    fn pause(&self);
    /// Resume producing.
    fn resume(&self);
}

/// Registration handle for a pause hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PauseHookId(u64);

/// Ordered list of registered pause hooks.
#[derive(Default)]
pub struct PauseHooks {
    hooks: Mutex<Vec<(PauseHookId, Arc<dyn ProducerPause>)>>,
    next_id: Mutex<u64>,
}

impl PauseHooks {
    /// Register a hook; hooks pause in registration order.
    pub fn register(&self, hook: Arc<dyn ProducerPause>) -> PauseHookId {
        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            PauseHookId(*next)
        };
        self.hooks.lock().push((id, hook));
        id
    }

    /// Remove a hook; returns false if it was not registered.
    pub fn deregister(&self, id: PauseHookId) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    /// True when no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn ProducerPause>> {
        self.hooks.lock().iter().map(|(_, hook)| Arc::clone(hook)).collect()
    }
}

/// Guard holding a re-entrant lock while producers are paused.
///
/// Dropping the guard releases the lock first, then resumes the paused
/// producers in reverse order.
pub struct PauseThenLock<'a, T> {
    guard: Option<ReentrantMutexGuard<'a, T>>,
    paused: Vec<Arc<dyn ProducerPause>>,
}

impl<'a, T> PauseThenLock<'a, T> {
    /// Pause every hook, then acquire `mutex`.
    pub fn acquire(hooks: &PauseHooks, mutex: &'a ReentrantMutex<T>) -> Self {
        let paused = hooks.snapshot();
        for hook in &paused {
            hook.pause();
        }
        Self {
            guard: Some(mutex.lock()),
            paused,
        }
    }
}

impl<T> std::ops::Deref for PauseThenLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.guard {
            Some(guard) => guard,
            None => unreachable!("guard is only taken in drop"),
        }
    }
}

impl<T> Drop for PauseThenLock<'_, T> {
    fn drop(&mut self) {
        drop(self.guard.take());
        for hook in self.paused.iter().rev() {
            hook.resume();
        }
    }
}
