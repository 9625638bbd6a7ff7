//! Deduplicating work queue with per-key backoff
//!
//! A key is in at most one of: queued (`dirty`), running (`processing`).
//! Adding a queued key is a no-op; adding a running key marks it dirty so it
//! is queued again once the worker calls [`WorkQueue::done`]. Different keys
//! run in parallel, the same key never does.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::backoff::Backoff;

/// Bounds for queue keys
pub trait QueueKey: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> QueueKey for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Where a key is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyState {
    /// Not known to the queue
    Idle,
    /// Waiting for a worker
    Queued,
    /// A worker is reconciling it (it may also be dirty again)
    Running,
    /// Parked on a delayed add
    Waiting,
}

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    waiting: HashMap<K, Instant>,
    failures: HashMap<K, u32>,
    shutting_down: bool,
}

struct Inner<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    backoff: Mutex<Backoff>,
}

/// Shared handle to a work queue
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: QueueKey> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

impl<K: QueueKey> WorkQueue<K> {
    /// Create an empty queue retrying failures with `backoff`
    pub fn new(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    waiting: HashMap::new(),
                    failures: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff: Mutex::new(backoff),
            }),
        }
    }

    /// Queue `key` unless it is already queued
    pub fn add(&self, key: K) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(?key, "marked dirty while running");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue `key` after `delay`
    ///
    /// Several delayed adds of one key keep only the earliest deadline.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            match state.waiting.get(&key) {
                Some(existing) if *existing <= deadline => return,
                _ => {
                    state.waiting.insert(key.clone(), deadline);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let fire = {
                let mut state = queue.inner.state.lock();
                match state.waiting.get(&key) {
                    Some(at) if *at == deadline => {
                        state.waiting.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if fire {
                queue.add(key);
            }
        });
    }

    /// Queue `key` after its backoff delay, counting one more failure
    pub fn add_rate_limited(&self, key: K) {
        let failures = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = self.inner.backoff.lock().delay(failures);
        trace!(?key, failures, ?delay, "rate limited requeue");
        self.add_after(key, delay);
    }

    /// Retry later failures with `backoff`; counts already kept are reused
    pub fn set_backoff(&self, backoff: Backoff) {
        *self.inner.backoff.lock() = backoff;
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &K) {
        self.inner.state.lock().failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next key; `None` once the queue is shut down
    ///
    /// The key is marked running until [`WorkQueue::done`] is called.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Finish running `key`, queueing it again if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.inner.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shutdown`] was called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    /// Number of keys waiting for a worker
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Whether no key is waiting for a worker
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifecycle state of `key`
    pub fn state(&self, key: &K) -> KeyState {
        let state = self.inner.state.lock();
        if state.processing.contains(key) {
            KeyState::Running
        } else if state.dirty.contains(key) {
            KeyState::Queued
        } else if state.waiting.contains_key(key) {
            KeyState::Waiting
        } else {
            KeyState::Idle
        }
    }
}
