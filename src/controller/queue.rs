//! Deduplicating, rate-limited work queue.
//!
//! Keys move through three states: queued, dirty and processing. Adding a
//! key that is already queued is a no-op; adding a key that is currently
//! being processed marks it dirty so it is re-queued the moment `done` is
//! called. Between `get` and `done` a key is held by exactly one consumer,
//! which is the only mutual exclusion the reconciler relies on.
//!
//! `WorkQueue` is a cheap handle over shared state; clones feed the same
//! queue.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1000);

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

struct QueueInner {
    name: &'static str,
    base_delay: Duration,
    max_delay: Duration,
    state: Mutex<QueueState>,
    notify: Notify,
}

#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<QueueInner>,
}

impl WorkQueue {
    pub fn named(name: &'static str) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name,
                base_delay: BASE_DELAY,
                max_delay: MAX_DELAY,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue a key for processing. Duplicate of a queued key is dropped;
    /// duplicate of an in-flight key is deferred until `done`.
    pub fn add(&self, key: &str) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutting_down {
                return;
            }
            if !state.dirty.insert(key.to_string()) {
                return;
            }
            if state.processing.contains(key) {
                return;
            }
            state.queue.push_back(key.to_string());
        }
        self.inner.notify.notify_one();
    }

    /// Pop the next key, waiting if the queue is empty. Returns `None` once
    /// the queue has been shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock().unwrap();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        // keep sibling workers draining
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release a key obtained from `get`. Re-queues it when it went dirty
    /// while being processed.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.inner.state.lock().unwrap();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.inner.notify.notify_one();
        }
    }

    /// Re-enqueue a key after its per-key exponential backoff delay.
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.next_delay(key);
        trace!(queue = self.inner.name, key, ?delay, "scheduling rate-limited re-add");
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Reset the backoff counter for a key.
    pub fn forget(&self, key: &str) {
        self.inner.state.lock().unwrap().failures.remove(key);
    }

    /// Stop accepting new keys and let `get` drain to `None`.
    pub fn shut_down(&self) {
        self.inner.state.lock().unwrap().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().unwrap().queue.is_empty()
    }

    fn next_delay(&self, key: &str) -> Duration {
        let mut state = self.inner.state.lock().unwrap();
        let failures = state.failures.entry(key.to_string()).or_insert(0);
        let exponent = (*failures).min(31);
        *failures += 1;
        self.inner
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.inner.max_delay)
    }
}
