//! Named timer registry.
//!
//! Every scheduled callback in the engine (deferred open, connect guard,
//! ping, pong, reconnect delay) runs through this registry. The invariant:
//! at most one live timer per key. Arming a key cancels whatever was armed
//! under it before, and a timer clears its own entry when it fires.
//!
//! A generation stamp is compared before the callback runs, so the callback
//! of a timer that was cancelled or superseded after its sleep completed is
//! dropped instead of racing the replacement. The single-threaded source
//! never faced that race; the stamp is deliberate hardening, not
//! behavior-preserving.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

/// Keys of the scheduled callbacks the engine owns.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    /// Deferred automatic open scheduled at construction
    Open,
    /// Connect-timeout guard
    Connect,
    /// Heartbeat ping interval
    Ping,
    /// Heartbeat pong deadline
    Pong,
    /// Backoff delay before a reconnection attempt
    Reconnect,
}

#[derive(Debug, Default)]
pub(crate) struct TimerRegistry {
    /// Key → generation of the currently armed timer. The generation is
    /// registered before the task is spawned, so even a zero-delay timer
    /// finds itself armed when it wakes.
    armed: Arc<DashMap<TimerKey, u64>>,
    handles: DashMap<TimerKey, JoinHandle<()>>,
    generation: AtomicU64,
}

impl TimerRegistry {
    /// Arm `key` to run `callback` after `delay`, cancelling any timer
    /// previously armed under the same key.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn set<F>(&self, key: TimerKey, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.armed.insert(key, generation);

        let armed = Arc::clone(&self.armed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Run only if this timer is still the registered one; remove the
            // entry in the same step so the key reads as inactive inside the
            // callback.
            if armed
                .remove_if(&key, |_, stamp| *stamp == generation)
                .is_some()
            {
                callback();
            }
        });

        if let Some(superseded) = self.handles.insert(key, handle) {
            superseded.abort();
        }
    }

    /// Cancel the timer armed under `key`, if any.
    pub(crate) fn clear(&self, key: TimerKey) {
        self.armed.remove(&key);
        if let Some((_, handle)) = self.handles.remove(&key) {
            handle.abort();
        }
    }

    /// Cancel every armed timer.
    pub(crate) fn clear_all(&self) {
        self.armed.clear();
        self.handles.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    /// Whether a timer is armed (scheduled and not yet fired) under `key`.
    pub(crate) fn active(&self, key: TimerKey) -> bool {
        self.armed.contains_key(&key)
    }
}
