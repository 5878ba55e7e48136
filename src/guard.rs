//! Connect-timeout guard.
//!
//! Bounds the time allowed for a genuine first connection attempt. The guard
//! is never armed during reconnection; the backoff controller owns retry
//! pacing. One-shot cleanup listeners on `error`, `open` and `end` disarm
//! the guard as soon as the attempt resolves either way.

use std::sync::Arc;

use crate::bus::{Event, EventKind, listener};
use crate::connection::{Inner, close};
use crate::timer::TimerKey;

const RESOLVING_KINDS: [EventKind; 3] = [EventKind::Error, EventKind::Open, EventKind::End];

/// Arm the guard for the configured connect timeout, if one is set.
pub(crate) fn arm(inner: &Arc<Inner>) {
    let timeout = inner.config.connect_timeout;
    if timeout.is_zero() {
        return;
    }

    // The cleanup listener is stored on the engine so it can remove its own
    // registrations by identity; it holds the engine only weakly.
    let weak = Arc::downgrade(inner);
    let cleanup = listener(move |_event| {
        if let Some(inner) = weak.upgrade() {
            detach(&inner);
        }
    });
    inner.store_connect_guard(Arc::clone(&cleanup));
    for kind in RESOLVING_KINDS {
        inner.bus.once(kind, Arc::clone(&cleanup));
    }

    let weak = Arc::downgrade(inner);
    inner.timers.set(TimerKey::Connect, timeout, move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        detach(&inner);
        // The race may already be resolved by the time the timer fires.
        if inner.ready_state().is_open() || inner.reconnection.active() {
            return;
        }
        inner.emit(&Event::Timeout);
        close(&inner, None);
    });
}

/// Cancel the timer and remove the one-shot cleanup listeners.
fn detach(inner: &Arc<Inner>) {
    inner.timers.clear(TimerKey::Connect);
    if let Some(cleanup) = inner.take_connect_guard() {
        for kind in RESOLVING_KINDS {
            inner.bus.remove_listener(kind, &cleanup);
        }
    }
}
