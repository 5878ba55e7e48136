//! Synchronous publish/subscribe notifier.
//!
//! The bus is the internal nervous system of the client: the state machine,
//! heartbeat, timeout guard and transport dispatcher all communicate through
//! it, and the application observes the public events on the same instance.
//!
//! Dispatch is synchronous and strictly ordered: [`EventBus::emit`] invokes
//! every listener in subscription order before returning. The bucket lock is
//! released around each callback, so a listener may itself emit (re-entrant
//! dispatch is intentional and supported). Delivery iterates the *live*
//! listener list: a listener appended during emission of the same event is
//! reached, and removing an earlier listener from inside a callback shifts
//! the iteration like it did in the original emitter. Only
//! [`EventBus::listeners`] takes a snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::backoff::BackoffState;
use crate::error::Error;

/// A subscribed callback. Identity (the `Arc` allocation) is what
/// [`EventBus::remove_listener`] matches on, so keep a clone of the handle
/// you registered if you intend to remove it later.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Wrap a closure into a [`Listener`] handle.
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Discriminant of every signal travelling over the bus.
///
/// `Incoming*` events may only be raised by the transport driver (through
/// [`TransportHandle`](crate::transport::TransportHandle)); `Outgoing*`
/// events are only emitted by the state machine and consumed by the driver.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Data,
    Error,
    End,
    Reconnecting,
    Reconnect,
    Timeout,
    IncomingOpen,
    IncomingData,
    IncomingError,
    IncomingEnd,
    IncomingPong,
    OutgoingOpen,
    OutgoingData,
    OutgoingEnd,
    OutgoingReconnect,
    OutgoingPing,
}

/// A signal plus its payload.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection is open; writes flow directly to the transport.
    Open,
    /// A decoded, transformed payload together with the raw wire packet.
    Data {
        /// Payload after the incoming transform pipeline
        payload: Value,
        /// Raw packet as received from the transport
        raw: String,
    },
    /// A listener-gated failure report (never thrown).
    Error(Arc<Error>),
    /// The connection is closed and no reconnection is pending.
    End,
    /// A reconnection attempt has been scheduled.
    Reconnecting(BackoffState),
    /// A scheduled reconnection attempt is starting now.
    Reconnect(BackoffState),
    /// The connect-timeout guard fired before the connection opened.
    Timeout,
    /// Transport-level: the wire came up.
    IncomingOpen,
    /// Transport-level: a raw packet arrived.
    IncomingData(String),
    /// Transport-level: the driver reported a failure.
    IncomingError(Arc<Error>),
    /// Transport-level: the wire went down, with an optional reason.
    IncomingEnd(Option<String>),
    /// A heartbeat pong arrived; payload is the echoed id.
    IncomingPong(String),
    /// Signal to the driver: start connecting.
    OutgoingOpen,
    /// Signal to the driver: put this encoded packet on the wire.
    OutgoingData(String),
    /// Signal to the driver: tear the wire down.
    OutgoingEnd,
    /// Signal to the driver: re-establish the wire for a retry attempt.
    OutgoingReconnect,
    /// A heartbeat ping is about to be written; payload is the ping packet.
    OutgoingPing(String),
}

impl Event {
    /// The bucket this event dispatches to.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Data { .. } => EventKind::Data,
            Self::Error(_) => EventKind::Error,
            Self::End => EventKind::End,
            Self::Reconnecting(_) => EventKind::Reconnecting,
            Self::Reconnect(_) => EventKind::Reconnect,
            Self::Timeout => EventKind::Timeout,
            Self::IncomingOpen => EventKind::IncomingOpen,
            Self::IncomingData(_) => EventKind::IncomingData,
            Self::IncomingError(_) => EventKind::IncomingError,
            Self::IncomingEnd(_) => EventKind::IncomingEnd,
            Self::IncomingPong(_) => EventKind::IncomingPong,
            Self::OutgoingOpen => EventKind::OutgoingOpen,
            Self::OutgoingData(_) => EventKind::OutgoingData,
            Self::OutgoingEnd => EventKind::OutgoingEnd,
            Self::OutgoingReconnect => EventKind::OutgoingReconnect,
            Self::OutgoingPing(_) => EventKind::OutgoingPing,
        }
    }
}

struct Entry {
    callback: Listener,
    once: bool,
}

/// Synchronous, ordered event notifier.
#[derive(Default)]
pub struct EventBus {
    buckets: Mutex<HashMap<EventKind, Vec<Entry>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // We can recover from a poisoned lock because a panicking listener leaves
    // the bucket vectors structurally intact.
    fn buckets(&self) -> MutexGuard<'_, HashMap<EventKind, Vec<Entry>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe `callback` to `kind`.
    pub fn on(&self, kind: EventKind, callback: Listener) -> &Self {
        self.buckets().entry(kind).or_default().push(Entry {
            callback,
            once: false,
        });
        self
    }

    /// Subscribe `callback` to `kind` for a single invocation.
    ///
    /// The registration is removed *before* the callback runs, so a
    /// re-entrant emit from inside the callback cannot trigger it again.
    /// Removal by the original handle still works: pass the same `Listener`
    /// to [`remove_listener`](Self::remove_listener).
    pub fn once(&self, kind: EventKind, callback: Listener) -> &Self {
        self.buckets().entry(kind).or_default().push(Entry {
            callback,
            once: true,
        });
        self
    }

    /// Remove every registration of `callback` under `kind`, matching by
    /// handle identity.
    pub fn remove_listener(&self, kind: EventKind, callback: &Listener) -> &Self {
        if let Some(bucket) = self.buckets().get_mut(&kind) {
            bucket.retain(|entry| !Arc::ptr_eq(&entry.callback, callback));
        }
        self
    }

    /// Clear one bucket, or every bucket when `kind` is `None`.
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) -> &Self {
        match kind {
            Some(kind) => {
                self.buckets().remove(&kind);
            }
            None => self.buckets().clear(),
        }
        self
    }

    /// Invoke all current listeners for the event, in subscription order.
    ///
    /// Returns whether any listener existed when dispatch started.
    pub fn emit(&self, event: &Event) -> bool {
        let kind = event.kind();
        let had_listeners = self.has_listeners(kind);

        let mut index = 0;
        loop {
            let callback = {
                let mut buckets = self.buckets();
                let Some(bucket) = buckets.get_mut(&kind) else {
                    break;
                };
                let Some(entry) = bucket.get(index) else {
                    break;
                };
                let callback = Arc::clone(&entry.callback);
                if entry.once {
                    bucket.remove(index);
                } else {
                    index += 1;
                }
                callback
            };
            callback(event);
        }

        had_listeners
    }

    /// Snapshot copy of the listeners registered under `kind`.
    #[must_use]
    pub fn listeners(&self, kind: EventKind) -> Vec<Listener> {
        self.buckets()
            .get(&kind)
            .map(|bucket| {
                bucket
                    .iter()
                    .map(|entry| Arc::clone(&entry.callback))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any listener is registered under `kind`.
    #[must_use]
    pub fn has_listeners(&self, kind: EventKind) -> bool {
        self.buckets()
            .get(&kind)
            .is_some_and(|bucket| !bucket.is_empty())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buckets = self.buckets();
        let mut map = f.debug_map();
        for (kind, bucket) in buckets.iter() {
            map.entry(kind, &bucket.len());
        }
        map.finish()
    }
}
