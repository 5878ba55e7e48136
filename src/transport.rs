//! Transport driver seam.
//!
//! The engine never touches a socket. It emits `outgoing::*` signals that a
//! [`Transport`] implementation turns into real network activity, and the
//! driver reports network events back through its [`TransportHandle`], which
//! raises the matching `incoming::*` signals on the bus.

use std::sync::Weak;

use crate::bus::Event;
use crate::connection::Inner;
use crate::error::Error;

/// A wire driver (WebSocket, SSE, long-polling, in-process pair, …).
///
/// Methods are invoked synchronously from the engine's `outgoing::*`
/// dispatch; a driver doing real I/O hands the work to its own task and
/// returns immediately. Raising an incoming event from inside one of these
/// methods is fine — bus dispatch is re-entrant.
pub trait Transport: Send + Sync + 'static {
    /// Called exactly once at client construction. Keep the handle; it is
    /// the only way to deliver network events to the engine.
    fn bind(&self, handle: TransportHandle);

    /// `outgoing::open`: begin connecting.
    fn connect(&self);

    /// `outgoing::data`: put an encoded packet on the wire.
    fn send(&self, packet: &str);

    /// `outgoing::end`: tear the wire down.
    fn close(&self);

    /// `outgoing::reconnect`: re-establish the wire for a retry attempt.
    fn reconnect(&self);
}

/// The driver's channel back into the engine.
///
/// Holds the engine weakly; events raised after the client is dropped are
/// silently discarded.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    inner: Weak<Inner>,
}

impl TransportHandle {
    pub(crate) fn new(inner: Weak<Inner>) -> Self {
        Self { inner }
    }

    /// The wire came up (`incoming::open`).
    pub fn opened(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit(&Event::IncomingOpen);
        }
    }

    /// A raw packet arrived (`incoming::data`).
    pub fn payload<S: Into<String>>(&self, raw: S) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit(&Event::IncomingData(raw.into()));
        }
    }

    /// The driver hit a failure (`incoming::error`).
    pub fn failed(&self, error: Error) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit(&Event::IncomingError(std::sync::Arc::new(error)));
        }
    }

    /// The wire went down (`incoming::end`), with an optional close reason.
    ///
    /// Pass [`protocol::SERVER_CLOSE`](crate::protocol::SERVER_CLOSE) as the
    /// reason to mark the close as server-intended, which suppresses
    /// reconnection.
    pub fn closed(&self, reason: Option<String>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.emit(&Event::IncomingEnd(reason));
        }
    }
}
