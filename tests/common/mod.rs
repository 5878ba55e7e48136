#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Not every scenario suite uses every helper in this module"
)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use primus_client_sdk::bus::{Event, EventKind};
use primus_client_sdk::error::Error;
use primus_client_sdk::protocol;
use primus_client_sdk::transport::{Transport, TransportHandle};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::timeout;

/// In-process transport double.
///
/// Records every `outgoing::*` signal the engine dispatches and lets a test
/// play the server side through the bound [`TransportHandle`]: open the
/// wire, push packets, fail attempts, drop the connection.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

#[derive(Default)]
struct MockInner {
    handle: Mutex<Option<TransportHandle>>,
    sent: Mutex<Vec<String>>,
    connects: AtomicUsize,
    reconnects: AtomicUsize,
    closes: AtomicUsize,
    auto_open: AtomicBool,
    auto_pong: AtomicBool,
    fail_next: AtomicUsize,
}

impl MockTransport {
    /// A driver that records signals but never opens the wire by itself.
    pub fn inert() -> Self {
        Self::default()
    }

    /// A driver that reports the wire up as soon as it is asked to connect
    /// or reconnect.
    pub fn auto_open() -> Self {
        let transport = Self::default();
        transport.inner.auto_open.store(true, Ordering::SeqCst);
        transport
    }

    /// Answer every heartbeat ping with the matching pong.
    #[must_use]
    pub fn with_auto_pong(self) -> Self {
        self.inner.auto_pong.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `attempts` connect/reconnect requests with a transport
    /// error before resuming normal behavior.
    pub fn fail_attempts(&self, attempts: usize) {
        self.inner.fail_next.store(attempts, Ordering::SeqCst);
    }

    pub fn handle(&self) -> TransportHandle {
        self.inner
            .handle
            .lock()
            .unwrap()
            .clone()
            .expect("transport not bound yet")
    }

    /// Packets the engine asked the driver to send, in order.
    pub fn sent(&self) -> Vec<String> {
        self.inner.sent.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    // Server-side actions

    pub fn open_now(&self) {
        self.handle().opened();
    }

    pub fn push_raw(&self, raw: &str) {
        self.handle().payload(raw);
    }

    pub fn push_json(&self, value: &Value) {
        self.push_raw(&serde_json::to_string(value).unwrap());
    }

    pub fn drop_connection(&self, reason: Option<&str>) {
        self.handle().closed(reason.map(str::to_owned));
    }

    fn attempt(&self) {
        if self
            .inner
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.handle().failed(Error::transport("connection refused"));
            return;
        }
        if self.inner.auto_open.load(Ordering::SeqCst) {
            self.handle().opened();
        }
    }
}

impl Transport for MockTransport {
    fn bind(&self, handle: TransportHandle) {
        *self.inner.handle.lock().unwrap() = Some(handle);
    }

    fn connect(&self) {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.attempt();
    }

    fn send(&self, packet: &str) {
        self.inner.sent.lock().unwrap().push(packet.to_owned());

        if self.inner.auto_pong.load(Ordering::SeqCst)
            && let Some(id) = packet
                .trim_matches('"')
                .strip_prefix(protocol::PING_PREFIX)
        {
            self.push_raw(&format!("\"{}{id}\"", protocol::PONG_PREFIX));
        }
    }

    fn close(&self) {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn reconnect(&self) {
        self.inner.reconnects.fetch_add(1, Ordering::SeqCst);
        self.attempt();
    }
}

/// Await the next public event of the given kind, skipping others.
pub async fn await_kind(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    loop {
        let event = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}"))
            .expect("event channel closed");
        if event.kind() == kind {
            return event;
        }
    }
}

/// Collect every public event arriving within `window` of the last one.
pub async fn collect_for(rx: &mut broadcast::Receiver<Event>, window: Duration) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = timeout(window, rx.recv()).await {
        events.push(event);
    }
    events
}

pub fn count_kind(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|event| event.kind() == kind).count()
}
