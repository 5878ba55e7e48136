//! Connection lifecycle engine.
//!
//! [`Client`] owns the readyState machine and wires the heartbeat monitor,
//! connect-timeout guard and reconnection controller to transport events
//! over the internal [`EventBus`]. The transport driver is the only party
//! that raises `incoming::*` signals (through its
//! [`TransportHandle`](crate::transport::TransportHandle)); the engine is
//! the only party that emits `outgoing::*` signals, which a bus-attached
//! dispatcher forwards to the driver.
//!
//! All public operations are non-throwing: failures surface as
//! listener-gated `error` events, a connect timeout as `timeout`, retry
//! exhaustion as `end`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use url::Url;

use crate::Result;
use crate::backoff::{Decision, Reconnection};
use crate::buffer::OutgoingBuffer;
use crate::bus::{Event, EventBus, EventKind, Listener, listener};
use crate::codec::{Codec, JsonCodec};
use crate::config::Config;
use crate::error::Error;
use crate::guard;
use crate::heartbeat;
use crate::platform::{DefaultPlatform, PlatformAdapter};
use crate::plugin::Plugin;
use crate::protocol;
use crate::timer::{TimerKey, TimerRegistry};
use crate::transform::{TransformFlow, TransformKind, TransformPacket, TransformPipeline};
use crate::transport::{Transport, TransportHandle};

/// Broadcast channel capacity for the public event mirror.
const BROADCAST_CAPACITY: usize = 1024;

/// Discrete connection phase.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ReadyState {
    /// A connection attempt is in flight
    Opening,
    /// The connection is established; writes flow directly
    Open,
    /// No connection; writes are buffered
    Closed,
}

impl ReadyState {
    /// Check if the connection is currently established.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the connection is down with no attempt in flight.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

#[derive(Debug)]
struct Flags {
    writable: bool,
    readable: bool,
}

pub(crate) struct Inner {
    pub(crate) config: Config,
    url: Url,
    pub(crate) bus: EventBus,
    pub(crate) timers: TimerRegistry,
    transforms: TransformPipeline,
    buffer: OutgoingBuffer,
    pub(crate) reconnection: Reconnection,
    codec: Arc<dyn Codec>,
    flags: Mutex<Flags>,
    connect_guard: Mutex<Option<Listener>>,
    avoid_preferred_transport: bool,
    events_tx: broadcast::Sender<Event>,
    state_tx: watch::Sender<ReadyState>,
}

impl Inner {
    // We can recover from poisoned locks throughout: every guarded value is
    // updated in single steps with no intermediate state.
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn ready_state(&self) -> ReadyState {
        *self.state_tx.borrow()
    }

    fn set_ready(&self, ready: ReadyState) -> ReadyState {
        self.state_tx.send_replace(ready)
    }

    /// Emit on the bus, mirroring public events into the broadcast channel.
    pub(crate) fn emit(&self, event: &Event) -> bool {
        if matches!(
            event.kind(),
            EventKind::Open
                | EventKind::Data
                | EventKind::Error
                | EventKind::End
                | EventKind::Reconnecting
                | EventKind::Reconnect
                | EventKind::Timeout
        ) {
            // Nobody listening is fine; lagged receivers lose oldest events.
            drop(self.events_tx.send(event.clone()));
        }
        self.bus.emit(event)
    }

    /// Listener-gated error surfacing: never thrown, never unobserved
    /// crashes. An error with no bus listener and no broadcast receiver is
    /// dropped after the presence check.
    fn surface(&self, error: &Arc<Error>) {
        #[cfg(feature = "tracing")]
        tracing::warn!(%error, "connection error");

        if self.bus.has_listeners(EventKind::Error) || self.events_tx.receiver_count() > 0 {
            self.emit(&Event::Error(Arc::clone(error)));
        }
    }

    /// The normal write path: transform, encode, emit `outgoing::data`.
    /// Payloads written while not open are buffered verbatim.
    fn write_value(&self, data: Value) -> bool {
        if self.ready_state().is_open() {
            if let Some(payload) = self.transforms.run(TransformKind::Outgoing, data) {
                self.write_raw(&payload);
            }
        } else {
            self.buffer.push(data);
        }
        true
    }

    /// Codec-only write, used by the heartbeat and the buffer flush tail.
    pub(crate) fn write_raw(&self, payload: &Value) {
        match self.codec.encode(payload) {
            Ok(packet) => {
                self.emit(&Event::OutgoingData(packet));
            }
            Err(error) => self.surface(&Arc::new(error)),
        }
    }

    pub(crate) fn store_connect_guard(&self, cleanup: Listener) {
        *self
            .connect_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cleanup);
    }

    pub(crate) fn take_connect_guard(&self) -> Option<Listener> {
        self.connect_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Begin a connection attempt: arm the timeout guard on a genuine first
/// attempt, then signal the driver.
fn open_connection(inner: &Arc<Inner>) {
    if !inner.reconnection.active() {
        guard::arm(inner);
    }
    inner.emit(&Event::OutgoingOpen);
}

/// Close the connection.
///
/// Idempotent: with the state already closed and no connect/open timer
/// pending this only cancels a pending reconnection attempt (emitting `end`
/// once for it) or does nothing at all.
pub(crate) fn close(inner: &Arc<Inner>, data: Option<Value>) {
    let connect_pending =
        inner.timers.active(TimerKey::Connect) || inner.timers.active(TimerKey::Open);
    if inner.ready_state().is_closed() && !connect_pending {
        if inner.reconnection.active() {
            inner.reconnection.reset();
            inner.timers.clear(TimerKey::Reconnect);
            inner.emit(&Event::End);
        }
        return;
    }

    if let Some(data) = data {
        inner.write_value(data);
    }

    {
        let mut flags = inner.flags();
        flags.writable = false;
        flags.readable = false;
    }
    inner.set_ready(ReadyState::Closed);
    inner.reconnection.reset();
    inner.timers.clear_all();
    inner.emit(&Event::OutgoingEnd);
    inner.emit(&Event::End);
}

/// Ask the reconnection controller for the next attempt and schedule it.
fn schedule_reconnect(inner: &Arc<Inner>) {
    match inner.reconnection.next() {
        Decision::Pending => {}
        Decision::Exhausted => {
            #[cfg(feature = "tracing")]
            tracing::warn!("reconnection retries exhausted, giving up");
            inner.set_ready(ReadyState::Closed);
            inner.emit(&Event::End);
        }
        Decision::Scheduled(state) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(attempt = state.attempt, delay = ?state.delay, "reconnecting");
            inner.emit(&Event::Reconnecting(state.clone()));

            let weak = Arc::downgrade(inner);
            inner.timers.set(TimerKey::Reconnect, state.delay, move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Some(state) = inner.reconnection.finish_wait() {
                    inner.emit(&Event::Reconnect(state));
                    inner.emit(&Event::OutgoingReconnect);
                }
            });
        }
    }
}

fn handle_incoming_open(inner: &Arc<Inner>) {
    inner.reconnection.reset();
    inner.timers.clear(TimerKey::Reconnect);
    {
        let mut flags = inner.flags();
        flags.writable = true;
        flags.readable = true;
    }
    inner.set_ready(ReadyState::Open);
    inner.emit(&Event::Open);

    inner.timers.clear(TimerKey::Ping);
    inner.timers.clear(TimerKey::Pong);
    heartbeat::restart(inner);

    // Queued writes re-enter the normal write path in call order; the queue
    // empties in the same step.
    for queued in inner.buffer.drain() {
        inner.write_value(queued);
    }
}

fn handle_incoming_data(inner: &Arc<Inner>, raw: &str) {
    let data = match inner.codec.decode(raw) {
        Ok(data) => data,
        Err(error) => {
            inner.surface(&Arc::new(error));
            return;
        }
    };

    if protocol::is_server_close(&data) {
        close(inner, None);
        return;
    }

    if let Some(id) = protocol::pong_id(&data) {
        inner.emit(&Event::IncomingPong(id.to_owned()));
        return;
    }

    if let Some(payload) = inner.transforms.run(TransformKind::Incoming, data) {
        inner.emit(&Event::Data {
            payload,
            raw: raw.to_owned(),
        });
    }
}

fn handle_incoming_error(inner: &Arc<Inner>, error: &Arc<Error>) {
    // A failure mid-connect aborts the attempt outright.
    if inner.timers.active(TimerKey::Connect) {
        close(inner, None);
    }

    // During reconnection, failures feed the retry loop instead of the
    // application. The wire is down again until the next attempt fires.
    if inner.reconnection.active() {
        inner.set_ready(ReadyState::Closed);
        schedule_reconnect(inner);
        return;
    }

    inner.surface(error);
}

fn handle_incoming_end(inner: &Arc<Inner>, reason: Option<&str>) {
    let previous = inner.set_ready(ReadyState::Closed);

    if inner.timers.active(TimerKey::Connect) {
        close(inner, None);
    }

    // Not open before: either mid-connect (handled above) or already closed.
    if !previous.is_open() {
        return;
    }

    {
        let mut flags = inner.flags();
        flags.writable = false;
        flags.readable = false;
    }
    inner.timers.clear_all();

    if reason == Some(protocol::SERVER_CLOSE) {
        inner.emit(&Event::End);
        return;
    }

    schedule_reconnect(inner);
}

/// Wire the engine's own reactions and the transport dispatcher to the bus.
///
/// Registration order matters: state handlers run before the driver sees the
/// matching `outgoing::*` signal, so a driver that responds synchronously
/// observes consistent state.
fn install(inner: &Arc<Inner>, transport: &Arc<dyn Transport>) {
    let weak = Arc::downgrade(inner);
    inner.bus.on(
        EventKind::IncomingOpen,
        listener(move |_event| {
            if let Some(inner) = weak.upgrade() {
                handle_incoming_open(&inner);
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    inner.bus.on(
        EventKind::IncomingData,
        listener(move |event| {
            if let (Some(inner), Event::IncomingData(raw)) = (weak.upgrade(), event) {
                handle_incoming_data(&inner, raw);
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    inner.bus.on(
        EventKind::IncomingError,
        listener(move |event| {
            if let (Some(inner), Event::IncomingError(error)) = (weak.upgrade(), event) {
                handle_incoming_error(&inner, error);
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    inner.bus.on(
        EventKind::IncomingEnd,
        listener(move |event| {
            if let (Some(inner), Event::IncomingEnd(reason)) = (weak.upgrade(), event) {
                handle_incoming_end(&inner, reason.as_deref());
            }
        }),
    );

    let weak = Arc::downgrade(inner);
    inner.bus.on(
        EventKind::IncomingPong,
        listener(move |_event| {
            if let Some(inner) = weak.upgrade() {
                heartbeat::on_pong(&inner);
            }
        }),
    );

    // An attempt in flight, whether first connect or retry, is OPENING.
    for kind in [EventKind::OutgoingOpen, EventKind::OutgoingReconnect] {
        let weak = Arc::downgrade(inner);
        inner.bus.on(
            kind,
            listener(move |_event| {
                if let Some(inner) = weak.upgrade() {
                    inner.set_ready(ReadyState::Opening);
                }
            }),
        );
    }

    // Driver dispatch, last: the driver acts only after the engine settled.
    let driver = Arc::clone(transport);
    inner.bus.on(
        EventKind::OutgoingOpen,
        listener(move |_event| driver.connect()),
    );
    let driver = Arc::clone(transport);
    inner.bus.on(
        EventKind::OutgoingData,
        listener(move |event| {
            if let Event::OutgoingData(packet) = event {
                driver.send(packet);
            }
        }),
    );
    let driver = Arc::clone(transport);
    inner.bus.on(
        EventKind::OutgoingEnd,
        listener(move |_event| driver.close()),
    );
    let driver = Arc::clone(transport);
    inner.bus.on(
        EventKind::OutgoingReconnect,
        listener(move |_event| driver.reconnect()),
    );
}

/// Handle to a realtime connection.
///
/// Cheaply cloneable; clones share the same underlying connection. The
/// client must be constructed inside a Tokio runtime (timers are spawned
/// tasks).
///
/// # Example
///
/// ```no_run
/// use primus_client_sdk::transport::{Transport, TransportHandle};
/// use primus_client_sdk::{Client, Config};
///
/// struct NullDriver;
///
/// impl Transport for NullDriver {
///     fn bind(&self, _handle: TransportHandle) {}
///     fn connect(&self) {}
///     fn send(&self, _packet: &str) {}
///     fn close(&self) {}
///     fn reconnect(&self) {}
/// }
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("wss://example.org/primus", Config::default(), NullDriver)?;
///
///     let mut events = client.subscribe();
///     client.write(serde_json::json!({ "room": "lobby" }));
///
///     while let Ok(event) = events.recv().await {
///         println!("{event:?}");
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Create a client with the default codec and platform adapter.
    pub fn new<T: Transport>(endpoint: &str, config: Config, transport: T) -> Result<Self> {
        Self::builder(endpoint, transport).config(config).build()
    }

    /// Start building a client.
    #[must_use]
    pub fn builder<T: Transport>(endpoint: &str, transport: T) -> ClientBuilder {
        ClientBuilder {
            endpoint: endpoint.to_owned(),
            config: Config::default(),
            transport: Arc::new(transport),
            codec: Arc::new(JsonCodec),
            platform: Box::new(DefaultPlatform),
            plugins: Vec::new(),
        }
    }

    /// Begin a connection attempt.
    ///
    /// Signals the transport driver; the connection is open once the driver
    /// reports back. Unless [`Config::manual`] is set this happens
    /// automatically right after construction.
    pub fn open(&self) -> &Self {
        open_connection(&self.inner);
        self
    }

    /// Write a payload to the server.
    ///
    /// While open, the payload runs through the outgoing transformers and
    /// the codec, then goes to the driver. While not open it is buffered and
    /// flushed, in call order, on the next open. Always returns `true`:
    /// failures surface as listener-gated `error` events, never here.
    pub fn write<T: Serialize>(&self, data: T) -> bool {
        match serde_json::to_value(data) {
            Ok(value) => self.inner.write_value(value),
            Err(error) => {
                self.inner.surface(&Arc::new(error.into()));
                true
            }
        }
    }

    /// Close the connection. Idempotent.
    pub fn end(&self) {
        close(&self.inner, None);
    }

    /// Write a final payload, then close the connection.
    pub fn end_with<T: Serialize>(&self, data: T) {
        match serde_json::to_value(data) {
            Ok(value) => close(&self.inner, Some(value)),
            Err(error) => {
                self.inner.surface(&Arc::new(error.into()));
                close(&self.inner, None);
            }
        }
    }

    /// Register a payload transformer. Stages run in registration order;
    /// there is no way to remove a registered stage.
    pub fn transform<F>(&self, kind: TransformKind, stage: F) -> &Self
    where
        F: Fn(&mut TransformPacket) -> TransformFlow + Send + Sync + 'static,
    {
        self.inner.transforms.register(kind, Arc::new(stage));
        self
    }

    /// Subscribe `callback` to an event.
    pub fn on(&self, kind: EventKind, callback: Listener) -> &Self {
        self.inner.bus.on(kind, callback);
        self
    }

    /// Subscribe `callback` for a single invocation.
    pub fn once(&self, kind: EventKind, callback: Listener) -> &Self {
        self.inner.bus.once(kind, callback);
        self
    }

    /// Remove `callback` (by handle identity), whether registered with
    /// [`on`](Self::on) or [`once`](Self::once).
    pub fn remove_listener(&self, kind: EventKind, callback: &Listener) -> &Self {
        self.inner.bus.remove_listener(kind, callback);
        self
    }

    /// Clear one event's listeners, or all of them.
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) -> &Self {
        self.inner.bus.remove_all_listeners(kind);
        self
    }

    /// Snapshot copy of the listeners registered under `kind`.
    #[must_use]
    pub fn listeners(&self, kind: EventKind) -> Vec<Listener> {
        self.inner.bus.listeners(kind)
    }

    /// Subscribe to the public event stream.
    ///
    /// Each call returns an independent receiver. Only public events flow
    /// here (`open`, `data`, `error`, `end`, `reconnecting`, `reconnect`,
    /// `timeout`); a lagged receiver loses oldest events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events_tx.subscribe()
    }

    /// Subscribe to readyState changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ReadyState> {
        self.inner.state_tx.subscribe()
    }

    /// Get the current readyState.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    /// Whether writes currently flow directly to the transport.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.inner.flags().writable
    }

    /// Whether incoming payloads are currently being delivered.
    #[must_use]
    pub fn is_readable(&self) -> bool {
        self.inner.flags().readable
    }

    /// The parsed endpoint this client connects to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// The configuration this client was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Platform verdict captured at construction, for transport drivers.
    #[must_use]
    pub fn avoid_preferred_transport(&self) -> bool {
        self.inner.avoid_preferred_transport
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url.as_str())
            .field("ready_state", &self.inner.ready_state())
            .field("buffered", &self.inner.buffer.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`] with non-default collaborators.
pub struct ClientBuilder {
    endpoint: String,
    config: Config,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn Codec>,
    platform: Box<dyn PlatformAdapter>,
    plugins: Vec<Box<dyn Plugin>>,
}

impl ClientBuilder {
    /// Set the connection configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replace the default JSON codec.
    #[must_use]
    pub fn codec<C: Codec>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Replace the default platform adapter.
    #[must_use]
    pub fn platform<P: PlatformAdapter>(mut self, platform: P) -> Self {
        self.platform = Box::new(platform);
        self
    }

    /// Register a plugin; initialization runs in registration order.
    #[must_use]
    pub fn plugin<P: Plugin>(mut self, plugin: P) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Build the client, bind the transport and initialize plugins.
    ///
    /// # Errors
    ///
    /// Fails on an unparsable endpoint, duplicate plugin names, or a plugin
    /// whose initialization fails.
    pub fn build(self) -> Result<Client> {
        let url = Url::parse(&self.endpoint)?;

        let mut names = HashSet::new();
        for plugin in &self.plugins {
            if !names.insert(plugin.name().to_owned()) {
                return Err(Error::validation(format!(
                    "duplicate plugin name: {}",
                    plugin.name()
                )));
            }
        }

        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ReadyState::Closed);
        let manual = self.config.manual;

        let inner = Arc::new(Inner {
            reconnection: Reconnection::new(self.config.reconnect.clone()),
            config: self.config,
            url,
            bus: EventBus::new(),
            timers: TimerRegistry::default(),
            transforms: TransformPipeline::default(),
            buffer: OutgoingBuffer::default(),
            codec: self.codec,
            flags: Mutex::new(Flags {
                writable: false,
                readable: false,
            }),
            connect_guard: Mutex::new(None),
            avoid_preferred_transport: self.platform.should_avoid_preferred_transport(),
            events_tx,
            state_tx,
        });

        install(&inner, &self.transport);
        self.transport
            .bind(TransportHandle::new(Arc::downgrade(&inner)));

        let client = Client { inner };
        for plugin in &self.plugins {
            plugin.init(&client)?;
        }

        if !manual {
            let weak = Arc::downgrade(&client.inner);
            client
                .inner
                .timers
                .set(TimerKey::Open, Duration::ZERO, move || {
                    if let Some(inner) = weak.upgrade() {
                        open_connection(&inner);
                    }
                });
        }

        Ok(client)
    }
}
