//! Heartbeat liveness monitor.
//!
//! Layered over the transport: a `primus::ping::<millis>` payload goes out
//! every `ping_interval`, and the matching pong must arrive within
//! `pong_timeout` or the connection is declared dead. Death is not an error;
//! it raises `incoming::end`, which routes through the standard
//! unintentional-disconnect path and triggers reconnection.
//!
//! Ping packets are control-plane traffic and bypass the transform pipeline;
//! they still pass through the codec like every other write.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::bus::Event;
use crate::connection::Inner;
use crate::protocol;
use crate::timer::TimerKey;

/// Arm the next ping. Called post-open and post-pong; a zero interval
/// disables the monitor.
pub(crate) fn restart(inner: &Arc<Inner>) {
    let interval = inner.config.ping_interval;
    if interval.is_zero() {
        return;
    }

    let weak = Arc::downgrade(inner);
    inner.timers.set(TimerKey::Ping, interval, move || {
        if let Some(inner) = weak.upgrade() {
            ping(&inner);
        }
    });
}

/// A pong arrived: the wire is alive, start the next cycle.
pub(crate) fn on_pong(inner: &Arc<Inner>) {
    inner.timers.clear(TimerKey::Pong);
    restart(inner);
}

fn ping(inner: &Arc<Inner>) {
    // Arm the deadline before the packet leaves: a driver may answer
    // synchronously, and the pong must find its timer.
    let weak = Arc::downgrade(inner);
    inner
        .timers
        .set(TimerKey::Pong, inner.config.pong_timeout, move || {
            if let Some(inner) = weak.upgrade() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    timeout = ?inner.config.pong_timeout,
                    "heartbeat timeout: no pong received, treating connection as dead"
                );
                inner.emit(&Event::IncomingEnd(None));
            }
        });

    let packet = protocol::ping_payload(Utc::now().timestamp_millis());
    inner.emit(&Event::OutgoingPing(packet.clone()));
    inner.write_raw(&Value::String(packet));
}
