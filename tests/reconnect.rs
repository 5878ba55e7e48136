#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{MockTransport, await_kind, collect_for, count_kind};
use primus_client_sdk::backoff::BackoffState;
use primus_client_sdk::bus::{Event, EventKind, listener};
use primus_client_sdk::error::Kind;
use primus_client_sdk::{Client, Config, ReadyState};

const ENDPOINT: &str = "ws://localhost/primus";

fn config(max_retries: Option<u32>, min_delay: Duration) -> Config {
    let mut config = Config::default();
    config.manual = true;
    config.reconnect.max_retries = max_retries;
    config.reconnect.min_delay = min_delay;
    config.reconnect.max_delay = Duration::from_millis(500);
    config
}

fn backoff_of(event: &Event) -> &BackoffState {
    match event {
        Event::Reconnecting(state) | Event::Reconnect(state) => state,
        other => panic!("expected a backoff-carrying event, got {other:?}"),
    }
}

#[tokio::test]
async fn unintentional_disconnect_reconnects_and_reopens() {
    let transport = MockTransport::auto_open();
    let client = Client::new(ENDPOINT, config(Some(5), Duration::from_millis(10)), transport.clone())
        .unwrap();
    client.open();
    let mut events = client.subscribe();

    transport.drop_connection(None);

    let reconnecting = await_kind(&mut events, EventKind::Reconnecting).await;
    let state = backoff_of(&reconnecting);
    assert_eq!(state.attempt, 1);
    // The first attempt waits exactly the configured minimum
    assert_eq!(state.delay, Duration::from_millis(10));

    await_kind(&mut events, EventKind::Reconnect).await;
    await_kind(&mut events, EventKind::Open).await;

    assert_eq!(client.ready_state(), ReadyState::Open);
    assert_eq!(transport.reconnects(), 1);
}

#[tokio::test]
async fn retry_counter_persists_across_consecutive_failures() {
    let transport = MockTransport::auto_open();
    let client = Client::new(ENDPOINT, config(Some(5), Duration::from_millis(10)), transport.clone())
        .unwrap();
    client.open();

    let recorded = Arc::new(std::sync::Mutex::new(Vec::new()));
    let capture = Arc::clone(&recorded);
    client.on(
        EventKind::Reconnecting,
        listener(move |event| {
            if let Event::Reconnecting(state) = event {
                capture.lock().unwrap().push((state.attempt, state.delay));
            }
        }),
    );

    let mut events = client.subscribe();
    transport.fail_attempts(2);
    transport.drop_connection(None);
    await_kind(&mut events, EventKind::Open).await;

    let recorded = recorded.lock().unwrap().clone();
    let attempts: Vec<u32> = recorded.iter().map(|(attempt, _)| *attempt).collect();
    assert_eq!(attempts, [1, 2, 3], "counter persists across failures");

    // Attempts beyond the first stay inside the jitter window
    for (attempt, delay) in recorded.iter().skip(1) {
        let floor = Duration::from_millis(10 * 2_u64.pow(*attempt));
        let ceiling = floor * 2;
        assert!(
            *delay >= floor && *delay <= ceiling,
            "attempt {attempt}: {delay:?} outside [{floor:?}, {ceiling:?}]"
        );
    }
}

#[tokio::test]
async fn successful_reopen_discards_the_attempt_record() {
    let transport = MockTransport::auto_open();
    let client = Client::new(ENDPOINT, config(Some(5), Duration::from_millis(10)), transport.clone())
        .unwrap();
    client.open();
    let mut events = client.subscribe();

    transport.fail_attempts(1);
    transport.drop_connection(None);
    await_kind(&mut events, EventKind::Open).await;

    // A later disconnect starts over at attempt 1
    transport.drop_connection(None);
    let reconnecting = await_kind(&mut events, EventKind::Reconnecting).await;
    assert_eq!(backoff_of(&reconnecting).attempt, 1);
}

#[tokio::test]
async fn exhaustion_emits_end_exactly_once() {
    let transport = MockTransport::auto_open();
    let client = Client::new(ENDPOINT, config(Some(2), Duration::from_millis(5)), transport.clone())
        .unwrap();
    client.open();
    let mut events = client.subscribe();

    transport.fail_attempts(usize::MAX);
    transport.drop_connection(None);

    let events = collect_for(&mut events, Duration::from_millis(250)).await;

    assert_eq!(count_kind(&events, EventKind::Reconnecting), 2);
    assert_eq!(count_kind(&events, EventKind::End), 1);
    assert_eq!(count_kind(&events, EventKind::Open), 0);
    assert_eq!(transport.reconnects(), 2, "no attempt after the budget");
    assert_eq!(client.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn end_during_pending_reconnect_cancels_the_retry() {
    let transport = MockTransport::auto_open();
    let client = Client::new(
        ENDPOINT,
        config(Some(5), Duration::from_millis(150)),
        transport.clone(),
    )
    .unwrap();
    client.open();
    let mut events = client.subscribe();

    transport.drop_connection(None);
    await_kind(&mut events, EventKind::Reconnecting).await;

    client.end();

    let events = collect_for(&mut events, Duration::from_millis(250)).await;
    assert_eq!(count_kind(&events, EventKind::End), 1);
    assert_eq!(count_kind(&events, EventKind::Reconnect), 0);
    assert_eq!(transport.reconnects(), 0, "retry was cancelled");
}

#[tokio::test]
async fn failures_during_retry_feed_the_loop_not_the_error_event() {
    let transport = MockTransport::auto_open();
    let client = Client::new(ENDPOINT, config(Some(5), Duration::from_millis(10)), transport.clone())
        .unwrap();
    client.open();

    let errors = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&errors);
    client.on(
        EventKind::Error,
        listener(move |_event| {
            count.fetch_add(1, Ordering::SeqCst);
        }),
    );

    let mut events = client.subscribe();
    transport.fail_attempts(2);
    transport.drop_connection(None);
    await_kind(&mut events, EventKind::Open).await;

    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn initial_connect_failure_surfaces_instead_of_retrying() {
    let transport = MockTransport::inert();
    transport.fail_attempts(1);
    let client = Client::new(ENDPOINT, config(Some(5), Duration::from_millis(10)), transport.clone())
        .unwrap();

    let seen = Arc::new(std::sync::Mutex::new(None));
    let capture = Arc::clone(&seen);
    client.on(
        EventKind::Error,
        listener(move |event| {
            if let Event::Error(error) = event {
                *capture.lock().unwrap() = Some(error.kind());
            }
        }),
    );
    let mut events = client.subscribe();

    client.open();

    // The mid-connect failure aborts the attempt outright
    await_kind(&mut events, EventKind::End).await;
    assert_eq!(seen.lock().unwrap().take(), Some(Kind::Transport));
    assert_eq!(client.ready_state(), ReadyState::Closed);
    assert_eq!(transport.reconnects(), 0);
}
