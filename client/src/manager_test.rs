use super::*;
use crate::transport::test_helpers::{ScriptedTransport, drain_outbound, next_attempt, next_outbound, text};
use crate::transport::{Endpoint, Outbound};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite;

fn manager() -> (AutoWs, mpsc::UnboundedReceiver<Endpoint>) {
    let (transport, attempts) = ScriptedTransport::new();
    let ws = AutoWs::with_transport("ws://test.local/ws", Arc::new(transport), ClientConfig::default());
    (ws, attempts)
}

async fn next_client_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("client event timed out")
        .expect("event stream closed")
}

/// Collect event names until (and including) the first `stop` event.
async fn events_until(rx: &mut mpsc::UnboundedReceiver<ClientEvent>, stop: &str) -> Vec<&'static str> {
    let mut seen = Vec::new();
    loop {
        let name = event_name(&next_client_event(rx).await);
        seen.push(name);
        if name == stop {
            return seen;
        }
    }
}

fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Open => "open",
        ClientEvent::Connect => "connect",
        ClientEvent::Disconnect => "disconnect",
        ClientEvent::Close => "close",
        ClientEvent::Error(_) => "error",
        ClientEvent::Message(_) => "message",
    }
}

async fn open(endpoint: &Endpoint, events: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    endpoint.emit(TransportEvent::Open);
    events_until(events, "connect").await;
}

async fn drop_connection(endpoint: &Endpoint, events: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    endpoint.emit(TransportEvent::Close);
    events_until(events, "disconnect").await;
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[tokio::test(start_paused = true)]
async fn sends_while_disconnected_flush_in_order_after_open() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let chat = ws.channel("A").unwrap();

    ws.send("a").unwrap();
    chat.send("b").unwrap();
    chat.send("c").unwrap();
    ws.send("d").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    assert_eq!(
        drain_outbound(&mut peer).await,
        vec![
            text("_channel:A"),
            text("a"),
            text("_subsocket:A"),
            text("b"),
            text("c"),
            text("_subsocket:"),
            text("d"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn interleaved_channels_switch_tags_on_every_change() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.subsocket("A").unwrap();
    let b = ws.subsocket("B").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    a.send("1").unwrap();
    b.send("2").unwrap();
    a.send("3").unwrap();

    assert_eq!(
        drain_outbound(&mut peer).await,
        vec![
            text("_subsocket:A"),
            text("1"),
            text("_subsocket:B"),
            text("2"),
            text("_subsocket:A"),
            text("3"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn consecutive_sends_on_one_channel_announce_once() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.subsocket("A").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    for i in 0..3 {
        a.send(format!("m{i}")).unwrap();
    }

    assert_eq!(
        drain_outbound(&mut peer).await,
        vec![text("_subsocket:A"), text("m0"), text("m1"), text("m2")]
    );
}

#[tokio::test(start_paused = true)]
async fn unbuffered_send_is_dropped_while_disconnected() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.subsocket("A").unwrap();

    a.send_unbuffered("lost").unwrap();
    ws.send("kept").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    // No `_subsocket:A` either: the dropped send never touched the write tag.
    assert_eq!(drain_outbound(&mut peer).await, vec![text("kept")]);
}

#[tokio::test(start_paused = true)]
async fn unbuffered_send_goes_out_while_open() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.subsocket("A").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    a.send_unbuffered(vec![1_u8, 2, 3]).unwrap();

    assert_eq!(next_outbound(&mut peer).await, text("_subsocket:A"));
    assert_eq!(next_outbound(&mut peer).await, Outbound::Frame(Frame::Binary(vec![1, 2, 3])));
}

#[tokio::test(start_paused = true)]
async fn channel_on_open_connection_is_announced_immediately_and_replayed_once() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    ws.channel("late").unwrap();
    ws.channel("late").unwrap();
    assert_eq!(drain_outbound(&mut peer).await, vec![text("_channel:late"), text("_channel:late")]);

    drop_connection(&peer, &mut events).await;
    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    assert_eq!(drain_outbound(&mut peer).await, vec![text("_channel:late")]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_registrations_before_queued_data() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.channel("A").unwrap();
    let _b = ws.channel("B").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    assert_eq!(drain_outbound(&mut peer).await, vec![text("_channel:A"), text("_channel:B")]);

    drop_connection(&peer, &mut events).await;
    a.send("1").unwrap();
    ws.send("2").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    assert_eq!(
        drain_outbound(&mut peer).await,
        vec![
            text("_channel:A"),
            text("_channel:B"),
            text("_subsocket:A"),
            text("1"),
            text("_subsocket:"),
            text("2"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn write_tag_does_not_survive_reconnect() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.subsocket("A").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    a.send("1").unwrap();
    assert_eq!(drain_outbound(&mut peer).await, vec![text("_subsocket:A"), text("1")]);

    drop_connection(&peer, &mut events).await;
    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    a.send("2").unwrap();
    assert_eq!(drain_outbound(&mut peer).await, vec![text("_subsocket:A"), text("2")]);
}

#[tokio::test(start_paused = true)]
async fn flush_leaves_write_tag_at_last_queued_channel() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.subsocket("A").unwrap();

    a.send("queued").unwrap();
    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    ws.send("root").unwrap();
    a.send("again").unwrap();

    assert_eq!(
        drain_outbound(&mut peer).await,
        vec![
            text("_subsocket:A"),
            text("queued"),
            text("_subsocket:"),
            text("root"),
            text("_subsocket:A"),
            text("again"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn queue_keeps_its_tags_across_failed_attempts() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let a = ws.subsocket("A").unwrap();

    a.send("first").unwrap();
    let peer = next_attempt(&mut attempts).await;
    drop_connection(&peer, &mut events).await;
    ws.send("root").unwrap();
    a.send("second").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    assert_eq!(
        drain_outbound(&mut peer).await,
        vec![
            text("_subsocket:A"),
            text("first"),
            text("_subsocket:"),
            text("root"),
            text("_subsocket:A"),
            text("second"),
        ]
    );
}

// =============================================================================
// LIFECYCLE EVENTS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn open_fires_once_connect_fires_every_time() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    peer.emit(TransportEvent::Open);
    assert_eq!(events_until(&mut events, "connect").await, vec!["open", "connect"]);

    peer.emit(TransportEvent::Close);
    assert_eq!(events_until(&mut events, "close").await, vec!["disconnect", "close"]);

    let peer = next_attempt(&mut attempts).await;
    peer.emit(TransportEvent::Open);
    assert_eq!(events_until(&mut events, "connect").await, vec!["connect"]);
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_signals_disconnect_without_close() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    peer.emit(TransportEvent::Close);
    assert_eq!(events_until(&mut events, "disconnect").await, vec!["disconnect"]);

    let peer = next_attempt(&mut attempts).await;
    peer.emit(TransportEvent::Open);
    assert_eq!(events_until(&mut events, "connect").await, vec!["open", "connect"]);
}

#[tokio::test(start_paused = true)]
async fn transport_error_is_reported_but_does_not_reconnect() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    let err = TransportError::Socket(Box::new(tungstenite::Error::ConnectionClosed));
    peer.emit(TransportEvent::Error(err));
    assert!(matches!(next_client_event(&mut events).await, ClientEvent::Error(_)));

    assert!(timeout(Duration::from_secs(60), attempts.recv()).await.is_err());
    assert_eq!(ws.state().await.unwrap(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn state_tracks_lifecycle() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    assert_eq!(ws.state().await.unwrap(), ConnectionState::Connecting);

    open(&peer, &mut events).await;
    assert_eq!(ws.state().await.unwrap(), ConnectionState::Open);

    drop_connection(&peer, &mut events).await;
    assert_eq!(ws.state().await.unwrap(), ConnectionState::Disconnected);

    let peer = next_attempt(&mut attempts).await;
    assert_eq!(ws.state().await.unwrap(), ConnectionState::Connecting);

    ws.destroy();
    assert_eq!(ws.state().await.unwrap(), ConnectionState::Destroyed);
    drop(peer);
}

// =============================================================================
// BACKOFF
// =============================================================================

#[tokio::test(start_paused = true)]
async fn failed_attempts_back_off_exponentially() {
    let (_ws, mut attempts) = manager();

    let mut peer = next_attempt(&mut attempts).await;
    let mut last = Instant::now();
    for expected in [1, 2, 4, 8, 16, 30, 30] {
        peer.emit(TransportEvent::Close);
        peer = next_attempt(&mut attempts).await;
        let gap = Instant::now() - last;
        assert!(
            gap >= Duration::from_secs(expected) && gap < Duration::from_secs(expected) + Duration::from_millis(10),
            "expected ~{expected}s between attempts, got {gap:?}"
        );
        last = Instant::now();
    }
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_backoff() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    // Escalate: 1s, then 2s.
    let peer = next_attempt(&mut attempts).await;
    peer.emit(TransportEvent::Close);
    let peer = next_attempt(&mut attempts).await;
    peer.emit(TransportEvent::Close);
    let peer = next_attempt(&mut attempts).await;

    open(&peer, &mut events).await;
    let closed_at = Instant::now();
    peer.emit(TransportEvent::Close);
    let _peer = next_attempt(&mut attempts).await;

    let gap = Instant::now() - closed_at;
    assert!(gap <= Duration::from_secs(1), "expected reset delay, got {gap:?}");
}

#[tokio::test(start_paused = true)]
async fn long_lived_connection_reconnects_without_waiting() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    tokio::time::advance(Duration::from_secs(5)).await;

    let closed_at = Instant::now();
    peer.emit(TransportEvent::Close);
    let _peer = next_attempt(&mut attempts).await;
    assert!(Instant::now() - closed_at < Duration::from_millis(10));
}

// =============================================================================
// DESTROY
// =============================================================================

#[tokio::test(start_paused = true)]
async fn destroy_closes_connection_and_never_reconnects() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    ws.destroy();
    assert_eq!(next_outbound(&mut peer).await, Outbound::Close);

    peer.emit(TransportEvent::Close);
    assert_eq!(events_until(&mut events, "close").await, vec!["disconnect", "close"]);

    // The manager stops and drops its transport; no further attempt is made.
    let next = timeout(Duration::from_secs(120), attempts.recv()).await;
    assert!(matches!(next, Ok(None)), "unexpected reconnect attempt");
    assert!(matches!(ws.send("late"), Err(ClientError::Destroyed)));
}

#[tokio::test(start_paused = true)]
async fn destroy_cancels_pending_reconnect_timer() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    drop_connection(&peer, &mut events).await;

    ws.destroy();
    let next = timeout(Duration::from_secs(120), attempts.recv()).await;
    assert!(matches!(next, Ok(None)), "timer fired after destroy");
}

#[tokio::test(start_paused = true)]
async fn destroy_while_dialing_ignores_late_open() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    ws.channel("chat").unwrap();
    ws.send("queued").unwrap();

    let mut peer = next_attempt(&mut attempts).await;
    ws.destroy();
    peer.emit(TransportEvent::Open);
    assert_eq!(drain_outbound(&mut peer).await, vec![Outbound::Close]);

    peer.emit(TransportEvent::Close);
    assert_eq!(events_until(&mut events, "disconnect").await, vec!["disconnect"]);
    let next = timeout(Duration::from_secs(120), attempts.recv()).await;
    assert!(matches!(next, Ok(None)), "unexpected reconnect attempt");
}

#[tokio::test(start_paused = true)]
async fn destroy_twice_is_harmless() {
    let (ws, _attempts) = manager();
    ws.destroy();
    ws.destroy();
    tokio::task::yield_now().await;
    ws.destroy();
}

#[tokio::test(start_paused = true)]
async fn dropping_every_handle_destroys_manager() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let mut peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    drop(ws);
    assert_eq!(next_outbound(&mut peer).await, Outbound::Close);
    peer.emit(TransportEvent::Close);

    let next = timeout(Duration::from_secs(120), attempts.recv()).await;
    assert!(matches!(next, Ok(None)));
}

// =============================================================================
// INBOUND
// =============================================================================

#[tokio::test(start_paused = true)]
async fn inbound_frames_route_by_read_tag() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();
    let chat = ws.subsocket("chat").unwrap();
    let mut inbox = chat.messages().unwrap();
    let mut other = ws.subsocket("other").unwrap().messages().unwrap();

    let peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    for frame in [
        Frame::from("root-1"),
        Frame::from("_subsocket:chat"),
        Frame::from("chat-1"),
        Frame::from(vec![0_u8, 1]),
        Frame::from("_subsocket:"),
        Frame::from("root-2"),
    ] {
        peer.emit(TransportEvent::Message(frame));
    }

    assert!(matches!(next_client_event(&mut events).await, ClientEvent::Message(f) if f == Frame::from("root-1")));
    assert!(matches!(next_client_event(&mut events).await, ClientEvent::Message(f) if f == Frame::from("root-2")));
    assert_eq!(inbox.recv().await, Some(Frame::from("chat-1")));
    assert_eq!(inbox.recv().await, Some(Frame::Binary(vec![0, 1])));
    assert!(other.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn binary_control_lookalike_is_data() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;

    let lookalike = Frame::from(b"_subsocket:chat".as_slice());
    peer.emit(TransportEvent::Message(lookalike.clone()));
    assert!(matches!(next_client_event(&mut events).await, ClientEvent::Message(f) if f == lookalike));
}

#[tokio::test(start_paused = true)]
async fn read_tag_does_not_survive_reconnect() {
    let (ws, mut attempts) = manager();
    let mut events = ws.events().unwrap();

    let peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    peer.emit(TransportEvent::Message(Frame::from("_subsocket:chat")));
    drop_connection(&peer, &mut events).await;

    let peer = next_attempt(&mut attempts).await;
    open(&peer, &mut events).await;
    peer.emit(TransportEvent::Message(Frame::from("hello")));
    assert!(matches!(next_client_event(&mut events).await, ClientEvent::Message(f) if f == Frame::from("hello")));
}

#[tokio::test]
async fn invalid_channel_name_is_rejected() {
    let (ws, _attempts) = manager();
    assert!(matches!(ws.channel("a\nb"), Err(ClientError::InvalidName(_))));
    assert!(matches!(ws.subsocket("a\rb"), Err(ClientError::InvalidName(_))));
    assert_eq!(ws.name(), "");
}
