// End-to-end tests for the chat relay.
//
// Each test starts a real relay on a loopback port, connects real
// `ChatClient`s (via `TestClient`) and drives the operator side of the real
// monitor link (via `TestMonitor`), then checks who hears what.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chat_relay::RelayError;
use chat_relay::acceptor::REJECTION_MESSAGE;
use chat_relay::config::DEFAULT_CAPACITY;
use relay_tests::{
    NoticeLog, TestClient, join_raw, start_test_relay, start_test_relay_with_notices, test_config,
    wait_for_clients, wait_until,
};

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// Clients A and B. A says "hello": B and the monitor hear it, A does not.
/// The monitor says "hi all": both clients hear it.
#[test]
fn hello_then_hi_all() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(DEFAULT_CAPACITY));
    let mut a = TestClient::join(addr, handle.stats());
    let mut b = TestClient::join(addr, handle.stats());

    a.send(b"hello");
    b.expect(b"hello");
    monitor.expect(b"hello");
    a.assert_silent();

    monitor.send(b"hi all");
    a.expect(b"hi all");
    b.expect(b"hi all");
    monitor.assert_silent();

    monitor.hang_up();
    handle.join().unwrap();
}

/// With the table full of clients, every client's message reaches every
/// other client and the monitor, and never its sender.
#[test]
fn every_client_hears_every_other_client() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(DEFAULT_CAPACITY));
    let mut clients: Vec<TestClient> = (0..DEFAULT_CAPACITY - 1)
        .map(|_| TestClient::join(addr, handle.stats()))
        .collect();

    for sender in 0..clients.len() {
        let message = format!("message from client {sender}\n");
        clients[sender].send(message.as_bytes());
        for (i, client) in clients.iter_mut().enumerate() {
            if i != sender {
                client.expect(message.as_bytes());
            }
        }
        monitor.expect(message.as_bytes());
    }
    for client in &mut clients {
        client.assert_silent();
    }

    monitor.hang_up();
    handle.join().unwrap();
}

/// Non-text bytes arrive unchanged and with the same length.
#[test]
fn arbitrary_bytes_are_relayed_verbatim() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(4));
    let mut a = TestClient::join(addr, handle.stats());
    let mut b = TestClient::join(addr, handle.stats());

    let payload: Vec<u8> = (0..=255u8).rev().chain([0, 0, 0xFF]).collect();
    a.send(&payload);
    b.expect(&payload);
    monitor.expect(&payload);

    monitor.hang_up();
    handle.join().unwrap();
}

/// A message longer than one read is relayed in capped chunks, with nothing
/// lost or reordered.
#[test]
fn long_message_is_relayed_in_capped_chunks() {
    let config = test_config(4);
    let cap = config.read_buffer_size;
    let (handle, addr, mut monitor) = start_test_relay(config);
    let mut a = TestClient::join(addr, handle.stats());
    let mut b = TestClient::join(addr, handle.stats());

    let payload: Vec<u8> = (0..3 * cap + 17).map(|i| (i % 251) as u8).collect();
    a.send(&payload);
    b.expect(&payload);
    monitor.expect(&payload);
    assert!(monitor.chunk_sizes.iter().all(|&n| n > 0 && n <= cap));
    assert!(monitor.chunk_sizes.len() >= 4);

    monitor.hang_up();
    handle.join().unwrap();
}

// ---------------------------------------------------------------------------
// Capacity and slot reuse
// ---------------------------------------------------------------------------

/// With capacity-1 clients connected, one more connection is told to try
/// later and closed; the existing clients are unaffected.
#[test]
fn full_relay_rejects_extra_client() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(DEFAULT_CAPACITY));
    let mut clients: Vec<TestClient> = (0..DEFAULT_CAPACITY - 1)
        .map(|_| TestClient::join(addr, handle.stats()))
        .collect();

    let mut extra = TcpStream::connect(addr).unwrap();
    extra
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut reply = Vec::new();
    extra.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, REJECTION_MESSAGE);
    wait_until("the rejection to be counted", || {
        handle.stats().snapshot().rejected == 1
    });
    assert_eq!(handle.stats().clients(), DEFAULT_CAPACITY - 1);

    // Everyone already connected still chats normally.
    clients[0].send(b"still here?");
    for client in &mut clients[1..] {
        client.expect(b"still here?");
    }
    monitor.expect(b"still here?");

    monitor.hang_up();
    handle.join().unwrap();
}

/// A client that hangs up is removed and its slot can be taken by a new
/// connection, even when that slot was the only free one.
#[test]
fn freed_slot_is_reused() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(3));
    let mut a = TestClient::join(addr, handle.stats());
    let mut b = TestClient::join(addr, handle.stats());

    a.hang_up();
    assert!(a.wait_until_closed().is_empty());
    wait_for_clients(handle.stats(), 1);

    let mut c = TestClient::join(addr, handle.stats());
    assert_eq!(handle.stats().snapshot().rejected, 0);
    assert_eq!(handle.stats().snapshot().disconnected, 1);

    c.send(b"new here");
    b.expect(b"new here");
    monitor.expect(b"new here");

    monitor.hang_up();
    handle.join().unwrap();
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// All clients leave, then the monitor hangs up: the relay stops cleanly.
#[test]
fn shutdown_after_everyone_leaves() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(4));
    let mut a = TestClient::join(addr, handle.stats());
    let mut b = TestClient::join(addr, handle.stats());

    a.hang_up();
    b.hang_up();
    a.wait_until_closed();
    b.wait_until_closed();
    wait_for_clients(handle.stats(), 0);

    monitor.hang_up();
    monitor.wait_until_closed();
    handle.join().unwrap();
}

/// The monitor hangs up while clients are still connected: the relay closes
/// every client connection, then stops.
#[test]
fn monitor_hang_up_disconnects_remaining_clients() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(4));
    let mut a = TestClient::join(addr, handle.stats());
    let mut b = TestClient::join(addr, handle.stats());

    monitor.send(b"closing time\n");
    monitor.hang_up();

    // The last message still goes out before the connections close.
    assert_eq!(a.wait_until_closed(), b"closing time\n");
    assert_eq!(b.wait_until_closed(), b"closing time\n");
    monitor.wait_until_closed();
    handle.join().unwrap();
}

/// With address reporting on, the operator sees a line when a client
/// connects, when it leaves, and when the relay drops it at shutdown.
#[test]
fn notices_follow_client_lifecycle() {
    let notices = NoticeLog::default();
    let config = chat_relay::RelayConfig {
        report_addresses: true,
        ..test_config(4)
    };
    let (handle, addr, mut monitor) = start_test_relay_with_notices(config, notices.clone());
    let mut a = TestClient::join(addr, handle.stats());
    let a_addr = a.local_addr();
    let b = TestClient::join(addr, handle.stats());
    let b_addr = b.local_addr();

    a.hang_up();
    a.wait_until_closed();
    wait_for_clients(handle.stats(), 1);

    monitor.hang_up();
    handle.join().unwrap();
    assert_eq!(
        notices.lines(),
        vec![
            format!("client has connected from {a_addr}"),
            format!("client has connected from {b_addr}"),
            format!("client at address {a_addr} has disconnected"),
            format!("client at address {b_addr} has been disconnected by the server"),
        ]
    );
}

/// Without address reporting nothing is written to the notice output.
#[test]
fn notices_are_silent_by_default() {
    let notices = NoticeLog::default();
    let (handle, addr, mut monitor) = start_test_relay_with_notices(test_config(4), notices.clone());
    let mut a = TestClient::join(addr, handle.stats());
    a.hang_up();
    a.wait_until_closed();
    wait_for_clients(handle.stats(), 0);

    monitor.hang_up();
    handle.join().unwrap();
    assert!(notices.lines().is_empty());
}

// ---------------------------------------------------------------------------
// Read errors
// ---------------------------------------------------------------------------

/// Make the relay's read on `stream` fail: closing a socket that still holds
/// unread data resets the connection instead of ending it cleanly.
fn reset_with_unread_data(stream: TcpStream) {
    let mut buf = [0u8; 1];
    assert_eq!(stream.peek(&mut buf).unwrap(), 1);
    drop(stream);
}

/// A connection reset on a client is fatal by default: the relay stops with
/// a read error and the matching exit code.
#[test]
fn client_read_error_stops_relay() {
    let (handle, addr, mut monitor) = start_test_relay(test_config(4));
    let resetting = join_raw(addr, handle.stats());
    let mut b = TestClient::join(addr, handle.stats());

    monitor.send(b"unread");
    b.expect(b"unread");
    reset_with_unread_data(resetting);

    let err = handle.join().unwrap_err();
    assert!(matches!(err, RelayError::Read { .. }), "got {err:?}");
    assert_eq!(err.exit_code(), 13);
    b.wait_until_closed();
    monitor.wait_until_closed();
}

/// With `isolate_read_errors`, the reset client is dropped like any
/// disconnect and everyone else keeps chatting.
#[test]
fn isolated_read_error_drops_only_that_client() {
    let notices = NoticeLog::default();
    let config = chat_relay::RelayConfig {
        isolate_read_errors: true,
        report_addresses: true,
        ..test_config(4)
    };
    let (handle, addr, mut monitor) = start_test_relay_with_notices(config, notices.clone());
    let resetting = join_raw(addr, handle.stats());
    let reset_addr = resetting.local_addr().unwrap();
    let mut b = TestClient::join(addr, handle.stats());

    monitor.send(b"unread");
    b.expect(b"unread");
    reset_with_unread_data(resetting);
    wait_for_clients(handle.stats(), 1);
    assert!(!handle.is_finished());

    b.send(b"still up");
    monitor.expect(b"still up");
    assert!(
        notices
            .lines()
            .contains(&format!("client at address {reset_addr} has disconnected"))
    );

    monitor.hang_up();
    handle.join().unwrap();
}

// ---------------------------------------------------------------------------
// Slow recipients
// ---------------------------------------------------------------------------

/// A client that never reads must not hold up the relay: a flood from one
/// client is still read to the end, and a later monitor message still
/// reaches a client that does read.
#[test]
fn non_reading_client_does_not_stall_relay() {
    const CHUNKS: usize = 16 * 1024;

    let (handle, addr, mut monitor) = start_test_relay(test_config(4));
    let mut reader = TestClient::join(addr, handle.stats());
    let _stuck = join_raw(addr, handle.stats());
    let mut flooder = join_raw(addr, handle.stats());

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        let chunk = [b'x'; 1024];
        for _ in 0..CHUNKS {
            if flooder.write_all(&chunk).is_err() {
                return;
            }
        }
        let _ = done_tx.send(flooder);
    });

    let _flooder = done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("relay stopped reading while a client was not reading");

    // Once the backlog is through, the reading client gets new messages.
    reader.discard_until_quiet(Duration::from_secs(30));
    monitor.send(b"ping");
    reader.expect_tail(b"ping", Duration::from_secs(30));
    assert!(handle.stats().snapshot().relayed >= 2);

    monitor.hang_up();
    handle.join().unwrap();
}
