// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn connected_pair() -> (Listener, TcpStream, Client) {
    let listener = Listener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = TcpStream::connect(addr).unwrap();

    let stream = loop {
        match listener.accept_one().unwrap() {
            Some(s) => break s,
            None => std::thread::sleep(std::time::Duration::from_millis(1)),
        }
    };
    let client = Client::new(1, stream, 100);
    (listener, peer, client)
}

#[test]
fn accept_without_pending_connection() {
    let listener = Listener::bind("127.0.0.1:0").unwrap();
    assert!(listener.accept_one().unwrap().is_none());
}

#[test]
fn new_client_is_idle() {
    let (_listener, _peer, client) = connected_pair();
    assert_eq!(client.state, ClientState::Idle);
    assert!(client.is_between_requests());
    assert!(!client.has_buffered_input());
    assert!(!client.wants_write());
}

#[test]
fn read_advance_buffers_request_lines() {
    let (_listener, mut peer, mut client) = connected_pair();

    peer.write_all(b"status\npart").unwrap();
    // Give the loopback a moment to deliver.
    std::thread::sleep(std::time::Duration::from_millis(20));

    assert_eq!(client.read_advance(150), Advance::Continue);
    assert_eq!(client.state, ClientState::Reading);
    assert_eq!(client.activity, 150);
    assert!(client.has_buffered_input());

    let requests = client.take_requests();
    assert_eq!(requests, vec!["status".to_string()]);
    // The partial request stays buffered.
    assert!(client.has_buffered_input());
    assert_eq!(client.state, ClientState::Reading);
}

#[test]
fn peer_close_is_reported() {
    let (_listener, peer, mut client) = connected_pair();
    drop(peer);
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert_eq!(client.read_advance(150), Advance::Closed);
}

#[test]
fn response_round_trip() {
    let (_listener, mut peer, mut client) = connected_pair();

    client.queue_response(b"pong\n");
    assert_eq!(client.state, ClientState::Writing);
    assert!(client.wants_write());

    assert_eq!(client.write_advance(160), Advance::Continue);
    assert_eq!(client.state, ClientState::Waiting);
    assert!(!client.wants_write());

    let mut buf = [0u8; 16];
    let n = peer.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"pong\n");
}

#[test]
fn non_keepalive_client_closes_after_response() {
    let (_listener, _peer, mut client) = connected_pair();
    client.keepalive = false;
    client.queue_response(b"bye\n");
    assert_eq!(client.write_advance(160), Advance::Closed);
}

#[test]
fn filter_pipe_data_flows_when_ready() {
    let (_listener, mut peer, mut client) = connected_pair();

    let (reader, mut writer) = std::io::pipe().unwrap();
    writer.write_all(b"filtered output").unwrap();
    client.file = Some(reader);
    client.pipe_pid = Some(4242);
    client.state = ClientState::Writing;

    // Not ready yet: nothing is pulled from the pipe.
    assert!(!client.file_ready);

    client.file_ready = true;
    assert!(client.wants_write());
    assert_eq!(client.write_advance(170), Advance::Continue);

    let mut buf = [0u8; 32];
    let n = peer.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"filtered output");

    // Consumed: ready flag dropped until the next poll reports the pipe.
    assert!(!client.file_ready);
    assert!(client.file.is_some());
}

#[test]
fn filter_pipe_eof_retires_pipe() {
    let (_listener, _peer, mut client) = connected_pair();

    let (reader, writer) = std::io::pipe().unwrap();
    drop(writer);
    client.file = Some(reader);
    client.pipe_pid = Some(4242);
    client.file_ready = true;
    client.state = ClientState::Writing;

    client.write_advance(170);
    assert!(client.file.is_none());
    assert!(client.pipe_pid.is_none());
}

#[test]
fn idle_expiry_spares_piped_clients() {
    let (_listener, _peer, mut client) = connected_pair();
    client.activity = 100;

    assert!(!client.idle_expired(400, 300));
    assert!(client.idle_expired(401, 300));

    client.pipe_pid = Some(4242);
    assert!(!client.idle_expired(1000, 300));
}
