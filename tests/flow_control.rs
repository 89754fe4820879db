mod common;
use common::*;

use std::time::Duration;

use bytes::Bytes;
use h2plex::{Builder, HeaderList, StreamEvent};

const SETTINGS_INITIAL_WINDOW_SIZE: u16 = 0x4;

#[tokio::test]
async fn post_respects_a_small_peer_window() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(256 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server =
        MockServer::accept(server_io, &[(SETTINGS_INITIAL_WINDOW_SIZE, 1024)]).await;

    // Barrier: the ping ACK proves the client has applied our SETTINGS.
    let ping = client.ping(*b"barrier1");
    let (reply, ()) = tokio::join!(ping, server.answer_ping());
    reply.unwrap();

    let request = HeaderList::request("POST", "https", "example.com", "/big");
    let mut stream = client.start_stream(request, false).await.unwrap();

    let body = Bytes::from(vec![0x5au8; 4096]);
    let sender = tokio::spawn(async move {
        stream.send_data(body, true).await.unwrap();
        stream
    });

    server.expect(HEADERS).await;

    let mut frames = 0usize;
    let mut total = 0usize;
    loop {
        let frame = server.recv_frame().await;
        if frame.kind == WINDOW_UPDATE {
            continue;
        }
        assert_eq!(frame.kind, DATA);
        assert!(frame.payload.len() <= 1024, "frame exceeds peer window");
        frames += 1;
        total += frame.payload.len();

        // Replenish stream and connection credit for the next chunk.
        server.send_window_update(1, frame.payload.len() as u32).await;
        server.send_window_update(0, frame.payload.len() as u32).await;

        if frame.flags & END_STREAM == END_STREAM {
            break;
        }
    }
    assert_eq!(total, 4096);
    assert!(frames >= 4, "expected at least 4 DATA frames, got {frames}");

    let mut stream = sender.await.unwrap();
    server
        .send_headers(1, &status_200(), END_HEADERS | END_STREAM)
        .await;
    assert!(matches!(
        stream.recv().await.unwrap(),
        StreamEvent::Headers { end_stream: true, .. }
    ));
}

#[tokio::test]
async fn release_capacity_emits_window_updates() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new()
        .initial_window_size(1000)
        .flow_update_interval(Duration::from_millis(20))
        .handshake(client_io)
        .await
        .unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let ping = client.ping(*b"barrier2");
    let (reply, ()) = tokio::join!(ping, server.answer_ping());
    reply.unwrap();

    let request = HeaderList::request("GET", "https", "example.com", "/stream");
    let mut stream = client.start_stream(request, true).await.unwrap();
    server.expect(HEADERS).await;

    server.send_headers(1, &status_200(), END_HEADERS).await;
    server.send_data(1, &[0u8; 800], false).await;

    match stream.recv().await.unwrap() {
        StreamEvent::Headers { .. } => {}
        other => panic!("expected headers, got {:?}", other),
    }
    match stream.recv().await.unwrap() {
        StreamEvent::Data { payload, .. } => {
            assert_eq!(payload.len(), 800);
            stream.release_capacity(payload.len());
        }
        other => panic!("expected data, got {:?}", other),
    }

    // 800 released out of a 1000-byte window crosses the half-window
    // threshold on the stream; the connection credit arrives with the
    // ticker at the latest.
    let mut stream_credit = 0u32;
    let mut conn_credit = 0u32;
    while stream_credit < 800 || conn_credit < 800 {
        let frame = server.expect(WINDOW_UPDATE).await;
        match frame.stream_id {
            0 => conn_credit += frame.window_increment(),
            1 => stream_credit += frame.window_increment(),
            other => panic!("window update for unexpected stream {other}"),
        }
    }
}

#[tokio::test]
async fn zero_increment_on_stream_resets_only_the_stream() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let request = HeaderList::request("GET", "https", "example.com", "/");
    let mut stream = client.start_stream(request, true).await.unwrap();
    server.expect(HEADERS).await;

    server.send_window_update(1, 0).await;

    let rst = server.expect(RST_STREAM).await;
    assert_eq!(rst.stream_id, 1);
    assert_eq!(rst.error_code(), 1); // PROTOCOL_ERROR

    match stream.recv().await.unwrap() {
        StreamEvent::Reset(reason) => assert_eq!(u32::from(reason), 1),
        other => panic!("expected reset, got {:?}", other),
    }

    // The connection survives.
    let ping = client.ping(*b"stillup!");
    let (reply, ()) = tokio::join!(ping, server.answer_ping());
    reply.unwrap();
}

#[tokio::test]
async fn zero_increment_on_connection_is_fatal() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (_client, mut conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    server.send_window_update(0, 0).await;

    server.expect_go_away(1).await; // PROTOCOL_ERROR
    let err = conn.closed().await;
    assert!(matches!(err, h2plex::Error::Protocol(_)), "got {err:?}");
}

#[tokio::test]
async fn settings_window_shrink_applies_to_open_streams() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let request = HeaderList::request("POST", "https", "example.com", "/");
    let mut stream = client.start_stream(request, false).await.unwrap();
    server.expect(HEADERS).await;

    // Shrink every stream window to 16 bytes.
    server
        .send_settings(&[(SETTINGS_INITIAL_WINDOW_SIZE, 16)])
        .await;
    let ping = client.ping(*b"barrier3");
    let (reply, ()) = tokio::join!(ping, server.answer_ping());
    reply.unwrap();

    let sender = tokio::spawn(async move {
        stream
            .send_data(Bytes::from_static(&[1u8; 64]), true)
            .await
            .unwrap();
        stream
    });

    // First chunk is clamped to the shrunken window.
    let first = server.expect(DATA).await;
    assert!(first.payload.len() <= 16, "got {} bytes", first.payload.len());

    // Keep feeding credit until the body completes.
    let mut received = first.payload.len();
    server.send_window_update(1, 64).await;
    server.send_window_update(0, 64).await;
    while received < 64 {
        let frame = server.expect(DATA).await;
        received += frame.payload.len();
    }
    sender.await.unwrap();
}
