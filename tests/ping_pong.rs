mod common;
use common::*;

use std::time::Duration;

use h2plex::{Builder, Error};

#[tokio::test]
async fn ping_reports_round_trip() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let ping = client.ping(*b"pingpong");
    let (reply, ()) = tokio::join!(ping, async {
        let frame = server.expect(PING).await;
        assert_eq!(frame.payload.as_ref(), b"pingpong");
        server.send_ping(*b"pingpong", true).await;
    });

    let reply = reply.unwrap();
    assert_eq!(&reply.payload, b"pingpong");
    assert_eq!(reply.rtt(), reply.received_at - reply.sent_at);
}

#[tokio::test]
async fn server_pings_are_echoed_with_ack() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (_client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    server.send_ping(*b"fromsrvr", false).await;

    let pong = server.expect(PING).await;
    assert_eq!(pong.flags & ACK, ACK);
    assert_eq!(pong.payload.as_ref(), b"fromsrvr");
}

#[tokio::test]
async fn ping_timeout_fails_only_the_ping() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new()
        .ping_timeout(Duration::from_millis(50))
        .handshake(client_io)
        .await
        .unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    // Never answered.
    let err = client.ping(*b"ignored!").await.unwrap_err();
    assert!(matches!(err, Error::PingTimeout), "got {err:?}");

    // A later ping still works.
    let ping = client.ping(*b"answered");
    let (reply, ()) = tokio::join!(ping, async {
        // The unanswered ping frame, then the live one.
        let first = server.expect(PING).await;
        assert_eq!(first.payload.as_ref(), b"ignored!");
        let second = server.expect(PING).await;
        assert_eq!(second.payload.as_ref(), b"answered");
        server.send_ping(*b"answered", true).await;
    });
    reply.unwrap();
}

#[tokio::test]
async fn keepalive_timeout_poisons_the_connection() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (_client, mut conn) = Builder::new()
        .ping_interval(Duration::from_millis(30))
        .ping_timeout(Duration::from_millis(50))
        .handshake(client_io)
        .await
        .unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    // The keepalive ping arrives and is deliberately ignored.
    let frame = server.expect(PING).await;
    assert_eq!(frame.flags & ACK, 0);

    let err = conn.closed().await;
    assert!(matches!(err, Error::PingTimeout), "got {err:?}");
}
