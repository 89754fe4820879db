mod common;
use common::*;

use bytes::Bytes;
use h2plex::{Builder, HeaderList, StreamEvent};

#[tokio::test]
async fn happy_get() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let request = HeaderList::request("GET", "https", "example.com", "/");
    let mut stream = client.start_stream(request, true).await.unwrap();

    let headers = server.expect(HEADERS).await;
    assert_eq!(headers.stream_id, 1);
    assert_eq!(headers.flags & END_STREAM, END_STREAM);
    assert_eq!(headers.flags & END_HEADERS, END_HEADERS);
    assert!(!headers.payload.is_empty());

    server
        .send_headers(1, &status_200(), END_HEADERS)
        .await;
    server.send_data(1, b"hello world", true).await;

    match stream.recv().await.unwrap() {
        StreamEvent::Headers {
            headers,
            end_stream,
        } => {
            assert_eq!(headers.status().unwrap().as_u16(), 200);
            assert!(!end_stream);
        }
        other => panic!("expected headers, got {:?}", other),
    }
    match stream.recv().await.unwrap() {
        StreamEvent::Data {
            payload,
            end_stream,
        } => {
            assert_eq!(payload.as_ref(), b"hello world");
            assert!(end_stream);
        }
        other => panic!("expected data, got {:?}", other),
    }
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn client_stream_ids_are_odd_and_increasing() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let mut streams = Vec::new();
    for _ in 0..3 {
        let request = HeaderList::request("GET", "https", "example.com", "/");
        streams.push(client.start_stream(request, true).await.unwrap());
    }

    for expected_id in [1u32, 3, 5] {
        let headers = server.expect(HEADERS).await;
        assert_eq!(headers.stream_id, expected_id);
    }
    assert_eq!(streams[0].id(), h2plex::StreamId::from(1));
    assert_eq!(streams[2].id(), h2plex::StreamId::from(5));
}

#[tokio::test]
async fn post_sends_headers_then_data() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let mut request = HeaderList::request("POST", "https", "example.com", "/upload");
    request.push(b"content-type", b"text/plain");
    let mut stream = client.start_stream(request, false).await.unwrap();
    stream
        .send_data(Bytes::from_static(b"some body"), true)
        .await
        .unwrap();

    let headers = server.expect(HEADERS).await;
    assert_eq!(headers.flags & END_STREAM, 0);

    let data = server.expect(DATA).await;
    assert_eq!(data.payload.as_ref(), b"some body");
    assert_eq!(data.flags & END_STREAM, END_STREAM);

    server
        .send_headers(1, &status_200(), END_HEADERS | END_STREAM)
        .await;
    match stream.recv().await.unwrap() {
        StreamEvent::Headers { end_stream, .. } => assert!(end_stream),
        other => panic!("expected headers, got {:?}", other),
    }
}

#[tokio::test]
async fn trailers_are_delivered_after_data() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let request = HeaderList::request("GET", "https", "example.com", "/");
    let mut stream = client.start_stream(request, true).await.unwrap();
    server.expect(HEADERS).await;

    server.send_headers(1, &status_200(), END_HEADERS).await;
    server.send_data(1, b"payload", false).await;
    server
        .send_headers(
            1,
            &literal("grpc-status", "0"),
            END_HEADERS | END_STREAM,
        )
        .await;

    assert!(matches!(
        stream.recv().await.unwrap(),
        StreamEvent::Headers { .. }
    ));
    assert!(matches!(
        stream.recv().await.unwrap(),
        StreamEvent::Data { .. }
    ));
    match stream.recv().await.unwrap() {
        StreamEvent::Trailers(trailers) => {
            assert_eq!(trailers.get(b"grpc-status").unwrap().as_ref(), b"0");
        }
        other => panic!("expected trailers, got {:?}", other),
    }
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn dropping_a_stream_sends_cancel() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let request = HeaderList::request("GET", "https", "example.com", "/slow");
    let stream = client.start_stream(request, true).await.unwrap();
    server.expect(HEADERS).await;

    drop(stream);

    let rst = server.expect(RST_STREAM).await;
    assert_eq!(rst.stream_id, 1);
    assert_eq!(rst.error_code(), 8); // CANCEL
}

#[tokio::test]
async fn peer_reset_is_surfaced() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, _conn) = Builder::new().handshake(client_io).await.unwrap();
    let mut server = MockServer::accept(server_io, &[]).await;

    let request = HeaderList::request("GET", "https", "example.com", "/");
    let mut stream = client.start_stream(request, true).await.unwrap();
    server.expect(HEADERS).await;

    server.send_rst_stream(1, 11).await; // ENHANCE_YOUR_CALM
    match stream.recv().await.unwrap() {
        StreamEvent::Reset(reason) => assert_eq!(u32::from(reason), 11),
        other => panic!("expected reset, got {:?}", other),
    }
}
