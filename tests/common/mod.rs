//! A frame-level mock server speaking raw HTTP/2 over an in-process duplex
//! pipe. Tests drive the peer side of the connection byte-exactly.

#![allow(dead_code)]

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

// Frame type codes.
pub const DATA: u8 = 0x0;
pub const HEADERS: u8 = 0x1;
pub const PRIORITY: u8 = 0x2;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const PUSH_PROMISE: u8 = 0x5;
pub const PING: u8 = 0x6;
pub const GOAWAY: u8 = 0x7;
pub const WINDOW_UPDATE: u8 = 0x8;
pub const CONTINUATION: u8 = 0x9;

// Flags.
pub const END_STREAM: u8 = 0x1;
pub const ACK: u8 = 0x1;
pub const END_HEADERS: u8 = 0x4;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub struct RawFrame {
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Bytes,
}

impl RawFrame {
    pub fn error_code(&self) -> u32 {
        match self.kind {
            RST_STREAM => u32::from_be_bytes(self.payload[..4].try_into().unwrap()),
            GOAWAY => u32::from_be_bytes(self.payload[4..8].try_into().unwrap()),
            _ => panic!("frame {:#x} carries no error code", self.kind),
        }
    }

    pub fn window_increment(&self) -> u32 {
        assert_eq!(self.kind, WINDOW_UPDATE);
        u32::from_be_bytes(self.payload[..4].try_into().unwrap())
    }
}

pub struct MockServer {
    io: DuplexStream,
}

impl MockServer {
    /// Read the client preface and initial SETTINGS, then answer with our
    /// own SETTINGS (`pairs`) and an ACK of the client's.
    pub async fn accept(io: DuplexStream, pairs: &[(u16, u32)]) -> MockServer {
        let mut server = MockServer { io };

        let mut preface = [0u8; 24];
        server.io.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface, PREFACE, "client preface mismatch");

        let settings = server.recv_raw().await;
        assert_eq!(settings.kind, SETTINGS);
        assert_eq!(settings.flags & ACK, 0);

        server.send_settings(pairs).await;
        server.send_raw(SETTINGS, ACK, 0, &[]).await;
        server
    }

    // ===== raw IO =====

    pub async fn send_raw(&mut self, kind: u8, flags: u8, stream_id: u32, payload: &[u8]) {
        let mut frame = Vec::with_capacity(9 + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        frame.push(kind);
        frame.push(flags);
        frame.extend_from_slice(&stream_id.to_be_bytes());
        frame.extend_from_slice(payload);
        self.io.write_all(&frame).await.unwrap();
    }

    pub async fn recv_raw(&mut self) -> RawFrame {
        let mut head = [0u8; 9];
        self.io.read_exact(&mut head).await.unwrap();
        let len = u32::from_be_bytes([0, head[0], head[1], head[2]]) as usize;
        let mut payload = vec![0u8; len];
        self.io.read_exact(&mut payload).await.unwrap();
        RawFrame {
            kind: head[3],
            flags: head[4],
            stream_id: u32::from_be_bytes([head[5], head[6], head[7], head[8]]) & !(1 << 31),
            payload: Bytes::from(payload),
        }
    }

    /// Next frame that is not a SETTINGS frame (the client ACKs ours at its
    /// own pace).
    pub async fn recv_frame(&mut self) -> RawFrame {
        loop {
            let frame = self.recv_raw().await;
            if frame.kind != SETTINGS {
                return frame;
            }
        }
    }

    pub async fn expect(&mut self, kind: u8) -> RawFrame {
        let frame = self.recv_frame().await;
        assert_eq!(frame.kind, kind, "unexpected frame: {:?}", frame);
        frame
    }

    /// Consume frames until a GOAWAY with the given error code arrives.
    pub async fn expect_go_away(&mut self, error_code: u32) {
        loop {
            let frame = self.recv_frame().await;
            if frame.kind == GOAWAY {
                assert_eq!(frame.error_code(), error_code);
                return;
            }
        }
    }

    // ===== senders =====

    pub async fn send_settings(&mut self, pairs: &[(u16, u32)]) {
        let mut payload = Vec::with_capacity(pairs.len() * 6);
        for &(id, value) in pairs {
            payload.extend_from_slice(&id.to_be_bytes());
            payload.extend_from_slice(&value.to_be_bytes());
        }
        self.send_raw(SETTINGS, 0, 0, &payload).await;
    }

    pub async fn send_headers(&mut self, stream_id: u32, block: &[u8], flags: u8) {
        self.send_raw(HEADERS, flags, stream_id, block).await;
    }

    pub async fn send_continuation(&mut self, stream_id: u32, block: &[u8], flags: u8) {
        self.send_raw(CONTINUATION, flags, stream_id, block).await;
    }

    pub async fn send_data(&mut self, stream_id: u32, payload: &[u8], end_stream: bool) {
        let flags = if end_stream { END_STREAM } else { 0 };
        self.send_raw(DATA, flags, stream_id, payload).await;
    }

    pub async fn send_push_promise(&mut self, stream_id: u32, promised: u32, block: &[u8]) {
        let mut payload = Vec::with_capacity(4 + block.len());
        payload.extend_from_slice(&promised.to_be_bytes());
        payload.extend_from_slice(block);
        self.send_raw(PUSH_PROMISE, END_HEADERS, stream_id, &payload)
            .await;
    }

    pub async fn send_window_update(&mut self, stream_id: u32, increment: u32) {
        self.send_raw(WINDOW_UPDATE, 0, stream_id, &increment.to_be_bytes())
            .await;
    }

    pub async fn send_ping(&mut self, payload: [u8; 8], ack: bool) {
        let flags = if ack { ACK } else { 0 };
        self.send_raw(PING, flags, 0, &payload).await;
    }

    pub async fn send_rst_stream(&mut self, stream_id: u32, error_code: u32) {
        self.send_raw(RST_STREAM, 0, stream_id, &error_code.to_be_bytes())
            .await;
    }

    pub async fn send_go_away(&mut self, last_stream_id: u32, error_code: u32) {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&last_stream_id.to_be_bytes());
        payload.extend_from_slice(&error_code.to_be_bytes());
        self.send_raw(GOAWAY, 0, 0, &payload).await;
    }

    /// Answer the next PING with its ACK; a convenient barrier that
    /// guarantees the client has processed every frame we sent earlier.
    pub async fn answer_ping(&mut self) {
        let ping = self.expect(PING).await;
        assert_eq!(ping.flags & ACK, 0);
        let payload: [u8; 8] = ping.payload[..8].try_into().unwrap();
        self.send_ping(payload, true).await;
    }
}

// ===== tiny HPACK builders (static-indexed / plain literals only) =====

/// `:status: 200` as a single indexed field.
pub fn status_200() -> Vec<u8> {
    vec![0x88]
}

/// A literal field without indexing, new name, no Huffman. Keeps the mock
/// free of compression state.
pub fn literal(name: &str, value: &str) -> Vec<u8> {
    assert!(name.len() < 127 && value.len() < 127);
    let mut field = Vec::with_capacity(3 + name.len() + value.len());
    field.push(0x00);
    field.push(name.len() as u8);
    field.extend_from_slice(name.as_bytes());
    field.push(value.len() as u8);
    field.extend_from_slice(value.as_bytes());
    field
}

pub fn block(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}
