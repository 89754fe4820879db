// PING (payload) => recvd
//                <= PING (payload) + ack
//
// User pings and the keepalive scheduler share one correlation table; the
// ACK for each outstanding ping is matched by payload.

use std::time::Instant;

use tokio::sync::oneshot;
use tracing::debug;

use crate::client::PingReply;
use crate::frame::Ping;

#[derive(Debug, Default)]
pub(crate) struct PingPong {
    /// Source for distinct keepalive payloads.
    next_seq: u64,
    pending: Vec<Pending>,
}

#[derive(Debug)]
struct Pending {
    payload: [u8; 8],
    sent_at: Instant,
    reply: oneshot::Sender<PingReply>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReceivedPing {
    /// Matched an outstanding ping; the waiter has been resolved.
    Ok,
    /// Not an ACK; a pong must be written back.
    MustAck,
    /// An ACK that matches nothing we sent.
    Unknown,
}

impl PingPong {
    pub fn new() -> PingPong {
        PingPong::default()
    }

    /// Register a ping about to be sent. The frame must be written after
    /// registration so the ACK can never race the table entry.
    pub fn register(&mut self, payload: [u8; 8]) -> oneshot::Receiver<PingReply> {
        let (tx, rx) = oneshot::channel();
        self.pending.push(Pending {
            payload,
            sent_at: Instant::now(),
            reply: tx,
        });
        rx
    }

    /// A distinct payload for the keepalive scheduler.
    pub fn next_payload(&mut self) -> [u8; 8] {
        self.next_seq = self.next_seq.wrapping_add(1);
        self.next_seq.to_be_bytes()
    }

    pub fn handle(&mut self, frame: Ping) -> ReceivedPing {
        if !frame.is_ack() {
            return ReceivedPing::MustAck;
        }

        let Some(at) = self
            .pending
            .iter()
            .position(|p| p.payload == *frame.payload())
        else {
            debug!(payload = ?frame.payload(), "pong matches no outstanding ping");
            return ReceivedPing::Unknown;
        };

        let pending = self.pending.remove(at);
        // The waiter may have timed out and dropped its receiver.
        let _ = pending.reply.send(PingReply {
            sent_at: pending.sent_at,
            received_at: Instant::now(),
            payload: pending.payload,
        });
        ReceivedPing::Ok
    }

    /// Drop a registration whose waiter gave up.
    pub fn forget(&mut self, payload: [u8; 8]) {
        self.pending.retain(|p| p.payload != payload);
    }

    /// Connection teardown: dropping the reply senders resolves every
    /// waiter with a recv error.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}
