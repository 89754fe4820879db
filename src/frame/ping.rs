use bytes::BufMut;

use crate::frame::{error::Error, Head, Kind, StreamId};

const ACK: u8 = 0x1;

/// A PING frame: 8 opaque octets, optionally an ACK.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Ping {
    ack: bool,
    payload: [u8; 8],
}

impl Ping {
    pub fn new(payload: [u8; 8]) -> Ping {
        Ping {
            ack: false,
            payload,
        }
    }

    pub fn pong(payload: [u8; 8]) -> Ping {
        Ping { ack: true, payload }
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Ping, Error> {
        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }
        if payload.len() != 8 {
            return Err(Error::BadFrameSize);
        }

        let mut bytes = [0; 8];
        bytes.copy_from_slice(payload);

        Ok(Ping {
            ack: head.flag() & ACK == ACK,
            payload: bytes,
        })
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn payload(&self) -> &[u8; 8] {
        &self.payload
    }

    pub fn into_payload(self) -> [u8; 8] {
        self.payload
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let flag = if self.ack { ACK } else { 0 };
        let head = Head::new(Kind::Ping, flag, StreamId::ZERO);
        head.encode(8, Kind::Ping as u8, dst);
        dst.put_slice(&self.payload);
    }
}
