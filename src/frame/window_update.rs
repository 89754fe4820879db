use bytes::BufMut;

use crate::frame::{error::Error, Head, Kind, StreamId};

/// A WINDOW_UPDATE frame: flow-control credit for a stream, or for the
/// connection when the stream ID is zero.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WindowUpdate {
    stream_id: StreamId,
    increment: u32,
}

impl WindowUpdate {
    pub fn new(stream_id: StreamId, increment: u32) -> Self {
        debug_assert!(increment > 0);
        WindowUpdate {
            stream_id,
            increment,
        }
    }

    /// A zero increment on the connection is rejected here (connection
    /// PROTOCOL_ERROR); on a stream it parses and the dispatcher answers
    /// with a stream-level reset instead.
    pub fn load(head: Head, payload: &[u8]) -> Result<WindowUpdate, Error> {
        if payload.len() != 4 {
            return Err(Error::InvalidPayloadLength);
        }

        let (increment, _) = StreamId::parse(payload);
        let increment = increment.as_u32();
        if increment == 0 && head.stream_id().is_zero() {
            return Err(Error::InvalidWindowUpdateValue);
        }

        Ok(WindowUpdate {
            stream_id: head.stream_id(),
            increment,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let head = Head::new(Kind::WindowUpdate, 0, self.stream_id);
        head.encode(4, Kind::WindowUpdate as u8, dst);
        dst.put_u32(self.increment);
    }
}
