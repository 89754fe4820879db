use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::{error::Error, Head, Kind, StreamId};

pub const END_STREAM: u8 = 0x1;
const PADDED: u8 = 0x8;

/// A DATA frame: flow-controlled opaque bytes on one stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Data {
    stream_id: StreamId,
    payload: Bytes,
    end_stream: bool,
    /// Bytes the peer padded the frame with. They count toward flow control
    /// even though the consumer never sees them.
    pad_len: usize,
}

impl Data {
    pub fn new(stream_id: StreamId, payload: Bytes, end_stream: bool) -> Self {
        Data {
            stream_id,
            payload,
            end_stream,
            pad_len: 0,
        }
    }

    pub fn load(head: Head, mut payload: BytesMut) -> Result<Self, Error> {
        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        let mut pad_len = 0;
        if head.flag() & PADDED == PADDED {
            if payload.is_empty() {
                return Err(Error::InvalidPayloadLength);
            }
            pad_len = payload[0] as usize;
            if pad_len + 1 > payload.len() {
                return Err(Error::TooMuchPadding);
            }
            payload.advance(1);
            payload.truncate(payload.len() - pad_len);
            // The pad-length octet itself is flow controlled too.
            pad_len += 1;
        }

        Ok(Data {
            stream_id: head.stream_id(),
            payload: payload.freeze(),
            end_stream: head.flag() & END_STREAM == END_STREAM,
            pad_len,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn is_end_stream(&self) -> bool {
        self.end_stream
    }

    /// Bytes charged against the receive windows: payload plus any padding.
    pub fn flow_len(&self) -> usize {
        self.payload.len() + self.pad_len
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let flag = if self.end_stream { END_STREAM } else { 0 };
        let head = Head::new(Kind::Data, flag, self.stream_id);
        head.encode(self.payload.len(), Kind::Data as u8, dst);
        dst.put_slice(&self.payload);
    }
}
