use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::{error::Error, Head, Kind, StreamId};

pub const END_STREAM: u8 = 0x1;
pub const END_HEADERS: u8 = 0x4;
const PADDED: u8 = 0x8;
const PRIORITY: u8 = 0x20;

/// A HEADERS frame carrying (a fragment of) an HPACK header block.
///
/// The fragment is opaque at this layer: HPACK decoding happens in the
/// dispatcher once END_HEADERS has been seen, strictly in wire order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Headers {
    stream_id: StreamId,
    fragment: Bytes,
    end_stream: bool,
    end_headers: bool,
}

impl Headers {
    pub fn new(stream_id: StreamId, fragment: Bytes, end_stream: bool, end_headers: bool) -> Self {
        Headers {
            stream_id,
            fragment,
            end_stream,
            end_headers,
        }
    }

    pub fn load(head: Head, mut payload: BytesMut) -> Result<Self, Error> {
        if !head.stream_id().is_client_initiated() && !head.stream_id().is_server_initiated() {
            return Err(Error::InvalidStreamId);
        }

        if head.flag() & PADDED == PADDED {
            if payload.is_empty() {
                return Err(Error::InvalidPayloadLength);
            }
            let pad_len = payload[0] as usize;
            if pad_len + 1 > payload.len() {
                return Err(Error::TooMuchPadding);
            }
            payload.advance(1);
            payload.truncate(payload.len() - pad_len);
        }

        if head.flag() & PRIORITY == PRIORITY {
            if payload.len() < 5 {
                return Err(Error::InvalidPayloadLength);
            }
            let (dependency_id, _) = StreamId::parse(&payload[..4]);
            if dependency_id == head.stream_id() {
                return Err(Error::InvalidDependencyId);
            }
            // Dependency and weight are not interpreted.
            payload.advance(5);
        }

        Ok(Headers {
            stream_id: head.stream_id(),
            fragment: payload.freeze(),
            end_stream: head.flag() & END_STREAM == END_STREAM,
            end_headers: head.flag() & END_HEADERS == END_HEADERS,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn fragment(&self) -> &Bytes {
        &self.fragment
    }

    pub fn is_end_stream(&self) -> bool {
        self.end_stream
    }

    pub fn is_end_headers(&self) -> bool {
        self.end_headers
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let mut flag = 0;
        if self.end_stream {
            flag |= END_STREAM;
        }
        if self.end_headers {
            flag |= END_HEADERS;
        }
        let head = Head::new(Kind::Headers, flag, self.stream_id);
        head.encode(self.fragment.len(), Kind::Headers as u8, dst);
        dst.put_slice(&self.fragment);
    }
}

/// A PUSH_PROMISE frame reserving an even server stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PushPromise {
    stream_id: StreamId,
    promised_id: StreamId,
    fragment: Bytes,
    end_headers: bool,
}

impl PushPromise {
    pub fn new(
        stream_id: StreamId,
        promised_id: StreamId,
        fragment: Bytes,
        end_headers: bool,
    ) -> Self {
        PushPromise {
            stream_id,
            promised_id,
            fragment,
            end_headers,
        }
    }

    pub fn load(head: Head, mut payload: BytesMut) -> Result<Self, Error> {
        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if head.flag() & PADDED == PADDED {
            if payload.is_empty() {
                return Err(Error::InvalidPayloadLength);
            }
            let pad_len = payload[0] as usize;
            if pad_len + 1 > payload.len() {
                return Err(Error::TooMuchPadding);
            }
            payload.advance(1);
            payload.truncate(payload.len() - pad_len);
        }

        if payload.len() < 4 {
            return Err(Error::InvalidPayloadLength);
        }
        let (promised_id, _) = StreamId::parse(&payload[..4]);
        payload.advance(4);

        if promised_id.is_zero() {
            return Err(Error::InvalidStreamId);
        }

        Ok(PushPromise {
            stream_id: head.stream_id(),
            promised_id,
            fragment: payload.freeze(),
            end_headers: head.flag() & END_HEADERS == END_HEADERS,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn promised_id(&self) -> StreamId {
        self.promised_id
    }

    pub fn fragment(&self) -> &Bytes {
        &self.fragment
    }

    pub fn is_end_headers(&self) -> bool {
        self.end_headers
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let flag = if self.end_headers { END_HEADERS } else { 0 };
        let head = Head::new(Kind::PushPromise, flag, self.stream_id);
        head.encode(self.fragment.len() + 4, Kind::PushPromise as u8, dst);
        self.promised_id.encode(dst);
        dst.put_slice(&self.fragment);
    }
}

/// A CONTINUATION frame: the tail of a header block started by HEADERS or
/// PUSH_PROMISE on the same stream.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Continuation {
    stream_id: StreamId,
    fragment: Bytes,
    end_headers: bool,
}

impl Continuation {
    pub fn new(stream_id: StreamId, fragment: Bytes, end_headers: bool) -> Self {
        Continuation {
            stream_id,
            fragment,
            end_headers,
        }
    }

    pub fn load(head: Head, payload: BytesMut) -> Result<Self, Error> {
        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        Ok(Continuation {
            stream_id: head.stream_id(),
            fragment: payload.freeze(),
            end_headers: head.flag() & END_HEADERS == END_HEADERS,
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn fragment(&self) -> &Bytes {
        &self.fragment
    }

    pub fn is_end_headers(&self) -> bool {
        self.end_headers
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let flag = if self.end_headers { END_HEADERS } else { 0 };
        let head = Head::new(Kind::Continuation, flag, self.stream_id);
        head.encode(self.fragment.len(), Kind::Continuation as u8, dst);
        dst.put_slice(&self.fragment);
    }
}
