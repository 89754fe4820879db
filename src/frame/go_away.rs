use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::{error::Error, Head, Kind, Reason, StreamId};

/// A GOAWAY frame: the sender will not process streams above
/// `last_stream_id`, and is shutting the connection down.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GoAway {
    last_stream_id: StreamId,
    reason: Reason,
    debug_data: Bytes,
}

impl GoAway {
    pub fn new(last_stream_id: StreamId, reason: Reason) -> Self {
        GoAway {
            last_stream_id,
            reason,
            debug_data: Bytes::new(),
        }
    }

    pub fn with_debug_data(last_stream_id: StreamId, reason: Reason, debug_data: Bytes) -> Self {
        GoAway {
            last_stream_id,
            reason,
            debug_data,
        }
    }

    pub fn load(head: Head, mut payload: BytesMut) -> Result<GoAway, Error> {
        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }
        if payload.len() < 8 {
            return Err(Error::BadFrameSize);
        }

        let (last_stream_id, _) = StreamId::parse(&payload[..4]);
        let reason = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        payload.advance(8);

        Ok(GoAway {
            last_stream_id,
            reason: reason.into(),
            debug_data: payload.freeze(),
        })
    }

    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn debug_data(&self) -> &Bytes {
        &self.debug_data
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let head = Head::new(Kind::GoAway, 0, StreamId::ZERO);
        head.encode(8 + self.debug_data.len(), Kind::GoAway as u8, dst);
        self.last_stream_id.encode(dst);
        dst.put_u32(self.reason.into());
        dst.put_slice(&self.debug_data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_debug_data() {
        let goaway =
            GoAway::with_debug_data(3.into(), Reason::ENHANCE_YOUR_CALM, Bytes::from_static(b"calm down"));
        let mut buf = BytesMut::new();
        goaway.encode(&mut buf);
        let head = Head::parse(&buf[..9]);
        let loaded = GoAway::load(head, buf.split_off(9)).unwrap();
        assert_eq!(loaded, goaway);
    }

    #[test]
    fn load_rejects_short_payload() {
        let head = Head::new(Kind::GoAway, 0, StreamId::ZERO);
        assert_eq!(
            GoAway::load(head, BytesMut::from(&[0; 7][..])),
            Err(Error::BadFrameSize)
        );
    }
}
