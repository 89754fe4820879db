use bytes::BufMut;

use crate::frame::{error::Error, Head, Kind, Reason, StreamId};

/// A RST_STREAM frame: immediate termination of a single stream.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RstStream {
    stream_id: StreamId,
    reason: Reason,
}

impl RstStream {
    pub fn new(stream_id: StreamId, reason: Reason) -> Self {
        RstStream { stream_id, reason }
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<RstStream, Error> {
        if head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }
        if payload.len() != 4 {
            return Err(Error::InvalidPayloadLength);
        }

        let reason = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);

        Ok(RstStream {
            stream_id: head.stream_id(),
            reason: reason.into(),
        })
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let head = Head::new(Kind::Reset, 0, self.stream_id);
        head.encode(4, Kind::Reset as u8, dst);
        dst.put_u32(self.reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn roundtrip() {
        let rst = RstStream::new(5.into(), Reason::CANCEL);
        let mut buf = BytesMut::new();
        rst.encode(&mut buf);
        let head = Head::parse(&buf[..9]);
        assert_eq!(RstStream::load(head, &buf[9..]).unwrap(), rst);
    }

    #[test]
    fn load_rejects_bad_length() {
        let head = Head::new(Kind::Reset, 0, 1.into());
        assert_eq!(
            RstStream::load(head, &[0; 3]),
            Err(Error::InvalidPayloadLength)
        );
    }
}
