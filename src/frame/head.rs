use bytes::BufMut;

use crate::frame::StreamId;

/// The 9-octet header common to every HTTP/2 frame:
/// `length(24) | type(8) | flags(8) | R(1) | stream_id(31)`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Head {
    kind: Kind,
    flag: u8,
    stream_id: StreamId,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Kind {
    Data = 0,
    Headers = 1,
    Priority = 2,
    Reset = 3,
    Settings = 4,
    PushPromise = 5,
    Ping = 6,
    GoAway = 7,
    WindowUpdate = 8,
    Continuation = 9,
    Unknown = 10,
}

impl Kind {
    pub fn new(byte: u8) -> Kind {
        match byte {
            0 => Kind::Data,
            1 => Kind::Headers,
            2 => Kind::Priority,
            3 => Kind::Reset,
            4 => Kind::Settings,
            5 => Kind::PushPromise,
            6 => Kind::Ping,
            7 => Kind::GoAway,
            8 => Kind::WindowUpdate,
            9 => Kind::Continuation,
            _ => Kind::Unknown,
        }
    }
}

impl Head {
    pub fn new(kind: Kind, flag: u8, stream_id: StreamId) -> Head {
        Head {
            kind,
            flag,
            stream_id,
        }
    }

    /// Parse an HTTP/2 frame header, the first 9 bytes of `header`.
    pub fn parse(header: &[u8]) -> Head {
        let (stream_id, _) = StreamId::parse(&header[5..9]);

        Head {
            kind: Kind::new(header[3]),
            flag: header[4],
            stream_id,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn flag(&self) -> u8 {
        self.flag
    }

    /// Write the frame header with `payload_len` as the length field. The
    /// raw frame type is used so unknown frames round-trip.
    pub fn encode<B: BufMut>(&self, payload_len: usize, raw_kind: u8, dst: &mut B) {
        debug_assert!(payload_len < 1 << 24);
        dst.put_uint(payload_len as u64, 3);
        dst.put_u8(raw_kind);
        dst.put_u8(self.flag);
        self.stream_id.encode(dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header() {
        // length = 5, type = DATA, flags = END_STREAM, stream 3
        let head = Head::parse(&[0, 0, 5, 0, 0x1, 0, 0, 0, 3]);
        assert_eq!(head.kind(), Kind::Data);
        assert_eq!(head.flag(), 0x1);
        assert_eq!(head.stream_id(), StreamId::from(3));
    }

    #[test]
    fn unknown_kind() {
        let head = Head::parse(&[0, 0, 0, 0xab, 0, 0, 0, 0, 1]);
        assert_eq!(head.kind(), Kind::Unknown);
    }
}
