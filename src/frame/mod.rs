//! HTTP/2 frame model, bit-exact per RFC 7540 §4 and §6.

use bytes::{BufMut, Bytes, BytesMut};

mod data;
mod error;
mod go_away;
mod head;
mod headers;
mod ping;
mod priority;
mod reason;
mod rst_stream;
mod settings;
mod stream_id;
mod window_update;

pub use data::Data;
pub use error::Error;
pub use go_away::GoAway;
pub use head::{Head, Kind};
pub use headers::{Continuation, Headers, PushPromise};
pub use ping::Ping;
pub use priority::Priority;
pub use reason::Reason;
pub use rst_stream::RstStream;
pub use settings::{
    Settings, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
    MAX_INITIAL_WINDOW_SIZE, MAX_MAX_FRAME_SIZE,
};
pub use stream_id::StreamId;
pub use window_update::WindowUpdate;

/// The 9-octet frame header length.
pub const HEADER_LEN: usize = 9;

/// One HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Data),
    Headers(Headers),
    Priority(Priority),
    Reset(RstStream),
    Settings(Settings),
    PushPromise(PushPromise),
    Ping(Ping),
    GoAway(GoAway),
    WindowUpdate(WindowUpdate),
    Continuation(Continuation),
    /// A frame of a type this implementation does not recognize. Preserved
    /// verbatim for the fallback sink.
    Unknown(Unknown),
}

/// An unrecognized frame, kept byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unknown {
    raw_kind: u8,
    flag: u8,
    stream_id: StreamId,
    payload: Bytes,
}

impl Unknown {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn raw_kind(&self) -> u8 {
        self.raw_kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl Frame {
    /// Parse one whole frame: the 9-octet header plus payload.
    pub fn parse(mut buf: BytesMut) -> Result<Frame, Error> {
        debug_assert!(buf.len() >= HEADER_LEN);
        // The reserved bit of the stream identifier must stay zero.
        if buf[5] & 0x80 != 0 {
            return Err(Error::InvalidStreamId);
        }
        let head = Head::parse(&buf[..HEADER_LEN]);
        let raw_kind = buf[3];
        let payload = buf.split_off(HEADER_LEN);

        let frame = match head.kind() {
            Kind::Data => Frame::Data(Data::load(head, payload)?),
            Kind::Headers => Frame::Headers(Headers::load(head, payload)?),
            Kind::Priority => Frame::Priority(Priority::load(head, &payload)?),
            Kind::Reset => Frame::Reset(RstStream::load(head, &payload)?),
            Kind::Settings => Frame::Settings(Settings::load(head, &payload)?),
            Kind::PushPromise => Frame::PushPromise(PushPromise::load(head, payload)?),
            Kind::Ping => Frame::Ping(Ping::load(head, &payload)?),
            Kind::GoAway => Frame::GoAway(GoAway::load(head, payload)?),
            Kind::WindowUpdate => Frame::WindowUpdate(WindowUpdate::load(head, &payload)?),
            Kind::Continuation => Frame::Continuation(Continuation::load(head, payload)?),
            Kind::Unknown => Frame::Unknown(Unknown {
                raw_kind,
                flag: head.flag(),
                stream_id: head.stream_id(),
                payload: payload.freeze(),
            }),
        };

        Ok(frame)
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        match self {
            Frame::Data(f) => f.encode(dst),
            Frame::Headers(f) => f.encode(dst),
            Frame::Priority(f) => f.encode(dst),
            Frame::Reset(f) => f.encode(dst),
            Frame::Settings(f) => f.encode(dst),
            Frame::PushPromise(f) => f.encode(dst),
            Frame::Ping(f) => f.encode(dst),
            Frame::GoAway(f) => f.encode(dst),
            Frame::WindowUpdate(f) => f.encode(dst),
            Frame::Continuation(f) => f.encode(dst),
            Frame::Unknown(f) => {
                let head = Head::new(Kind::Unknown, f.flag, f.stream_id);
                head.encode(f.payload.len(), f.raw_kind, dst);
                dst.put_slice(&f.payload);
            }
        }
    }

    /// The stream this frame belongs to; zero for connection frames.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::Data(f) => f.stream_id(),
            Frame::Headers(f) => f.stream_id(),
            Frame::Priority(f) => f.stream_id(),
            Frame::Reset(f) => f.stream_id(),
            Frame::Settings(_) | Frame::Ping(_) | Frame::GoAway(_) => StreamId::ZERO,
            Frame::PushPromise(f) => f.stream_id(),
            Frame::WindowUpdate(f) => f.stream_id(),
            Frame::Continuation(f) => f.stream_id(),
            Frame::Unknown(f) => f.stream_id(),
        }
    }
}

impl From<Data> for Frame {
    fn from(src: Data) -> Frame {
        Frame::Data(src)
    }
}

impl From<Headers> for Frame {
    fn from(src: Headers) -> Frame {
        Frame::Headers(src)
    }
}

impl From<RstStream> for Frame {
    fn from(src: RstStream) -> Frame {
        Frame::Reset(src)
    }
}

impl From<Settings> for Frame {
    fn from(src: Settings) -> Frame {
        Frame::Settings(src)
    }
}

impl From<Ping> for Frame {
    fn from(src: Ping) -> Frame {
        Frame::Ping(src)
    }
}

impl From<GoAway> for Frame {
    fn from(src: GoAway) -> Frame {
        Frame::GoAway(src)
    }
}

impl From<WindowUpdate> for Frame {
    fn from(src: WindowUpdate) -> Frame {
        Frame::WindowUpdate(src)
    }
}

impl From<Continuation> for Frame {
    fn from(src: Continuation) -> Frame {
        Frame::Continuation(src)
    }
}
