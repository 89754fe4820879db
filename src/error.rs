use std::{io, sync::Arc};

use thiserror::Error;

use crate::frame::{self, Reason};
use crate::hpack::DecoderError;
use crate::proto::RemoteGoAway;

/// Everything that can go wrong on an HTTP/2 client connection.
///
/// Connection-fatal variants poison the connection: the first one wins, and
/// every later operation (and every live stream) observes it via
/// [`Error::Closed`] or directly.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The underlying byte stream failed or reached end of stream.
    #[error("transport| {0}")]
    Transport(#[source] Arc<io::Error>),

    /// The peer violated the framing or protocol rules; the connection is
    /// terminated with a GOAWAY carrying this reason.
    #[error("protocol error| {0}")]
    Protocol(Reason),

    /// Header decompression failed; fatal, COMPRESSION_ERROR.
    #[error("header compression| {0:?}")]
    Hpack(DecoderError),

    /// A flow-control window underflowed or was pushed past 2^31-1.
    #[error("flow control violated")]
    FlowControl,

    /// The stream was reset, locally or by the peer. Stream-scoped.
    #[error("stream reset| {0}")]
    StreamReset(Reason),

    /// The peer is shutting the connection down.
    #[error("remote GOAWAY| {}", .0.reason)]
    RemoteGoAway(RemoteGoAway),

    /// A PING was not acknowledged within the configured timeout.
    #[error("ping timed out")]
    PingTimeout,

    /// The peer sent GOAWAY; no new streams may be started.
    #[error("connection is shutting down, no new streams")]
    GoAwayInProgress,

    /// The odd 31-bit stream id space is exhausted; reconnect to continue.
    #[error("stream ids exhausted")]
    StreamIdExhausted,

    /// The peer's SETTINGS_MAX_CONCURRENT_STREAMS bound is reached.
    #[error("too many concurrent streams")]
    TooManyStreams,

    /// The peer did not select `h2` during the ALPN exchange.
    #[error("peer did not negotiate h2")]
    Alpn,

    /// Invalid caller usage, raised synchronously; the connection is
    /// untouched.
    #[error("invalid usage| {0}")]
    InvalidUsage(&'static str),

    /// The connection was already poisoned by the contained cause.
    #[error("connection closed| {0}")]
    Closed(#[source] Arc<Error>),
}

impl Error {
    /// The GOAWAY reason to advertise for this error, where one applies.
    pub(crate) fn reason(&self) -> Option<Reason> {
        match self {
            Error::Protocol(reason) => Some(*reason),
            Error::Hpack(_) => Some(Reason::COMPRESSION_ERROR),
            Error::FlowControl => Some(Reason::FLOW_CONTROL_ERROR),
            _ => None,
        }
    }

    pub(crate) fn closed(cause: &Error) -> Error {
        Error::Closed(Arc::new(cause.clone()))
    }
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Error {
        Error::Transport(Arc::new(src))
    }
}

impl From<frame::Error> for Error {
    fn from(src: frame::Error) -> Error {
        let reason = match src {
            frame::Error::BadFrameSize | frame::Error::InvalidPayloadLength => {
                Reason::FRAME_SIZE_ERROR
            }
            _ => Reason::PROTOCOL_ERROR,
        };
        Error::Protocol(reason)
    }
}

impl From<DecoderError> for Error {
    fn from(src: DecoderError) -> Error {
        Error::Hpack(src)
    }
}
