//! The connection dispatcher and stream multiplexer.

pub(crate) mod dispatcher;
pub(crate) mod ping_pong;
pub(crate) mod registry;
pub(crate) mod settings;
pub(crate) mod window;

use bytes::Bytes;

use crate::frame::{Reason, StreamId};

pub(crate) type WindowSize = u32;

/// Flow-control windows may never exceed 2^31 - 1.
pub(crate) const MAX_WINDOW_SIZE: WindowSize = (1 << 31) - 1;

/// The RFC 7540 default connection and stream window.
pub(crate) const DEFAULT_WINDOW_SIZE: WindowSize = 65_535;

pub(crate) const DEFAULT_RESET_STREAM_MAX: usize = 50;
pub(crate) const DEFAULT_RESET_STREAM_SECS: u64 = 1;

/// A GOAWAY received from the peer: it will not process streams above
/// `last_stream_id`.
#[derive(Debug, Clone)]
pub struct RemoteGoAway {
    pub last_stream_id: StreamId,
    pub reason: Reason,
    pub debug_data: Bytes,
}
