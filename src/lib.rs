//! Client-side HTTP/2 over an ordered, reliable byte stream.
//!
//! The crate multiplexes many request streams over one connection: a single
//! reader task fans received frames out to per-stream mailboxes, a single
//! writer task serializes outbound frames from every producer, and both ends
//! of the HPACK state live inside those tasks so header blocks are coded in
//! wire order.
//!
//! ```no_run
//! # async fn doc(io: tokio::io::DuplexStream) -> Result<(), h2plex::Error> {
//! let (client, _conn) = h2plex::Builder::new().handshake(io).await?;
//!
//! let request = h2plex::HeaderList::request("GET", "https", "example.com", "/");
//! let mut stream = client.start_stream(request, true).await?;
//! while let Some(event) = stream.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

macro_rules! proto_err {
    (conn: $($msg:tt)+) => {
        tracing::debug!("connection error PROTOCOL_ERROR -- {};", format_args!($($msg)+))
    };
    (stream: $($msg:tt)+) => {
        tracing::debug!("stream error PROTOCOL_ERROR -- {};", format_args!($($msg)+))
    };
}

mod builder;
mod client;
mod codec;
mod connect;
mod error;
mod frame;
mod headers;
mod hpack;
mod preface;
mod proto;

pub use builder::Builder;
pub use client::{
    Client, Connection, PingReply, PushPromise, PushPromises, Stream, StreamEvent,
};
pub use connect::Connector;
pub use error::Error;
pub use frame::{Frame, Reason, Settings, StreamId};
pub use headers::{HeaderField, HeaderList};
pub use hpack::DecoderError;
pub use proto::RemoteGoAway;
