//! The client connection preface (RFC 7540 §3.5).

use tokio::io::AsyncWrite;
use tracing::trace;

use crate::codec::FrameWriter;
use crate::error::Error;
use crate::frame::Settings;

pub(crate) const PREFACE: [u8; 24] = *b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Write the preface octets followed by our initial SETTINGS frame,
/// synchronously, before any other outbound frame.
pub(crate) async fn send_client_preface<W>(
    writer: &mut FrameWriter<W>,
    settings: &Settings,
) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    writer.write_preface(&PREFACE, settings).await?;
    trace!(?settings, "client preface sent");
    Ok(())
}
