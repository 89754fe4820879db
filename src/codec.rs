//! Adapter between the ordered byte stream and whole [`Frame`]s.
//!
//! The read half frames the stream with a length-delimited codec keyed on
//! the 3-octet length field of the 9-octet frame header; the write half
//! encodes frames into a single buffer so a back-to-back group reaches the
//! transport without interleaving.

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{length_delimited, FramedRead as TokioFramedRead, LengthDelimitedCodec};

use crate::error::Error;
use crate::frame::{Frame, HEADER_LEN};

/// The read half of the transport. Exclusively owned by the reader task.
pub struct FrameReader<R> {
    inner: TokioFramedRead<R, LengthDelimitedCodec>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(io: R, max_frame_size: u32) -> FrameReader<R> {
        let inner = length_delimited::Builder::new()
            .big_endian()
            .length_field_length(3)
            .length_adjustment(HEADER_LEN as isize)
            .num_skip(0) // Don't skip the header
            .max_frame_length(max_frame_size as usize + HEADER_LEN)
            .new_read(io);
        FrameReader { inner }
    }

    /// Raise the read-side frame size bound once our SETTINGS advertising it
    /// has been acknowledged.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.inner
            .decoder_mut()
            .set_max_frame_length(max_frame_size as usize + HEADER_LEN);
    }

    /// Read one complete frame. `Error::Transport` covers both IO failure
    /// and end of stream; an over-long length field surfaces as
    /// FRAME_SIZE_ERROR.
    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        match self.inner.next().await {
            Some(Ok(buf)) => Ok(Frame::parse(buf)?),
            Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(Error::Protocol(crate::frame::Reason::FRAME_SIZE_ERROR))
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "transport closed",
            )
            .into()),
        }
    }
}

/// The write half of the transport. Exclusively owned by the writer task.
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: W) -> FrameWriter<W> {
        FrameWriter {
            io,
            buf: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Write a group of frames back-to-back and flush.
    pub async fn write_frames(&mut self, frames: &[Frame]) -> Result<(), Error> {
        self.buf.clear();
        for frame in frames {
            frame.encode(&mut self.buf);
        }
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        self.write_frames(std::slice::from_ref(frame)).await
    }

    /// Raw bytes followed by a SETTINGS frame, flushed together; used once
    /// for the connection preface.
    pub async fn write_preface(
        &mut self,
        preface: &[u8],
        settings: &crate::frame::Settings,
    ) -> Result<(), Error> {
        self.buf.clear();
        self.buf.extend_from_slice(preface);
        settings.encode(&mut self.buf);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Data, Ping, Reason, Settings};
    use bytes::Bytes;

    #[tokio::test]
    async fn frames_roundtrip_through_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_rx, _server_tx) = tokio::io::split(server);
        let (_client_rx, client_tx) = tokio::io::split(client);

        let mut writer = FrameWriter::new(client_tx);
        let mut reader = FrameReader::new(server_rx, 16_384);

        let frames = [
            Frame::from(Settings::default()),
            Frame::from(Ping::new(*b"abcdefgh")),
            Frame::from(Data::new(1.into(), Bytes::from_static(b"payload"), true)),
        ];
        writer.write_frames(&frames).await.unwrap();

        for expected in &frames {
            let got = reader.read_frame().await.unwrap();
            assert_eq!(&got, expected);
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_frame_size_error() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_rx, _keep) = tokio::io::split(server);
        let (_r, client_tx) = tokio::io::split(client);

        let mut writer = FrameWriter::new(client_tx);
        // Reader only accepts 16-byte payloads.
        let mut reader = FrameReader::new(server_rx, 16);

        let big = Data::new(1.into(), Bytes::from(vec![0u8; 64]), false);
        writer.write_frame(&big.into()).await.unwrap();

        match reader.read_frame().await {
            Err(Error::Protocol(reason)) => assert_eq!(reason, Reason::FRAME_SIZE_ERROR),
            other => panic!("expected FRAME_SIZE_ERROR, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn eof_is_transport_error() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_rx, _server_tx) = tokio::io::split(server);
        drop(client);

        let mut reader = FrameReader::new(server_rx, 16_384);
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::Transport(_))
        ));
    }
}
