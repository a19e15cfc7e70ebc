//! [MTProto Full] transport over any tokio byte stream.
//!
//! [`FramedTransport`] buffers incoming bytes until one whole frame is
//! present and hands it to [`FullFramer`], which checks the length, CRC-32
//! and sequence number.
//!
//! [`FramedTransport::recv`] is cancel-safe: bytes read before the future is
//! dropped stay buffered for the next call. [`FramedTransport::send`] is not,
//! so a send that is dropped half-written poisons the transport and every
//! later call fails with [`io::ErrorKind::BrokenPipe`].
//!
//! [MTProto Full]: https://core.telegram.org/mtproto/mtproto-transports#full

use std::io;

use mtlink_mtproto::FullFramer;
use mtlink_mtproto::transport::FRAME_OVERHEAD;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame accepted from the server.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Full-transport framing on top of a stream.
#[derive(Debug)]
pub struct FramedTransport<S> {
    stream:  S,
    framer:  FullFramer,
    rx:      Vec<u8>,
    writing: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedTransport<S> {
    /// Wrap a connected stream. Full has no init bytes, so nothing is sent.
    pub fn new(stream: S) -> Self {
        Self { stream, framer: FullFramer::new(), rx: Vec::new(), writing: false }
    }

    /// Frame and send one payload.
    pub async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        self.check_poisoned()?;
        let frame = self.framer.serialize(payload);
        self.writing = true;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.writing = false;
        Ok(())
    }

    /// Receive the next intact payload.
    ///
    /// Frames that fail the checksum are skipped. A length field outside
    /// `12..=16 MiB` means the stream is out of step and fails with
    /// [`io::ErrorKind::InvalidData`].
    pub async fn recv(&mut self) -> io::Result<Vec<u8>> {
        self.check_poisoned()?;
        loop {
            if let Some(len) = self.buffered_frame_len()? {
                let frame: Vec<u8> = self.rx.drain(..len).collect();
                match self.framer.deserialize(&frame) {
                    Some(payload) => return Ok(payload),
                    None => tracing::debug!("[mtlink] skipped corrupt {len} byte frame"),
                }
                continue;
            }
            if self.stream.read_buf(&mut self.rx).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("full transport: stream closed with {} bytes buffered", self.rx.len()),
                ));
            }
        }
    }

    /// Length of the frame at the front of the buffer once all of it has
    /// arrived.
    fn buffered_frame_len(&self) -> io::Result<Option<usize>> {
        let Some(len_bytes) = self.rx.first_chunk::<4>() else {
            return Ok(None);
        };
        let len = u32::from_le_bytes(*len_bytes) as usize;
        if !(FRAME_OVERHEAD..=MAX_FRAME_LEN).contains(&len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("full transport: implausible frame length {len}"),
            ));
        }
        Ok((self.rx.len() >= len).then_some(len))
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.writing {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "full transport: an earlier send was interrupted mid-frame",
            ));
        }
        Ok(())
    }

    /// The underlying stream, e.g. to write bytes outside the framing.
    pub fn get_mut(&mut self) -> &mut S { &mut self.stream }

    /// The sequence counters of the underlying codec.
    pub fn framer(&self) -> &FullFramer { &self.framer }

    /// Give the stream back. Bytes already buffered by [`Self::recv`] are lost.
    pub fn into_inner(self) -> S { self.stream }
}
