//! The Transport capability: an abstract duplex, framed message channel
//! feeding a [`crate::session::Session`].
//!
//! The embedded original expresses this as a vtable of function pointers
//! (`ninep_transport_ops{send,start,stop,get_mtu}`) plus a push-style
//! `recv_cb` invoked by the transport. The pull-based `async fn recv`/`send`
//! here is the idiomatic async-Rust rendition of the same contract: the
//! session's loop simply awaits the next complete message instead of
//! registering a callback.

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// A channel that delivers exactly-once, in-order, fully formed 9P messages.
///
/// Fragmentation and reassembly below a single message are the transport's
/// job; the core only ever calls `send` with one complete message and only
/// ever receives one complete message per `recv`.
#[async_trait]
pub trait Transport: Send {
    /// Next complete message, or `None` on clean disconnect.
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;
    async fn send(&mut self, frame: &[u8]) -> io::Result<()>;
    /// Largest single message this transport can carry without this crate's
    /// own segmentation; used to clamp the msize a session will negotiate.
    fn mtu(&self) -> usize;
}

/// Framing for reliable byte streams (TCP, UART-like serial links): the
/// leading little-endian `size[4]` is both the 9P length prefix and the
/// frame delimiter, so `LengthDelimitedCodec` alone is sufficient — no
/// reassembly state machine is needed above a stream.
pub struct StreamTransport<R, W> {
    reader: FramedRead<R, LengthDelimitedCodec>,
    writer: FramedWrite<W, LengthDelimitedCodec>,
    mtu: usize,
}

fn stream_codec(max_frame: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .max_frame_length(max_frame)
        .little_endian()
        .new_codec()
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// `mtu` bounds both the largest frame this transport will accept and
    /// the msize a session negotiates over it.
    pub fn new(reader: R, writer: W, mtu: usize) -> Self {
        StreamTransport {
            reader: FramedRead::new(reader, stream_codec(mtu)),
            writer: FramedWrite::new(writer, stream_codec(mtu)),
            mtu,
        }
    }
}

#[async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        use futures::StreamExt;
        match self.reader.next().await {
            Some(Ok(bytes)) => Ok(Some(bytes.to_vec())),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        use futures::SinkExt;
        self.writer.send(BytesMut::from(frame).freeze()).await
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

/// A raw, unreliable datagram endpoint (CoAP-like, L2CAP-like) with an MTU
/// that may be much smaller than the negotiated `msize`.
#[async_trait]
pub trait Datagram: Send {
    async fn recv_datagram(&mut self) -> io::Result<Option<Vec<u8>>>;
    async fn send_datagram(&mut self, chunk: &[u8]) -> io::Result<()>;
    fn mtu(&self) -> usize;
}

#[derive(Debug, PartialEq, Eq)]
enum RxState {
    WaitSize,
    WaitData,
}

/// Block-wise segmentation and reassembly over a small-MTU datagram link, so
/// the session above still sees one `recv`/`send` per logical 9P message.
///
/// Modeled on `l2cap_session_chan`'s `RX_WAIT_SIZE`/`RX_WAIT_DATA` two-phase
/// accumulator: bytes trickle in one datagram at a time; once four bytes are
/// available the little-endian `size[4]` prefix tells us how much more to
/// wait for before handing a complete message up.
pub struct DatagramTransport<D> {
    inner: D,
    state: RxState,
    rx_buf: Vec<u8>,
    rx_expected: usize,
}

impl<D: Datagram> DatagramTransport<D> {
    pub fn new(inner: D) -> Self {
        DatagramTransport { inner, state: RxState::WaitSize, rx_buf: Vec::new(), rx_expected: 0 }
    }
}

#[async_trait]
impl<D: Datagram> Transport for DatagramTransport<D> {
    async fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        loop {
            if self.state == RxState::WaitSize && self.rx_buf.len() >= 4 {
                let size = u32::from_le_bytes(self.rx_buf[0..4].try_into().unwrap()) as usize;
                if size < 4 {
                    return Err(io::Error::new(io::ErrorKind::InvalidData, "bad message"));
                }
                self.rx_expected = size;
                self.state = RxState::WaitData;
            }

            if self.state == RxState::WaitData && self.rx_buf.len() >= self.rx_expected {
                let mut frame: Vec<u8> = self.rx_buf.drain(..self.rx_expected).collect();
                frame.drain(0..4);
                self.state = RxState::WaitSize;
                self.rx_expected = 0;
                return Ok(Some(frame));
            }

            match self.inner.recv_datagram().await? {
                Some(chunk) => self.rx_buf.extend_from_slice(&chunk),
                None => return Ok(None),
            }
        }
    }

    async fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut full = BytesMut::with_capacity(4 + frame.len());
        full.extend_from_slice(&((frame.len() as u32 + 4).to_le_bytes()));
        full.extend_from_slice(frame);

        let mtu = self.inner.mtu().max(1);
        let mut remaining = full.freeze();
        while !remaining.is_empty() {
            let take = remaining.len().min(mtu);
            let chunk = remaining.split_to(take);
            self.inner.send_datagram(&chunk).await?;
        }
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.inner.mtu()
    }
}
