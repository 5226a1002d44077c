//! A boxed, type-erased duplex stream so TCP and TLS sessions can share one
//! framing path, plus a small wrapper that replays bytes consumed while
//! probing for the EBCDIC pre-connection handshake (§3.1).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

pub type BoxedStream = Box<dyn AsyncReadWrite>;

pub struct PrefixedStream {
    prefix: Vec<u8>,
    prefix_pos: usize,
    inner: BoxedStream,
}

impl PrefixedStream {
    pub fn new(prefix: Vec<u8>, inner: BoxedStream) -> Self {
        Self { prefix, prefix_pos: 0, inner }
    }

    pub fn without_prefix(inner: BoxedStream) -> Self {
        Self::new(Vec::new(), inner)
    }
}

impl AsyncRead for PrefixedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.prefix_pos < self.prefix.len() {
            let remaining = self.prefix.len() - self.prefix_pos;
            let n = remaining.min(buf.remaining());
            let start = self.prefix_pos;
            buf.put_slice(&self.prefix[start..start + n]);
            self.prefix_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for PrefixedStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
