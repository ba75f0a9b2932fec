//! Declared-size limiter for upload bodies.
//!
//! The client announces its plaintext size up front in the `file-size` form
//! field. This wrapper forwards up to that many bytes and raises a dedicated
//! sentinel as soon as one more byte arrives, so the pipeline can distinguish
//! "client lied about its size" from the server-wide body cap.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use thiserror::Error;
use tokio::io::{AsyncRead, ReadBuf};

/// Sentinel raised when a stream delivers more bytes than the client's
/// declared `file-size`.
#[derive(Debug, Error)]
#[error("file body exceeds the declared file-size")]
pub struct DeclaredSizeExceeded;

/// [`AsyncRead`] wrapper enforcing the declared byte count.
///
/// Bytes up to the limit pass through untouched. Once the limit is reached,
/// the next read probes the inner stream: end-of-stream is a clean EOF, any
/// further byte fails the read with [`DeclaredSizeExceeded`], and nothing
/// past the boundary is ever delivered downstream.
pub struct DeclaredSizeReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> DeclaredSizeReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for DeclaredSizeReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();

        if me.remaining == 0 {
            let mut probe_byte = [0u8; 1];
            let mut probe = ReadBuf::new(&mut probe_byte);
            ready!(Pin::new(&mut me.inner).poll_read(cx, &mut probe))?;
            return if probe.filled().is_empty() {
                Poll::Ready(Ok(()))
            } else {
                Poll::Ready(Err(io::Error::other(DeclaredSizeExceeded)))
            };
        }

        let limit = me.remaining.min(buf.remaining() as u64) as usize;
        let mut limited = buf.take(limit);
        ready!(Pin::new(&mut me.inner).poll_read(cx, &mut limited))?;
        let filled = limited.filled().len();

        // Mirror the filled region back into the caller's buffer.
        unsafe { buf.assume_init(filled) };
        buf.advance(filled);
        me.remaining -= filled as u64;
        Poll::Ready(Ok(()))
    }
}

/// Walk an error's source chain looking for a failure of type `T`.
pub fn chain_contains<T: std::error::Error + 'static>(
    err: &(dyn std::error::Error + 'static),
) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<T>() {
            return true;
        }
        current = e.source();
    }
    false
}
