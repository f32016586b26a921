use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::watch;

/// Latest sample of a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Progress {
    pub(crate) transferred: u64,
    pub(crate) total: u64,
}

pub(crate) type ProgressSender = watch::Sender<Progress>;
pub(crate) type ProgressReceiver = watch::Receiver<Progress>;

pub(crate) fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    watch::channel(Progress::default())
}

/// Publishes a running byte count for a stream of known size.
#[derive(Debug)]
struct Counter {
    transferred: u64,
    total: u64,
    sender: ProgressSender,
}

impl Counter {
    fn add(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.transferred += bytes as u64;
        // A closed receiver only means nobody is watching anymore.
        let _ = self.sender.send(Progress {
            transferred: self.transferred,
            total: self.total,
        });
    }
}

/// Reader that reports how much of the underlying stream has been consumed.
#[derive(Debug)]
pub(crate) struct CountingReader<R> {
    inner: R,
    counter: Counter,
}

impl<R> CountingReader<R> {
    pub(crate) fn new(inner: R, total: u64, sender: ProgressSender) -> Self {
        Self {
            inner,
            counter: Counter {
                transferred: 0,
                total,
                sender,
            },
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            this.counter.add(buf.filled().len() - before);
        }
        poll
    }
}

/// Writer that reports how many bytes have been written through it.
#[derive(Debug)]
pub(crate) struct CountingWriter<W> {
    inner: W,
    counter: Counter,
}

impl<W> CountingWriter<W> {
    pub(crate) fn new(inner: W, total: u64, sender: ProgressSender) -> Self {
        Self {
            inner,
            counter: Counter {
                transferred: 0,
                total,
                sender,
            },
        }
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(written)) = poll {
            this.counter.add(written);
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
