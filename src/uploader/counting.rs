use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Progress callback invoked with `(bytes_written, total_bytes)`
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Stream adapter that counts the bytes flowing through it
///
/// Every chunk from the inner stream is yielded unchanged. Before handing
/// the chunk on, the running total is bumped by its length and the callback
/// fires with `(cumulative, total_bytes)`. `total_bytes` is the file size
/// given at construction and is never recomputed. Empty chunks are passed
/// through and still trigger the callback with an unchanged count.
///
/// The callback runs on the I/O path, so it must not block.
pub struct CountingStream<S> {
    inner: S,
    bytes_written: u64,
    total_bytes: u64,
    on_progress: ProgressFn,
}

impl<S> CountingStream<S> {
    pub fn new(inner: S, total_bytes: u64, on_progress: ProgressFn) -> Self {
        Self {
            inner,
            bytes_written: 0,
            total_bytes,
            on_progress,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

impl<S, B, E> Stream for CountingStream<S>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = Result<B, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.bytes_written += chunk.as_ref().len() as u64;
                (this.on_progress)(this.bytes_written, this.total_bytes);
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
