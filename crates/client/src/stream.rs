//! Byte streams sent to and received from the store.
//!
//! [`ByteStream`] is the one pull-based body type the client works with. Pull
//! sources (any [`Stream`] or [`AsyncRead`]) wrap directly. Push sources, where
//! a producer emits chunks on its own schedule, go through
//! [`ByteStream::channel`] or [`ByteStream::spawn`]: the producer feeds a
//! [`ChunkSender`] and the stream yields the chunks in order. Dropping the
//! stream before it ends tells the producer to stop.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

/// At most one chunk sits between a push producer and the consumer.
const CHANNEL_CAPACITY: usize = 1;

/// A lazy, single-pass stream of byte chunks.
///
/// Implements `futures::Stream<Item = std::io::Result<Bytes>>`. An `Err` item
/// is terminal: the stream yields nothing after it.
pub struct ByteStream {
    inner: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
}

impl ByteStream {
    /// Wrap an existing chunk stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// A stream that yields `bytes` as a single chunk.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            Self::new(stream::empty())
        } else {
            Self::new(stream::iter([Ok(bytes)]))
        }
    }

    /// Read chunks from an [`AsyncRead`] until EOF.
    ///
    /// Dropping the stream drops the reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::new(ReaderStream::new(reader))
    }

    /// Create a push bridge.
    ///
    /// Chunks passed to the returned [`ChunkSender`] come out of the stream in
    /// the same order. Dropping the sender ends the stream;
    /// [`ChunkSender::fail`] ends it with an error. Dropping the stream
    /// before the end cancels the sender.
    ///
    /// # Example
    ///
    /// ```
    /// # async fn example() -> std::io::Result<()> {
    /// use datalith_client::ByteStream;
    ///
    /// let (sender, stream) = ByteStream::channel();
    /// tokio::spawn(async move {
    ///     for part in ["hello", " ", "world"] {
    ///         if sender.send(part).await.is_err() {
    ///             break;
    ///         }
    ///     }
    /// });
    ///
    /// assert_eq!(stream.read_to_end().await?, "hello world");
    /// # Ok(())
    /// # }
    /// ```
    pub fn channel() -> (ChunkSender, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let sender = ChunkSender {
            tx,
            cancel: cancel.clone(),
        };
        let receiver = ChunkReceiver {
            rx,
            cancel,
            abort: None,
            finished: false,
        };
        (sender, Self::new(receiver))
    }

    /// Run a push producer as a Tokio task.
    ///
    /// An `Err` returned by the producer becomes the final item of the
    /// stream. Dropping the stream before the end aborts the task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, Fut>(produce: F) -> Self
    where
        F: FnOnce(ChunkSender) -> Fut,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = produce(ChunkSender {
            tx: tx.clone(),
            cancel: cancel.clone(),
        });

        let handle = tokio::spawn(async move {
            if let Err(error) = task.await {
                // The consumer may already be gone.
                let _ = tx.send(Err(error)).await;
            }
        });

        Self::new(ChunkReceiver {
            rx,
            cancel,
            abort: Some(handle.abort_handle()),
            finished: false,
        })
    }

    /// Drain the stream into one contiguous buffer.
    pub async fn read_to_end(mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for ByteStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

impl From<Bytes> for ByteStream {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for ByteStream {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static [u8]> for ByteStream {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for ByteStream {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for ByteStream {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(text)
    }
}

/// Returned by [`ChunkSender::send`] once the consuming stream is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("byte stream cancelled by its consumer")]
pub struct Cancelled;

impl From<Cancelled> for io::Error {
    fn from(cancelled: Cancelled) -> Self {
        Self::new(io::ErrorKind::BrokenPipe, cancelled)
    }
}

/// Producer half of [`ByteStream::channel`].
#[derive(Debug)]
pub struct ChunkSender {
    tx: mpsc::Sender<io::Result<Bytes>>,
    cancel: CancellationToken,
}

impl ChunkSender {
    /// Emit one chunk. Waits while the previous chunk is still unconsumed.
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<(), Cancelled> {
        let chunk = chunk.into();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Cancelled),
            result = self.tx.send(Ok(chunk)) => result.map_err(|_| Cancelled),
        }
    }

    /// End the stream with `error`.
    pub async fn fail(self, error: io::Error) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            _ = self.tx.send(Err(error)) => {}
        }
    }

    /// End the stream normally. Equivalent to dropping the sender.
    pub fn finish(self) {
        drop(self);
    }

    /// Returns `true` once the consumer has dropped the stream.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the consumer has dropped the stream.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

struct ChunkReceiver {
    rx: mpsc::Receiver<io::Result<Bytes>>,
    cancel: CancellationToken,
    abort: Option<AbortHandle>,
    finished: bool,
}

impl Stream for ChunkReceiver {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(error))) => {
                self.finished = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChunkReceiver {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.cancel.cancel();
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}
