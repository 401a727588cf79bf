/// File multiplexer: strict in-order concatenation of N byte streams.
///
/// Sources are attached through a [`MuxerHandle`]; the reader consumes
/// source `k` only after sources `0..k-1` have fully drained, so output
/// byte order always matches attach order regardless of when the
/// underlying channels opened. The expected `(shards, length)` counters
/// only ever grow, via [`MuxerHandle::extend`], which is how the
/// sliding-window download declares late inputs before attaching them.
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::channel::BoxAsyncRead;
use crate::error::EngineError;

/// A source or failure pushed into the muxer.
enum MuxInput {
    Source(BoxAsyncRead),
    /// Fatal: surfaces as a read error on the output stream.
    Fail(EngineError),
}

struct Expected {
    bytes: AtomicU64,
    shards: AtomicUsize,
}

/// Readable side: one logical byte stream.
pub struct FileMuxer {
    rx: mpsc::Receiver<MuxInput>,
    current: Option<BoxAsyncRead>,
    expected: Arc<Expected>,
    attached: usize,
    delivered: u64,
}

impl std::fmt::Debug for FileMuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMuxer")
            .field("attached", &self.attached)
            .field("delivered", &self.delivered)
            .finish()
    }
}

/// Writable side: attaches sources and extends the expected totals.
#[derive(Clone)]
pub struct MuxerHandle {
    tx: mpsc::Sender<MuxInput>,
    expected: Arc<Expected>,
}

impl FileMuxer {
    /// A muxer expecting `shards` sources totalling `length` bytes, with
    /// room for `queue` sources attached ahead of consumption.
    pub fn new(shards: usize, length: u64, queue: usize) -> (FileMuxer, MuxerHandle) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let expected = Arc::new(Expected {
            bytes: AtomicU64::new(length),
            shards: AtomicUsize::new(shards),
        });
        (
            FileMuxer {
                rx,
                current: None,
                expected: expected.clone(),
                attached: 0,
                delivered: 0,
            },
            MuxerHandle { tx, expected },
        )
    }
}

impl MuxerHandle {
    /// Grow the expected totals ahead of attaching a late source. Counters
    /// strictly increase; there is no way to shrink a declared stream.
    pub fn extend(&self, by_bytes: u64, by_shards: usize) {
        self.expected.bytes.fetch_add(by_bytes, Ordering::SeqCst);
        self.expected.shards.fetch_add(by_shards, Ordering::SeqCst);
    }

    /// Attach the next source, in order. Blocks while the attach queue is
    /// full. Returns false when the reader has gone away.
    pub async fn add_input_source(&self, stream: BoxAsyncRead) -> bool {
        self.tx.send(MuxInput::Source(stream)).await.is_ok()
    }

    /// Poison the stream: the reader observes `err` on its next read.
    pub async fn fail(&self, err: EngineError) {
        let _ = self.tx.send(MuxInput::Fail(err)).await;
    }

    pub fn expected_bytes(&self) -> u64 {
        self.expected.bytes.load(Ordering::SeqCst)
    }

    pub fn expected_shards(&self) -> usize {
        self.expected.shards.load(Ordering::SeqCst)
    }
}

impl AsyncRead for FileMuxer {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if let Some(current) = self.current.as_mut() {
                let before = buf.filled().len();
                ready!(current.as_mut().poll_read(cx, buf))?;
                let n = buf.filled().len() - before;
                if n == 0 {
                    // Tail source drained; move on to the next one.
                    self.current = None;
                    continue;
                }
                self.delivered += n as u64;
                return Poll::Ready(Ok(()));
            }

            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(MuxInput::Source(stream))) => {
                    if self.attached == self.expected.shards.load(Ordering::SeqCst) {
                        return Poll::Ready(Err(io::Error::other(
                            "source attached beyond the declared shard count",
                        )));
                    }
                    self.attached += 1;
                    self.current = Some(stream);
                }
                Poll::Ready(Some(MuxInput::Fail(e))) => {
                    return Poll::Ready(Err(io::Error::other(e)));
                }
                Poll::Ready(None) => {
                    let want = self.expected.bytes.load(Ordering::SeqCst);
                    if self.delivered == want {
                        return Poll::Ready(Ok(()));
                    }
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!(
                            "multiplexed stream ended after {} of {} bytes",
                            self.delivered, want
                        ),
                    )));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
