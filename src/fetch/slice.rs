/// Byte-range slicing over a frame's shard layout.
///
/// A slice request maps `[start, end)` onto a pointer window: whole
/// shards before `start` are skipped, the window covers every shard up to
/// and including the one holding `end`, and the reassembled stream is
/// trimmed on both sides to exactly `end - start` bytes.
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::bridge::models::FrameShard;

/// Pointer-window parameters for a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceParams {
    /// Whole shards entirely before `start`.
    pub skip: usize,
    /// Shards to fetch, counted from the start of the frame.
    pub limit: usize,
    /// Bytes to drop from the front of the fetched window.
    pub trim_front: u64,
    /// Bytes past `end` in the window's final shard.
    pub trim_back: u64,
}

/// Walk the frame's shards in index order and derive the window holding
/// `[start, end)`.
pub fn slice_params(shards: &[FrameShard], start: u64, end: u64) -> SliceParams {
    let mut count = 0u64;
    let mut params = SliceParams {
        skip: 0,
        limit: 0,
        trim_front: 0,
        trim_back: 0,
    };
    let mut front_set = false;
    let mut back_set = false;

    for shard in shards {
        let before = count;
        count += shard.size;

        if !front_set {
            if count <= start {
                params.skip += 1;
            } else {
                params.trim_front = start - before;
                front_set = true;
            }
        }
        if !back_set {
            params.limit += 1;
            if count >= end {
                params.trim_back = count - end;
                back_set = true;
            }
        }
    }
    params
}

/// Drops the first `trim_front` bytes of the inner stream, then emits
/// exactly `length` bytes.
pub struct TrimmedStream<R> {
    inner: R,
    skip_remaining: u64,
    emit_remaining: u64,
}

impl<R> std::fmt::Debug for TrimmedStream<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrimmedStream")
            .field("skip_remaining", &self.skip_remaining)
            .field("emit_remaining", &self.emit_remaining)
            .finish()
    }
}

impl<R> TrimmedStream<R> {
    pub fn new(inner: R, trim_front: u64, length: u64) -> Self {
        Self {
            inner,
            skip_remaining: trim_front,
            emit_remaining: length,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TrimmedStream<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if self.emit_remaining == 0 {
                return Poll::Ready(Ok(()));
            }

            let before = buf.filled().len();
            ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
            let read = buf.filled().len() - before;
            if read == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("slice source ended {} bytes early", self.emit_remaining),
                )));
            }

            if self.skip_remaining > 0 {
                let drop = self.skip_remaining.min(read as u64) as usize;
                let filled_len = buf.filled().len();
                buf.filled_mut().copy_within(before + drop..filled_len, before);
                buf.set_filled(filled_len - drop);
                self.skip_remaining -= drop as u64;
                if buf.filled().len() == before {
                    // Everything read so far was trimmed; read again.
                    continue;
                }
            }

            let produced = (buf.filled().len() - before) as u64;
            if produced > self.emit_remaining {
                buf.set_filled(before + self.emit_remaining as usize);
            }
            let produced = (buf.filled().len() - before) as u64;
            self.emit_remaining -= produced;
            return Poll::Ready(Ok(()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn shards(sizes: &[u64]) -> Vec<FrameShard> {
        sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| FrameShard {
                hash: format!("shard-{index}"),
                size,
                index,
            })
            .collect()
    }

    #[test]
    fn test_slice_spanning_three_shards() {
        let params = slice_params(&shards(&[10, 10, 10]), 5, 25);
        assert_eq!(
            params,
            SliceParams {
                skip: 0,
                limit: 3,
                trim_front: 5,
                trim_back: 5,
            }
        );
    }

    #[test]
    fn test_slice_within_single_shard() {
        let params = slice_params(&shards(&[10, 10, 10]), 12, 18);
        assert_eq!(params.skip, 1);
        assert_eq!(params.limit, 2);
        assert_eq!(params.trim_front, 2);
        assert_eq!(params.trim_back, 2);
    }

    #[test]
    fn test_slice_on_shard_boundary() {
        let params = slice_params(&shards(&[10, 10, 10]), 10, 20);
        assert_eq!(params.skip, 1);
        assert_eq!(params.limit, 2);
        assert_eq!(params.trim_front, 0);
        assert_eq!(params.trim_back, 0);
    }

    #[test]
    fn test_slice_to_file_end() {
        let params = slice_params(&shards(&[10, 10, 10]), 25, 30);
        assert_eq!(params.skip, 2);
        assert_eq!(params.limit, 3);
        assert_eq!(params.trim_front, 5);
        assert_eq!(params.trim_back, 0);
    }

    #[tokio::test]
    async fn test_trimmer_front_and_back() {
        let data: Vec<u8> = (0u8..30).collect();
        let mut trimmed = TrimmedStream::new(std::io::Cursor::new(data.clone()), 5, 20);
        let mut out = Vec::new();
        trimmed.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, &data[5..25]);
    }

    #[tokio::test]
    async fn test_trimmer_zero_trim() {
        let mut trimmed = TrimmedStream::new(std::io::Cursor::new(b"abcdef".to_vec()), 0, 6);
        let mut out = Vec::new();
        trimmed.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[tokio::test]
    async fn test_trimmer_short_source_errors() {
        let mut trimmed = TrimmedStream::new(std::io::Cursor::new(b"abc".to_vec()), 0, 10);
        let mut out = Vec::new();
        assert!(trimmed.read_to_end(&mut out).await.is_err());
    }
}
