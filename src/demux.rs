/// File demultiplexer: splits a file into an ordered, finite sequence of
/// shard byte streams.
///
/// The file is read strictly sequentially; each shard is delivered as a
/// small bounded channel of chunks so a slow consumer exerts backpressure
/// all the way back to the file read. `⌈file_size / shard_size⌉` shards
/// are emitted and the last one may be short.
use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::debug;

/// Smallest shard the policy will ever pick.
pub const SHARD_SIZE_BASE: u64 = 8 * 1024 * 1024;

/// Largest shard the policy will ever pick.
pub const MAX_SHARD_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// How many doublings the policy steps back from the smallest size that
/// would hold the whole file in one shard.
const SHARD_MULTIPLES_BACK: u32 = 4;

/// Read granularity within a shard.
const READ_CHUNK: usize = 64 * 1024;

/// Chunks buffered per shard before the file read stalls.
const CHUNK_QUEUE: usize = 8;

/// One shard's byte stream, in file order.
pub struct ShardStream {
    pub index: usize,
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl ShardStream {
    /// Next chunk of this shard; `None` once the shard is fully delivered.
    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        self.rx.recv().await
    }
}

/// Handle to a running demux task.
pub struct FileDemuxer {
    shards: mpsc::Receiver<ShardStream>,
    num_shards: usize,
}

impl FileDemuxer {
    /// Start demuxing `path` into `⌈file_size / shard_size⌉` shards.
    pub fn open(path: PathBuf, file_size: u64, shard_size: u64) -> Self {
        let num_shards = file_size.div_ceil(shard_size) as usize;
        let (shard_tx, shards) = mpsc::channel(1);
        tokio::spawn(demux_task(path, file_size, shard_size, shard_tx));
        Self { shards, num_shards }
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Next shard stream, in index order; `None` after the last shard.
    pub async fn next_shard(&mut self) -> Option<ShardStream> {
        self.shards.recv().await
    }
}

async fn demux_task(
    path: PathBuf,
    file_size: u64,
    shard_size: u64,
    shard_tx: mpsc::Sender<ShardStream>,
) {
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            // Surface the open failure on the first shard stream.
            let (chunk_tx, rx) = mpsc::channel(1);
            if shard_tx.send(ShardStream { index: 0, rx }).await.is_ok() {
                let _ = chunk_tx.send(Err(e)).await;
            }
            return;
        }
    };

    let num_shards = file_size.div_ceil(shard_size) as usize;
    let mut remaining = file_size;

    for index in 0..num_shards {
        let (chunk_tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHUNK_QUEUE);
        if shard_tx.send(ShardStream { index, rx }).await.is_err() {
            // Consumer went away; stop reading.
            return;
        }

        let mut shard_remaining = shard_size.min(remaining);
        while shard_remaining > 0 {
            let want = (shard_remaining as usize).min(READ_CHUNK);
            let mut buf = vec![0u8; want];
            match file.read(&mut buf).await {
                Ok(0) => {
                    let _ = chunk_tx
                        .send(Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "file shrank while demuxing",
                        )))
                        .await;
                    return;
                }
                Ok(n) => {
                    buf.truncate(n);
                    shard_remaining -= n as u64;
                    remaining -= n as u64;
                    if chunk_tx.send(Ok(Bytes::from(buf))).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    let _ = chunk_tx.send(Err(e)).await;
                    return;
                }
            }
        }
        debug!(shard = index, "shard demuxed");
    }
}

/// Deterministic shard-size policy.
///
/// Picks the smallest power-of-two multiple of 8 MiB that would hold the
/// file, steps back a fixed number of doublings (capped at 4 GiB), then
/// halves while the resulting shard count stays below the configured
/// concurrency so small uploads still parallelize. Floor is 8 MiB.
pub fn optimal_shard_size(file_size: u64, shard_concurrency: usize) -> u64 {
    let mut doublings = 0u32;
    while doublings < 32 && SHARD_SIZE_BASE << doublings < file_size {
        doublings += 1;
    }
    let hops = doublings.saturating_sub(SHARD_MULTIPLES_BACK);
    let mut size = (SHARD_SIZE_BASE << hops).min(MAX_SHARD_SIZE);

    let concurrency = shard_concurrency.max(1) as u64;
    while size > SHARD_SIZE_BASE && file_size.div_ceil(size) < concurrency {
        size /= 2;
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_small_files_use_base_shard_size() {
        assert_eq!(optimal_shard_size(1, 6), SHARD_SIZE_BASE);
        assert_eq!(optimal_shard_size(1024 * 1024, 6), SHARD_SIZE_BASE);
        assert_eq!(optimal_shard_size(SHARD_SIZE_BASE, 6), SHARD_SIZE_BASE);
    }

    #[test]
    fn test_policy_is_deterministic_and_bounded() {
        let sizes = [1u64, 1 << 20, 1 << 27, 1 << 33, 1 << 40, u64::MAX / 2];
        for file_size in sizes {
            let a = optimal_shard_size(file_size, 6);
            let b = optimal_shard_size(file_size, 6);
            assert_eq!(a, b);
            assert!(a >= SHARD_SIZE_BASE);
            assert!(a <= MAX_SHARD_SIZE);
            assert!(a.is_power_of_two());
        }
    }

    #[test]
    fn test_large_files_scale_up() {
        // 16 GiB: smallest covering size is 16 GiB, four hops back = 1 GiB.
        let size = optimal_shard_size(16 * 1024 * 1024 * 1024, 6);
        assert_eq!(size, 1024 * 1024 * 1024);
    }

    #[test]
    fn test_concurrency_floor_splits_shards() {
        // A 64 GiB file would land on 4 GiB shards (16 shards), which
        // already exceeds the worker pool; the policy must not shrink
        // below what concurrency asks for.
        let size = optimal_shard_size(64 * 1024 * 1024 * 1024, 6);
        let shards = (64u64 * 1024 * 1024 * 1024).div_ceil(size);
        assert!(shards >= 6);
    }

    #[tokio::test]
    async fn test_demux_splits_in_order() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();

        let mut demuxer = FileDemuxer::open(tmp.path().to_path_buf(), 10, 4);
        assert_eq!(demuxer.num_shards(), 3);

        let mut collected = Vec::new();
        let mut index = 0;
        while let Some(mut shard) = demuxer.next_shard().await {
            assert_eq!(shard.index, index);
            let mut bytes = Vec::new();
            while let Some(chunk) = shard.next_chunk().await {
                bytes.extend_from_slice(&chunk.unwrap());
            }
            collected.push(bytes);
            index += 1;
        }

        assert_eq!(collected.len(), 3);
        assert_eq!(collected[0], b"0123");
        assert_eq!(collected[1], b"4567");
        assert_eq!(collected[2], b"89");
    }

    #[tokio::test]
    async fn test_demux_missing_file_errors() {
        let mut demuxer = FileDemuxer::open(PathBuf::from("/does/not/exist"), 10, 4);
        let mut shard = demuxer.next_shard().await.unwrap();
        assert!(shard.next_chunk().await.unwrap().is_err());
    }
}
