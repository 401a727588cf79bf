/// Upload orchestrator.
///
/// Coordinates the full store flow for one file:
/// 1. Stat the file and pick a shard size
/// 2. Open a staging frame on the bridge
/// 3. Demux the file into shards, each staged to a temp file while its
///    SHA-256 and audit material stream alongside
/// 4. Negotiate a contract per shard and push it to the assigned farmer,
///    rotating blacklisted farmers as needed
/// 5. Finalize the frame into a bucket entry
///
/// A bounded worker pool (size `concurrency`) drives steps 3-4; the
/// demuxer stalls when every worker is busy, so memory use stays flat
/// regardless of file size.
pub mod state;
pub(crate) mod transfer;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audit::{AuditGenerator, DEFAULT_CHALLENGES};
use crate::bridge::models::FileEntry;
use crate::client::Client;
use crate::crypto::hash;
use crate::demux::{optimal_shard_size, FileDemuxer, ShardStream};
use crate::error::{EngineError, Result};
use state::{ShardMeta, UploadPhase, UploadState};

/// A running upload. Dropping the handle does not stop the transfer; call
/// [`Upload::kill`] to abort or [`Upload::join`] to wait for the result.
pub struct Upload {
    state: Arc<UploadState>,
    task: JoinHandle<Result<FileEntry>>,
}

impl Upload {
    /// Abort the upload. Idempotent; the result of `join` becomes
    /// [`EngineError::Cancelled`].
    pub fn kill(&self) {
        self.state.kill();
    }

    /// Upload state, for progress inspection.
    pub fn state(&self) -> &Arc<UploadState> {
        &self.state
    }

    /// Wait for the terminal result. Delivered exactly once.
    pub async fn join(self) -> Result<FileEntry> {
        self.task
            .await
            .map_err(|e| EngineError::UploadFailed(format!("upload task panicked: {e}")))?
    }
}

struct ShardTask {
    shard: ShardStream,
    meta: ShardMeta,
}

impl Client {
    /// Store a file in a bucket and wait for the bucket entry.
    pub async fn store_file_in_bucket(
        &self,
        bucket: &str,
        file_path: &Path,
    ) -> Result<FileEntry> {
        self.start_store(bucket, file_path).await?.join().await
    }

    /// Begin storing a file; returns a handle for cancellation and
    /// completion.
    pub async fn start_store(&self, bucket: &str, file_path: &Path) -> Result<Upload> {
        let bucket_id = self.normalize_bucket_id(bucket)?;
        let stat = tokio::fs::metadata(file_path).await?;
        let file_size = stat.len();
        if file_size == 0 {
            return Err(EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "0 bytes is not a supported file size.",
            )));
        }

        let shard_size = optimal_shard_size(file_size, self.options().concurrency);
        let num_shards = file_size.div_ceil(shard_size) as usize;
        let state = UploadState::new(bucket_id, num_shards, self.options().concurrency);

        info!(
            bucket = %state.bucket_id,
            file = %file_path.display(),
            size = file_size,
            shard_size,
            shards = num_shards,
            "starting upload"
        );

        let client = self.clone();
        let run_state = state.clone();
        let path = file_path.to_path_buf();
        let task = tokio::spawn(async move {
            run_upload(client, run_state, path, file_size, shard_size).await
        });

        Ok(Upload { state, task })
    }
}

/// Drive the upload to a terminal phase, clean up, and deliver exactly
/// one result.
async fn run_upload(
    client: Client,
    state: Arc<UploadState>,
    path: PathBuf,
    file_size: u64,
    shard_size: u64,
) -> Result<FileEntry> {
    let outcome = drive_upload(&client, &state, &path, file_size, shard_size).await;
    match outcome {
        Ok(entry) => {
            state.transition_terminal(UploadPhase::Done);
            state.cleanup().await;
            info!(bucket = %state.bucket_id, file = %entry.id, "upload complete");
            Ok(entry)
        }
        Err(EngineError::Cancelled) => {
            state.transition_terminal(UploadPhase::Killed);
            state.cleanup().await;
            Err(EngineError::Cancelled)
        }
        Err(e) => {
            state.transition_terminal(UploadPhase::Failed);
            state.cleanup().await;
            Err(EngineError::UploadFailed(e.to_string()))
        }
    }
}

async fn drive_upload(
    client: &Client,
    state: &Arc<UploadState>,
    path: &Path,
    file_size: u64,
    shard_size: u64,
) -> Result<FileEntry> {
    let frame = client.bridge().create_frame().await?;
    debug!(frame = %frame.id, "staging frame created");

    let (task_tx, task_rx) = mpsc::channel::<ShardTask>(state.concurrency);
    let task_rx = Arc::new(tokio::sync::Mutex::new(task_rx));
    let first_error: Arc<Mutex<Option<EngineError>>> = Arc::new(Mutex::new(None));

    let mut workers = Vec::with_capacity(state.concurrency);
    for _ in 0..state.concurrency {
        workers.push(tokio::spawn(shard_worker(
            client.clone(),
            state.clone(),
            frame.id.clone(),
            task_rx.clone(),
            first_error.clone(),
        )));
    }

    let mut demuxer = FileDemuxer::open(path.to_path_buf(), file_size, shard_size);
    let kill = state.kill_token();
    loop {
        let shard = tokio::select! {
            _ = kill.cancelled() => break,
            next = demuxer.next_shard() => match next {
                Some(shard) => shard,
                None => break,
            },
        };
        let exclude = client.blacklist().snapshot().await;
        let meta = ShardMeta::new(shard.index, temp_shard_path(), exclude);
        state.track_temp(meta.tmp_path.clone());
        // Bounded queue: blocks while every worker is busy, which pauses
        // the demuxer through its own backpressure.
        if task_tx.send(ShardTask { shard, meta }).await.is_err() {
            break;
        }
    }
    drop(task_tx);
    state.set_phase(UploadPhase::Transferring);

    join_all(workers).await;

    if state.phase() == UploadPhase::Killed {
        return Err(EngineError::Cancelled);
    }
    if let Some(e) = first_error.lock().unwrap_or_else(|p| p.into_inner()).take() {
        return Err(e);
    }
    if state.killed() {
        return Err(EngineError::Cancelled);
    }
    if state.completed() != state.num_shards {
        return Err(EngineError::UploadFailed(format!(
            "only {} of {} shards completed",
            state.completed(),
            state.num_shards
        )));
    }

    state.set_phase(UploadPhase::Finalizing);
    let (filename, mimetype) = entry_metadata(path);
    let entry = tokio::select! {
        _ = kill.cancelled() => return Err(EngineError::Cancelled),
        res = client.bridge().create_entry_from_frame(
            &state.bucket_id,
            &frame.id,
            &filename,
            &mimetype,
        ) => res?,
    };
    Ok(entry)
}

/// Worker loop: pull shard tasks until the queue closes. The first
/// irrecoverable error flips the state to `Failed` and cancels the shared
/// token so its siblings unwind.
async fn shard_worker(
    client: Client,
    state: Arc<UploadState>,
    frame_id: String,
    task_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ShardTask>>>,
    first_error: Arc<Mutex<Option<EngineError>>>,
) {
    loop {
        let task = { task_rx.lock().await.recv().await };
        let Some(task) = task else { return };
        if state.killed() {
            // Keep draining so the demuxer can unwind; shard streams are
            // dropped unread.
            continue;
        }
        match process_shard(&client, &state, &frame_id, task).await {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {}
            Err(e) => {
                if state.transition_terminal(UploadPhase::Failed) {
                    *first_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(e);
                }
                state.kill_token().cancel();
            }
        }
    }
}

/// End-to-end handling of one shard: drain to temp file while hashing and
/// generating audit material, then negotiate and transfer.
async fn process_shard(
    client: &Client,
    state: &Arc<UploadState>,
    frame_id: &str,
    task: ShardTask,
) -> Result<()> {
    let ShardTask { mut shard, mut meta } = task;
    let kill = state.kill_token();

    let mut file = tokio::fs::File::create(&meta.tmp_path).await?;
    let mut hasher = Sha256::new();
    let mut audit = AuditGenerator::new(DEFAULT_CHALLENGES);

    loop {
        let chunk = tokio::select! {
            _ = kill.cancelled() => return Err(EngineError::Cancelled),
            chunk = shard.next_chunk() => chunk,
        };
        match chunk {
            None => break,
            Some(Ok(bytes)) => {
                file.write_all(&bytes).await?;
                hasher.update(&bytes);
                audit.update(&bytes);
                meta.size += bytes.len() as u64;
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
    file.flush().await?;
    drop(file);

    meta.hash = hex::encode(hash::rmd160(&hasher.finalize()));
    let record = audit.finish();
    debug!(
        shard = meta.index,
        size = meta.size,
        hash = %meta.hash,
        "shard staged"
    );

    transfer::negotiate_and_transfer(client, state, &mut meta, frame_id, &record).await?;

    let completed = state.complete_shard();
    debug!(
        completed,
        total = state.num_shards,
        "shard pipeline finished"
    );
    Ok(())
}

/// Fresh 12-hex-char temp path under the OS temp dir.
fn temp_shard_path() -> PathBuf {
    let mut name = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut name);
    std::env::temp_dir().join(hex::encode(name))
}

/// Bucket-entry filename and mimetype: a trailing `.crypt` suffix is an
/// artifact of client-side encryption and is stripped before the name is
/// recorded; the mimetype comes from the stripped name.
fn entry_metadata(path: &Path) -> (String, String) {
    let original = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = original
        .strip_suffix(".crypt")
        .unwrap_or(&original)
        .to_string();
    let mimetype = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .to_string();
    (filename, mimetype)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_metadata_strips_crypt_suffix() {
        let (filename, mimetype) = entry_metadata(Path::new("/data/report.pdf.crypt"));
        assert_eq!(filename, "report.pdf");
        assert_eq!(mimetype, "application/pdf");
    }

    #[test]
    fn test_entry_metadata_plain_name() {
        let (filename, mimetype) = entry_metadata(Path::new("notes.txt"));
        assert_eq!(filename, "notes.txt");
        assert_eq!(mimetype, "text/plain");
    }

    #[test]
    fn test_entry_metadata_unknown_extension() {
        let (_, mimetype) = entry_metadata(Path::new("blob.sharddata"));
        assert_eq!(mimetype, "application/octet-stream");
    }

    #[test]
    fn test_temp_shard_path_shape() {
        let path = temp_shard_path();
        let name = path.file_name().unwrap().to_string_lossy();
        assert_eq!(name.len(), 12);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(path.parent().unwrap(), std::env::temp_dir());
    }
}
