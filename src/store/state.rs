/// Per-upload state machine.
///
/// Tracks the phase of one `store_file_in_bucket` run, the temp files and
/// open channels it owns, and its cancellation token. Terminal phases are
/// sticky: the first terminal transition wins and later ones are no-ops,
/// which is what makes error delivery and `kill()` idempotent.
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::DataChannel;

/// Upload lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    /// Demuxer still producing shards.
    Building,
    /// All shards emitted; workers transferring.
    Transferring,
    /// Bucket entry being created.
    Finalizing,
    Done,
    Failed,
    Killed,
}

impl UploadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadPhase::Done | UploadPhase::Failed | UploadPhase::Killed
        )
    }
}

/// Mutable per-shard bookkeeping owned by the upload.
pub struct ShardMeta {
    pub index: usize,
    pub tmp_path: PathBuf,
    pub size: u64,
    /// RIPEMD-160(SHA-256(shard)) hex, set once the temp file is complete.
    pub hash: String,
    /// Farmers excluded from contract negotiation for this shard.
    pub exclude: Vec<String>,
    /// Failed transfer attempts against the current pointer.
    pub transfer_attempts: usize,
}

impl ShardMeta {
    pub fn new(index: usize, tmp_path: PathBuf, exclude: Vec<String>) -> Self {
        Self {
            index,
            tmp_path,
            size: 0,
            hash: String::new(),
            exclude,
            transfer_attempts: 0,
        }
    }
}

/// State for one upload run.
pub struct UploadState {
    pub bucket_id: String,
    pub num_shards: usize,
    pub concurrency: usize,
    completed: AtomicUsize,
    phase: Mutex<UploadPhase>,
    clean_queue: Mutex<Vec<PathBuf>>,
    channels: Mutex<Vec<Arc<dyn DataChannel>>>,
    kill: CancellationToken,
}

impl UploadState {
    pub fn new(bucket_id: String, num_shards: usize, concurrency: usize) -> Arc<Self> {
        Arc::new(Self {
            bucket_id,
            num_shards,
            concurrency,
            completed: AtomicUsize::new(0),
            phase: Mutex::new(UploadPhase::Building),
            clean_queue: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            kill: CancellationToken::new(),
        })
    }

    pub fn phase(&self) -> UploadPhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Advance to a non-terminal phase. Ignored once terminal.
    pub fn set_phase(&self, phase: UploadPhase) {
        let mut current = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if !current.is_terminal() {
            *current = phase;
        }
    }

    /// Try to enter a terminal phase. Returns true for the transition that
    /// won; every later attempt is a no-op.
    pub fn transition_terminal(&self, to: UploadPhase) -> bool {
        let mut current = self.phase.lock().unwrap_or_else(|p| p.into_inner());
        if current.is_terminal() {
            return false;
        }
        debug!(from = ?*current, to = ?to, "upload terminal transition");
        *current = to;
        true
    }

    /// Cancellation token observed by every worker and bridge retry loop.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    pub fn killed(&self) -> bool {
        self.kill.is_cancelled()
    }

    /// Abort the upload. Idempotent and synchronous; in-flight bridge
    /// requests and transfers observe the token and unwind, after which
    /// the coordinator runs `cleanup`.
    pub fn kill(&self) {
        self.transition_terminal(UploadPhase::Killed);
        self.kill.cancel();
    }

    /// Record a temp file to remove on any terminal transition.
    pub fn track_temp(&self, path: PathBuf) {
        self.clean_queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(path);
    }

    /// Record an open channel to close on any terminal transition.
    pub fn track_channel(&self, channel: Arc<dyn DataChannel>) {
        self.channels
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(channel);
    }

    /// Temp files still registered for cleanup.
    pub fn pending_temp_files(&self) -> Vec<PathBuf> {
        self.clean_queue
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Count one finished shard; returns the new completed total.
    pub fn complete_shard(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Remove every tracked temp file and close every tracked channel.
    /// Idempotent and safe in every phase.
    pub async fn cleanup(&self) {
        let paths: Vec<PathBuf> = {
            let mut queue = self.clean_queue.lock().unwrap_or_else(|p| p.into_inner());
            queue.drain(..).collect()
        };
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "temp file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "temp file removal failed"),
            }
        }

        let channels: Vec<Arc<dyn DataChannel>> = {
            let mut open = self.channels.lock().unwrap_or_else(|p| p.into_inner());
            open.drain(..).collect()
        };
        for channel in channels {
            channel.close().await;
        }
    }
}
