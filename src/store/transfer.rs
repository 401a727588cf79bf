/// Per-shard contract negotiation and transfer with farmer rotation.
///
/// A shard keeps one pointer for up to `transfer_retries` attempts. When
/// the budget is exhausted the farmer is blacklisted, the exclusion set
/// refreshed, and a new contract negotiated; the bridge's own contract
/// retry budget is the only ceiling after that.
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::audit::AuditRecord;
use crate::bridge::models::{Pointer, ShardDescriptor};
use crate::channel::DataChannel;
use crate::client::Client;
use crate::error::{EngineError, Result};
use crate::store::state::{ShardMeta, UploadState};

/// Negotiate a contract for `meta` and push its bytes to the assigned
/// farmer, rotating farmers until one accepts the shard.
pub(crate) async fn negotiate_and_transfer(
    client: &Client,
    state: &Arc<UploadState>,
    meta: &mut ShardMeta,
    frame_id: &str,
    audit: &AuditRecord,
) -> Result<()> {
    loop {
        let descriptor = ShardDescriptor {
            hash: meta.hash.clone(),
            size: meta.size,
            index: meta.index,
            challenges: audit.challenges.clone(),
            tree: audit.tree.clone(),
            exclude: meta.exclude.clone(),
        };
        let pointer = client
            .bridge()
            .add_shard_to_frame(
                frame_id,
                &descriptor,
                client.options().contract_retries,
                &state.kill_token(),
            )
            .await?;
        debug!(
            shard = meta.index,
            farmer = %pointer.farmer.node_id,
            "contract negotiated"
        );

        match transfer_with_retries(client, state, meta, &pointer).await {
            Ok(()) => return Ok(()),
            Err(EngineError::ShardTransfer(reason)) => {
                warn!(
                    shard = meta.index,
                    farmer = %pointer.farmer.node_id,
                    reason = %reason,
                    "transfer budget exhausted, rotating farmer"
                );
                client.blacklist().add(&pointer.farmer.node_id).await?;
                meta.exclude = client.blacklist().snapshot().await;
                meta.transfer_attempts = 0;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Try the same pointer up to the configured budget. Exhaustion surfaces
/// as [`EngineError::ShardTransfer`] so the caller can rotate farmers.
async fn transfer_with_retries(
    client: &Client,
    state: &Arc<UploadState>,
    meta: &mut ShardMeta,
    pointer: &Pointer,
) -> Result<()> {
    let budget = client.options().transfer_retries.max(1);
    let mut last_error = String::new();

    while meta.transfer_attempts < budget {
        if state.killed() {
            return Err(EngineError::Cancelled);
        }
        match attempt_transfer(client, state, meta, pointer).await {
            Ok(()) => {
                info!(
                    shard = meta.index,
                    farmer = %pointer.farmer.node_id,
                    size = meta.size,
                    "shard transferred"
                );
                return Ok(());
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(e) => {
                meta.transfer_attempts += 1;
                debug!(
                    shard = meta.index,
                    attempt = meta.transfer_attempts,
                    error = %e,
                    "shard transfer attempt failed"
                );
                last_error = e.to_string();
            }
        }
    }

    Err(EngineError::ShardTransfer(format!(
        "farmer {} rejected shard {} after {} attempts: {last_error}",
        pointer.farmer.node_id, meta.index, budget
    )))
}

/// One attempt: open a channel, pipe the temp file into the farmer's
/// writable stream, wait for the clean finish. The channel is tracked on
/// the state so `cleanup` can close it, and closed again here on every
/// exit path.
async fn attempt_transfer(
    client: &Client,
    state: &Arc<UploadState>,
    meta: &ShardMeta,
    pointer: &Pointer,
) -> Result<()> {
    let channel: Arc<dyn DataChannel> = Arc::from(client.channels().open(&pointer.farmer).await?);
    state.track_channel(channel.clone());

    let kill = state.kill_token();
    let result = tokio::select! {
        _ = kill.cancelled() => Err(EngineError::Cancelled),
        res = pipe_shard(channel.as_ref(), meta, pointer) => res,
    };
    channel.close().await;
    result
}

async fn pipe_shard(
    channel: &dyn DataChannel,
    meta: &ShardMeta,
    pointer: &Pointer,
) -> Result<()> {
    let mut sink = channel
        .create_write_stream(&pointer.token, &pointer.hash)
        .await?;
    let mut file = tokio::fs::File::open(&meta.tmp_path).await?;
    tokio::io::copy(&mut file, &mut sink).await?;
    sink.shutdown().await?;
    Ok(())
}
