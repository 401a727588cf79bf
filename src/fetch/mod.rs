/// Download orchestrator.
///
/// The retrieve flow is the inverse of the store pipeline:
/// 1. Create a PULL token for the bucket
/// 2. Resolve a window of shard pointers
/// 3. Open a data channel per pointer, in pointer order, and feed each
///    readable shard stream into the muxer
/// 4. Slide the window forward until the bridge returns no more pointers
///
/// Errors before the caller holds the stream surface from the resolving
/// call; afterwards every failure — pointer fetch, channel open, or a
/// short shard — is fatal and poisons the stream as a read error.
pub mod slice;

use tracing::{debug, info};

use crate::bridge::models::Pointer;
use crate::client::Client;
use crate::error::{EngineError, Result};
use crate::mux::{FileMuxer, MuxerHandle};
use slice::{slice_params, TrimmedStream};

/// Pointers resolved per window, and the muxer's attach-ahead depth.
pub const POINTER_WINDOW: usize = 6;

impl Client {
    /// Assemble one readable stream from an ordered pointer list.
    ///
    /// The muxer is sized to the given window; the returned handle lets
    /// the caller extend it with further windows before attaching them.
    pub async fn resolve_file_from_pointers(
        &self,
        pointers: Vec<Pointer>,
    ) -> Result<(FileMuxer, MuxerHandle)> {
        let length: u64 = pointers.iter().map(|p| p.size).sum();
        let (muxer, handle) = FileMuxer::new(pointers.len(), length, POINTER_WINDOW);
        self.attach_pointers(&handle, pointers, false).await?;
        Ok((muxer, handle))
    }

    /// Open a channel per pointer and attach its readable stream, strictly
    /// in pointer order. `extend` declares each input first, for windows
    /// beyond the muxer's initial sizing.
    async fn attach_pointers(
        &self,
        handle: &MuxerHandle,
        pointers: Vec<Pointer>,
        extend: bool,
    ) -> Result<()> {
        for pointer in pointers {
            debug!(
                shard = pointer.index,
                farmer = %pointer.farmer.node_id,
                "attaching shard source"
            );
            let channel = self.channels().open(&pointer.farmer).await?;
            let stream = channel
                .create_read_stream(&pointer.token, &pointer.hash)
                .await?;
            if extend {
                handle.extend(pointer.size, 1);
            }
            if !handle.add_input_source(stream).await {
                // Reader dropped; nothing left to feed.
                return Ok(());
            }
        }
        Ok(())
    }

    /// Stream a whole file out of a bucket using a sliding pointer window.
    pub async fn create_file_stream(&self, bucket_id: &str, file_id: &str) -> Result<FileMuxer> {
        let bucket_id = self.normalize_bucket_id(bucket_id)?;

        let grant = self.bridge().create_token(&bucket_id, "PULL").await?;
        let first_window = self
            .bridge()
            .get_file_pointers(&bucket_id, &grant.token, file_id, 0, POINTER_WINDOW, &[])
            .await?;
        info!(
            bucket = %bucket_id,
            file = file_id,
            pointers = first_window.len(),
            "starting download"
        );

        let (muxer, handle) = self.resolve_file_from_pointers(first_window).await?;

        let client = self.clone();
        let bucket = bucket_id.clone();
        let file = file_id.to_string();
        tokio::spawn(async move {
            window_driver(client, bucket, file, handle).await;
        });

        Ok(muxer)
    }

    /// Stream exactly `[start, end)` of a file.
    ///
    /// The frame's shard layout (via the bucket's file listing) maps the
    /// range onto a pointer window; the reassembled window is trimmed to
    /// the requested bytes.
    pub async fn create_file_slice_stream(
        &self,
        bucket_id: &str,
        file_id: &str,
        start: u64,
        end: u64,
    ) -> Result<TrimmedStream<FileMuxer>> {
        if start >= end {
            return Err(EngineError::DownloadFailed(format!(
                "invalid byte range [{start}, {end})"
            )));
        }
        let bucket_id = self.normalize_bucket_id(bucket_id)?;

        let entry = self
            .bridge()
            .list_files_in_bucket(&bucket_id)
            .await?
            .into_iter()
            .find(|entry| entry.id == file_id)
            .ok_or_else(|| {
                EngineError::DownloadFailed(format!("file {file_id} not found in bucket"))
            })?;
        let mut frame = self.bridge().get_frame(&entry.frame).await?;
        frame.shards.sort_by_key(|shard| shard.index);

        let params = slice_params(&frame.shards, start, end);
        debug!(
            file = file_id,
            start,
            end,
            skip = params.skip,
            limit = params.limit,
            "resolved slice window"
        );

        let grant = self.bridge().create_token(&bucket_id, "PULL").await?;
        let pointers = self
            .bridge()
            .get_file_pointers(
                &bucket_id,
                &grant.token,
                file_id,
                params.skip,
                params.limit,
                &[],
            )
            .await?;

        let (muxer, _handle) = self.resolve_file_from_pointers(pointers).await?;
        Ok(TrimmedStream::new(muxer, params.trim_front, end - start))
    }
}

/// Fetch successive pointer windows and feed them to the muxer until the
/// bridge returns an empty window. Each window gets a fresh PULL token.
async fn window_driver(client: Client, bucket_id: String, file_id: String, handle: MuxerHandle) {
    let mut skip = POINTER_WINDOW;
    loop {
        let window = async {
            let grant = client.bridge().create_token(&bucket_id, "PULL").await?;
            client
                .bridge()
                .get_file_pointers(
                    &bucket_id,
                    &grant.token,
                    &file_id,
                    skip,
                    POINTER_WINDOW,
                    &[],
                )
                .await
        }
        .await;

        match window {
            Ok(pointers) if pointers.is_empty() => {
                debug!(file = %file_id, "pointer windows exhausted");
                return;
            }
            Ok(pointers) => {
                skip += POINTER_WINDOW;
                if let Err(e) = client.attach_pointers(&handle, pointers, true).await {
                    handle
                        .fail(EngineError::DownloadFailed(e.to_string()))
                        .await;
                    return;
                }
            }
            Err(e) => {
                handle
                    .fail(EngineError::DownloadFailed(e.to_string()))
                    .await;
                return;
            }
        }
    }
}
