/// TCP data-channel client.
///
/// Wire format: one JSON header frame (4-byte LE length prefix) naming
/// the token, shard hash and direction, followed by raw shard bytes.
/// A push channel half-closes after the shard is written; a pull channel
/// reads until the farmer half-closes.
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::{BoxAsyncRead, BoxAsyncWrite, ChannelOpener, DataChannel};
use crate::bridge::models::Contact;
use crate::error::{EngineError, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelHeader<'a> {
    token: &'a str,
    hash: &'a str,
    operation: &'a str,
}

/// Default opener: one TCP connection per channel.
pub struct TcpChannelOpener;

#[async_trait]
impl ChannelOpener for TcpChannelOpener {
    async fn open(&self, contact: &Contact) -> Result<Box<dyn DataChannel>> {
        debug!(
            node_id = %contact.node_id,
            address = %contact.address,
            port = contact.port,
            "opening data channel"
        );
        let stream = TcpStream::connect((contact.address.as_str(), contact.port)).await?;
        Ok(Box::new(TcpDataChannel {
            stream: Mutex::new(Some(stream)),
        }))
    }
}

/// A single-use TCP channel to one farmer.
pub struct TcpDataChannel {
    stream: Mutex<Option<TcpStream>>,
}

impl TcpDataChannel {
    async fn take(&self) -> Result<TcpStream> {
        self.stream.lock().await.take().ok_or_else(|| {
            EngineError::ShardTransfer("data channel already consumed".to_string())
        })
    }

    async fn send_header(stream: &mut TcpStream, header: &ChannelHeader<'_>) -> Result<()> {
        let payload = serde_json::to_vec(header)?;
        stream
            .write_all(&(payload.len() as u32).to_le_bytes())
            .await?;
        stream.write_all(&payload).await?;
        stream.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl DataChannel for TcpDataChannel {
    async fn create_read_stream(&self, token: &str, hash: &str) -> Result<BoxAsyncRead> {
        let mut stream = self.take().await?;
        Self::send_header(
            &mut stream,
            &ChannelHeader {
                token,
                hash,
                operation: "PULL",
            },
        )
        .await?;
        let (read_half, mut write_half) = stream.into_split();
        // Nothing further to say; let the farmer stream until it
        // half-closes.
        write_half.shutdown().await?;
        Ok(Box::pin(read_half))
    }

    async fn create_write_stream(&self, token: &str, hash: &str) -> Result<BoxAsyncWrite> {
        let mut stream = self.take().await?;
        Self::send_header(
            &mut stream,
            &ChannelHeader {
                token,
                hash,
                operation: "PUSH",
            },
        )
        .await?;
        let (_read_half, write_half) = stream.into_split();
        Ok(Box::pin(write_half))
    }

    async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }
}
