/// Data-channel abstraction between the engine and a single farmer.
///
/// A channel is opened from a contact record and yields one readable or
/// writable shard stream authorized by a bridge-issued token and the
/// shard hash. The wire protocol behind the seam is the transport
/// implementation's concern; the orchestration pipelines only ever see
/// these traits, and the tests substitute in-memory channels.
pub mod tcp;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bridge::models::Contact;
use crate::error::Result;

/// A boxed readable shard stream.
pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send>>;

/// A boxed writable shard stream.
pub type BoxAsyncWrite = Pin<Box<dyn AsyncWrite + Send>>;

/// Opens data channels to farmers.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    /// Open a bidirectional channel to the farmer at `contact`.
    async fn open(&self, contact: &Contact) -> Result<Box<dyn DataChannel>>;
}

/// One open channel to a farmer.
///
/// A channel carries exactly one shard transfer; requesting a stream
/// consumes the underlying transport.
#[async_trait]
pub trait DataChannel: Send + Sync {
    /// Readable byte stream for the shard authorized by `(token, hash)`.
    async fn create_read_stream(&self, token: &str, hash: &str) -> Result<BoxAsyncRead>;

    /// Writable byte stream for the shard authorized by `(token, hash)`.
    async fn create_write_stream(&self, token: &str, hash: &str) -> Result<BoxAsyncWrite>;

    /// Close the underlying transport. Idempotent.
    async fn close(&self);
}
