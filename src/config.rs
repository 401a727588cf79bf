/// Client configuration.
///
/// Options are resolved once at construction; the `STORJ_BRIDGE`
/// environment variable is consulted exactly there and never again.
use std::path::PathBuf;

use crate::crypto::keys::KeyPair;
use crate::error::{EngineError, Result};

/// Default bridge root URL.
pub const DEFAULT_BRIDGE_URI: &str = "https://api.storj.io";

/// Environment variable overriding [`DEFAULT_BRIDGE_URI`].
pub const BRIDGE_ENV: &str = "STORJ_BRIDGE";

/// Default shard worker pool size.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Default per-pointer transfer attempts before blacklisting a farmer.
pub const DEFAULT_TRANSFER_RETRIES: usize = 3;

/// Default contract-acquisition attempts per shard-add.
pub const DEFAULT_CONTRACT_RETRIES: usize = 24;

/// Basic-auth credentials. The password is hashed client-side before it
/// ever reaches the wire.
#[derive(Clone)]
pub struct BasicAuth {
    pub email: String,
    pub password: String,
}

/// Options for [`crate::client::Client`].
#[derive(Clone)]
pub struct ClientOptions {
    /// Bridge root URL.
    pub base_uri: String,
    /// Shard worker pool size.
    pub concurrency: usize,
    /// Per-pointer transfer attempts before farmer rotation.
    pub transfer_retries: usize,
    /// Contract-acquisition attempts per shard-add, no backoff.
    pub contract_retries: usize,
    /// Directory holding the persistent farmer blacklist.
    pub blacklist_folder: PathBuf,
    /// Request-signing credentials. Takes precedence over `basic_auth`.
    pub key_pair: Option<KeyPair>,
    /// Email/password credentials.
    pub basic_auth: Option<BasicAuth>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_uri: std::env::var(BRIDGE_ENV)
                .unwrap_or_else(|_| DEFAULT_BRIDGE_URI.to_string()),
            concurrency: DEFAULT_CONCURRENCY,
            transfer_retries: DEFAULT_TRANSFER_RETRIES,
            contract_retries: DEFAULT_CONTRACT_RETRIES,
            blacklist_folder: std::env::temp_dir(),
            key_pair: None,
            basic_auth: None,
        }
    }
}

impl ClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(EngineError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.transfer_retries == 0 {
            return Err(EngineError::Config(
                "transferRetries must be at least 1".to_string(),
            ));
        }
        if self.contract_retries == 0 {
            return Err(EngineError::Config(
                "contract retries must be at least 1".to_string(),
            ));
        }
        reqwest::Url::parse(&self.base_uri)
            .map_err(|e| EngineError::Config(format!("Invalid bridge URI: {e}")))?;
        if !self.blacklist_folder.is_dir() {
            return Err(EngineError::Config(format!(
                "blacklist folder {} is not a directory",
                self.blacklist_folder.display()
            )));
        }
        Ok(())
    }
}
