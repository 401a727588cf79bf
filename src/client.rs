/// Client facade: wires configuration, bridge transport, the farmer
/// blacklist and the data-channel opener into one handle the store and
/// fetch pipelines hang off.
///
/// Cloning is cheap; every clone shares the same blacklist and HTTP
/// connection pool.
use std::sync::Arc;

use crate::blacklist::Blacklist;
use crate::bridge::auth::Auth;
use crate::bridge::BridgeClient;
use crate::channel::tcp::TcpChannelOpener;
use crate::channel::ChannelOpener;
use crate::config::ClientOptions;
use crate::crypto::hash;
use crate::error::{EngineError, Result};

#[derive(Clone)]
pub struct Client {
    options: Arc<ClientOptions>,
    bridge: BridgeClient,
    blacklist: Arc<Blacklist>,
    channels: Arc<dyn ChannelOpener>,
}

impl Client {
    /// Build a client with the default TCP data-channel opener.
    pub async fn new(options: ClientOptions) -> Result<Self> {
        Self::with_channel_opener(options, Arc::new(TcpChannelOpener)).await
    }

    /// Build a client with a custom data-channel opener (tests use
    /// in-memory channels).
    pub async fn with_channel_opener(
        options: ClientOptions,
        channels: Arc<dyn ChannelOpener>,
    ) -> Result<Self> {
        options.validate()?;
        let auth = Auth::from_options(&options);
        let bridge = BridgeClient::new(options.base_uri.clone(), auth)?;
        let blacklist = Arc::new(Blacklist::open(&options.blacklist_folder).await?);
        Ok(Self {
            options: Arc::new(options),
            bridge,
            blacklist,
            channels,
        })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn bridge(&self) -> &BridgeClient {
        &self.bridge
    }

    pub fn blacklist(&self) -> &Blacklist {
        &self.blacklist
    }

    pub(crate) fn channels(&self) -> &dyn ChannelOpener {
        self.channels.as_ref()
    }

    /// A 24-hex bucket id is used verbatim; anything else is treated as a
    /// bucket name and derived deterministically from the account email.
    pub fn normalize_bucket_id(&self, id_or_name: &str) -> Result<String> {
        if id_or_name.len() == 24 && id_or_name.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(id_or_name.to_string());
        }
        let email = self
            .options
            .basic_auth
            .as_ref()
            .map(|auth| auth.email.as_str())
            .ok_or_else(|| {
                EngineError::Config(
                    "Deriving a bucket id from a name requires basic-auth credentials".to_string(),
                )
            })?;
        Ok(derive_bucket_id(email, id_or_name))
    }
}

/// Deterministic bucket id: the first 24 hex chars of
/// RIPEMD-160(SHA-256(email || name)).
pub fn derive_bucket_id(email: &str, name: &str) -> String {
    let digest = hash::rmd160_sha256(format!("{email}{name}").as_bytes());
    hex::encode(digest)[..24].to_string()
}
