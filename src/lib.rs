pub mod audit;
pub mod blacklist;
pub mod bridge;
pub mod channel;
pub mod client;
pub mod config;
pub mod crypto;
pub mod demux;
pub mod error;
pub mod fetch;
pub mod mux;
pub mod store;

pub use client::Client;
pub use config::{BasicAuth, ClientOptions};
pub use error::{EngineError, Result};
