use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Bridge transport failed: {0}")]
    Transport(String),

    #[error("Bridge returned {status}: {message}")]
    Bridge { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shard transfer failed: {0}")]
    ShardTransfer(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Transport(format!("serialization: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
