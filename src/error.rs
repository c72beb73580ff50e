use thiserror::Error;

use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("credential error: {0}")]
    Vault(#[from] VaultError),
    #[error("no available account")]
    NoAvailableAccount,
    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("upstream call timed out after {0}s")]
    Timeout(u64),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;
