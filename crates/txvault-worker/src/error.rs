//! Worker error types.

use txvault_client::ClientError;
use txvault_core::EventError;
use txvault_store::StoreError;

use crate::crypto::CryptoError;
use crate::tenant::TenantError;

/// Errors that can occur while processing jobs.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Metadata store or cache failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The subscription API rejected or never received an update.
    #[error("subscription API error: {0}")]
    ExternalApi(#[from] ClientError),

    /// Tenant database failure.
    #[error("tenant error: {0}")]
    Tenant(#[from] TenantError),

    /// Credential handling failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A job payload could not be decoded.
    #[error("invalid payload: {0}")]
    Payload(#[from] EventError),

    /// Queue transport failure.
    #[error("queue error: {0}")]
    Queue(String),

    /// A record the job depends on does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<redis::RedisError> for WorkerError {
    fn from(err: redis::RedisError) -> Self {
        Self::Queue(err.to_string())
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(EventError::Malformed(err))
    }
}
