//! Client error types.

use txvault_core::Cluster;

/// Errors that can occur when using the webhook client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned a non-2xx response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, or the status line if the body was unreadable.
        message: String,
    },

    /// No endpoint is configured for the cluster.
    #[error("no webhook endpoint configured for {0}")]
    UnknownCluster(Cluster),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}
