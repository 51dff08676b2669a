//! Webhook subscription client for txvault.
//!
//! This crate wraps the external subscription-management API that decides
//! which addresses the upstream feed delivers events for.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use txvault_client::{ClusterEndpoint, WebhookClient, WebhookUpdate};
//! use txvault_core::Cluster;
//!
//! # async fn example() -> Result<(), txvault_client::ClientError> {
//! let client = WebhookClient::new(HashMap::from([(
//!     Cluster::Mainnet,
//!     ClusterEndpoint::new("https://api.helius.xyz/v0", "api-key", "webhook-id", "secret"),
//! )]))?;
//!
//! client
//!     .update_webhook(
//!         Cluster::Mainnet,
//!         &WebhookUpdate {
//!             transaction_types: vec!["TRANSFER".to_string()],
//!             account_address: vec!["B2".to_string()],
//!         },
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, WebhookClient};
pub use error::ClientError;
pub use types::*;
