//! Request types for the webhook subscription API.

use serde::{Deserialize, Serialize};

use txvault_core::SubscriptionParams;

/// Body of a webhook update: the full replacement subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookUpdate {
    /// Transaction types to deliver.
    pub transaction_types: Vec<String>,
    /// Addresses to watch.
    pub account_address: Vec<String>,
}

impl From<&SubscriptionParams> for WebhookUpdate {
    fn from(params: &SubscriptionParams) -> Self {
        Self {
            transaction_types: params.transaction_types.clone(),
            account_address: params.account_addresses.clone(),
        }
    }
}

/// Credentials and webhook identity for one cluster.
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    /// API base URL, e.g. `https://api.helius.xyz/v0`.
    pub base_url: String,
    /// API key sent as the `api-key` query parameter.
    pub api_key: String,
    /// Webhook to update.
    pub webhook_id: String,
    /// Secret sent verbatim in the `Authorization` header.
    pub auth_secret: String,
}

impl ClusterEndpoint {
    /// Create an endpoint, trimming any trailing slash from the base URL.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        webhook_id: impl Into<String>,
        auth_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            webhook_id: webhook_id.into(),
            auth_secret: auth_secret.into(),
        }
    }
}

impl std::fmt::Debug for ClusterEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEndpoint")
            .field("base_url", &self.base_url)
            .field("webhook_id", &self.webhook_id)
            .finish_non_exhaustive()
    }
}
