//! Webhook subscription HTTP client implementation.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use txvault_core::Cluster;

use crate::error::ClientError;
use crate::types::{ClusterEndpoint, WebhookUpdate};

/// Client for the subscription-management API.
///
/// Holds one endpoint per cluster; every update replaces the webhook's full
/// address set.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    endpoints: HashMap<Cluster, ClusterEndpoint>,
}

impl WebhookClient {
    /// Create a new client with default options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoints: HashMap<Cluster, ClusterEndpoint>) -> Result<Self, ClientError> {
        Self::with_options(endpoints, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_options(
        endpoints: HashMap<Cluster, ClusterEndpoint>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self { client, endpoints })
    }

    /// Check whether an endpoint is configured for a cluster.
    #[must_use]
    pub fn supports(&self, cluster: Cluster) -> bool {
        self.endpoints.contains_key(&cluster)
    }

    /// Replace the webhook subscription of a cluster.
    ///
    /// # Errors
    ///
    /// - `ClientError::UnknownCluster` if no endpoint is configured.
    /// - `ClientError::Api` on any non-2xx response.
    /// - `ClientError::Http` if the request cannot be sent.
    pub async fn update_webhook(
        &self,
        cluster: Cluster,
        update: &WebhookUpdate,
    ) -> Result<(), ClientError> {
        let endpoint = self
            .endpoints
            .get(&cluster)
            .ok_or(ClientError::UnknownCluster(cluster))?;
        let url = format!("{}/webhooks/{}", endpoint.base_url, endpoint.webhook_id);

        debug!(
            %cluster,
            webhook_id = %endpoint.webhook_id,
            addresses = update.account_address.len(),
            "updating webhook subscription"
        );

        let response = self
            .client
            .put(&url)
            .query(&[("api-key", endpoint.api_key.as_str())])
            .header("Authorization", &endpoint.auth_secret)
            .json(update)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Map non-2xx responses to `ClientError::Api`.
    async fn handle_response(response: reqwest::Response) -> Result<(), ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let message = match response.text().await {
            Ok(body) if !body.is_empty() => body,
            _ => format!("HTTP {status}"),
        };
        warn!(status = status.as_u16(), %message, "webhook update rejected");

        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}
