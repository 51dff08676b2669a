//! Subscription synchronizer.
//!
//! Switches tracking off for a depleted tenant: the address leaves the
//! upstream webhook first, and only once the API accepted the change are the
//! credits zeroed, the parameters stored and the setting flipped to INACTIVE.
//!
//! The webhook carries one global address list, so deactivations are
//! serialized from the parameter read through the commit.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use txvault_client::{WebhookClient, WebhookUpdate};
use txvault_core::{TrackingSetting, UserAccount};
use txvault_store::{MetadataStore, RoutingCache};

use crate::error::WorkerError;

/// Removes deactivated addresses from the upstream subscription.
#[derive(Clone)]
pub struct SubscriptionSync {
    store: Arc<dyn MetadataStore>,
    client: WebhookClient,
    cache: Arc<RoutingCache>,
    params_lock: Arc<Mutex<()>>,
}

impl SubscriptionSync {
    /// Create a synchronizer.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, client: WebhookClient, cache: Arc<RoutingCache>) -> Self {
        Self {
            store,
            client,
            cache,
            params_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Deactivate tracking of `setting` for a depleted `account`.
    ///
    /// # Errors
    ///
    /// - `WorkerError::NotFound` if no subscription parameters exist.
    /// - `WorkerError::ExternalApi` if the webhook update fails; nothing is
    ///   changed locally in that case.
    /// - `WorkerError::Store` if the commit or the cache eviction fails.
    pub async fn deactivate(
        &self,
        setting: &TrackingSetting,
        account: &UserAccount,
    ) -> Result<(), WorkerError> {
        let guard = self.params_lock.lock().await;
        let params = self
            .store
            .subscription_params()
            .await?
            .ok_or_else(|| WorkerError::NotFound {
                entity: "subscription params",
                id: "global".to_string(),
            })?;
        let updated = params.without_address(&setting.target_address);

        if let Err(e) = self
            .client
            .update_webhook(setting.cluster, &WebhookUpdate::from(&updated))
            .await
        {
            warn!(
                address = %setting.target_address,
                database_id = %setting.database_id,
                cluster = %setting.cluster,
                error = %e,
                "webhook update failed, tenant left active"
            );
            return Err(e.into());
        }

        self.store
            .commit_deactivation(&account.id, &setting.id, &updated)
            .await?;
        drop(guard);

        self.cache.evict(&setting.database_id).await?;

        info!(
            address = %setting.target_address,
            database_id = %setting.database_id,
            user_id = %account.id,
            credits = account.credits,
            "tracking deactivated"
        );
        Ok(())
    }
}
