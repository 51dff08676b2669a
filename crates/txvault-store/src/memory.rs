//! In-memory metadata store.
//!
//! Backs tests and local runs. Every operation takes a single lock, so charges
//! and deactivation commits are atomic exactly like their SQL counterparts.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use txvault_core::{
    DatabaseId, SettingId, SettingStatus, SubscriptionParams, TenantDatabase, TrackingSetting,
    UserAccount, UserId,
};

use crate::error::{Result, StoreError};
use crate::MetadataStore;

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserAccount>,
    databases: HashMap<DatabaseId, TenantDatabase>,
    settings: HashMap<SettingId, TrackingSetting>,
    params: Option<SubscriptionParams>,
}

/// [`MetadataStore`] held in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user.
    pub async fn put_user(&self, user: UserAccount) {
        self.state.lock().await.users.insert(user.id.clone(), user);
    }

    /// Insert or replace a tenant database.
    pub async fn put_database(&self, database: TenantDatabase) {
        self.state
            .lock()
            .await
            .databases
            .insert(database.id.clone(), database);
    }

    /// Insert or replace a tracking setting.
    pub async fn put_setting(&self, setting: TrackingSetting) {
        self.state
            .lock()
            .await
            .settings
            .insert(setting.id.clone(), setting);
    }

    /// Replace the global subscription parameters.
    pub async fn put_params(&self, params: SubscriptionParams) {
        self.state.lock().await.params = Some(params);
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        Ok(self.state.lock().await.users.get(user_id).cloned())
    }

    async fn get_database(&self, database_id: &DatabaseId) -> Result<Option<TenantDatabase>> {
        Ok(self.state.lock().await.databases.get(database_id).cloned())
    }

    async fn get_setting(&self, setting_id: &SettingId) -> Result<Option<TrackingSetting>> {
        Ok(self.state.lock().await.settings.get(setting_id).cloned())
    }

    async fn get_setting_by_address(
        &self,
        target_address: &str,
    ) -> Result<Option<TrackingSetting>> {
        Ok(self
            .state
            .lock()
            .await
            .settings
            .values()
            .find(|setting| setting.target_address == target_address)
            .cloned())
    }

    async fn list_settings_by_status(&self, status: SettingStatus) -> Result<Vec<TrackingSetting>> {
        Ok(self
            .state
            .lock()
            .await
            .settings
            .values()
            .filter(|setting| setting.status == status)
            .cloned()
            .collect())
    }

    async fn find_active_settings(&self, addresses: &[String]) -> Result<Vec<TrackingSetting>> {
        Ok(self
            .state
            .lock()
            .await
            .settings
            .values()
            .filter(|setting| setting.is_active() && addresses.contains(&setting.target_address))
            .cloned()
            .collect())
    }

    async fn subscription_params(&self) -> Result<Option<SubscriptionParams>> {
        Ok(self.state.lock().await.params.clone())
    }

    async fn charge_credit(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(user_id).map(|user| {
            user.credits -= 1;
            user.clone()
        }))
    }

    async fn commit_deactivation(
        &self,
        user_id: &UserId,
        setting_id: &SettingId,
        params: &SubscriptionParams,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.params.as_ref().map(|p| p.id.as_str()) != Some(params.id.as_str()) {
            return Err(StoreError::NotFound {
                entity: "subscription params",
                id: params.id.clone(),
            });
        }

        if let Some(user) = state.users.get_mut(user_id) {
            user.credits = 0;
        }
        state.params = Some(params.clone());
        if let Some(setting) = state.settings.get_mut(setting_id) {
            setting.status = SettingStatus::Inactive;
        }
        Ok(())
    }
}
