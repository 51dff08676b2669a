//! Two-tier routing cache.
//!
//! Resolves a tracked address to the [`RoutingRecord`] of the tenant owning it.
//! The process-local tier is consulted first; on a miss every `settings:*`
//! entry of the shared tier is fetched in one batch and hydrated locally.
//! Cached records are snapshots: they are only ever replaced or evicted.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use txvault_core::{
    DatabaseId, RoutingRecord, SettingStatus, TenantDatabase, TrackingSetting, UserAccount,
};

use crate::cache::{LocalTier, SharedCache};
use crate::error::Result;
use crate::keys::{database_key, settings_key, user_key, SETTINGS_PREFIX};
use crate::MetadataStore;

/// Counters exposed for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Resolutions served by the local tier alone (shared-tier calls avoided).
    pub local_hits: u64,
    /// Batched hydrations from the shared tier.
    pub shared_fetches: u64,
    /// Settings currently held locally.
    pub local_settings: usize,
}

/// Address-to-tenant cache in front of the metadata store.
pub struct RoutingCache {
    local: LocalTier,
    shared: Arc<dyn SharedCache>,
    local_hits: AtomicU64,
    shared_fetches: AtomicU64,
}

impl std::fmt::Debug for RoutingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingCache")
            .field("local_hits", &self.local_hits)
            .field("shared_fetches", &self.shared_fetches)
            .finish_non_exhaustive()
    }
}

impl RoutingCache {
    /// Create a cache over the given shared tier with an empty local tier.
    #[must_use]
    pub fn new(shared: Arc<dyn SharedCache>) -> Self {
        Self {
            local: LocalTier::new(),
            shared,
            local_hits: AtomicU64::new(0),
            shared_fetches: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Resolve an address to its routing record.
    ///
    /// Returns `None` if no ACTIVE setting for the address is cached in
    /// either tier, or if its user or database facet is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared tier is unreachable.
    pub async fn resolve(&self, address: &str) -> Result<Option<RoutingRecord>> {
        if let Some(record) = self.local.routing(address).await {
            self.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(record));
        }

        let setting = match self.local.setting(address).await {
            Some(setting) => setting,
            None => {
                self.hydrate_settings().await?;
                match self.local.setting(address).await {
                    Some(setting) => setting,
                    None => return Ok(None),
                }
            }
        };

        self.complete(address, setting).await
    }

    /// Resolve every address of one event.
    ///
    /// Local hits are served first and the shared tier is hydrated at most
    /// once for all the misses together. Addresses that stay unknown are
    /// left out of the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared tier is unreachable.
    pub async fn resolve_many(&self, addresses: &[String]) -> Result<Vec<RoutingRecord>> {
        let mut records = Vec::with_capacity(addresses.len());
        let mut pending = Vec::new();
        let mut missing = Vec::new();

        for address in addresses {
            if let Some(record) = self.local.routing(address).await {
                self.local_hits.fetch_add(1, Ordering::Relaxed);
                records.push(record);
            } else if let Some(setting) = self.local.setting(address).await {
                pending.push((address, setting));
            } else {
                missing.push(address);
            }
        }

        if !missing.is_empty() {
            self.hydrate_settings().await?;
            for address in missing {
                if let Some(setting) = self.local.setting(address).await {
                    pending.push((address, setting));
                }
            }
        }

        for (address, setting) in pending {
            if let Some(record) = self.complete(address, setting).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Attach the user and database facets to a cached setting.
    async fn complete(
        &self,
        address: &str,
        setting: TrackingSetting,
    ) -> Result<Option<RoutingRecord>> {
        let Some(user) = self.user_facet(&setting.database_id).await? else {
            debug!(address, database_id = %setting.database_id, "user facet missing");
            return Ok(None);
        };
        let Some(database) = self.database_facet(&setting.database_id).await? else {
            debug!(address, database_id = %setting.database_id, "database facet missing");
            return Ok(None);
        };

        Ok(Some(RoutingRecord {
            user,
            database,
            setting,
        }))
    }

    /// Fetch every cached setting from the shared tier in one batch and hold
    /// the ACTIVE ones locally. Returns the number of settings hydrated.
    async fn hydrate_settings(&self) -> Result<usize> {
        self.shared_fetches.fetch_add(1, Ordering::Relaxed);

        let keys = self.shared.scan_prefix(SETTINGS_PREFIX).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let values = self.shared.get_many(&keys).await?;

        let mut hydrated = 0;
        for (key, value) in keys.iter().zip(values) {
            let Some(value) = value else { continue };
            match serde_json::from_str::<TrackingSetting>(&value) {
                Ok(setting) => {
                    if self.local.insert_setting(setting).await {
                        hydrated += 1;
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "skipping undecodable cached setting"),
            }
        }

        debug!(scanned = keys.len(), hydrated, "hydrated local settings");
        Ok(hydrated)
    }

    async fn user_facet(&self, database_id: &DatabaseId) -> Result<Option<UserAccount>> {
        if let Some(user) = self.local.user(database_id).await {
            return Ok(Some(user));
        }
        let Some(raw) = self.shared.get(&user_key(database_id)).await? else {
            return Ok(None);
        };
        let user: UserAccount = serde_json::from_str(&raw)?;
        self.local.insert_user(database_id.clone(), user.clone()).await;
        Ok(Some(user))
    }

    async fn database_facet(&self, database_id: &DatabaseId) -> Result<Option<TenantDatabase>> {
        if let Some(database) = self.local.database(database_id).await {
            return Ok(Some(database));
        }
        let Some(raw) = self.shared.get(&database_key(database_id)).await? else {
            return Ok(None);
        };
        let database: TenantDatabase = serde_json::from_str(&raw)?;
        self.local.insert_database(database.clone()).await;
        Ok(Some(database))
    }

    // =========================================================================
    // Population and invalidation
    // =========================================================================

    /// Write a routing record to both tiers.
    ///
    /// Returns `false` without touching either tier if the setting is not ACTIVE.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared tier is unreachable.
    pub async fn populate(&self, record: &RoutingRecord) -> Result<bool> {
        if record.setting.status != SettingStatus::Active {
            return Ok(false);
        }

        let database_id = &record.database.id;
        self.shared
            .set(
                &settings_key(&record.setting.target_address),
                &serde_json::to_string(&record.setting)?,
            )
            .await?;
        self.shared
            .set(&user_key(database_id), &serde_json::to_string(&record.user)?)
            .await?;
        self.shared
            .set(
                &database_key(database_id),
                &serde_json::to_string(&record.database)?,
            )
            .await?;

        Ok(self.local.insert_record(record).await)
    }

    /// Remove the user, database and every setting of a tenant from both tiers.
    ///
    /// Idempotent. The shared tier is cleared before the local one.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared tier is unreachable; the local tier is
    /// left untouched in that case.
    pub async fn evict(&self, database_id: &DatabaseId) -> Result<()> {
        let mut keys: BTreeSet<String> = self
            .local
            .addresses_of(database_id)
            .await
            .iter()
            .map(|address| settings_key(address))
            .collect();

        let setting_keys = self.shared.scan_prefix(SETTINGS_PREFIX).await?;
        if !setting_keys.is_empty() {
            let values = self.shared.get_many(&setting_keys).await?;
            for (key, value) in setting_keys.into_iter().zip(values) {
                let owned = value
                    .and_then(|raw| serde_json::from_str::<TrackingSetting>(&raw).ok())
                    .is_some_and(|setting| &setting.database_id == database_id);
                if owned {
                    keys.insert(key);
                }
            }
        }

        keys.insert(user_key(database_id));
        keys.insert(database_key(database_id));
        let keys: Vec<String> = keys.into_iter().collect();
        self.shared.delete(&keys).await?;

        let removed = self.local.remove_tenant(database_id).await;
        debug!(
            database_id = %database_id,
            shared_keys = keys.len(),
            local_settings = removed.len(),
            "evicted tenant"
        );
        Ok(())
    }

    /// Populate both tiers with every ACTIVE setting in the metadata store.
    ///
    /// Returns the number of records cached. Settings whose user or database
    /// is missing are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata store or the shared tier fails.
    pub async fn warm(&self, store: &dyn MetadataStore) -> Result<usize> {
        let settings = store.list_settings_by_status(SettingStatus::Active).await?;
        let mut cached = 0;
        for setting in settings {
            let address = setting.target_address.clone();
            match store.load_routing(setting).await? {
                Some(record) => {
                    if self.populate(&record).await? {
                        cached += 1;
                    }
                }
                None => warn!(address = %address, "active setting without user or database"),
            }
        }
        Ok(cached)
    }

    /// Drop the local tier. The shared tier is left intact.
    pub async fn clear_local(&self) {
        self.local.clear().await;
    }

    /// Check whether the local tier holds anything for a tenant.
    pub async fn local_contains(&self, database_id: &DatabaseId) -> bool {
        self.local.holds_tenant(database_id).await
    }

    /// Current counters.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            shared_fetches: self.shared_fetches.load(Ordering::Relaxed),
            local_settings: self.local.settings_len().await,
        }
    }
}
