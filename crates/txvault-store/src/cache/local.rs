//! Process-local routing tier.

use std::collections::HashMap;

use tokio::sync::RwLock;

use txvault_core::{DatabaseId, RoutingRecord, TenantDatabase, TrackingSetting, UserAccount};

#[derive(Debug, Default)]
struct Maps {
    settings: HashMap<String, TrackingSetting>,
    users: HashMap<DatabaseId, UserAccount>,
    databases: HashMap<DatabaseId, TenantDatabase>,
}

/// Per-process maps mirroring the shared tier.
///
/// Settings are keyed by tracked address; user and database snapshots by the
/// tenant database they belong to. Only ACTIVE settings are ever held.
#[derive(Debug, Default)]
pub struct LocalTier {
    maps: RwLock<Maps>,
}

impl LocalTier {
    /// Create an empty tier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble the full routing record for an address, if every facet is held.
    pub async fn routing(&self, address: &str) -> Option<RoutingRecord> {
        let maps = self.maps.read().await;
        let setting = maps.settings.get(address)?;
        let user = maps.users.get(&setting.database_id)?;
        let database = maps.databases.get(&setting.database_id)?;
        Some(RoutingRecord {
            user: user.clone(),
            database: database.clone(),
            setting: setting.clone(),
        })
    }

    /// Get the setting held for an address.
    pub async fn setting(&self, address: &str) -> Option<TrackingSetting> {
        self.maps.read().await.settings.get(address).cloned()
    }

    /// Get the user snapshot held for a tenant database.
    pub async fn user(&self, database_id: &DatabaseId) -> Option<UserAccount> {
        self.maps.read().await.users.get(database_id).cloned()
    }

    /// Get the tenant database held under its id.
    pub async fn database(&self, database_id: &DatabaseId) -> Option<TenantDatabase> {
        self.maps.read().await.databases.get(database_id).cloned()
    }

    /// Addresses of every setting held for a tenant database.
    pub async fn addresses_of(&self, database_id: &DatabaseId) -> Vec<String> {
        self.maps
            .read()
            .await
            .settings
            .values()
            .filter(|setting| &setting.database_id == database_id)
            .map(|setting| setting.target_address.clone())
            .collect()
    }

    /// Hold a setting. Inactive settings are ignored; returns whether it was stored.
    pub async fn insert_setting(&self, setting: TrackingSetting) -> bool {
        if !setting.is_active() {
            return false;
        }
        self.maps
            .write()
            .await
            .settings
            .insert(setting.target_address.clone(), setting);
        true
    }

    /// Hold the user snapshot for a tenant database.
    pub async fn insert_user(&self, database_id: DatabaseId, user: UserAccount) {
        self.maps.write().await.users.insert(database_id, user);
    }

    /// Hold a tenant database.
    pub async fn insert_database(&self, database: TenantDatabase) {
        self.maps
            .write()
            .await
            .databases
            .insert(database.id.clone(), database);
    }

    /// Hold every facet of a routing record.
    pub async fn insert_record(&self, record: &RoutingRecord) -> bool {
        if !record.setting.is_active() {
            return false;
        }
        let mut maps = self.maps.write().await;
        let database_id = record.database.id.clone();
        maps.settings
            .insert(record.setting.target_address.clone(), record.setting.clone());
        maps.users.insert(database_id.clone(), record.user.clone());
        maps.databases.insert(database_id, record.database.clone());
        true
    }

    /// Drop everything held for a tenant database, returning the removed addresses.
    pub async fn remove_tenant(&self, database_id: &DatabaseId) -> Vec<String> {
        let mut maps = self.maps.write().await;
        let addresses: Vec<String> = maps
            .settings
            .iter()
            .filter(|(_, setting)| &setting.database_id == database_id)
            .map(|(address, _)| address.clone())
            .collect();
        for address in &addresses {
            maps.settings.remove(address);
        }
        maps.users.remove(database_id);
        maps.databases.remove(database_id);
        addresses
    }

    /// Drop everything.
    pub async fn clear(&self) {
        let mut maps = self.maps.write().await;
        maps.settings.clear();
        maps.users.clear();
        maps.databases.clear();
    }

    /// Number of held settings.
    pub async fn settings_len(&self) -> usize {
        self.maps.read().await.settings.len()
    }

    /// Check whether anything is held for a tenant database.
    pub async fn holds_tenant(&self, database_id: &DatabaseId) -> bool {
        let maps = self.maps.read().await;
        maps.users.contains_key(database_id)
            || maps.databases.contains_key(database_id)
            || maps
                .settings
                .values()
                .any(|setting| &setting.database_id == database_id)
    }
}
