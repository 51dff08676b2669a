//! Key encoding for the distributed cache tier.
//!
//! Keys are namespaced by entity kind: user and database snapshots are keyed
//! by the tenant database id, settings by their tracked address.

use txvault_core::DatabaseId;

/// Namespace of cached user snapshots.
pub const USER_PREFIX: &str = "user:";

/// Namespace of cached tenant databases.
pub const DATABASE_PREFIX: &str = "database:";

/// Namespace of cached tracking settings.
pub const SETTINGS_PREFIX: &str = "settings:";

/// Create the user key for a tenant database.
#[must_use]
pub fn user_key(database_id: &DatabaseId) -> String {
    format!("{USER_PREFIX}{database_id}")
}

/// Create the database key for a tenant database.
#[must_use]
pub fn database_key(database_id: &DatabaseId) -> String {
    format!("{DATABASE_PREFIX}{database_id}")
}

/// Create the settings key for a tracked address.
#[must_use]
pub fn settings_key(target_address: &str) -> String {
    format!("{SETTINGS_PREFIX}{target_address}")
}
