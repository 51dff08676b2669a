//! Storage layer for txvault.
//!
//! This crate provides access to the canonical tenant metadata and the
//! two-tier cache sitting in front of it.
//!
//! # Architecture
//!
//! - [`MetadataStore`]: the source of truth for users, tenant databases,
//!   tracking settings and the global webhook parameters. [`PgMetadataStore`]
//!   is the production backend; [`MemoryStore`] backs tests and local runs.
//! - [`SharedCache`]: the distributed key-value tier ([`RedisCache`]).
//! - [`RoutingCache`]: process-local maps in front of the shared tier,
//!   resolving a tracked address to its [`RoutingRecord`].
//!
//! The routing cache never falls back to the metadata store on its own; callers
//! that miss decide whether a source-of-truth lookup is worth it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod error;
pub mod keys;
pub mod memory;
pub mod postgres;
pub mod routing;

pub use cache::{LocalTier, MemoryCache, RedisCache, SharedCache};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgMetadataStore;
pub use routing::{CacheStats, RoutingCache};

use async_trait::async_trait;

use txvault_core::{
    DatabaseId, RoutingRecord, SettingId, SettingStatus, SubscriptionParams, TenantDatabase,
    TrackingSetting, UserAccount, UserId,
};

/// The source-of-truth trait defining all metadata operations.
///
/// This trait abstracts the metadata database, allowing for different
/// implementations (e.g., PostgreSQL, in-memory for testing).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserAccount>>;

    /// Get a tenant database by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_database(&self, database_id: &DatabaseId) -> Result<Option<TenantDatabase>>;

    /// Get a tracking setting by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_setting(&self, setting_id: &SettingId) -> Result<Option<TrackingSetting>>;

    /// Get the tracking setting for a target address, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_setting_by_address(&self, target_address: &str)
        -> Result<Option<TrackingSetting>>;

    /// List tracking settings with the given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_settings_by_status(&self, status: SettingStatus) -> Result<Vec<TrackingSetting>>;

    /// Find ACTIVE settings whose target address is in `addresses`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_active_settings(&self, addresses: &[String]) -> Result<Vec<TrackingSetting>>;

    /// Get the global webhook subscription parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn subscription_params(&self) -> Result<Option<SubscriptionParams>>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Decrement a user's credits by exactly one in a single atomic update.
    ///
    /// Returns the updated snapshot, or `None` if the user does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn charge_credit(&self, user_id: &UserId) -> Result<Option<UserAccount>>;

    /// Zero the user's credits, store the new webhook parameters and mark the
    /// setting INACTIVE, all in one transaction.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the parameters record does not exist.
    /// - Database errors roll the whole transaction back.
    async fn commit_deactivation(
        &self,
        user_id: &UserId,
        setting_id: &SettingId,
        params: &SubscriptionParams,
    ) -> Result<()>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Load the user and database behind a setting.
    ///
    /// Returns `None` if either is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a database operation fails.
    async fn load_routing(&self, setting: TrackingSetting) -> Result<Option<RoutingRecord>> {
        let (user, database) = futures::try_join!(
            self.get_user(&setting.user_id),
            self.get_database(&setting.database_id)
        )?;

        Ok(user.zip(database).map(|(user, database)| RoutingRecord {
            user,
            database,
            setting,
        }))
    }
}
