//! Tenant types for txvault.
//!
//! This module defines the records that route a tracked address to a tenant:
//! the user carrying the credit balance, the tenant's private database, and the
//! tracking setting binding the two to one on-chain address.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DatabaseId, SettingId, UserId};

// ============================================================================
// Constants
// ============================================================================

/// Credit balance at or below which a tenant is treated as depleted.
///
/// A charge that leaves the balance at this value already routes to
/// deactivation, even though the decrement itself succeeded.
pub const LOW_WATER_MARK: i64 = 100;

/// Tenant user record carrying the usage balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    /// The user ID.
    pub id: UserId,

    /// Contact email of the account owner.
    pub email: String,

    /// Remaining credits. One credit is consumed per routed event.
    pub credits: i64,

    /// When the user was created.
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create a new user snapshot with the given balance.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>, credits: i64) -> Self {
        Self {
            id,
            email: email.into(),
            credits,
            created_at: Utc::now(),
        }
    }

    /// Check if the balance is at or below the low-water mark.
    #[must_use]
    pub fn is_depleted(&self) -> bool {
        self.credits <= LOW_WATER_MARK
    }
}

/// Connection facts for a tenant's private database.
///
/// The password is kept in its encrypted envelope; it is only decrypted
/// right before a connection is opened.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDatabase {
    /// The database ID.
    pub id: DatabaseId,

    /// The owning user.
    pub user_id: UserId,

    /// Database name on the tenant's server.
    pub name: String,

    /// Server host.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Login role.
    pub username: String,

    /// Encrypted password envelope.
    pub password: String,
}

impl fmt::Debug for TenantDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantDatabase")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<encrypted>")
            .finish()
    }
}

/// Network environment a tracked address lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cluster {
    /// Devnet.
    Devnet,
    /// Mainnet.
    Mainnet,
}

impl Cluster {
    /// Get the cluster tag as stored in the metadata store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Devnet => "DEVNET",
            Self::Mainnet => "MAINNET",
        }
    }
}

impl FromStr for Cluster {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEVNET" => Ok(Self::Devnet),
            "MAINNET" | "MAINNET_BETA" => Ok(Self::Mainnet),
            _ => Err(ParseTagError::new("cluster", s)),
        }
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a tracking setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettingStatus {
    /// Events for the address are routed to the tenant.
    Active,
    /// Tracking was switched off, usually because credits ran out.
    Inactive,
}

impl SettingStatus {
    /// Get the status tag as stored in the metadata store.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl FromStr for SettingStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            _ => Err(ParseTagError::new("status", s)),
        }
    }
}

/// A tenant's subscription to one tracked address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSetting {
    /// The setting ID.
    pub id: SettingId,

    /// Tenant database receiving the events.
    pub database_id: DatabaseId,

    /// The tracked on-chain address (unique routing key).
    pub target_address: String,

    /// Event table name in the tenant database.
    pub index_kind: String,

    /// Event sub-types to persist. Empty means every persisted kind.
    #[serde(default)]
    pub index_params: Vec<String>,

    /// Network environment of the address.
    pub cluster: Cluster,

    /// The owning user.
    pub user_id: UserId,

    /// Whether tracking is switched on.
    pub status: SettingStatus,
}

impl TrackingSetting {
    /// Check if events for this setting should be routed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SettingStatus::Active
    }

    /// Check if the setting wants events of the given kind.
    #[must_use]
    pub fn accepts(&self, kind: &str) -> bool {
        self.index_params.is_empty()
            || self
                .index_params
                .iter()
                .any(|param| param.eq_ignore_ascii_case(kind))
    }
}

/// Everything needed to process an event for one tracked address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRecord {
    /// Snapshot of the owning user.
    pub user: UserAccount,
    /// The tenant database.
    pub database: TenantDatabase,
    /// The tracking setting.
    pub setting: TrackingSetting,
}

/// Global parameters of the upstream webhook subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionParams {
    /// Record ID in the metadata store.
    pub id: String,

    /// Transaction types the webhook delivers.
    pub transaction_types: Vec<String>,

    /// Addresses the webhook watches.
    pub account_addresses: Vec<String>,
}

impl SubscriptionParams {
    /// Return a copy with the given address removed.
    #[must_use]
    pub fn without_address(&self, address: &str) -> Self {
        Self {
            id: self.id.clone(),
            transaction_types: self.transaction_types.clone(),
            account_addresses: self
                .account_addresses
                .iter()
                .filter(|a| a.as_str() != address)
                .cloned()
                .collect(),
        }
    }
}

/// Error returned when a stored enum tag is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} tag: {value}")]
pub struct ParseTagError {
    kind: &'static str,
    value: String,
}

impl ParseTagError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
