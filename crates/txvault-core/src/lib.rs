//! Core types and utilities for txvault.
//!
//! This crate provides the foundational types used throughout the txvault workspace:
//!
//! - **Identifiers**: `UserId`, `DatabaseId`, `SettingId`
//! - **Tenants**: `UserAccount`, `TenantDatabase`, `TrackingSetting`, `RoutingRecord`
//! - **Feed events**: `EventBatch`, `FeedEvent`, `TransferRecord`, `FeedJob`
//! - **Identifiers for SQL**: `TableName`
//!
//! # Credits
//!
//! Each event routed to a tenant consumes one credit. Once a charge leaves the
//! balance at or below [`LOW_WATER_MARK`], tracking for that tenant is switched
//! off and the address is removed from the upstream webhook.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod event;
pub mod ids;
pub mod table;
pub mod tenant;

pub use event::{EventBatch, EventError, FeedEvent, FeedJob, TransferEvent, TransferRecord, TRANSFER};
pub use ids::{DatabaseId, IdError, SettingId, UserId};
pub use table::{IdentifierError, TableName};
pub use tenant::{
    Cluster, ParseTagError, RoutingRecord, SettingStatus, SubscriptionParams, TenantDatabase,
    TrackingSetting, UserAccount, LOW_WATER_MARK,
};
