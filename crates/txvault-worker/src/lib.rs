//! txvault queue worker.
//!
//! This crate consumes feed payloads from Redis and writes them into
//! tenant-owned PostgreSQL databases:
//!
//! - Live webhook batches are routed by address, charged one credit per
//!   tenant, and persisted
//! - Backfill jobs are written straight into the named tenant database
//! - Tenants whose balance reaches the low-water mark are removed from the
//!   upstream webhook and deactivated
//!
//! A small HTTP surface exposes `/health` and `/stats`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::unused_async)]

pub mod backfill;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod pipeline;
pub mod queue;
pub mod routes;
pub mod state;
pub mod sync;
pub mod tenant;

pub use backfill::{Backfill, BackfillReport};
pub use config::WorkerConfig;
pub use crypto::{CredentialCipher, CryptoError};
pub use error::WorkerError;
pub use ledger::{ChargeOutcome, CreditLedger};
pub use pipeline::{BatchReport, Pipeline, TenantOutcome, TenantReport};
pub use queue::{
    BackfillJobs, JobHandler, JobSource, QueueConsumer, QueueMetrics, QueueStats, RedisListSource,
    WebhookJobs,
};
pub use routes::create_router;
pub use state::AppState;
pub use sync::SubscriptionSync;
pub use tenant::{PersistOutcome, PgTenantStore, TenantError, TenantSink};
