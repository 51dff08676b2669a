//! Tenant database access.
//!
//! Each tenant owns a PostgreSQL database on its own server. This module
//! provisions that database on first contact, keeps a bounded cache of
//! per-tenant pools, waits for readiness with a fixed-delay retry, and writes
//! transfer rows idempotently.

mod pools;
mod readiness;
pub mod sql;

pub use pools::{PgTenantStore, PoolLimits};
pub use readiness::{retry_fixed, Readiness, ReadinessPolicy};

use async_trait::async_trait;

use txvault_core::{IdentifierError, TableName, TenantDatabase, TransferRecord};

use crate::crypto::CryptoError;

/// Errors that can occur while talking to a tenant database.
#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    /// Connecting, provisioning or querying failed.
    #[error("tenant database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The stored credential could not be opened.
    #[error(transparent)]
    Credential(#[from] CryptoError),

    /// The event table name is not a plain identifier.
    #[error(transparent)]
    InvalidTable(#[from] IdentifierError),
}

/// Result of a single insert-or-ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written.
    Inserted,
    /// A row with the same signature already existed.
    Duplicate,
}

/// Result of persisting a group of transfers for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The database was reachable and every record was written or absorbed.
    Stored {
        /// Rows written.
        inserted: usize,
        /// Records whose signature was already present.
        duplicates: usize,
    },
    /// The database never answered the readiness probe. Nothing was written.
    Unready,
}

impl PersistOutcome {
    /// Tally insert outcomes into a `Stored` result.
    #[must_use]
    pub fn tally(outcomes: impl IntoIterator<Item = InsertOutcome>) -> Self {
        let (mut inserted, mut duplicates) = (0, 0);
        for outcome in outcomes {
            match outcome {
                InsertOutcome::Inserted => inserted += 1,
                InsertOutcome::Duplicate => duplicates += 1,
            }
        }
        Self::Stored {
            inserted,
            duplicates,
        }
    }
}

/// Destination for transfer rows.
///
/// [`PgTenantStore`] is the production implementation.
#[async_trait]
pub trait TenantSink: Send + Sync {
    /// Ensure the tenant database and table exist, wait for readiness, then
    /// insert every record, ignoring duplicate signatures.
    ///
    /// # Errors
    ///
    /// Returns an error if provisioning, credential decryption or a statement
    /// fails. An unready database is reported as [`PersistOutcome::Unready`].
    async fn persist_transfers(
        &self,
        database: &TenantDatabase,
        table: &TableName,
        records: &[TransferRecord],
    ) -> Result<PersistOutcome, TenantError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_each_outcome() {
        let outcome = PersistOutcome::tally([
            InsertOutcome::Inserted,
            InsertOutcome::Duplicate,
            InsertOutcome::Inserted,
        ]);
        assert_eq!(
            outcome,
            PersistOutcome::Stored {
                inserted: 2,
                duplicates: 1
            }
        );
    }
}
