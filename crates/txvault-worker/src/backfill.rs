//! Backfill of historical transactions into one tenant database.
//!
//! Backfill jobs name their target directly, so there is no routing and no
//! charge. Transfers are written to the `TRANSFER` table.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use txvault_core::{FeedEvent, FeedJob, TableName, TRANSFER};
use txvault_store::MetadataStore;

use crate::error::WorkerError;
use crate::tenant::{PersistOutcome, TenantSink};

/// Summary of one backfill job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    /// Transactions in the job.
    pub received: usize,
    /// Rows written.
    pub inserted: usize,
    /// Rows skipped because the signature was already stored.
    pub duplicates: usize,
    /// Transactions that were not transfers or could not be decoded.
    pub skipped: usize,
    /// The tenant database never became ready; nothing was written.
    pub unready: bool,
}

/// Writes backfill jobs into tenant databases.
pub struct Backfill {
    store: Arc<dyn MetadataStore>,
    sink: Arc<dyn TenantSink>,
}

impl Backfill {
    /// Create a backfill runner.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, sink: Arc<dyn TenantSink>) -> Self {
        Self { store, sink }
    }

    /// Persist the transfers of one job.
    ///
    /// # Errors
    ///
    /// - `WorkerError::NotFound` if the target database does not exist.
    /// - `WorkerError::Store` or `WorkerError::Tenant` on storage failure.
    pub async fn run(&self, job: FeedJob) -> Result<BackfillReport, WorkerError> {
        let database = self
            .store
            .get_database(&job.database_id)
            .await?
            .ok_or_else(|| WorkerError::NotFound {
                entity: "database",
                id: job.database_id.to_string(),
            })?;

        let mut report = BackfillReport {
            received: job.transactions.len(),
            ..BackfillReport::default()
        };

        let mut records = Vec::with_capacity(job.transactions.len());
        for transaction in job.transactions {
            match FeedEvent::from_value(transaction) {
                Ok(FeedEvent::Transfer(event)) => records.push(event.record),
                Ok(FeedEvent::Unrecognized { kind }) => {
                    report.skipped += 1;
                    warn!(database_id = %database.id, kind = %kind, "skipping non-transfer in backfill");
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!(database_id = %database.id, error = %e, "skipping undecodable backfill transaction");
                }
            }
        }

        if records.is_empty() {
            info!(database_id = %database.id, skipped = report.skipped, "backfill had no transfers");
            return Ok(report);
        }

        let table = TableName::parse(TRANSFER).map_err(crate::tenant::TenantError::from)?;
        match self.sink.persist_transfers(&database, &table, &records).await? {
            PersistOutcome::Stored {
                inserted,
                duplicates,
            } => {
                report.inserted = inserted;
                report.duplicates = duplicates;
            }
            PersistOutcome::Unready => report.unready = true,
        }

        info!(
            database_id = %database.id,
            received = report.received,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            unready = report.unready,
            "backfill finished"
        );
        Ok(report)
    }
}
