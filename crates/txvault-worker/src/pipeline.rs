//! Ingestion pipeline.
//!
//! Takes one decoded batch from the webhook queue and, for every transfer in
//! it, routes the event to each tenant tracking one of its addresses. Each
//! tenant runs as its own task; a failure in one never affects another, and
//! [`Pipeline::handle`] itself never fails.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use txvault_core::{
    DatabaseId, EventBatch, RoutingRecord, SettingId, TableName, TransferEvent, TransferRecord,
    TRANSFER,
};
use txvault_store::{MetadataStore, RoutingCache};

use crate::error::WorkerError;
use crate::ledger::{ChargeOutcome, CreditLedger};
use crate::sync::SubscriptionSync;
use crate::tenant::{PersistOutcome, TenantSink};

// ============================================================================
// Reports
// ============================================================================

/// What happened to one event for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum TenantOutcome {
    /// The row was written.
    Persisted,
    /// The signature was already stored; the credit was still spent.
    Duplicate,
    /// The tenant database never became ready; the credit was still spent.
    Unready,
    /// The charge depleted the balance and tracking was switched off.
    Deactivated,
    /// The owning user is gone; cached facets were evicted.
    UserMissing,
    /// The setting does not index this event kind. Not charged.
    Filtered,
    /// The setting's table name is not a plain identifier. Not charged.
    InvalidTable,
    /// An external or storage failure for this tenant.
    Failed(String),
}

/// Per-tenant entry of a [`BatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantReport {
    /// Signature of the event.
    pub signature: String,
    /// Tracked address that matched.
    pub address: String,
    /// Tenant database the event was routed to.
    pub database_id: DatabaseId,
    /// What happened.
    pub outcome: TenantOutcome,
}

/// Summary of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Events in the batch.
    pub events: usize,
    /// Events of a kind that is never persisted.
    pub ignored: usize,
    /// Transfers no tenant tracks.
    pub unmatched: usize,
    /// Per-tenant outcomes.
    pub tenants: Vec<TenantReport>,
}

impl BatchReport {
    /// Count tenant entries with the given outcome.
    #[must_use]
    pub fn count(&self, outcome: &TenantOutcome) -> usize {
        self.tenants.iter().filter(|t| &t.outcome == outcome).count()
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Per-batch orchestration of routing, charging and persistence.
pub struct Pipeline {
    store: Arc<dyn MetadataStore>,
    cache: Arc<RoutingCache>,
    ledger: CreditLedger,
    sync: SubscriptionSync,
    sink: Arc<dyn TenantSink>,
}

impl Pipeline {
    /// Create a pipeline.
    #[must_use]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        cache: Arc<RoutingCache>,
        sync: SubscriptionSync,
        sink: Arc<dyn TenantSink>,
    ) -> Self {
        Self {
            ledger: CreditLedger::new(store.clone()),
            store,
            cache,
            sync,
            sink,
        }
    }

    /// Process a batch. Failures are reported per tenant, never returned.
    pub async fn handle(self: &Arc<Self>, batch: EventBatch) -> BatchReport {
        let mut report = BatchReport {
            events: batch.events.len(),
            ..BatchReport::default()
        };
        report.ignored = report.events - batch.transfers().count();

        for event in batch.transfers() {
            let matched = self.route(event).await;
            if matched.is_empty() {
                debug!(signature = %event.record.signature, "no tenant tracks this transfer");
                report.unmatched += 1;
                continue;
            }

            let mut tasks = JoinSet::new();
            for record in matched {
                let this = Arc::clone(self);
                let transfer = event.record.clone();
                tasks.spawn(async move {
                    let address = record.setting.target_address.clone();
                    let database_id = record.database.id.clone();
                    let outcome = this.process(record, &transfer).await;
                    TenantReport {
                        signature: transfer.signature,
                        address,
                        database_id,
                        outcome,
                    }
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(tenant) => report.tenants.push(tenant),
                    Err(e) => error!(
                        signature = %event.record.signature,
                        error = %e,
                        "tenant task aborted"
                    ),
                }
            }
        }

        info!(
            events = report.events,
            ignored = report.ignored,
            unmatched = report.unmatched,
            routed = report.tenants.len(),
            "batch processed"
        );
        report
    }

    /// Resolve the routing records for a transfer's addresses.
    ///
    /// Falls back to one metadata store lookup when no address is cached.
    async fn route(&self, event: &TransferEvent) -> Vec<RoutingRecord> {
        let mut matched: BTreeMap<SettingId, RoutingRecord> = BTreeMap::new();

        let addresses: Vec<String> = event.addresses.iter().cloned().collect();
        match self.cache.resolve_many(&addresses).await {
            Ok(records) => {
                for record in records {
                    matched.insert(record.setting.id.clone(), record);
                }
            }
            Err(e) => warn!(
                signature = %event.record.signature,
                error = %e,
                "routing cache lookup failed"
            ),
        }

        if matched.is_empty() && !event.addresses.is_empty() {
            for record in self.load_from_store(event).await {
                matched.insert(record.setting.id.clone(), record);
            }
        }

        matched.into_values().collect()
    }

    async fn load_from_store(&self, event: &TransferEvent) -> Vec<RoutingRecord> {
        let addresses: Vec<String> = event.addresses.iter().cloned().collect();
        let settings = match self.store.find_active_settings(&addresses).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "metadata lookup for unmatched transfer failed");
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(settings.len());
        for setting in settings {
            let address = setting.target_address.clone();
            match self.store.load_routing(setting).await {
                Ok(Some(record)) => {
                    if let Err(e) = self.cache.populate(&record).await {
                        warn!(address = %address, error = %e, "failed to cache routing record");
                    }
                    records.push(record);
                }
                Ok(None) => warn!(address = %address, "active setting without user or database"),
                Err(e) => warn!(address = %address, error = %e, "failed to load routing record"),
            }
        }
        records
    }

    /// Run one event through filter, charge and persist for one tenant.
    async fn process(&self, record: RoutingRecord, transfer: &TransferRecord) -> TenantOutcome {
        let RoutingRecord {
            database, setting, ..
        } = record;

        if !setting.accepts(TRANSFER) {
            debug!(address = %setting.target_address, "event kind not indexed by setting");
            return TenantOutcome::Filtered;
        }

        let table = match TableName::parse(&setting.index_kind) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    address = %setting.target_address,
                    database_id = %database.id,
                    error = %e,
                    "refusing to write to invalid table"
                );
                return TenantOutcome::InvalidTable;
            }
        };

        let charge = match self.ledger.charge_and_check(&setting.user_id, &database.id).await {
            Ok(charge) => charge,
            Err(e) => return failed(&database.id, "charge", &e.into()),
        };

        match charge {
            ChargeOutcome::UserMissing => {
                if let Err(e) = self.cache.evict(&database.id).await {
                    warn!(database_id = %database.id, error = %e, "eviction failed");
                }
                TenantOutcome::UserMissing
            }
            ChargeOutcome::Depleted(account) => match self.sync.deactivate(&setting, &account).await {
                Ok(()) => TenantOutcome::Deactivated,
                Err(e) => failed(&database.id, "deactivate", &e),
            },
            ChargeOutcome::Charged(_) => {
                match self
                    .sink
                    .persist_transfers(&database, &table, std::slice::from_ref(transfer))
                    .await
                {
                    Ok(PersistOutcome::Stored { inserted: 0, .. }) => TenantOutcome::Duplicate,
                    Ok(PersistOutcome::Stored { .. }) => TenantOutcome::Persisted,
                    Ok(PersistOutcome::Unready) => TenantOutcome::Unready,
                    Err(e) => failed(&database.id, "persist", &e.into()),
                }
            }
        }
    }
}

fn failed(database_id: &DatabaseId, stage: &'static str, err: &WorkerError) -> TenantOutcome {
    error!(database_id = %database_id, stage, error = %err, "tenant work failed");
    TenantOutcome::Failed(err.to_string())
}
