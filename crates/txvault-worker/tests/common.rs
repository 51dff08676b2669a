//! Common test utilities for worker integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use wiremock::MockServer;

use txvault_client::{ClusterEndpoint, WebhookClient};
use txvault_core::{
    Cluster, DatabaseId, RoutingRecord, SettingId, SettingStatus, SubscriptionParams, TableName,
    TenantDatabase, TrackingSetting, TransferRecord, UserAccount, UserId,
};
use txvault_store::{MemoryCache, MemoryStore, RoutingCache};
use txvault_worker::{
    Backfill, Pipeline, PersistOutcome, SubscriptionSync, TenantError, TenantSink,
};

/// Webhook ID of the mock mainnet subscription.
pub const WEBHOOK_ID: &str = "wh-main";

/// A row written by [`RecordingSink`].
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub database_id: DatabaseId,
    pub table: String,
    pub record: TransferRecord,
}

/// [`TenantSink`] that keeps rows in memory and ignores duplicate signatures.
#[derive(Debug, Default)]
pub struct RecordingSink {
    rows: Mutex<Vec<StoredRow>>,
    seen: Mutex<HashSet<(DatabaseId, String, String)>>,
    unready: AtomicBool,
}

impl RecordingSink {
    /// Make every tenant database report as never ready.
    pub fn set_unready(&self) {
        self.unready.store(true, Ordering::SeqCst);
    }

    pub async fn rows(&self) -> Vec<StoredRow> {
        self.rows.lock().await.clone()
    }

    pub async fn rows_for(&self, database_id: &DatabaseId) -> Vec<StoredRow> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|row| &row.database_id == database_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TenantSink for RecordingSink {
    async fn persist_transfers(
        &self,
        database: &TenantDatabase,
        table: &TableName,
        records: &[TransferRecord],
    ) -> Result<PersistOutcome, TenantError> {
        if self.unready.load(Ordering::SeqCst) {
            return Ok(PersistOutcome::Unready);
        }

        let (mut inserted, mut duplicates) = (0, 0);
        for record in records {
            let key = (
                database.id.clone(),
                table.as_str().to_string(),
                record.signature.clone(),
            );
            if self.seen.lock().await.insert(key) {
                self.rows.lock().await.push(StoredRow {
                    database_id: database.id.clone(),
                    table: table.as_str().to_string(),
                    record: record.clone(),
                });
                inserted += 1;
            } else {
                duplicates += 1;
            }
        }
        Ok(PersistOutcome::Stored {
            inserted,
            duplicates,
        })
    }
}

/// One seeded tenant.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub user: UserAccount,
    pub database: TenantDatabase,
    pub setting: TrackingSetting,
}

impl Tenant {
    pub fn record(&self) -> RoutingRecord {
        RoutingRecord {
            user: self.user.clone(),
            database: self.database.clone(),
            setting: self.setting.clone(),
        }
    }
}

/// Build a tenant tracking `address` with the given balance.
pub fn tenant(address: &str, credits: i64) -> Tenant {
    let user = UserAccount::new(UserId::generate(), format!("{address}@example.com"), credits);
    let database = TenantDatabase {
        id: DatabaseId::generate(),
        user_id: user.id.clone(),
        name: format!("db_{}", address.to_ascii_lowercase()),
        host: "127.0.0.1".into(),
        port: 5432,
        username: "tenant".into(),
        password: "unused".into(),
    };
    let setting = TrackingSetting {
        id: SettingId::generate(),
        database_id: database.id.clone(),
        target_address: address.to_string(),
        index_kind: "TRANSFER".into(),
        index_params: Vec::new(),
        cluster: Cluster::Mainnet,
        user_id: user.id.clone(),
        status: SettingStatus::Active,
    };
    Tenant {
        user,
        database,
        setting,
    }
}

/// A transfer payload touching the given addresses.
pub fn transfer(signature: &str, addresses: &[&str]) -> Value {
    let account_data: Vec<Value> = addresses
        .iter()
        .map(|address| json!({"account": address, "nativeBalanceChange": 0}))
        .collect();
    json!({
        "type": "TRANSFER",
        "slot": 250_000_000u64,
        "signature": signature,
        "feePayer": "payer",
        "fee": 5000,
        "description": "transfer",
        "accountData": account_data,
        "instructions": []
    })
}

/// Test harness wiring a pipeline to in-memory collaborators.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<RoutingCache>,
    pub sink: Arc<RecordingSink>,
    pub pipeline: Arc<Pipeline>,
    pub backfill: Backfill,
    pub server: MockServer,
}

impl TestHarness {
    /// Create a harness whose mainnet webhook points at a mock server.
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(RoutingCache::new(Arc::new(MemoryCache::new())));
        let sink = Arc::new(RecordingSink::default());

        let client = WebhookClient::new(HashMap::from([(
            Cluster::Mainnet,
            ClusterEndpoint::new(server.uri(), "api-key", WEBHOOK_ID, "secret"),
        )]))
        .expect("client");

        let sync = SubscriptionSync::new(store.clone(), client, cache.clone());
        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            cache.clone(),
            sync,
            sink.clone(),
        ));
        let backfill = Backfill::new(store.clone(), sink.clone());

        Self {
            store,
            cache,
            sink,
            pipeline,
            backfill,
            server,
        }
    }

    /// Store the tenant's rows without caching them.
    pub async fn store_tenant(&self, tenant: &Tenant) {
        self.store.put_user(tenant.user.clone()).await;
        self.store.put_database(tenant.database.clone()).await;
        self.store.put_setting(tenant.setting.clone()).await;
    }

    /// Store the tenant and cache its routing record.
    pub async fn seed(&self, tenant: &Tenant) {
        self.store_tenant(tenant).await;
        assert!(self.cache.populate(&tenant.record()).await.expect("populate"));
    }

    /// Store the global subscription parameters.
    pub async fn subscribe(&self, addresses: &[&str]) -> SubscriptionParams {
        let params = SubscriptionParams {
            id: "params-1".into(),
            transaction_types: vec!["TRANSFER".into()],
            account_addresses: addresses.iter().map(ToString::to_string).collect(),
        };
        self.store.put_params(params.clone()).await;
        params
    }
}
