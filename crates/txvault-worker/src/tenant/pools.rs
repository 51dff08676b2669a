//! PostgreSQL tenant store with a bounded pool cache.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{ConnectOptions, Connection, PgConnection};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use txvault_core::{DatabaseId, TableName, TenantDatabase, TransferRecord};

use super::readiness::{retry_fixed, Readiness, ReadinessPolicy};
use super::{sql, InsertOutcome, PersistOutcome, TenantError, TenantSink};
use crate::crypto::CredentialCipher;

/// Server-side database used for provisioning checks.
const MAINTENANCE_DATABASE: &str = "postgres";

/// Bounds of the tenant pool cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Tenants with a cached pool at once; the least recently used is dropped first.
    pub max_tenants: usize,
    /// Pools unused for this long are dropped from the cache.
    pub idle_ttl: Duration,
    /// Connections per tenant pool.
    pub connections_per_tenant: u32,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_tenants: 64,
            idle_ttl: Duration::from_secs(300),
            connections_per_tenant: 4,
        }
    }
}

/// A cached pool and the tables already created through it.
///
/// Dropping an entry never closes the pool: handles held by in-flight writes
/// keep it alive and it shuts down once the last one is released.
struct CachedPool {
    pool: PgPool,
    last_used: Instant,
    tables: HashSet<TableName>,
}

impl CachedPool {
    fn new(pool: PgPool) -> Self {
        Self {
            pool,
            last_used: Instant::now(),
            tables: HashSet::new(),
        }
    }
}

/// [`TenantSink`] writing into tenant-owned PostgreSQL databases.
pub struct PgTenantStore {
    cipher: CredentialCipher,
    readiness: ReadinessPolicy,
    limits: PoolLimits,
    ssl_mode: PgSslMode,
    pools: Mutex<HashMap<DatabaseId, CachedPool>>,
}

impl std::fmt::Debug for PgTenantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTenantStore")
            .field("readiness", &self.readiness)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl PgTenantStore {
    /// Create a store. Tenant connections require TLS unless `require_tls` is false.
    #[must_use]
    pub fn new(
        cipher: CredentialCipher,
        readiness: ReadinessPolicy,
        limits: PoolLimits,
        require_tls: bool,
    ) -> Self {
        Self {
            cipher,
            readiness,
            limits,
            ssl_mode: if require_tls {
                PgSslMode::Require
            } else {
                PgSslMode::Disable
            },
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn connect_options(&self, database: &TenantDatabase, password: &str, name: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&database.host)
            .port(database.port)
            .username(&database.username)
            .password(password)
            .database(name)
            .ssl_mode(self.ssl_mode)
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Get the pool for a tenant database, provisioning the database on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be opened or the database
    /// cannot be created.
    pub async fn ensure_connection(&self, database: &TenantDatabase) -> Result<PgPool, TenantError> {
        self.drop_idle().await;

        if let Some(cached) = self.pools.lock().await.get_mut(&database.id) {
            cached.last_used = Instant::now();
            return Ok(cached.pool.clone());
        }

        let password = self.cipher.decrypt(&database.password)?;
        self.create_database_if_absent(database, &password).await?;

        let pool = PgPoolOptions::new()
            .max_connections(self.limits.connections_per_tenant)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy_with(self.connect_options(database, &password, &database.name));

        let mut pools = self.pools.lock().await;
        let pool = pools
            .entry(database.id.clone())
            .or_insert_with(|| CachedPool::new(pool))
            .pool
            .clone();
        let evicted = evict_least_recent(&mut pools, self.limits.max_tenants);
        drop(pools);

        for database_id in evicted {
            debug!(database_id = %database_id, "dropped least recently used tenant pool");
        }

        Ok(pool)
    }

    async fn create_database_if_absent(
        &self,
        database: &TenantDatabase,
        password: &str,
    ) -> Result<(), TenantError> {
        let mut conn: PgConnection = self
            .connect_options(database, password, MAINTENANCE_DATABASE)
            .connect()
            .await?;

        let exists: bool = sqlx::query_scalar(sql::DATABASE_EXISTS)
            .bind(&database.name)
            .fetch_one(&mut conn)
            .await?;

        if !exists {
            match sqlx::query(&sql::create_database(&database.name))
                .execute(&mut conn)
                .await
            {
                Ok(_) => info!(database_id = %database.id, name = %database.name, "created tenant database"),
                Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(sql::DUPLICATE_DATABASE) => {
                    debug!(database_id = %database.id, "tenant database created concurrently");
                }
                Err(e) => return Err(e.into()),
            }
        }

        conn.close().await?;
        Ok(())
    }

    /// Probe the pool until it answers or the readiness policy gives up.
    pub async fn wait_until_ready(&self, pool: &PgPool) -> Readiness<()> {
        retry_fixed(self.readiness, move || async move {
            sqlx::query(sql::PING).execute(pool).await.map(|_| ())
        })
        .await
    }

    /// Create the transfer table unless the cached pool already did.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL fails.
    pub async fn ensure_table(
        &self,
        database_id: &DatabaseId,
        pool: &PgPool,
        table: &TableName,
    ) -> Result<(), TenantError> {
        if self.knows_table(database_id, table).await {
            return Ok(());
        }

        sqlx::query(&sql::create_transfer_table(table))
            .execute(pool)
            .await?;
        if let Some(cached) = self.pools.lock().await.get_mut(database_id) {
            cached.tables.insert(table.clone());
        }
        Ok(())
    }

    async fn knows_table(&self, database_id: &DatabaseId, table: &TableName) -> bool {
        self.pools
            .lock()
            .await
            .get(database_id)
            .is_some_and(|cached| cached.tables.contains(table))
    }

    /// Insert one transfer row, ignoring a duplicate signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn persist(
        conn: &mut PgConnection,
        table: &TableName,
        record: &TransferRecord,
    ) -> Result<InsertOutcome, TenantError> {
        let result = sqlx::query(&sql::insert_transfer(table))
            .bind(record.slot)
            .bind(&record.signature)
            .bind(&record.fee_payer)
            .bind(record.fee)
            .bind(record.description.as_deref())
            .bind(&record.account_data)
            .bind(&record.instructions)
            .execute(conn)
            .await?;

        Ok(if result.rows_affected() == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    // =========================================================================
    // Pool cache maintenance
    // =========================================================================

    async fn drop_idle(&self) {
        let ttl = self.limits.idle_ttl;
        let mut pools = self.pools.lock().await;
        pools.retain(|database_id, cached| {
            let keep = cached.last_used.elapsed() < ttl;
            if !keep {
                debug!(database_id = %database_id, "dropped idle tenant pool");
            }
            keep
        });
    }

    /// Number of cached tenant pools.
    pub async fn open_pools(&self) -> usize {
        self.pools.lock().await.len()
    }

    /// Close every tenant pool.
    pub async fn close_all(&self) {
        let pools: Vec<PgPool> = self
            .pools
            .lock()
            .await
            .drain()
            .map(|(_, cached)| cached.pool)
            .collect();
        info!(count = pools.len(), "closing tenant pools");
        for pool in pools {
            pool.close().await;
        }
    }
}

fn evict_least_recent(
    pools: &mut HashMap<DatabaseId, CachedPool>,
    max_tenants: usize,
) -> Vec<DatabaseId> {
    let mut evicted = Vec::new();
    while pools.len() > max_tenants.max(1) {
        let Some(oldest) = pools
            .iter()
            .min_by_key(|(_, cached)| cached.last_used)
            .map(|(id, _)| id.clone())
        else {
            break;
        };
        if pools.remove(&oldest).is_some() {
            evicted.push(oldest);
        }
    }
    evicted
}

#[async_trait]
impl TenantSink for PgTenantStore {
    async fn persist_transfers(
        &self,
        database: &TenantDatabase,
        table: &TableName,
        records: &[TransferRecord],
    ) -> Result<PersistOutcome, TenantError> {
        let pool = self.ensure_connection(database).await?;

        if let Readiness::Unready = self.wait_until_ready(&pool).await {
            warn!(
                database_id = %database.id,
                attempts = self.readiness.max_attempts,
                "tenant database not ready"
            );
            return Ok(PersistOutcome::Unready);
        }

        self.ensure_table(&database.id, &pool, table).await?;

        // One connection per call; returned to the pool when dropped.
        let mut conn = pool.acquire().await?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            outcomes.push(Self::persist(&mut conn, table, record).await?);
        }

        Ok(PersistOutcome::tally(outcomes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new().connect_lazy_with(PgConnectOptions::new().host("127.0.0.1").port(1))
    }

    fn aged(seconds: u64) -> CachedPool {
        let mut cached = CachedPool::new(lazy_pool());
        cached.last_used = Instant::now()
            .checked_sub(Duration::from_secs(seconds))
            .unwrap_or_else(Instant::now);
        cached
    }

    fn store(limits: PoolLimits) -> PgTenantStore {
        PgTenantStore::new(
            CredentialCipher::new(&[1u8; 32]),
            ReadinessPolicy::default(),
            limits,
            true,
        )
    }

    #[tokio::test]
    async fn evicts_least_recently_used_over_cap() {
        let mut pools = HashMap::new();
        let ids: Vec<DatabaseId> = (0..3).map(|_| DatabaseId::generate()).collect();
        for (age, id) in ids.iter().enumerate() {
            pools.insert(id.clone(), aged(10 * (3 - age as u64)));
        }
        let in_use = pools[&ids[0]].pool.clone();

        let evicted = evict_least_recent(&mut pools, 2);
        assert_eq!(evicted, vec![ids[0].clone()]);
        assert_eq!(pools.len(), 2);
        assert!(!in_use.is_closed());
    }

    #[tokio::test]
    async fn idle_pools_leave_the_cache_without_closing() {
        let store = store(PoolLimits {
            idle_ttl: Duration::from_secs(60),
            ..PoolLimits::default()
        });
        let idle = DatabaseId::generate();
        let fresh = DatabaseId::generate();
        let in_use = {
            let mut pools = store.pools.lock().await;
            pools.insert(idle.clone(), aged(120));
            pools.insert(fresh.clone(), aged(0));
            pools[&idle].pool.clone()
        };

        store.drop_idle().await;

        assert_eq!(store.open_pools().await, 1);
        assert!(store.pools.lock().await.contains_key(&fresh));
        assert!(!in_use.is_closed());
    }

    #[tokio::test]
    async fn table_memo_goes_with_its_pool() {
        let store = store(PoolLimits {
            idle_ttl: Duration::from_secs(60),
            ..PoolLimits::default()
        });
        let id = DatabaseId::generate();
        let table = TableName::parse("TRANSFER").unwrap();
        {
            let mut cached = aged(120);
            cached.tables.insert(table.clone());
            store.pools.lock().await.insert(id.clone(), cached);
        }
        assert!(store.knows_table(&id, &table).await);

        store.drop_idle().await;
        assert!(!store.knows_table(&id, &table).await);

        // A replacement pool starts with no tables known.
        store.pools.lock().await.insert(id.clone(), aged(0));
        assert!(!store.knows_table(&id, &table).await);
    }

    #[tokio::test]
    async fn bad_credential_fails_before_connecting() {
        let store = store(PoolLimits::default());
        let database = TenantDatabase {
            id: DatabaseId::generate(),
            user_id: txvault_core::UserId::generate(),
            name: "tenant".into(),
            host: "127.0.0.1".into(),
            port: 1,
            username: "postgres".into(),
            password: "not-an-envelope".into(),
        };

        let err = store.ensure_connection(&database).await.unwrap_err();
        assert!(matches!(err, TenantError::Credential(_)));
        assert_eq!(store.open_pools().await, 0);
    }
}
