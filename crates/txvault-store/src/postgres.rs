//! PostgreSQL metadata store.
//!
//! This module provides the `PgMetadataStore` implementation of the
//! [`MetadataStore`] trait. Queries are built at runtime so the crate compiles
//! without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use txvault_core::{
    DatabaseId, SettingId, SettingStatus, SubscriptionParams, TenantDatabase, TrackingSetting,
    UserAccount, UserId,
};

use crate::error::{Result, StoreError};
use crate::MetadataStore;

const USER_COLUMNS: &str = "id, email, credits, created_at";
const DATABASE_COLUMNS: &str = "id, user_id, name, host, port, username, password";
const SETTING_COLUMNS: &str =
    "id, database_id, user_id, target_address, index_kind, index_params, cluster, status";

/// PostgreSQL-backed metadata store.
#[derive(Debug, Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the metadata database.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn get_database(&self, database_id: &DatabaseId) -> Result<Option<TenantDatabase>> {
        let sql = format!("SELECT {DATABASE_COLUMNS} FROM tenant_databases WHERE id = $1");
        sqlx::query_as::<_, DatabaseRow>(&sql)
            .bind(database_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn get_setting(&self, setting_id: &SettingId) -> Result<Option<TrackingSetting>> {
        let sql = format!("SELECT {SETTING_COLUMNS} FROM tracking_settings WHERE id = $1");
        sqlx::query_as::<_, SettingRow>(&sql)
            .bind(setting_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn get_setting_by_address(
        &self,
        target_address: &str,
    ) -> Result<Option<TrackingSetting>> {
        let sql =
            format!("SELECT {SETTING_COLUMNS} FROM tracking_settings WHERE target_address = $1");
        sqlx::query_as::<_, SettingRow>(&sql)
            .bind(target_address)
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_settings_by_status(&self, status: SettingStatus) -> Result<Vec<TrackingSetting>> {
        let sql = format!("SELECT {SETTING_COLUMNS} FROM tracking_settings WHERE status = $1");
        sqlx::query_as::<_, SettingRow>(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn find_active_settings(&self, addresses: &[String]) -> Result<Vec<TrackingSetting>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {SETTING_COLUMNS} FROM tracking_settings \
             WHERE status = $1 AND target_address = ANY($2)"
        );
        sqlx::query_as::<_, SettingRow>(&sql)
            .bind(SettingStatus::Active.as_str())
            .bind(addresses)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn subscription_params(&self) -> Result<Option<SubscriptionParams>> {
        let row = sqlx::query_as::<_, ParamsRow>(
            "SELECT id, transaction_types, account_addresses FROM subscription_params \
             ORDER BY updated_at ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| SubscriptionParams {
            id: row.id,
            transaction_types: row.transaction_types,
            account_addresses: row.account_addresses,
        }))
    }

    async fn charge_credit(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        // The decrement happens inside the UPDATE so concurrent charges never
        // read a stale balance.
        let sql = format!(
            "UPDATE users SET credits = credits - 1 WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn commit_deactivation(
        &self,
        user_id: &UserId,
        setting_id: &SettingId,
        params: &SubscriptionParams,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE users SET credits = 0 WHERE id = $1")
            .bind(user_id.as_str())
            .execute(&mut *tx)
            .await?;

        let updated = sqlx::query(
            "UPDATE subscription_params \
             SET transaction_types = $2, account_addresses = $3, updated_at = now() \
             WHERE id = $1",
        )
        .bind(&params.id)
        .bind(&params.transaction_types)
        .bind(&params.account_addresses)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound {
                entity: "subscription params",
                id: params.id.clone(),
            });
        }

        sqlx::query("UPDATE tracking_settings SET status = $2 WHERE id = $1")
            .bind(setting_id.as_str())
            .bind(SettingStatus::Inactive.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    credits: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserAccount {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(row.id)?,
            email: row.email,
            credits: row.credits,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DatabaseRow {
    id: String,
    user_id: String,
    name: String,
    host: String,
    port: i32,
    username: String,
    password: String,
}

impl TryFrom<DatabaseRow> for TenantDatabase {
    type Error = StoreError;

    fn try_from(row: DatabaseRow) -> Result<Self> {
        let port = u16::try_from(row.port)
            .map_err(|_| StoreError::Corrupt(format!("port out of range: {}", row.port)))?;
        Ok(Self {
            id: parse_id(row.id)?,
            user_id: parse_id(row.user_id)?,
            name: row.name,
            host: row.host,
            port,
            username: row.username,
            password: row.password,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettingRow {
    id: String,
    database_id: String,
    user_id: String,
    target_address: String,
    index_kind: String,
    index_params: Vec<String>,
    cluster: String,
    status: String,
}

impl TryFrom<SettingRow> for TrackingSetting {
    type Error = StoreError;

    fn try_from(row: SettingRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(row.id)?,
            database_id: parse_id(row.database_id)?,
            user_id: parse_id(row.user_id)?,
            target_address: row.target_address,
            index_kind: row.index_kind,
            index_params: row.index_params,
            cluster: row
                .cluster
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ParamsRow {
    id: String,
    transaction_types: Vec<String>,
    account_addresses: Vec<String>,
}

fn parse_id<T>(raw: String) -> Result<T>
where
    T: TryFrom<String, Error = txvault_core::IdError>,
{
    T::try_from(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}
