//! Live PostgreSQL tests for the metadata store.
//!
//! These tests run against a real PostgreSQL instance. Set
//! `TXVAULT_TEST_DATABASE_URL` to a database the tests may migrate and write.
//!
//! Run with: cargo test -p txvault-store --test postgres_live -- --nocapture

use std::sync::Arc;

use txvault_core::{
    DatabaseId, SettingId, SettingStatus, SubscriptionParams, TrackingSetting, UserId,
};
use txvault_store::{MetadataStore, PgMetadataStore};

async fn connect() -> Option<PgMetadataStore> {
    let Ok(url) = std::env::var("TXVAULT_TEST_DATABASE_URL") else {
        println!("Skipping: TXVAULT_TEST_DATABASE_URL not set");
        return None;
    };
    let store = PgMetadataStore::connect(&url, 8)
        .await
        .expect("Failed to connect");
    store.migrate().await.expect("Failed to migrate");
    Some(store)
}

struct Seeded {
    user_id: UserId,
    database_id: DatabaseId,
    setting_id: SettingId,
    address: String,
    params_id: String,
}

async fn seed(store: &PgMetadataStore, credits: i64) -> Seeded {
    let user_id = UserId::generate();
    let database_id = DatabaseId::generate();
    let setting_id = SettingId::generate();
    let address = format!("addr-{}", SettingId::generate());
    let params_id = format!("params-{}", SettingId::generate());

    sqlx::query("INSERT INTO users (id, email, credits) VALUES ($1, $2, $3)")
        .bind(user_id.as_str())
        .bind("live@example.com")
        .bind(credits)
        .execute(store.pool())
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO tenant_databases (id, user_id, name, host, port, username, password) \
         VALUES ($1, $2, 'tenant', 'localhost', 5432, 'postgres', 'iv:tag:ct')",
    )
    .bind(database_id.as_str())
    .bind(user_id.as_str())
    .execute(store.pool())
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO tracking_settings \
         (id, database_id, user_id, target_address, index_kind, index_params, cluster) \
         VALUES ($1, $2, $3, $4, 'TRANSFER', '{}', 'DEVNET')",
    )
    .bind(setting_id.as_str())
    .bind(database_id.as_str())
    .bind(user_id.as_str())
    .bind(&address)
    .execute(store.pool())
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO subscription_params (id, transaction_types, account_addresses) \
         VALUES ($1, ARRAY['TRANSFER'], ARRAY[$2::text])",
    )
    .bind(&params_id)
    .bind(&address)
    .execute(store.pool())
    .await
    .unwrap();

    Seeded {
        user_id,
        database_id,
        setting_id,
        address,
        params_id,
    }
}

#[tokio::test]
async fn live_load_routing_for_seeded_setting() {
    let Some(store) = connect().await else { return };
    let seeded = seed(&store, 500).await;

    let setting: TrackingSetting = store
        .get_setting_by_address(&seeded.address)
        .await
        .unwrap()
        .expect("setting exists");
    assert_eq!(setting.id, seeded.setting_id);
    assert_eq!(setting.status, SettingStatus::Active);

    let found = store
        .find_active_settings(&[seeded.address.clone(), "nobody".into()])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let record = store.load_routing(setting).await.unwrap().expect("routing");
    assert_eq!(record.user.credits, 500);
    assert_eq!(record.database.id, seeded.database_id);
}

#[tokio::test]
async fn live_concurrent_charges_lose_no_updates() {
    let Some(store) = connect().await else { return };
    let store = Arc::new(store);
    let seeded = seed(&store, 1_000).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..25 {
        let store = store.clone();
        let user_id = seeded.user_id.clone();
        tasks.spawn(async move { store.charge_credit(&user_id).await.unwrap() });
    }
    while let Some(res) = tasks.join_next().await {
        assert!(res.unwrap().is_some());
    }

    let user = store.get_user(&seeded.user_id).await.unwrap().unwrap();
    assert_eq!(user.credits, 975);
}

#[tokio::test]
async fn live_commit_deactivation_is_atomic() {
    let Some(store) = connect().await else { return };
    let seeded = seed(&store, 101).await;

    let params = SubscriptionParams {
        id: seeded.params_id.clone(),
        transaction_types: vec!["TRANSFER".into()],
        account_addresses: vec![],
    };
    store
        .commit_deactivation(&seeded.user_id, &seeded.setting_id, &params)
        .await
        .unwrap();

    let user = store.get_user(&seeded.user_id).await.unwrap().unwrap();
    assert_eq!(user.credits, 0);
    let setting = store.get_setting(&seeded.setting_id).await.unwrap().unwrap();
    assert_eq!(setting.status, SettingStatus::Inactive);

    // Unknown params roll everything back.
    let other = seed(&store, 101).await;
    let missing = SubscriptionParams {
        id: "does-not-exist".into(),
        ..params
    };
    assert!(store
        .commit_deactivation(&other.user_id, &other.setting_id, &missing)
        .await
        .is_err());
    let untouched = store.get_user(&other.user_id).await.unwrap().unwrap();
    assert_eq!(untouched.credits, 101);
}
