//! Ingestion pipeline tests with in-memory stores and a mock subscription API.

mod common;

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{tenant, transfer, TestHarness, WEBHOOK_ID};
use txvault_core::{EventBatch, SettingStatus};
use txvault_store::MetadataStore;
use txvault_worker::TenantOutcome;

fn batch(value: serde_json::Value) -> EventBatch {
    EventBatch::from_value(value).expect("valid batch")
}

async fn credits(harness: &TestHarness, tenant: &common::Tenant) -> i64 {
    harness
        .store
        .get_user(&tenant.user.id)
        .await
        .unwrap()
        .expect("user")
        .credits
}

#[tokio::test]
async fn funded_tenant_is_charged_and_persisted() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.seed(&alice).await;

    let report = harness
        .pipeline
        .handle(batch(transfer("sig-1", &["A1", "X9"])))
        .await;

    assert_eq!(report.events, 1);
    assert_eq!(report.tenants.len(), 1);
    assert_eq!(report.tenants[0].outcome, TenantOutcome::Persisted);
    assert_eq!(report.tenants[0].address, "A1");
    assert_eq!(credits(&harness, &alice).await, 499);

    let rows = harness.sink.rows_for(&alice.database.id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].table, "TRANSFER");
    assert_eq!(rows[0].record.signature, "sig-1");
    assert_eq!(rows[0].record.fee, 5000);
}

#[tokio::test]
async fn depleting_charge_deactivates_instead_of_persisting() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 101);
    harness.seed(&alice).await;
    harness.subscribe(&["A1", "B2"]).await;

    Mock::given(method("PUT"))
        .and(path(format!("/webhooks/{WEBHOOK_ID}")))
        .and(body_json(json!({
            "transactionTypes": ["TRANSFER"],
            "accountAddress": ["B2"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"webhookID": WEBHOOK_ID})))
        .expect(1)
        .mount(&harness.server)
        .await;

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(report.count(&TenantOutcome::Deactivated), 1);
    assert_eq!(credits(&harness, &alice).await, 0);

    let setting = harness
        .store
        .get_setting(&alice.setting.id)
        .await
        .unwrap()
        .expect("setting");
    assert_eq!(setting.status, SettingStatus::Inactive);

    let params = harness.store.subscription_params().await.unwrap().expect("params");
    assert_eq!(params.account_addresses, vec!["B2".to_string()]);

    assert!(!harness.cache.local_contains(&alice.database.id).await);
    assert!(harness.cache.resolve("A1").await.unwrap().is_none());
    assert!(harness.sink.rows().await.is_empty());
}

#[tokio::test]
async fn concurrent_deactivations_remove_every_depleted_address() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 101);
    let bob = tenant("B2", 101);
    harness.seed(&alice).await;
    harness.seed(&bob).await;
    harness.subscribe(&["A1", "B2", "C3"]).await;

    Mock::given(method("PUT"))
        .and(path(format!("/webhooks/{WEBHOOK_ID}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"webhookID": WEBHOOK_ID}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(2)
        .mount(&harness.server)
        .await;

    let report = harness
        .pipeline
        .handle(batch(transfer("sig-1", &["A1", "B2"])))
        .await;

    assert_eq!(report.count(&TenantOutcome::Deactivated), 2);

    let params = harness.store.subscription_params().await.unwrap().expect("params");
    assert_eq!(params.account_addresses, vec!["C3".to_string()]);

    // The second update must already exclude the first removed address.
    let requests = harness.server.received_requests().await.expect("recording");
    assert_eq!(requests.len(), 2);
    let last: serde_json::Value = serde_json::from_slice(&requests[1].body).expect("json body");
    assert_eq!(last["accountAddress"], json!(["C3"]));

    for tenant in [&alice, &bob] {
        let setting = harness
            .store
            .get_setting(&tenant.setting.id)
            .await
            .unwrap()
            .expect("setting");
        assert_eq!(setting.status, SettingStatus::Inactive);
        assert_eq!(credits(&harness, tenant).await, 0);
    }
}

#[tokio::test]
async fn rejected_webhook_update_leaves_tenant_untouched() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 101);
    let bob = tenant("B2", 500);
    harness.seed(&alice).await;
    harness.seed(&bob).await;
    let before = harness.subscribe(&["A1", "B2"]).await;

    Mock::given(method("PUT"))
        .and(path(format!("/webhooks/{WEBHOOK_ID}")))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&harness.server)
        .await;

    let report = harness
        .pipeline
        .handle(batch(transfer("sig-1", &["A1", "B2"])))
        .await;

    assert_eq!(report.tenants.len(), 2);
    let alice_outcome = report
        .tenants
        .iter()
        .find(|t| t.database_id == alice.database.id)
        .expect("alice report");
    assert!(matches!(alice_outcome.outcome, TenantOutcome::Failed(_)));
    let bob_outcome = report
        .tenants
        .iter()
        .find(|t| t.database_id == bob.database.id)
        .expect("bob report");
    assert_eq!(bob_outcome.outcome, TenantOutcome::Persisted);

    // The charge stands; nothing else changed.
    assert_eq!(credits(&harness, &alice).await, 100);
    let setting = harness
        .store
        .get_setting(&alice.setting.id)
        .await
        .unwrap()
        .expect("setting");
    assert_eq!(setting.status, SettingStatus::Active);
    assert_eq!(harness.store.subscription_params().await.unwrap(), Some(before));
    assert!(harness.cache.local_contains(&alice.database.id).await);

    assert!(harness.sink.rows_for(&alice.database.id).await.is_empty());
    assert_eq!(harness.sink.rows_for(&bob.database.id).await.len(), 1);
}

#[tokio::test]
async fn untracked_transfer_is_not_charged() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.seed(&alice).await;

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["Z0"]))).await;

    assert_eq!(report.unmatched, 1);
    assert!(report.tenants.is_empty());
    assert_eq!(credits(&harness, &alice).await, 500);
}

#[tokio::test]
async fn untracked_addresses_share_one_cache_hydration() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.seed(&alice).await;
    let before = harness.cache.stats().await.shared_fetches;

    let report = harness
        .pipeline
        .handle(batch(transfer("sig-1", &["A1", "U1", "U2", "U3", "U4", "U5"])))
        .await;

    assert_eq!(report.tenants.len(), 1);
    assert_eq!(report.tenants[0].outcome, TenantOutcome::Persisted);
    assert!(harness.cache.stats().await.shared_fetches - before <= 1);
}

#[tokio::test]
async fn redelivered_signature_is_charged_but_stored_once() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.seed(&alice).await;

    let first = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;
    let second = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(first.tenants[0].outcome, TenantOutcome::Persisted);
    assert_eq!(second.tenants[0].outcome, TenantOutcome::Duplicate);
    assert_eq!(credits(&harness, &alice).await, 498);
    assert_eq!(harness.sink.rows().await.len(), 1);
}

#[tokio::test]
async fn setting_that_does_not_index_transfers_is_skipped_without_charge() {
    let harness = TestHarness::new().await;
    let mut alice = tenant("A1", 500);
    alice.setting.index_params = vec!["NFT_SALE".into()];
    harness.seed(&alice).await;

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(report.tenants[0].outcome, TenantOutcome::Filtered);
    assert_eq!(credits(&harness, &alice).await, 500);
    assert!(harness.sink.rows().await.is_empty());
}

#[tokio::test]
async fn invalid_table_name_is_refused_without_charge() {
    let harness = TestHarness::new().await;
    let mut alice = tenant("A1", 500);
    alice.setting.index_kind = "TRANSFER\"; DROP TABLE users; --".into();
    harness.seed(&alice).await;

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(report.tenants[0].outcome, TenantOutcome::InvalidTable);
    assert_eq!(credits(&harness, &alice).await, 500);
    assert!(harness.sink.rows().await.is_empty());
}

#[tokio::test]
async fn missing_user_evicts_tenant_from_cache() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.store.put_database(alice.database.clone()).await;
    harness.store.put_setting(alice.setting.clone()).await;
    assert!(harness.cache.populate(&alice.record()).await.unwrap());

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(report.tenants[0].outcome, TenantOutcome::UserMissing);
    assert!(!harness.cache.local_contains(&alice.database.id).await);
    assert!(harness.sink.rows().await.is_empty());
}

#[tokio::test]
async fn uncached_tenant_is_loaded_from_the_store_and_cached() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.store_tenant(&alice).await;

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(report.tenants[0].outcome, TenantOutcome::Persisted);
    assert!(harness.cache.local_contains(&alice.database.id).await);
    assert!(harness.cache.resolve("A1").await.unwrap().is_some());
}

#[tokio::test]
async fn inactive_setting_in_store_is_not_routed() {
    let harness = TestHarness::new().await;
    let mut alice = tenant("A1", 500);
    alice.setting.status = SettingStatus::Inactive;
    harness.store_tenant(&alice).await;

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(report.unmatched, 1);
    assert_eq!(credits(&harness, &alice).await, 500);
}

#[tokio::test]
async fn non_transfer_events_are_ignored() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.seed(&alice).await;

    let mut swap = transfer("sig-2", &["A1"]);
    swap["type"] = json!("SWAP");
    let report = harness
        .pipeline
        .handle(batch(json!([swap, transfer("sig-1", &["A1"])])))
        .await;

    assert_eq!(report.events, 2);
    assert_eq!(report.ignored, 1);
    assert_eq!(report.tenants.len(), 1);
    assert_eq!(credits(&harness, &alice).await, 499);
}

#[tokio::test]
async fn unready_tenant_database_still_costs_a_credit() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    harness.seed(&alice).await;
    harness.sink.set_unready();

    let report = harness.pipeline.handle(batch(transfer("sig-1", &["A1"]))).await;

    assert_eq!(report.tenants[0].outcome, TenantOutcome::Unready);
    assert_eq!(credits(&harness, &alice).await, 499);
    assert!(harness.sink.rows().await.is_empty());
}

#[tokio::test]
async fn every_tracking_tenant_receives_the_event() {
    let harness = TestHarness::new().await;
    let alice = tenant("A1", 500);
    let bob = tenant("B2", 300);
    harness.seed(&alice).await;
    harness.seed(&bob).await;

    let report = harness
        .pipeline
        .handle(batch(transfer("sig-1", &["A1", "B2", "C3"])))
        .await;

    assert_eq!(report.count(&TenantOutcome::Persisted), 2);
    assert_eq!(credits(&harness, &alice).await, 499);
    assert_eq!(credits(&harness, &bob).await, 299);
    assert_eq!(harness.sink.rows_for(&alice.database.id).await.len(), 1);
    assert_eq!(harness.sink.rows_for(&bob.database.id).await.len(), 1);
}
