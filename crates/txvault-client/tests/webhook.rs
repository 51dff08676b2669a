//! Webhook client tests against a mock subscription API.

use std::collections::HashMap;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use txvault_client::{ClientError, ClusterEndpoint, WebhookClient, WebhookUpdate};
use txvault_core::Cluster;

fn client_for(server: &MockServer) -> WebhookClient {
    WebhookClient::new(HashMap::from([
        (
            Cluster::Mainnet,
            ClusterEndpoint::new(server.uri(), "main-key", "wh-main", "main-secret"),
        ),
        (
            Cluster::Devnet,
            ClusterEndpoint::new(format!("{}/devnet", server.uri()), "dev-key", "wh-dev", "dev-secret"),
        ),
    ]))
    .expect("client")
}

fn update() -> WebhookUpdate {
    WebhookUpdate {
        transaction_types: vec!["TRANSFER".into()],
        account_address: vec!["B2".into()],
    }
}

#[tokio::test]
async fn puts_full_subscription_with_cluster_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/webhooks/wh-main"))
        .and(query_param("api-key", "main-key"))
        .and(header("Authorization", "main-secret"))
        .and(body_json(json!({
            "transactionTypes": ["TRANSFER"],
            "accountAddress": ["B2"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"webhookID": "wh-main"})))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .update_webhook(Cluster::Mainnet, &update())
        .await
        .expect("update succeeds");
}

#[tokio::test]
async fn devnet_uses_its_own_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/devnet/webhooks/wh-dev"))
        .and(query_param("api-key", "dev-key"))
        .and(header("Authorization", "dev-secret"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .update_webhook(Cluster::Devnet, &update())
        .await
        .expect("update succeeds");
}

#[tokio::test]
async fn non_success_status_is_an_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .update_webhook(Cluster::Mainnet, &update())
        .await
        .unwrap_err();

    match err {
        ClientError::Api { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "upstream exploded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn empty_error_body_falls_back_to_status_line() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .update_webhook(Cluster::Mainnet, &update())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Api { status: 401, ref message } if message.contains("401")));
}
