//! Failure injection against the real provider gateway and a live server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use link_reconciler::config::ProviderConfig;
use link_reconciler::http::{build_router, HttpServer};
use link_reconciler::lifecycle::{Services, Shutdown};
use link_reconciler::provider::{ProviderApi, ProviderError, ProviderGateway};
use link_reconciler::storage::Database;
use link_reconciler::webhooks::WebhookStatus;

mod common;

fn gateway(addr: std::net::SocketAddr, timeout: Duration) -> ProviderGateway {
    let config = ProviderConfig {
        base_url: format!("http://{addr}"),
        client_id: "client-123".to_string(),
        secret: "secret-456".to_string(),
        ..Default::default()
    };
    ProviderGateway::new(&config, timeout).unwrap()
}

#[tokio::test]
async fn test_exchange_sends_credentials_and_parses_response() {
    let (addr, captured) = common::start_programmable_backend(|_| async {
        (
            200,
            r#"{"access_token":"access-sandbox-1","item_id":"item-A","request_id":"r1"}"#.into(),
        )
    })
    .await;

    let exchange = gateway(addr, Duration::from_secs(5))
        .exchange_public_token("public-sandbox-1")
        .await
        .unwrap();
    assert_eq!(exchange.access_token, "access-sandbox-1");
    assert_eq!(exchange.item_id, "item-A");

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/item/public_token/exchange");
    let sent: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(sent["client_id"], "client-123");
    assert_eq!(sent["secret"], "secret-456");
    assert_eq!(sent["public_token"], "public-sandbox-1");
}

#[tokio::test]
async fn test_provider_error_body_mapped() {
    let (addr, _) = common::start_programmable_backend(|_| async {
        (
            400,
            r#"{"error_type":"TRANSACTIONS_ERROR","error_code":"TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION","error_message":"restart"}"#.into(),
        )
    })
    .await;

    let err = gateway(addr, Duration::from_secs(5))
        .sync_transactions("access-1", Some("c-1"), 100)
        .await
        .unwrap_err();
    assert!(err.is_mutation_during_pagination());
    match err {
        ProviderError::Api { status, .. } => assert_eq!(status, 400),
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let (addr, _) = common::start_programmable_backend(|_| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        (200, r#"{"item":{"item_id":"item-A"}}"#.into())
    })
    .await;

    let err = gateway(addr, Duration::from_millis(200))
        .get_item("access-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Timeout { .. }));
    assert_eq!(err.code(), "PROVIDER_TIMEOUT");
}

#[tokio::test]
async fn test_unexpected_body_is_decode_error() {
    let (addr, _) = common::start_programmable_backend(|_| async {
        (200, "<html>maintenance</html>".into())
    })
    .await;

    let err = gateway(addr, Duration::from_secs(5))
        .get_accounts("access-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Decode { .. }));
}

#[tokio::test]
async fn test_provider_outage_during_session_fails_token_not_request() {
    // Exchange fails twice with a provider 500; the webhook is still acknowledged
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let (addr, _) = common::start_programmable_backend(move |_| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            (
                500,
                r#"{"error_type":"API_ERROR","error_code":"INTERNAL_SERVER_ERROR","error_message":"boom"}"#.into(),
            )
        }
    })
    .await;

    let config = common::test_config();
    let db = Database::in_memory().await.unwrap();
    let services = Services::new(db, Arc::new(gateway(addr, Duration::from_secs(5))), &config);
    services.keys.ensure_active_key(true).await.unwrap();
    services
        .db
        .insert_link_token(&link_reconciler::storage::NewLinkToken {
            token: "link-sandbox-outage".to_string(),
            client_id: "c1".to_string(),
            mode: link_reconciler::storage::LinkMode::Create,
            item_id: None,
            expires_at: None,
        })
        .await
        .unwrap();

    let outcome = services
        .webhooks
        .handle(
            &common::session_finished("link-sandbox-outage", &["public-1", "public-2"]),
            common::LEASE,
        )
        .await
        .unwrap();
    assert_eq!(outcome.status, WebhookStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some("INTERNAL_SERVER_ERROR"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_live_server_serves_until_shutdown() {
    let h = common::Harness::new().await;
    h.seed_item("c1", "item-A", None).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new("public", build_router(h.state()));
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .post(format!("http://{addr}/webhooks/provider"))
        .body(common::item_error("item-A", "ITEM_LOGIN_REQUIRED"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let json: serde_json::Value = res.json().await.unwrap();
    assert_eq!(json["status"], "processed");
    assert!(!json["fingerprint"].as_str().unwrap().is_empty());

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server did not stop after shutdown");
    assert!(result.unwrap().is_ok());
}
