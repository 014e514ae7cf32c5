mod common;

use anyhow::Result;
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::json;

use common::TestServer;

#[tokio::test]
async fn shutdown_closes_every_tenant_connection() -> Result<()> {
    let server = TestServer::spawn().await?;
    let alice = server.sign_up("Alice", "alice@example.com", Some("memory://alice")).await?;
    let bob = server.sign_up("Bob", "bob@example.com", Some("memory://bob")).await?;

    for token in [&alice, &bob] {
        let res = server
            .client
            .get(server.url("/api/inventory"))
            .bearer_auth(token)
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(server.state.tenants.len().await, 2);

    let state = server.state.clone();
    server.stop().await?;
    assert!(state.tenants.is_empty().await);

    Ok(())
}

#[tokio::test]
async fn connections_are_reused_across_requests() -> Result<()> {
    let server = TestServer::spawn().await?;
    let alice = server.sign_up("Alice", "alice@example.com", Some("memory://alice")).await?;

    let requests = (0..8).map(|i| {
        server
            .client
            .post(server.url("/api/inventory"))
            .bearer_auth(&alice)
            .json(&json!({
                "name": format!("Widget {}", i),
                "quantity": i,
                "price": 1.0,
                "expiry_date": "2025-06-01",
            }))
            .send()
    });
    for res in join_all(requests).await {
        assert_eq!(res?.status(), StatusCode::CREATED);
    }
    assert_eq!(server.state.tenants.len().await, 1);

    server.stop().await
}
