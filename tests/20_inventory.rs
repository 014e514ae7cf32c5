mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::TestServer;

fn widget() -> Value {
    json!({
        "name": "Widget",
        "quantity": 5,
        "price": 2.5,
        "expiry_date": "2025-01-01",
    })
}

async fn create(server: &TestServer, token: &str, body: &Value) -> Result<Value> {
    let res = server
        .client
        .post(server.url("/api/inventory"))
        .bearer_auth(token)
        .json(body)
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::CREATED, "create failed: {}", res.status());
    let body: Value = res.json().await?;
    Ok(body["data"]["item"].clone())
}

async fn list(server: &TestServer, token: &str) -> Result<Vec<Value>> {
    let res = server
        .client
        .get(server.url("/api/inventory"))
        .bearer_auth(token)
        .send()
        .await?;
    anyhow::ensure!(res.status() == StatusCode::OK, "list failed: {}", res.status());
    let body: Value = res.json().await?;
    Ok(body["data"]["items"].as_array().cloned().unwrap_or_default())
}

#[tokio::test]
async fn each_principal_sees_only_their_own_store() -> Result<()> {
    let server = TestServer::spawn().await?;
    let alice = server.sign_up("Alice", "alice@example.com", Some("memory://alice")).await?;
    let bob = server.sign_up("Bob", "bob@example.com", Some("memory://bob")).await?;

    let created = create(&server, &alice, &widget()).await?;
    assert_eq!(created["name"], "Widget");
    assert_eq!(created["quantity"], 5);

    let items = list(&server, &alice).await?;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 5);
    assert_eq!(items[0]["price"], 2.5);

    assert!(list(&server, &bob).await?.is_empty());
    assert_eq!(server.state.tenants.len().await, 2);

    server.stop().await
}

#[tokio::test]
async fn items_of_another_owner_are_not_found() -> Result<()> {
    let server = TestServer::spawn().await?;
    // Same store, different owners
    let alice = server.sign_up("Alice", "alice@example.com", Some("memory://shared")).await?;
    let bob = server.sign_up("Bob", "bob@example.com", Some("memory://shared")).await?;

    let item = create(&server, &alice, &widget()).await?;
    let path = format!("/api/inventory/{}", item["id"].as_str().unwrap_or_default());

    let res = server.client.get(server.url(&path)).bearer_auth(&bob).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = server.client.delete(server.url(&path)).bearer_auth(&bob).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = server.client.get(server.url(&path)).bearer_auth(&alice).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    server.stop().await
}

#[tokio::test]
async fn reduce_checks_available_stock() -> Result<()> {
    let server = TestServer::spawn().await?;
    let alice = server.sign_up("Alice", "alice@example.com", Some("memory://alice")).await?;
    let item = create(&server, &alice, &widget()).await?;
    let path = format!("/api/inventory/{}/reduce", item["id"].as_str().unwrap_or_default());

    let res = server
        .client
        .put(server.url(&path))
        .bearer_auth(&alice)
        .json(&json!({ "quantity": 6 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "INSUFFICIENT_QUANTITY");
    assert_eq!(body["available"], 5);

    let res = server
        .client
        .put(server.url(&path))
        .bearer_auth(&alice)
        .json(&json!({ "quantity": 5 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["item"]["quantity"], 0);

    let res = server
        .client
        .put(server.url(&path))
        .bearer_auth(&alice)
        .json(&json!({ "quantity": 0 }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    server.stop().await
}

#[tokio::test]
async fn update_and_delete_round_trip() -> Result<()> {
    let server = TestServer::spawn().await?;
    let alice = server.sign_up("Alice", "alice@example.com", Some("memory://alice")).await?;
    let item = create(&server, &alice, &widget()).await?;
    let path = format!("/api/inventory/{}", item["id"].as_str().unwrap_or_default());

    let res = server
        .client
        .put(server.url(&path))
        .bearer_auth(&alice)
        .json(&json!({ "price": 3.0, "description": "blue" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["item"]["price"], 3.0);
    assert_eq!(body["data"]["item"]["description"], "blue");
    assert_eq!(body["data"]["item"]["name"], "Widget");

    let res = server.client.delete(server.url(&path)).bearer_auth(&alice).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(list(&server, &alice).await?.is_empty());

    server.stop().await
}

#[tokio::test]
async fn malformed_ids_and_payloads_are_bad_requests() -> Result<()> {
    let server = TestServer::spawn().await?;
    let alice = server.sign_up("Alice", "alice@example.com", Some("memory://alice")).await?;

    let res = server
        .client
        .get(server.url("/api/inventory/not-a-uuid"))
        .bearer_auth(&alice)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server
        .client
        .post(server.url("/api/inventory"))
        .bearer_auth(&alice)
        .json(&json!({ "name": "Widget" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert!(body["field_errors"].get("quantity").is_some());

    server.stop().await
}

#[tokio::test]
async fn account_without_store_is_forbidden() -> Result<()> {
    let server = TestServer::spawn().await?;
    let carol = server.sign_up("Carol", "carol@example.com", None).await?;

    let res = server
        .client
        .get(server.url("/api/inventory"))
        .bearer_auth(&carol)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(server.state.tenants.is_empty().await);

    server.stop().await
}

#[tokio::test]
async fn unreachable_store_is_service_unavailable() -> Result<()> {
    let server = TestServer::spawn().await?;
    // The memory transport only serves memory:// addresses
    let dave = server
        .sign_up("Dave", "dave@example.com", Some("postgres://dave@127.0.0.1:1/inventory"))
        .await?;

    let res = server
        .client
        .get(server.url("/api/inventory"))
        .bearer_auth(&dave)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(server.state.tenants.is_empty().await);

    server.stop().await
}
