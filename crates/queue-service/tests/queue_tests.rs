//! End-to-end queue tests.
//!
//! Drive a real server over HTTP with the in-memory store.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use common::types::ProviderId;
use queue_service::repositories::mock::FaultyStore;
use queue_test_utils::TestQueueServer;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

fn statuses(entries: &[Value]) -> Vec<(i64, String)> {
    entries
        .iter()
        .map(|entry| {
            (
                entry["token_number"].as_i64().unwrap(),
                entry["status"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

async fn call_next_with_id(
    server: &TestQueueServer,
    provider_id: ProviderId,
    request_id: &str,
) -> Result<Value> {
    Ok(server
        .client()
        .post(server.provider_url(provider_id, "call-next"))
        .json(&json!({ "request_id": request_id }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?)
}

#[tokio::test]
async fn test_visit_scenario() -> Result<()> {
    let server = TestQueueServer::spawn().await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;

    let alice: Value = server.register(provider_id, "Alice", "111").await?.json().await?;
    let bob: Value = server.register(provider_id, "Bob", "222").await?.json().await?;
    assert_eq!(alice["token_number"], 1);
    assert_eq!(bob["token_number"], 2);

    let first = server.call_next(provider_id).await?;
    assert_eq!(first["called"]["holder_name"], "Alice");
    assert_eq!(first["called"]["token_number"], 1);

    let second = server.call_next(provider_id).await?;
    assert_eq!(second["called"]["holder_name"], "Bob");

    let entries = server.list_entries(provider_id).await?;
    assert_eq!(
        statuses(&entries),
        vec![(1, "done".to_string()), (2, "called".to_string())]
    );

    // Bob is closed out; nobody is waiting.
    let third = server.call_next(provider_id).await?;
    assert!(third["called"].is_null());

    let entries = server.list_entries(provider_id).await?;
    assert_eq!(
        statuses(&entries),
        vec![(1, "done".to_string()), (2, "done".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_call_next_on_empty_queue_changes_nothing() -> Result<()> {
    let server = TestQueueServer::spawn().await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;

    let body = server.call_next(provider_id).await?;
    assert!(body["called"].is_null());
    assert!(server.list_entries(provider_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_registration_until_done() -> Result<()> {
    let server = TestQueueServer::spawn().await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;

    let response = server.register(provider_id, "Alice", "111").await?;
    assert_eq!(response.status(), 201);

    let response = server.register(provider_id, "Alice again", "111").await?;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "duplicate");

    // Still a duplicate while being served.
    server.call_next(provider_id).await?;
    let response = server.register(provider_id, "Alice", "111").await?;
    assert_eq!(response.status(), 409);

    // Done frees the contact; the rejected attempts consumed no token.
    server.call_next(provider_id).await?;
    let response = server.register(provider_id, "Alice", "111").await?;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await?;
    assert_eq!(body["token_number"], 2);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_registrations_get_gapless_tokens() -> Result<()> {
    let server = Arc::new(TestQueueServer::spawn().await?);
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;

    let mut tasks = Vec::new();
    for i in 0..25 {
        let server = Arc::clone(&server);
        tasks.push(tokio::spawn(async move {
            let response = server
                .register(provider_id, &format!("Holder {i}"), &format!("contact-{i}"))
                .await
                .unwrap();
            assert_eq!(response.status(), 201);
            let body: Value = response.json().await.unwrap();
            body["token_number"].as_i64().unwrap()
        }));
    }

    let mut tokens = HashSet::new();
    for task in tasks {
        tokens.insert(task.await?);
    }

    let expected: HashSet<i64> = (1..=25).collect();
    assert_eq!(tokens, expected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_call_next_keeps_single_called_slot() -> Result<()> {
    let server = Arc::new(TestQueueServer::spawn().await?);
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;

    for i in 0..20 {
        let response = server
            .register(provider_id, &format!("Holder {i}"), &format!("contact-{i}"))
            .await?;
        assert_eq!(response.status(), 201);
    }

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let server = Arc::clone(&server);
        tasks.push(tokio::spawn(async move {
            let body = server.call_next(provider_id).await.unwrap();
            body["called"]["token_number"].as_i64().unwrap()
        }));
    }

    let mut called = Vec::new();
    for task in tasks {
        called.push(task.await?);
    }
    called.sort_unstable();
    assert_eq!(called, (1..=10).collect::<Vec<i64>>());

    let entries = statuses(&server.list_entries(provider_id).await?);
    let count = |status: &str| entries.iter().filter(|(_, s)| s == status).count();
    assert_eq!(count("called"), 1);
    assert_eq!(count("done"), 9);
    assert_eq!(count("waiting"), 10);
    assert!(entries.contains(&(10, "called".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_offline_provider_rejects_registration() -> Result<()> {
    let server = TestQueueServer::spawn().await?;
    let provider_id = server.create_provider("Dr. Rao", "rao@example.com").await?;

    let response = server.register(provider_id, "Alice", "111").await?;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "provider_unavailable");

    server.set_online(provider_id, true).await?;
    let response = server.register(provider_id, "Alice", "111").await?;
    assert_eq!(response.status(), 201);
    Ok(())
}

#[tokio::test]
async fn test_registration_validation() -> Result<()> {
    let server = TestQueueServer::spawn().await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;

    let response = server.register(provider_id, "", "111").await?;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "validation");

    let response = server.register(provider_id, "Alice", "   ").await?;
    assert_eq!(response.status(), 400);

    assert!(server.list_entries(provider_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_end_session_clears_queue_and_goes_offline() -> Result<()> {
    let server = TestQueueServer::spawn().await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;
    server.register(provider_id, "Alice", "111").await?;
    server.register(provider_id, "Bob", "222").await?;
    server.call_next(provider_id).await?;

    let body: Value = server
        .client()
        .post(server.provider_url(provider_id, "end-session"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(body["ok"], true);
    assert_eq!(body["removed"], 2);
    assert_eq!(body["remaining"], json!([]));

    assert!(server.list_entries(provider_id).await?.is_empty());
    let provider: Value = server
        .client()
        .get(format!("{}/v1/providers/{}", server.url(), provider_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(provider["is_online"], false);

    // The next session starts counting from 1 again.
    server.set_online(provider_id, true).await?;
    let body: Value = server.register(provider_id, "Carol", "333").await?.json().await?;
    assert_eq!(body["token_number"], 1);
    Ok(())
}

#[tokio::test]
async fn test_end_session_partial_failure_reports_remaining() -> Result<()> {
    let store = Arc::new(FaultyStore::new());
    let server = TestQueueServer::spawn_with_store(store.clone()).await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;
    let alice: Value = server.register(provider_id, "Alice", "111").await?.json().await?;

    store.fail_clear(true);
    let body: Value = server
        .client()
        .post(server.provider_url(provider_id, "end-session"))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["ok"], false);
    assert_eq!(body["remaining"], json!([alice["entry_id"]]));

    // Offline even though the queue survived.
    let response = server.register(provider_id, "Bob", "222").await?;
    assert_eq!(response.status(), 409);
    Ok(())
}

#[tokio::test]
async fn test_call_next_store_failure_leaves_queue_unchanged() -> Result<()> {
    let store = Arc::new(FaultyStore::new());
    let server = TestQueueServer::spawn_with_store(store.clone()).await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;
    server.register(provider_id, "Alice", "111").await?;

    store.fail_advance(true);
    let response = server
        .client()
        .post(server.provider_url(provider_id, "call-next"))
        .send()
        .await?;
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], "internal");
    assert_eq!(body["error"]["message"], "An internal error occurred");

    let entries = server.list_entries(provider_id).await?;
    assert_eq!(statuses(&entries), vec![(1, "waiting".to_string())]);

    store.fail_advance(false);
    let body = server.call_next(provider_id).await?;
    assert_eq!(body["called"]["holder_name"], "Alice");
    Ok(())
}

#[tokio::test]
async fn test_call_next_retry_with_request_id_is_replayed() -> Result<()> {
    let store = Arc::new(FaultyStore::new());
    let server = TestQueueServer::spawn_with_store(store.clone()).await?;
    let provider_id = server.online_provider("Dr. Rao", "rao@example.com").await?;
    server.register(provider_id, "Alice", "111").await?;
    server.register(provider_id, "Bob", "222").await?;

    let first = call_next_with_id(&server, provider_id, "tap-1").await?;
    let retry = call_next_with_id(&server, provider_id, "tap-1").await?;
    assert_eq!(first, retry);
    assert_eq!(retry["called"]["holder_name"], "Alice");
    assert_eq!(store.advance_calls(), 1);

    let entries = server.list_entries(provider_id).await?;
    assert_eq!(
        statuses(&entries),
        vec![(1, "called".to_string()), (2, "waiting".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_provider_is_not_found() -> Result<()> {
    let server = TestQueueServer::spawn().await?;
    let unknown = ProviderId::new();

    let response = server.register(unknown, "Alice", "111").await?;
    assert_eq!(response.status(), 404);

    let response = server
        .client()
        .get(server.provider_url(unknown, "entries"))
        .send()
        .await?;
    assert_eq!(response.status(), 404);
    Ok(())
}
