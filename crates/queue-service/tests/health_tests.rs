//! Health and metrics endpoint tests.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use anyhow::Result;
use queue_service::repositories::mock::FaultyStore;
use queue_test_utils::TestQueueServer;
use serde_json::Value;
use std::sync::Arc;

#[tokio::test]
async fn test_health_reports_healthy_store() -> Result<()> {
    let server = TestQueueServer::spawn().await?;

    let response = reqwest::get(format!("{}/v1/health", server.url())).await?;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "healthy");
    assert_eq!(body["instance_id"], server.config().instance_id);
    Ok(())
}

#[tokio::test]
async fn test_health_reports_unreachable_store() -> Result<()> {
    let store = Arc::new(FaultyStore::new());
    let server = TestQueueServer::spawn_with_store(store.clone()).await?;
    store.fail_ping(true);

    let response = reqwest::get(format!("{}/v1/health", server.url())).await?;
    assert_eq!(response.status(), 503);

    let body: Value = response.json().await?;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["store"], "unhealthy");
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_served() -> Result<()> {
    let server = TestQueueServer::spawn().await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;
    assert_eq!(response.status(), 200);
    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_not_found() -> Result<()> {
    let server = TestQueueServer::spawn().await?;

    let response = reqwest::get(format!("{}/v1/nonexistent", server.url())).await?;
    assert_eq!(response.status(), 404);
    Ok(())
}
