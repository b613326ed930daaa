//! Test server harness for E2E testing
//!
//! Provides `TestQueueServer` for spawning real queue service instances in
//! tests, plus thin request helpers for the common calls.

use common::types::ProviderId;
use metrics_exporter_prometheus::PrometheusBuilder;
use queue_service::config::Config;
use queue_service::repositories::{InMemoryQueueStore, QueueStore};
use queue_service::routes::{self, AppState};
use queue_service::services::QueueService;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the queue service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_e2e() -> Result<(), anyhow::Error> {
///     let server = TestQueueServer::spawn().await?;
///
///     let response = reqwest::get(&format!("{}/v1/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestQueueServer {
    addr: SocketAddr,
    config: Config,
    service: QueueService,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestQueueServer {
    /// Spawn a server backed by a fresh in-memory store.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_store(Arc::new(InMemoryQueueStore::new())).await
    }

    /// Spawn a server backed by `store` (for example a fault-injecting one).
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_store(store: Arc<dyn QueueStore>) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(store, HashMap::new()).await
    }

    /// Spawn with extra configuration variables layered over the test
    /// defaults.
    pub async fn spawn_with_vars(
        store: Arc<dyn QueueStore>,
        extra_vars: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("QUEUE_INSTANCE_ID".to_string(), "queue-test".to_string()),
            ("QUEUE_STORE_TIMEOUT_MS".to_string(), "1000".to_string()),
        ]);
        vars.extend(extra_vars);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let service = QueueService::new(&config, store);
        let state = Arc::new(AppState {
            service: service.clone(),
            config: config.clone(),
        });

        // Local recorder handle; the global recorder can only be installed once
        // per process.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        // Build routes using queue-service's real route builder
        let app = routes::build_routes(state, metrics_handle);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        // Spawn server in background
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            service,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The service behind the HTTP layer.
    pub fn service(&self) -> &QueueService {
        &self.service
    }

    /// Shared HTTP client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// URL of a provider-scoped route, e.g. `provider_url(id, "entries")`.
    pub fn provider_url(&self, provider_id: ProviderId, action: &str) -> String {
        format!("{}/v1/providers/{}/{}", self.url(), provider_id, action)
    }

    /// First login for a provider; returns its ID.
    pub async fn create_provider(
        &self,
        name: &str,
        contact: &str,
    ) -> Result<ProviderId, anyhow::Error> {
        let body: serde_json::Value = self
            .client
            .post(format!("{}/v1/providers", self.url()))
            .json(&json!({ "name": name, "contact": contact }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let id = body["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("login response has no id: {}", body))?;
        Ok(id.parse()?)
    }

    /// Create a provider and switch it online.
    pub async fn online_provider(
        &self,
        name: &str,
        contact: &str,
    ) -> Result<ProviderId, anyhow::Error> {
        let provider_id = self.create_provider(name, contact).await?;
        self.set_online(provider_id, true).await?.error_for_status()?;
        Ok(provider_id)
    }

    /// `POST /v1/providers/:id/online`.
    pub async fn set_online(
        &self,
        provider_id: ProviderId,
        online: bool,
    ) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .client
            .post(self.provider_url(provider_id, "online"))
            .json(&json!({ "online": online }))
            .send()
            .await?)
    }

    /// `POST /v1/providers/:id/entries`.
    pub async fn register(
        &self,
        provider_id: ProviderId,
        name: &str,
        contact: &str,
    ) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .client
            .post(self.provider_url(provider_id, "entries"))
            .json(&json!({ "name": name, "contact": contact }))
            .send()
            .await?)
    }

    /// `POST /v1/providers/:id/call-next` without a request ID; returns the
    /// response body.
    pub async fn call_next(
        &self,
        provider_id: ProviderId,
    ) -> Result<serde_json::Value, anyhow::Error> {
        Ok(self
            .client
            .post(self.provider_url(provider_id, "call-next"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    /// `GET /v1/providers/:id/entries`; returns the entry list.
    pub async fn list_entries(
        &self,
        provider_id: ProviderId,
    ) -> Result<Vec<serde_json::Value>, anyhow::Error> {
        let body: serde_json::Value = self
            .client
            .get(self.provider_url(provider_id, "entries"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(body["entries"].as_array().cloned().unwrap_or_default())
    }
}

impl Drop for TestQueueServer {
    fn drop(&mut self) {
        // Abort the HTTP server task and stop the actor tree
        self._handle.abort();
        self.service.controller().cancel();
    }
}
