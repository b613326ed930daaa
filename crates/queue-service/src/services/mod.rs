//! Queue operations exposed to the HTTP layer.
//!
//! [`QueueService`] is the single entry point for handlers. Mutations are
//! routed to the owning `ProviderActor`; reads and subscriptions go to the
//! store and the notification bus directly.
//!
//! # Modules
//!
//! - [`allocator`] - Registration validation and token allocation
//! - [`scheduler`] - The call-next transition
//! - [`session`] - Online toggling and session termination

pub mod allocator;
pub mod scheduler;
pub mod session;

use crate::actors::{
    ActorMetrics, ControllerStatus, ProviderActorHandle, ProviderContext,
    QueueControllerActorHandle,
};
use crate::config::Config;
use crate::errors::QueueError;
use crate::models::{
    CallNextRequest, ChangeEvent, EndSessionOutcome, Entry, Provider, ProviderLoginRequest,
    ProviderPresence, RegisterRequest, RingSignal,
};
use crate::notifications::{NotificationBus, Subscription};
use crate::observability::metrics;
use crate::repositories::{with_deadline, QueueStore};
use crate::watch::{self, NowServing};
use chrono::Utc;
use common::types::ProviderId;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Facade over the actor tree, the store and the notification bus.
#[derive(Clone)]
pub struct QueueService {
    controller: QueueControllerActorHandle,
    store: Arc<dyn QueueStore>,
    bus: NotificationBus,
    store_timeout: Duration,
    reconcile_interval: Duration,
}

impl QueueService {
    /// Build the service and spawn its controller actor.
    pub fn new(config: &Config, store: Arc<dyn QueueStore>) -> Self {
        let bus = NotificationBus::new(config.bus_capacity);
        let ctx = ProviderContext {
            store: Arc::clone(&store),
            bus: bus.clone(),
            store_timeout: config.store_timeout,
            replay_window: config.call_next_replay_window,
            metrics: ActorMetrics::new(),
        };
        let controller = QueueControllerActorHandle::new(config.instance_id.clone(), ctx);

        Self {
            controller,
            store,
            bus,
            store_timeout: config.store_timeout,
            reconcile_interval: config.reconcile_interval,
        }
    }

    /// Handle to the controller actor (for shutdown and status).
    pub fn controller(&self) -> &QueueControllerActorHandle {
        &self.controller
    }

    /// Token cancelled when the service shuts down. Long-lived streams stop
    /// on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.controller.child_token()
    }

    /// The notification bus.
    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Return the provider, or `NotFound` if it does not exist.
    pub async fn get_provider(&self, provider_id: ProviderId) -> Result<Provider, QueueError> {
        with_deadline(
            self.store_timeout,
            "get_provider",
            self.store.get_provider(provider_id),
        )
        .await?
        .ok_or_else(|| QueueError::NotFound("Provider not found".to_string()))
    }

    /// First login: find the provider by contact or create it offline.
    #[instrument(skip_all, name = "queue.services.login")]
    pub async fn login(&self, request: &ProviderLoginRequest) -> Result<Provider, QueueError> {
        request.validate().map_err(QueueError::Validation)?;

        let provider = with_deadline(
            self.store_timeout,
            "upsert_provider",
            self.store
                .upsert_provider(request.name.trim(), request.contact.trim()),
        )
        .await?;

        info!(
            target: "queue.services",
            provider_id = %provider.id,
            "Provider signed in"
        );
        Ok(provider)
    }

    /// Actor for an existing provider. Unknown IDs never spawn an actor.
    async fn actor(&self, provider_id: ProviderId) -> Result<ProviderActorHandle, QueueError> {
        self.get_provider(provider_id).await?;
        self.controller.get_provider(provider_id).await
    }

    /// Register a holder with a provider and return the new entry.
    pub async fn register(
        &self,
        provider_id: ProviderId,
        request: &RegisterRequest,
    ) -> Result<Entry, QueueError> {
        let new_entry = allocator::prepare(provider_id, request)?;
        self.actor(provider_id).await?.register(new_entry).await
    }

    /// Advance the provider's queue. `Ok(None)` when nobody is waiting.
    pub async fn call_next(
        &self,
        provider_id: ProviderId,
        request: CallNextRequest,
    ) -> Result<Option<Entry>, QueueError> {
        request.validate().map_err(QueueError::Validation)?;
        self.actor(provider_id)
            .await?
            .call_next(request.request_id)
            .await
    }

    /// Entries of a provider ordered by token number.
    pub async fn list_entries(&self, provider_id: ProviderId) -> Result<Vec<Entry>, QueueError> {
        self.get_provider(provider_id).await?;
        with_deadline(
            self.store_timeout,
            "list_entries",
            self.store.list_entries(provider_id),
        )
        .await
    }

    /// Set the provider's online flag.
    pub async fn set_online(
        &self,
        provider_id: ProviderId,
        online: bool,
    ) -> Result<Provider, QueueError> {
        self.actor(provider_id).await?.set_online(online).await
    }

    /// Take the provider offline and delete its queue.
    pub async fn end_session(
        &self,
        provider_id: ProviderId,
    ) -> Result<EndSessionOutcome, QueueError> {
        self.actor(provider_id).await?.end_session().await
    }

    /// Send a ring signal to the provider's connected displays.
    ///
    /// Succeeds even when no display is listening; the signal is then lost.
    #[instrument(skip_all, name = "queue.services.ring", fields(provider_id = %provider_id))]
    pub async fn ring(&self, provider_id: ProviderId) -> Result<usize, QueueError> {
        self.get_provider(provider_id).await?;

        let receivers = self
            .bus
            .publish_ring(RingSignal {
                provider_id,
                sent_at: Utc::now(),
            })
            .await;
        metrics::record_ring_signal(receivers);

        info!(
            target: "queue.services",
            provider_id = %provider_id,
            receivers = receivers,
            "Ring signal sent"
        );
        Ok(receivers)
    }

    /// Change events of one provider, from now on.
    pub async fn subscribe_changes(
        &self,
        provider_id: ProviderId,
    ) -> Result<Subscription<ChangeEvent>, QueueError> {
        self.get_provider(provider_id).await?;
        Ok(self.bus.subscribe_changes(provider_id))
    }

    /// Ring signals of one provider, from now on.
    pub async fn subscribe_ring(
        &self,
        provider_id: ProviderId,
    ) -> Result<Subscription<RingSignal>, QueueError> {
        self.get_provider(provider_id).await?;
        Ok(self.bus.subscribe_ring(provider_id).await)
    }

    /// Presence updates of one provider, from now on.
    pub async fn subscribe_presence(
        &self,
        provider_id: ProviderId,
    ) -> Result<Subscription<ProviderPresence>, QueueError> {
        self.get_provider(provider_id).await?;
        Ok(self.bus.subscribe_presence(provider_id).await)
    }

    /// Reconciled view of who the provider is serving.
    pub async fn now_serving(
        &self,
        provider_id: ProviderId,
    ) -> Result<impl Stream<Item = NowServing> + Send + 'static, QueueError> {
        self.get_provider(provider_id).await?;
        Ok(watch::now_serving(
            Arc::clone(&self.store),
            &self.bus,
            provider_id,
            self.reconcile_interval,
            self.store_timeout,
            self.shutdown_token(),
        ))
    }

    /// Check store connectivity.
    pub async fn ping_store(&self) -> Result<(), QueueError> {
        with_deadline(self.store_timeout, "ping", self.store.ping()).await
    }

    /// Controller status (actor count, draining flag).
    pub async fn status(&self) -> Result<ControllerStatus, QueueError> {
        self.controller.get_status().await
    }
}
