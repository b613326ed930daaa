//! `QueueControllerActor` - singleton supervisor for provider actors.
//!
//! - Singleton per service instance
//! - Spawns one `ProviderActor` per provider on first use
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`); a
//!   provider whose actor died gets a fresh one on the next request
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the controller:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all children)
//! 3. Waits for provider actors to finish their current message

use crate::errors::QueueError;
use crate::observability::metrics as prom;

use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::provider::{ProviderActor, ProviderActorHandle, ProviderContext};

use common::types::ProviderId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Time allowed for a provider actor to finish during shutdown.
const PROVIDER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the `QueueControllerActor`.
#[derive(Clone)]
pub struct QueueControllerActorHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl QueueControllerActorHandle {
    /// Create a new `QueueControllerActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(instance_id: String, ctx: ProviderContext) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let mailbox = Arc::new(MailboxMonitor::new(ActorType::Controller, &instance_id));

        let actor = QueueControllerActor::new(
            instance_id,
            receiver,
            cancel_token.clone(),
            ctx,
            Arc::clone(&mailbox),
        );
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            mailbox,
        }
    }

    async fn send(&self, message: ControllerMessage) -> Result<(), QueueError> {
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|e| QueueError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        permit.send(message);
        Ok(())
    }

    /// Get the actor owning `provider_id`, spawning it if needed.
    pub async fn get_provider(
        &self,
        provider_id: ProviderId,
    ) -> Result<ProviderActorHandle, QueueError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(ControllerMessage::GetProvider {
            provider_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| QueueError::Internal(format!("response receive failed: {e}")))?
    }

    /// Get the current controller status.
    pub async fn get_status(&self) -> Result<ControllerStatus, QueueError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(ControllerMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| QueueError::Internal(format!("response receive failed: {e}")))
    }

    /// Initiate graceful shutdown.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(ControllerMessage::Shutdown { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| QueueError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that must stop with the actor tree.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

struct ManagedProvider {
    handle: ProviderActorHandle,
    task_handle: JoinHandle<()>,
}

/// The `QueueControllerActor` implementation.
pub struct QueueControllerActor {
    instance_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    cancel_token: CancellationToken,
    providers: HashMap<ProviderId, ManagedProvider>,
    accepting_new: bool,
    ctx: ProviderContext,
    mailbox: Arc<MailboxMonitor>,
}

impl QueueControllerActor {
    fn new(
        instance_id: String,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        ctx: ProviderContext,
        mailbox: Arc<MailboxMonitor>,
    ) -> Self {
        Self {
            instance_id,
            receiver,
            cancel_token,
            providers: HashMap::new(),
            accepting_new: true,
            ctx,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "queue.actor.controller", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "queue.actor.controller",
            instance_id = %self.instance_id,
            "QueueControllerActor started"
        );

        loop {
            self.check_provider_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "queue.actor.controller",
                        instance_id = %self.instance_id,
                        "QueueControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            self.handle_message(message);
                            self.ctx.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "queue.actor.controller",
                                instance_id = %self.instance_id,
                                "QueueControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "queue.actor.controller",
            instance_id = %self.instance_id,
            providers_remaining = self.providers.len(),
            messages_processed = self.mailbox.messages_processed(),
            "QueueControllerActor stopped"
        );
    }

    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::GetProvider {
                provider_id,
                respond_to,
            } => {
                let result = self.get_or_spawn(provider_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown { respond_to } => {
                info!(
                    target: "queue.actor.controller",
                    instance_id = %self.instance_id,
                    provider_count = self.providers.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn get_or_spawn(&mut self, provider_id: ProviderId) -> Result<ProviderActorHandle, QueueError> {
        if let Some(managed) = self.providers.get(&provider_id) {
            return Ok(managed.handle.clone());
        }

        if !self.accepting_new {
            return Err(QueueError::Internal("Service is shutting down".to_string()));
        }

        let (handle, task_handle) = ProviderActor::spawn(
            provider_id,
            self.cancel_token.child_token(),
            self.ctx.clone(),
        );
        self.providers.insert(
            provider_id,
            ManagedProvider {
                handle: handle.clone(),
                task_handle,
            },
        );

        self.ctx.metrics.provider_started();
        prom::set_provider_actors(self.providers.len());

        debug!(
            target: "queue.actor.controller",
            instance_id = %self.instance_id,
            provider_id = %provider_id,
            total_providers = self.providers.len(),
            "Provider actor spawned"
        );

        Ok(handle)
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            provider_count: self.providers.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.providers.values() {
            managed.handle.cancel();
        }

        for (provider_id, managed) in self.providers.drain() {
            match tokio::time::timeout(PROVIDER_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "queue.actor.controller",
                        instance_id = %self.instance_id,
                        provider_id = %provider_id,
                        error = ?e,
                        "Provider actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "queue.actor.controller",
                        instance_id = %self.instance_id,
                        provider_id = %provider_id,
                        "Provider actor shutdown timed out"
                    );
                }
            }
            self.ctx.metrics.provider_stopped();
        }
        prom::set_provider_actors(0);

        info!(
            target: "queue.actor.controller",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop provider actors whose task has ended so they are respawned on demand.
    async fn check_provider_health(&mut self) {
        let finished: Vec<ProviderId> = self
            .providers
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(provider_id, _)| *provider_id)
            .collect();

        for provider_id in finished {
            let Some(managed) = self.providers.remove(&provider_id) else {
                continue;
            };

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "queue.actor.controller",
                        instance_id = %self.instance_id,
                        provider_id = %provider_id,
                        "Provider actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "queue.actor.controller",
                            instance_id = %self.instance_id,
                            provider_id = %provider_id,
                            error = ?join_error,
                            "Provider actor panicked, will respawn on next request"
                        );
                        self.ctx.metrics.record_panic(ActorType::Provider);
                        prom::record_actor_panic(ActorType::Provider.as_str());
                    }
                }
            }

            self.ctx.metrics.provider_stopped();
            prom::set_provider_actors(self.providers.len());
        }
    }
}
