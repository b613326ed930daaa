//! `ProviderActor` - single writer for one provider's queue.
//!
//! Every mutation of a provider (register, call-next, set-online,
//! end-session) goes through this actor's mailbox and is handled to
//! completion, including publishing its change events, before the next
//! message is taken. Different providers run on independent actors.
//!
//! # Call-next replay
//!
//! `CallNext` advances the queue every time it runs. Clients that retry
//! automatically attach a `request_id`; the actor remembers the outcome of the
//! last few IDs and answers a repeat from memory instead of advancing again.

use crate::errors::QueueError;
use crate::models::{EndSessionOutcome, Entry, NewEntry, Provider};
use crate::notifications::NotificationBus;
use crate::observability::metrics as prom;
use crate::repositories::QueueStore;
use crate::services::{allocator, scheduler, session};

use super::messages::ProviderMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::ProviderId;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Default channel buffer size for the provider mailbox.
const PROVIDER_CHANNEL_BUFFER: usize = 256;

/// Dependencies shared by every provider actor.
#[derive(Clone)]
pub struct ProviderContext {
    pub store: Arc<dyn QueueStore>,
    pub bus: NotificationBus,
    /// Deadline for each store operation.
    pub store_timeout: Duration,
    /// Number of `CallNext` request IDs remembered.
    pub replay_window: usize,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `ProviderActor`.
#[derive(Debug, Clone)]
pub struct ProviderActorHandle {
    sender: mpsc::Sender<ProviderMessage>,
    cancel_token: CancellationToken,
    provider_id: ProviderId,
    mailbox: Arc<MailboxMonitor>,
}

impl ProviderActorHandle {
    /// Get the provider ID.
    #[must_use]
    pub fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    /// Messages sent to the actor and not yet picked up.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, QueueError>>) -> ProviderMessage,
    ) -> Result<T, QueueError> {
        let (tx, rx) = oneshot::channel();
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|e| QueueError::Internal(format!("channel send failed: {e}")))?;
        self.mailbox.record_enqueue();
        permit.send(build(tx));

        rx.await
            .map_err(|e| QueueError::Internal(format!("response receive failed: {e}")))?
    }

    /// Register a validated entry.
    pub async fn register(&self, new_entry: NewEntry) -> Result<Entry, QueueError> {
        self.request(|respond_to| ProviderMessage::Register {
            new_entry,
            respond_to,
        })
        .await
    }

    /// Call the next waiting entry. `Ok(None)` when the queue is empty.
    pub async fn call_next(&self, request_id: Option<String>) -> Result<Option<Entry>, QueueError> {
        self.request(|respond_to| ProviderMessage::CallNext {
            request_id,
            respond_to,
        })
        .await
    }

    /// Set the online flag.
    pub async fn set_online(&self, online: bool) -> Result<Provider, QueueError> {
        self.request(|respond_to| ProviderMessage::SetOnline { online, respond_to })
            .await
    }

    /// End the provider's session.
    pub async fn end_session(&self) -> Result<EndSessionOutcome, QueueError> {
        self.request(|respond_to| ProviderMessage::EndSession { respond_to })
            .await
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ProviderActor` implementation.
pub struct ProviderActor {
    provider_id: ProviderId,
    receiver: mpsc::Receiver<ProviderMessage>,
    cancel_token: CancellationToken,
    ctx: ProviderContext,
    /// Recent `CallNext` outcomes by request ID, oldest first.
    replay: VecDeque<(String, Option<Entry>)>,
    mailbox: Arc<MailboxMonitor>,
}

impl ProviderActor {
    /// Spawn a provider actor and return its handle and task handle.
    pub fn spawn(
        provider_id: ProviderId,
        cancel_token: CancellationToken,
        ctx: ProviderContext,
    ) -> (ProviderActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(PROVIDER_CHANNEL_BUFFER);
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Provider,
            provider_id.to_string(),
        ));

        let actor = Self {
            provider_id,
            receiver,
            cancel_token: cancel_token.clone(),
            replay: VecDeque::with_capacity(ctx.replay_window),
            mailbox: Arc::clone(&mailbox),
            ctx,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ProviderActorHandle {
            sender,
            cancel_token,
            provider_id,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "queue.actor.provider", fields(provider_id = %self.provider_id))]
    async fn run(mut self) {
        debug!(
            target: "queue.actor.provider",
            provider_id = %self.provider_id,
            "ProviderActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "queue.actor.provider",
                        provider_id = %self.provider_id,
                        "ProviderActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue();
                            self.handle_message(message).await;
                            self.ctx.metrics.record_message_processed();
                        }
                        None => break,
                    }
                }
            }
        }

        debug!(
            target: "queue.actor.provider",
            provider_id = %self.provider_id,
            messages_processed = self.mailbox.messages_processed(),
            "ProviderActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ProviderMessage) {
        let store = Arc::clone(&self.ctx.store);
        let deadline = self.ctx.store_timeout;

        match message {
            ProviderMessage::Register {
                new_entry,
                respond_to,
            } => {
                let result = allocator::register(store.as_ref(), deadline, &new_entry).await;
                let _ = respond_to.send(result);
            }

            ProviderMessage::CallNext {
                request_id,
                respond_to,
            } => {
                let result = self.call_next(request_id).await;
                let _ = respond_to.send(result);
            }

            ProviderMessage::SetOnline { online, respond_to } => {
                let result =
                    session::set_online(store.as_ref(), &self.ctx.bus, deadline, self.provider_id, online)
                        .await;
                let _ = respond_to.send(result);
            }

            ProviderMessage::EndSession { respond_to } => {
                let result =
                    session::end_session(store.as_ref(), &self.ctx.bus, deadline, self.provider_id)
                        .await;
                if result.is_ok() {
                    // Token numbers restart, so remembered outcomes are stale.
                    self.replay.clear();
                }
                let _ = respond_to.send(result);
            }
        }
    }

    async fn call_next(&mut self, request_id: Option<String>) -> Result<Option<Entry>, QueueError> {
        if let Some(id) = &request_id {
            if let Some((_, outcome)) = self.replay.iter().find(|(seen, _)| seen == id) {
                self.ctx.metrics.record_call_next_replay();
                prom::record_call_next("replayed", Duration::ZERO);
                info!(
                    target: "queue.actor.provider",
                    provider_id = %self.provider_id,
                    request_id = %id,
                    "Replaying recorded call-next outcome"
                );
                return Ok(outcome.clone());
            }
        }

        let advance = scheduler::call_next(
            self.ctx.store.as_ref(),
            &self.ctx.bus,
            self.ctx.store_timeout,
            self.provider_id,
        )
        .await?;

        if let Some(id) = request_id {
            self.remember(id, advance.called.clone());
        }

        Ok(advance.called)
    }

    fn remember(&mut self, request_id: String, outcome: Option<Entry>) {
        if self.ctx.replay_window == 0 {
            return;
        }
        while self.replay.len() >= self.ctx.replay_window {
            self.replay.pop_front();
        }
        self.replay.push_back((request_id, outcome));
    }
}
