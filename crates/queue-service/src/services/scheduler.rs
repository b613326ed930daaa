//! The call-next transition.
//!
//! One store transaction closes out the called entry and promotes the lowest
//! waiting token. Change events are published only after the commit, finished
//! entry first, so subscribers observe transitions in commit order.
//!
//! A store error leaves the queue unchanged. An elapsed deadline does not:
//! the commit may already have reached the store, in which case the
//! transition stands but no event is published. Now-serving watchers pick it
//! up on their next reconciling read.

use crate::errors::QueueError;
use crate::models::{Advance, ChangeEvent};
use crate::notifications::NotificationBus;
use crate::observability::metrics;
use crate::repositories::QueueStore;
use common::types::ProviderId;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Advance a provider's queue by one.
#[instrument(skip_all, name = "queue.services.scheduler", fields(provider_id = %provider_id))]
pub async fn call_next(
    store: &dyn QueueStore,
    bus: &NotificationBus,
    deadline: Duration,
    provider_id: ProviderId,
) -> Result<Advance, QueueError> {
    let start = Instant::now();

    let advance = match tokio::time::timeout(deadline, store.advance(provider_id)).await {
        Ok(Ok(advance)) => advance,
        Ok(Err(e)) => {
            metrics::record_call_next("error", start.elapsed());
            warn!(
                target: "queue.services.scheduler",
                provider_id = %provider_id,
                error = %e,
                "Call next failed, queue unchanged"
            );
            return Err(e);
        }
        Err(_) => {
            metrics::record_call_next("timeout", start.elapsed());
            warn!(
                target: "queue.services.scheduler",
                provider_id = %provider_id,
                deadline_ms = deadline.as_millis() as u64,
                "Call next timed out, outcome unknown"
            );
            return Err(QueueError::Store(format!(
                "advance timed out after {}ms",
                deadline.as_millis()
            )));
        }
    };

    if let Some(finished) = &advance.finished {
        debug!(
            target: "queue.services.scheduler",
            provider_id = %provider_id,
            token_number = finished.token_number,
            "Entry done"
        );
        bus.publish_change(ChangeEvent::status_changed(finished.clone()));
    }

    match &advance.called {
        Some(called) => {
            metrics::record_call_next("called", start.elapsed());
            info!(
                target: "queue.services.scheduler",
                provider_id = %provider_id,
                entry_id = %called.id,
                token_number = called.token_number,
                "Entry called"
            );
            bus.publish_change(ChangeEvent::status_changed(called.clone()));
        }
        None => {
            metrics::record_call_next("empty", start.elapsed());
            info!(
                target: "queue.services.scheduler",
                provider_id = %provider_id,
                "No waiting entries"
            );
        }
    }

    Ok(advance)
}
