use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error};

use crate::error::{EventError, Result};
use crate::types::{EventHandler, EventKind, Notification, Subscription, SubscriptionId};

/// In-process publish/subscribe registry for scheduler notifications.
///
/// Delivery is synchronous and ordered: handlers for a kind are called one
/// after another, by priority and then subscription order, on the emitting
/// task. Share one bus per scheduler (pass as `Arc<EventBus>`).
pub struct EventBus {
    /// Sorted by priority ascending after every subscription.
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Register a subscription. Re-sorts so priority order is always correct.
    pub fn subscribe(&self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.id;
        let kind = subscription.kind.clone();
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subs.push(subscription);
        // Stable sort preserves subscription order within the same priority.
        subs.sort_by_key(|s| s.priority);
        debug!(%kind, subscription = %id, "subscriber registered");
        id
    }

    /// Subscribe a closure or handler to `kind` at default priority.
    pub fn on<H>(&self, kind: EventKind, handler: H) -> SubscriptionId
    where
        H: EventHandler + 'static,
    {
        self.subscribe(Subscription::new(kind, Arc::new(handler)))
    }

    /// Remove a subscription. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() < before;
        if removed {
            debug!(subscription = %id, "subscriber removed");
        }
        removed
    }

    pub fn subscriber_count(&self, kind: &EventKind) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| &s.kind == kind)
            .count()
    }

    /// Deliver `notification` to every handler subscribed to its kind.
    ///
    /// Handlers are snapshotted before delivery, so a handler may subscribe,
    /// unsubscribe or emit without deadlocking. A panicking handler is
    /// isolated: the rest still run and the panic is reported as an error.
    /// Returns the number of handlers that completed normally.
    pub fn emit(&self, notification: &Notification) -> Result<usize> {
        let kind = notification.kind();
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subs = self
                .subscriptions
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            subs.iter()
                .filter(|s| s.kind == kind)
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        let mut delivered = 0;
        let mut failed = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(notification))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    error!(%kind, "subscriber panicked; continuing delivery");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(EventError::SubscriberPanicked {
                kind: kind.to_string(),
                failed,
            });
        }
        Ok(delivered)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
