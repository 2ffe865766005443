use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use super::event_types::{EventKind, StreamEvent};
use crate::types::{AgentTip, ChatMessage, TrainingMetrics};

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: u64,
    handler: Handler<T>,
}

type SlotList<T> = Mutex<Vec<Slot<T>>>;

fn lock<T>(slots: &SlotList<T>) -> MutexGuard<'_, Vec<Slot<T>>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ordered subscriber list for a single event kind.
pub struct Topic<T> {
    kind: EventKind,
    slots: Arc<SlotList<T>>,
    next_id: AtomicU64,
}

impl<T: 'static> Topic<T> {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            slots: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a handler. It runs after every handler subscribed before it.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.slots).push(Slot {
            id,
            handler: Arc::new(handler),
        });

        let weak: Weak<SlotList<T>> = Arc::downgrade(&self.slots);
        Subscription::new(move || {
            if let Some(slots) = weak.upgrade() {
                lock(&slots).retain(|slot| slot.id != id);
            }
        })
    }

    /// Deliver `payload` to every current subscriber, in subscription order.
    ///
    /// The subscriber list is snapshotted first, so handlers may subscribe or
    /// unsubscribe (themselves or others) without skewing this pass. A
    /// panicking handler is logged and the remaining handlers still run.
    /// Returns the number of handlers that completed normally.
    pub fn publish(&self, payload: &T) -> usize {
        let snapshot: Vec<Handler<T>> = lock(&self.slots)
            .iter()
            .map(|slot| slot.handler.clone())
            .collect();

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!("{} subscriber panicked: {reason}", self.kind);
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// Handle returned by every subscribe call.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
/// Repeated calls are no-ops.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn unsubscribe(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// One topic per event kind. Shared by the live connections, the demo
/// generator and the stream client facade.
pub struct EventBus {
    metrics: Topic<TrainingMetrics>,
    tips: Topic<AgentTip>,
    chat: Topic<ChatMessage>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            metrics: Topic::new(EventKind::Metrics),
            tips: Topic::new(EventKind::Tip),
            chat: Topic::new(EventKind::Chat),
        }
    }

    pub fn on_metrics<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TrainingMetrics) + Send + Sync + 'static,
    {
        self.metrics.subscribe(handler)
    }

    pub fn on_tip<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&AgentTip) + Send + Sync + 'static,
    {
        self.tips.subscribe(handler)
    }

    pub fn on_chat<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.chat.subscribe(handler)
    }

    /// Route an event to the topic of its kind.
    pub fn publish(&self, event: &StreamEvent) -> usize {
        tracing::trace!("publishing {} event", event.kind());
        match event {
            StreamEvent::Metrics(metrics) => self.metrics.publish(metrics),
            StreamEvent::Tip(tip) => self.tips.publish(tip),
            StreamEvent::Chat(message) => self.chat.publish(message),
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Metrics => self.metrics.subscriber_count(),
            EventKind::Tip => self.tips.subscriber_count(),
            EventKind::Chat => self.chat.subscriber_count(),
        }
    }
}
