//! Process-local publish/subscribe for state-change notifications.

use capstan_domain::StateEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Predicate deciding whether a subscription receives an event.
pub type EventFilter = Box<dyn Fn(&StateEvent) -> bool + Send + Sync>;

struct SubscriptionShared {
    queue: Mutex<VecDeque<StateEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
    capacity: usize,
}

impl SubscriptionShared {
    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<StateEvent>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Enqueues one event, dropping the oldest queued event when full so the
    /// publisher never blocks.
    fn push(&self, event: StateEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let mut queue = self.lock_queue();
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<StateEvent> {
        self.lock_queue().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

struct SubscriberEntry {
    filter: Option<EventFilter>,
    shared: Arc<SubscriptionShared>,
}

struct BusInner {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    shutdown: AtomicBool,
    capacity: usize,
}

impl BusInner {
    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<SubscriberEntry>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Process-local, single-topic event bus.
///
/// Every subscription owns a bounded FIFO queue. Publishing never blocks:
/// when a queue is full the oldest queued event for that subscription is
/// dropped and counted. There is no replay and no cross-subscription
/// ordering.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus with the default per-subscription queue capacity (256).
    #[must_use]
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates a bus with a custom per-subscription queue capacity.
    #[must_use]
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Registers a subscription receiving every published event.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.subscribe_inner(None)
    }

    /// Registers a subscription receiving events accepted by `filter`.
    #[must_use]
    pub fn subscribe_filtered(&self, filter: EventFilter) -> Subscription {
        self.subscribe_inner(Some(filter))
    }

    fn subscribe_inner(&self, filter: Option<EventFilter>) -> Subscription {
        let shared = Arc::new(SubscriptionShared {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(self.inner.shutdown.load(Ordering::Acquire)),
            capacity: self.inner.capacity,
        });

        self.inner.lock_subscribers().push(SubscriberEntry {
            filter,
            shared: Arc::clone(&shared),
        });

        Subscription { shared }
    }

    /// Fans one event out to every matching subscription. Non-blocking; a
    /// no-op after [`EventBus::shutdown`].
    pub fn publish(&self, event: StateEvent) {
        if self.inner.shutdown.load(Ordering::Acquire) {
            tracing::debug!(
                event_type = event.event_type(),
                "event bus is shut down; discarding publish"
            );
            return;
        }

        let mut subscribers = self.inner.lock_subscribers();
        subscribers.retain(|entry| !entry.shared.closed.load(Ordering::Acquire));

        for entry in subscribers.iter() {
            if entry
                .filter
                .as_ref()
                .is_none_or(|filter| filter(&event))
            {
                entry.shared.push(event.clone());
            }
        }
    }

    /// Removes one subscription and closes its queue.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Closes every subscription and rejects further publishes.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        let mut subscribers = self.inner.lock_subscribers();
        for entry in subscribers.drain(..) {
            entry.shared.close();
        }
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.lock_subscribers();
        subscribers.retain(|entry| !entry.shared.closed.load(Ordering::Acquire));
        subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One active bus listener with a bounded inbound queue.
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
}

impl Subscription {
    /// Receives the next event in FIFO order, waiting if the queue is empty.
    /// Returns `None` once the subscription is closed and drained.
    pub async fn recv(&mut self) -> Option<StateEvent> {
        loop {
            let notified = self.shared.notify.notified();

            if let Some(event) = self.shared.pop() {
                return Some(event);
            }

            if self.shared.closed.load(Ordering::Acquire) {
                return self.shared.pop();
            }

            notified.await;
        }
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<StateEvent> {
        self.shared.pop()
    }

    /// Returns how many events were dropped from this subscription's queue.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Returns whether the subscription has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.close();
    }
}

#[cfg(test)]
mod tests {
    use super::EventBus;
    use capstan_domain::StateEvent;
    use serde_json::json;

    fn event(label: &str) -> StateEvent {
        StateEvent::RepositoryUpdated(json!({ "label": label }))
    }

    #[tokio::test]
    async fn delivers_events_in_publish_order() {
        let bus = EventBus::new();
        let mut subscription = bus.subscribe();

        bus.publish(event("first"));
        bus.publish(event("second"));
        bus.publish(event("third"));

        for expected in ["first", "second", "third"] {
            let received = subscription.recv().await;
            assert!(received.is_some());
            let received = received.unwrap_or_else(|| unreachable!());
            assert_eq!(received.data()["label"], expected);
        }
    }

    #[tokio::test]
    async fn drops_oldest_event_when_queue_is_full() {
        let bus = EventBus::with_queue_capacity(2);
        let mut subscription = bus.subscribe();

        bus.publish(event("a"));
        bus.publish(event("b"));
        bus.publish(event("c"));

        let first = subscription.recv().await;
        let second = subscription.recv().await;
        assert!(first.is_some() && second.is_some());
        assert_eq!(
            first.unwrap_or_else(|| unreachable!()).data()["label"],
            "b"
        );
        assert_eq!(
            second.unwrap_or_else(|| unreachable!()).data()["label"],
            "c"
        );
        assert_eq!(subscription.dropped(), 1);
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn filters_limit_delivery() {
        let bus = EventBus::new();
        let mut runs_only = bus.subscribe_filtered(Box::new(StateEvent::is_run_event));

        bus.publish(event("ignored"));
        bus.publish(StateEvent::WorkflowRunPending(json!({ "id": "run-1" })));

        let received = runs_only.recv().await;
        assert!(received.is_some());
        assert_eq!(
            received.unwrap_or_else(|| unreachable!()).event_type(),
            "workflow.run.pending"
        );
        assert!(runs_only.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropped_subscriptions_stop_counting_as_subscribers() {
        let bus = EventBus::new();
        let subscription = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.unsubscribe(subscription);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_subscriptions_and_rejects_publishes() {
        let bus = EventBus::new();
        let mut subscription = bus.subscribe();

        bus.publish(event("before"));
        bus.shutdown();
        bus.publish(event("after"));

        let drained = subscription.recv().await;
        assert!(drained.is_some());
        assert_eq!(
            drained.unwrap_or_else(|| unreachable!()).data()["label"],
            "before"
        );
        assert!(subscription.recv().await.is_none());
        assert!(subscription.is_closed());
    }
}
