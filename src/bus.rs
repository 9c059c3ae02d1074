//! In-process event bus.
//!
//! Handlers are keyed by payload type.  Each subscription names where it is
//! delivered:
//!
//! | Delivery                      | Runs on                                  |
//! |-------------------------------|------------------------------------------|
//! | `Delivery::Caller`            | the publishing thread, before `publish` returns |
//! | `Delivery::On(Thread::Background)` | the background worker, FIFO          |
//! | `Delivery::On(Thread::Ui)`    | the presentation thread at its next `poll` |
//!
//! Published values are wrapped in one `Arc` and handed out as `&T`; no
//! subscriber can mutate what another sees.  Publishes made in sequence by a
//! single handler reach subscribers on the same context in that sequence.

use log::debug;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::scheduler::{TaskRunner, Thread};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Caller,
    On(Thread),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    delivery: Delivery,
    handler: Handler,
}

pub struct EventBus {
    runner: Arc<TaskRunner>,
    subscribers: RwLock<HashMap<TypeId, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        Self {
            runner,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<T, F>(&self, delivery: Delivery, handler: F) -> SubscriptionId
    where
        T: Any + Send + Sync,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |value: &dyn Any| {
            if let Some(v) = value.downcast_ref::<T>() {
                handler(v);
            }
        });
        self.subscribers
            .write()
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Subscription {
                id,
                delivery,
                handler,
            });
        debug!(
            "Subscribed {:?} to {} ({:?})",
            id,
            std::any::type_name::<T>(),
            delivery
        );
        id
    }

    /// Returns `false` if the id was not (or no longer) registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write();
        let mut removed = false;
        for list in subs.values_mut() {
            let before = list.len();
            list.retain(|s| s.id != id);
            removed |= list.len() != before;
        }
        subs.retain(|_, list| !list.is_empty());
        removed
    }

    pub fn subscriber_count<T: Any>(&self) -> usize {
        self.subscribers
            .read()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }

    pub fn publish<T>(&self, value: T)
    where
        T: Any + Send + Sync,
    {
        // Snapshot the handler list so no lock is held while handlers run;
        // a handler may itself publish or (un)subscribe.
        let targets: Vec<(Delivery, Handler)> = match self.subscribers.read().get(&TypeId::of::<T>()) {
            Some(list) => list
                .iter()
                .map(|s| (s.delivery, s.handler.clone()))
                .collect(),
            None => return,
        };

        let value = Arc::new(value);
        for (delivery, handler) in targets {
            match delivery {
                Delivery::Caller => handler(&*value as &dyn Any),
                Delivery::On(thread) => {
                    let value = value.clone();
                    self.runner
                        .run_on(thread, move || handler(&*value as &dyn Any));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(TaskRunner::new().unwrap()))
    }

    #[tokio::test(start_paused = true)]
    async fn caller_delivery_is_synchronous() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe::<u32, _>(Delivery::Caller, move |v| s.lock().push(*v));

        bus.publish(7u32);
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn payload_types_are_isolated() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe::<String, _>(Delivery::Caller, move |v| s.lock().push(v.clone()));

        bus.publish(1u64);
        bus.publish("hello".to_string());
        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn background_delivery_preserves_publish_order() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        bus.subscribe::<u32, _>(Delivery::On(Thread::Background), move |v| s.lock().push(*v));

        for i in 0..10u32 {
            bus.publish(i);
        }
        assert!(seen.lock().is_empty());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn ui_delivery_waits_for_poll() {
        let runner = Arc::new(TaskRunner::new().unwrap());
        let bus = EventBus::new(runner.clone());
        let seen = Arc::new(Mutex::new(0u32));
        let s = seen.clone();
        bus.subscribe::<u32, _>(Delivery::On(Thread::Ui), move |v| *s.lock() += *v);

        bus.publish(3u32);
        bus.publish(4u32);
        assert_eq!(*seen.lock(), 0);
        assert_eq!(runner.poll(), 2);
        assert_eq!(*seen.lock(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_delivery() {
        let bus = bus();
        let seen = Arc::new(Mutex::new(0));
        let s = seen.clone();
        let id = bus.subscribe::<u8, _>(Delivery::Caller, move |_| *s.lock() += 1);
        assert_eq!(bus.subscriber_count::<u8>(), 1);

        bus.publish(1u8);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(1u8);

        assert_eq!(*seen.lock(), 1);
        assert_eq!(bus.subscriber_count::<u8>(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handler_may_publish_reentrantly() {
        let bus = Arc::new(bus());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&bus);
        bus.subscribe::<u32, _>(Delivery::Caller, move |v| {
            if let Some(bus) = weak.upgrade() {
                bus.publish(format!("got {v}"));
            }
        });
        let s = seen.clone();
        bus.subscribe::<String, _>(Delivery::Caller, move |v| s.lock().push(v.clone()));

        bus.publish(5u32);
        assert_eq!(*seen.lock(), vec!["got 5".to_string()]);
    }
}
