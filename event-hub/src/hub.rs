//! The publish/subscribe registry.
//!
//! `EventHub` keeps a map of live subscribers, each with an interest filter
//! and a bounded mailbox. Publishing never blocks and never fails: a
//! subscriber whose mailbox is full under [`Overflow::Disconnect`] is closed
//! and removed, and everyone else keeps receiving events.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{HubError, Result};
use crate::event::Event;
use crate::mailbox::{Delivery, Mailbox, Overflow};
use crate::topic::Topic;

/// Default mailbox capacity for [`EventHub::subscribe`].
pub const DEFAULT_CAPACITY: usize = 32;

/// Identifies one registration within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Registration {
    filter: HashSet<Topic>,
    mailbox: Arc<Mailbox>,
}

struct Registry {
    subscribers: Mutex<HashMap<SubscriberId, Registration>>,
    next_id: AtomicU64,
    default_capacity: usize,
}

impl Registry {
    fn remove(&self, id: SubscriberId) -> bool {
        match self.subscribers.lock().remove(&id) {
            Some(registration) => {
                registration.mailbox.close();
                true
            }
            None => false,
        }
    }
}

/// In-process publish/subscribe hub.
///
/// `EventHub` is a cheap handle; clones share the same registry. Construct
/// one per concern at process start and pass it to the components that need
/// it.
///
/// # Example
///
/// ```
/// use event_hub::{EventHub, Topic};
///
/// let hub = EventHub::new();
/// let mut subscription = hub.subscribe([Topic::ApiReady]);
///
/// assert_eq!(hub.publish(Topic::ApiReady), 1);
/// assert_eq!(hub.publish(Topic::ApiDown), 0);
/// assert_eq!(subscription.try_recv().unwrap().topic, Topic::ApiReady);
/// ```
#[derive(Clone)]
pub struct EventHub {
    registry: Arc<Registry>,
}

impl EventHub {
    /// Create a hub whose default mailbox capacity is [`DEFAULT_CAPACITY`].
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a hub with a custom default mailbox capacity.
    pub fn with_capacity(default_capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                default_capacity: default_capacity.max(1),
            }),
        }
    }

    /// Publish a payload-less event.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, topic: Topic) -> usize {
        self.publish_event(Event::new(topic))
    }

    /// Deliver `event` to every live subscriber whose filter contains its
    /// topic.
    ///
    /// Never blocks. A full mailbox with [`Overflow::Disconnect`] gets the
    /// subscriber closed and removed from the registry.
    pub fn publish_event(&self, event: Event) -> usize {
        let mut subscribers = self.registry.subscribers.lock();
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, registration) in subscribers.iter() {
            if !registration.filter.contains(&event.topic) {
                continue;
            }
            match registration.mailbox.push(event.clone()) {
                Delivery::Queued | Delivery::Replaced => delivered += 1,
                Delivery::Full => {
                    tracing::warn!(
                        subscriber = %id,
                        topic = %event.topic,
                        "Subscriber queue full, dropping unresponsive subscriber"
                    );
                    dead.push(*id);
                }
                Delivery::Closed => dead.push(*id),
            }
        }

        for id in dead {
            if let Some(registration) = subscribers.remove(&id) {
                registration.mailbox.close();
            }
        }

        tracing::trace!(topic = %event.topic, delivered, "Published event");
        delivered
    }

    /// Subscribe with the hub's default capacity and [`Overflow::Disconnect`].
    pub fn subscribe(&self, filter: impl IntoIterator<Item = Topic>) -> Subscription {
        self.subscribe_with(filter, self.registry.default_capacity, Overflow::Disconnect)
    }

    /// Subscribe with a single-slot mailbox that always holds the most
    /// recent matching event.
    ///
    /// This is the debounced signal shape: many publishes before the
    /// subscriber looks collapse into one pending event, and the subscriber
    /// is never dropped for being slow.
    pub fn subscribe_latest(&self, filter: impl IntoIterator<Item = Topic>) -> Subscription {
        self.subscribe_with(filter, 1, Overflow::Overwrite)
    }

    /// Subscribe with an explicit capacity and overflow policy.
    ///
    /// An empty filter is legal; such a subscriber never receives anything.
    pub fn subscribe_with(
        &self,
        filter: impl IntoIterator<Item = Topic>,
        capacity: usize,
        overflow: Overflow,
    ) -> Subscription {
        let id = SubscriberId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        let filter: HashSet<Topic> = filter.into_iter().collect();
        let mailbox = Arc::new(Mailbox::new(capacity, overflow));

        tracing::debug!(subscriber = %id, topics = filter.len(), ?overflow, "Registered subscriber");

        self.registry.subscribers.lock().insert(
            id,
            Registration {
                filter,
                mailbox: mailbox.clone(),
            },
        );

        Subscription {
            id,
            mailbox,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscriber and close its mailbox.
    ///
    /// Returns `false` if it was not registered (already removed or never
    /// part of this hub).
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.registry.remove(id)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }

    /// Whether `id` is still registered.
    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.registry.subscribers.lock().contains_key(&id)
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .field("default_capacity", &self.registry.default_capacity)
            .finish()
    }
}

/// Error returned by [`Subscription::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing queued right now.
    Empty,
    /// Closed and empty.
    Closed,
}

/// A registered subscriber's receiving end.
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: SubscriberId,
    mailbox: Arc<Mailbox>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next matching event.
    ///
    /// Events queued before the hub closed this subscription are still
    /// returned; after that the result is `None`.
    pub async fn recv(&mut self) -> Option<Event> {
        self.mailbox.pop().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<Event, TryRecvError> {
        match self.mailbox.try_pop() {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(TryRecvError::Empty),
            Err(()) => Err(TryRecvError::Closed),
        }
    }

    /// Wait until an event with exactly `topic` arrives.
    ///
    /// Non-matching events received meanwhile are discarded.
    pub async fn wait_for(&mut self, topic: Topic) -> Result<Event> {
        loop {
            match self.mailbox.pop().await {
                Some(event) if event.topic == topic => return Ok(event),
                Some(event) => {
                    tracing::trace!(subscriber = %self.id, discarded = %event.topic, waiting_for = %topic, "Discarding event");
                }
                None => return Err(HubError::SubscriptionClosed),
            }
        }
    }

    /// Discard everything currently queued without waiting.
    ///
    /// Returns how many events were dropped.
    pub fn drain(&mut self) -> usize {
        self.mailbox.drain()
    }

    /// Number of queued events.
    pub fn len(&self) -> usize {
        self.mailbox.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the hub closed this subscription (queued events may remain).
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("queued", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
