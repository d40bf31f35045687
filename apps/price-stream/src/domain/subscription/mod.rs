//! Subscription Bookkeeping
//!
//! Pure state for the topic → subscribers mapping. No I/O happens here:
//! every mutation returns the wire-level change (SUBSCRIBE/UNSUBSCRIBE)
//! the caller must apply upstream.
//!
//! # Design
//!
//! The book tracks:
//! - One `TopicSubscription` per stock code with a live wire subscription
//! - The pending queue of subscribers registered before `CONNECTED`
//! - A subscriber id counter that survives `clear`
//!
//! Many consumers can watch the same stock while only one wire
//! subscription exists for it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::domain::price::{StockCode, StockPriceUpdate, price_destination};

// =============================================================================
// Types
// =============================================================================

/// Manager-assigned subscriber identifier.
pub type SubscriberId = u64;

/// Wire-level STOMP subscription identifier (`sub-<n>`).
pub type WireSubscriptionId = String;

/// Callback invoked with every price update of a topic.
pub type PriceCallback = Arc<dyn Fn(&StockPriceUpdate) + Send + Sync>;

/// One consumer's interest in a topic.
#[derive(Clone)]
pub struct SubscriberRecord {
    /// Subscriber id.
    pub id: SubscriberId,
    /// Update callback.
    pub callback: PriceCallback,
}

impl SubscriberRecord {
    /// Create a new record.
    #[must_use]
    pub fn new(id: SubscriberId, callback: PriceCallback) -> Self {
        Self { id, callback }
    }
}

impl fmt::Debug for SubscriberRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRecord")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Wire-level change produced by the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireChange {
    /// Send a SUBSCRIBE frame.
    Subscribe {
        /// Topic key.
        topic: StockCode,
        /// STOMP destination.
        destination: String,
        /// Fresh wire subscription id.
        subscription_id: WireSubscriptionId,
    },
    /// Send an UNSUBSCRIBE frame.
    Unsubscribe {
        /// Topic key.
        topic: StockCode,
        /// Wire subscription id being released.
        subscription_id: WireSubscriptionId,
    },
}

/// Result of removing a subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    /// Whether a record was actually removed.
    pub removed: bool,
    /// Upstream change, if the topic lost its last subscriber.
    pub change: Option<WireChange>,
}

/// A topic with a live wire subscription.
#[derive(Debug)]
struct TopicSubscription {
    subscription_id: WireSubscriptionId,
    /// Registration order is dispatch order.
    subscribers: Vec<SubscriberRecord>,
}

/// Subscribers waiting for the connection, grouped by topic.
#[derive(Debug)]
struct PendingTopic {
    topic: StockCode,
    subscribers: Vec<SubscriberRecord>,
}

// =============================================================================
// Topic Book
// =============================================================================

/// Tracks wired topics, pending subscribers, and subscriber ids.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use price_stream::domain::price::StockPriceUpdate;
/// use price_stream::domain::subscription::{SubscriberRecord, TopicBook, WireChange};
///
/// let mut book = TopicBook::new();
/// let mut ids = (1..).map(|n| format!("sub-{n}"));
/// let mut next_id = || ids.next().unwrap_or_default();
///
/// let first = SubscriberRecord::new(
///     book.allocate_subscriber_id(),
///     Arc::new(|_: &StockPriceUpdate| {}),
/// );
/// let change = book.add_subscriber("005930", first, true, &mut next_id);
/// assert!(matches!(change, Some(WireChange::Subscribe { .. })));
///
/// // Second consumer of the same stock - no upstream change needed
/// let second = SubscriberRecord::new(
///     book.allocate_subscriber_id(),
///     Arc::new(|_: &StockPriceUpdate| {}),
/// );
/// let change = book.add_subscriber("005930", second, true, &mut next_id);
/// assert!(change.is_none());
/// ```
#[derive(Debug, Default)]
pub struct TopicBook {
    topics: HashMap<StockCode, TopicSubscription>,
    /// First-arrival order of topics is preserved.
    pending: Vec<PendingTopic>,
    next_subscriber_id: SubscriberId,
}

impl TopicBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh subscriber id. Ids are never reused.
    pub const fn allocate_subscriber_id(&mut self) -> SubscriberId {
        self.next_subscriber_id += 1;
        self.next_subscriber_id
    }

    /// Register a subscriber.
    ///
    /// When `connected` is false the record is queued. Otherwise it joins
    /// the topic, and a `Subscribe` change is returned if the topic is new.
    pub fn add_subscriber(
        &mut self,
        topic: &str,
        record: SubscriberRecord,
        connected: bool,
        next_subscription_id: &mut impl FnMut() -> WireSubscriptionId,
    ) -> Option<WireChange> {
        if !connected {
            self.enqueue(topic, record);
            return None;
        }

        self.attach(topic, vec![record], next_subscription_id)
    }

    /// Promote every pending subscriber to a wired topic.
    ///
    /// Returns one `Subscribe` change per newly wired topic, in the order
    /// the topics were first requested.
    pub fn promote_pending(
        &mut self,
        next_subscription_id: &mut impl FnMut() -> WireSubscriptionId,
    ) -> Vec<WireChange> {
        std::mem::take(&mut self.pending)
            .into_iter()
            .filter(|pending| !pending.subscribers.is_empty())
            .filter_map(|pending| {
                self.attach(&pending.topic, pending.subscribers, next_subscription_id)
            })
            .collect()
    }

    /// Remove a subscriber from the pending queue or its wired topic.
    pub fn remove_subscriber(&mut self, topic: &str, subscriber: SubscriberId) -> Removal {
        if let Some(index) = self.pending.iter().position(|p| p.topic == topic) {
            let pending = &mut self.pending[index];
            let before = pending.subscribers.len();
            pending.subscribers.retain(|s| s.id != subscriber);
            let removed = pending.subscribers.len() != before;

            if pending.subscribers.is_empty() {
                self.pending.remove(index);
            }

            if removed {
                return Removal {
                    removed,
                    change: None,
                };
            }
        }

        let Some(subscription) = self.topics.get_mut(topic) else {
            return Removal::default();
        };

        let before = subscription.subscribers.len();
        subscription.subscribers.retain(|s| s.id != subscriber);
        if subscription.subscribers.len() == before {
            return Removal::default();
        }

        // Last subscriber gone - release the wire subscription
        let change = if subscription.subscribers.is_empty() {
            self.topics
                .remove(topic)
                .map(|released| WireChange::Unsubscribe {
                    topic: topic.to_string(),
                    subscription_id: released.subscription_id,
                })
        } else {
            None
        };

        Removal {
            removed: true,
            change,
        }
    }

    /// Snapshot of the callbacks registered under a wire subscription id.
    #[must_use]
    pub fn callbacks_for_subscription(
        &self,
        subscription_id: &str,
    ) -> Option<(StockCode, Vec<PriceCallback>)> {
        self.topics
            .iter()
            .find(|(_, sub)| sub.subscription_id == subscription_id)
            .map(|(topic, sub)| (topic.clone(), Self::snapshot(sub)))
    }

    /// Snapshot of the callbacks registered under a topic.
    #[must_use]
    pub fn callbacks_for_topic(&self, topic: &str) -> Option<Vec<PriceCallback>> {
        self.topics.get(topic).map(Self::snapshot)
    }

    /// Wire subscription id of a topic, if wired.
    #[must_use]
    pub fn subscription_id(&self, topic: &str) -> Option<&str> {
        self.topics.get(topic).map(|s| s.subscription_id.as_str())
    }

    /// Move every wired topic back to the pending queue.
    ///
    /// Wire ids are released without UNSUBSCRIBE; the next promotion
    /// issues fresh ones. Wired topics keep registration order and go
    /// ahead of topics that were already pending. Returns the number of
    /// topics moved.
    pub fn requeue_wired(&mut self) -> usize {
        let mut wired: Vec<(StockCode, TopicSubscription)> = self.topics.drain().collect();
        wired.sort_by_key(|(_, sub)| sub.subscribers.first().map_or(0, |s| s.id));
        let moved = wired.len();

        let mut queue: Vec<PendingTopic> = wired
            .into_iter()
            .map(|(topic, sub)| PendingTopic {
                topic,
                subscribers: sub.subscribers,
            })
            .collect();

        for pending in std::mem::take(&mut self.pending) {
            if let Some(existing) = queue.iter_mut().find(|q| q.topic == pending.topic) {
                existing.subscribers.extend(pending.subscribers);
            } else {
                queue.push(pending);
            }
        }

        self.pending = queue;
        moved
    }

    /// Drop all topics and pending subscribers.
    pub fn clear(&mut self) {
        self.topics.clear();
        self.pending.clear();
    }

    /// Check if nothing is wired or pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.topics.is_empty() && self.pending.is_empty()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            topic_count: self.topics.len(),
            subscriber_count: self.topics.values().map(|t| t.subscribers.len()).sum(),
            pending_topic_count: self.pending.len(),
            pending_subscriber_count: self.pending.iter().map(|p| p.subscribers.len()).sum(),
        }
    }

    fn enqueue(&mut self, topic: &str, record: SubscriberRecord) {
        if let Some(pending) = self.pending.iter_mut().find(|p| p.topic == topic) {
            pending.subscribers.push(record);
        } else {
            self.pending.push(PendingTopic {
                topic: topic.to_string(),
                subscribers: vec![record],
            });
        }
    }

    fn attach(
        &mut self,
        topic: &str,
        records: Vec<SubscriberRecord>,
        next_subscription_id: &mut impl FnMut() -> WireSubscriptionId,
    ) -> Option<WireChange> {
        if let Some(existing) = self.topics.get_mut(topic) {
            existing.subscribers.extend(records);
            return None;
        }

        // First subscriber - needs upstream subscribe
        let subscription_id = next_subscription_id();
        self.topics.insert(
            topic.to_string(),
            TopicSubscription {
                subscription_id: subscription_id.clone(),
                subscribers: records,
            },
        );

        Some(WireChange::Subscribe {
            topic: topic.to_string(),
            destination: price_destination(topic),
            subscription_id,
        })
    }

    fn snapshot(subscription: &TopicSubscription) -> Vec<PriceCallback> {
        subscription
            .subscribers
            .iter()
            .map(|s| Arc::clone(&s.callback))
            .collect()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Subscription statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Topics with a live wire subscription.
    pub topic_count: usize,
    /// Subscribers attached to wired topics.
    pub subscriber_count: usize,
    /// Topics waiting for the connection.
    pub pending_topic_count: usize,
    /// Subscribers waiting for the connection.
    pub pending_subscriber_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
