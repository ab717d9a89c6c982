//! Subscription registry for subscription lifecycle management.
//!
//! Holds the registered subscriptions together with their live status
//! records. Like the topic catalog it is a plain data structure; the engine
//! provides the locking.

use indexmap::IndexMap;
use time::OffsetDateTime;

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::types::{SubscriptionStatus, SubscriptionStatusRecord, TopicSubscription};

/// A registered subscription and its live status.
#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    subscription: TopicSubscription,
    status: SubscriptionStatusRecord,
}

impl SubscriptionEntry {
    /// The subscription as registered, with its current status.
    pub fn subscription(&self) -> &TopicSubscription {
        &self.subscription
    }

    pub fn status(&self) -> &SubscriptionStatusRecord {
        &self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.status == SubscriptionStatus::Active
    }

    /// Turn the subscription off. Returns `true` only on the transition.
    pub fn turn_off(&mut self) -> bool {
        if self.status.status == SubscriptionStatus::Off {
            return false;
        }
        self.status.status = SubscriptionStatus::Off;
        self.subscription.status = SubscriptionStatus::Off;
        true
    }

    /// Count a delivered notification and return the new event number.
    pub fn record_event(&mut self, at: OffsetDateTime) -> u64 {
        self.status.event_count += 1;
        self.status.last_event_at = Some(at);
        self.status.event_count
    }
}

/// Registry of subscriptions in insertion order.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: IndexMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an already validated subscription as active with a zeroed
    /// status record.
    pub fn activate(&mut self, mut subscription: TopicSubscription) -> SubscriptionResult<()> {
        if self.entries.contains_key(&subscription.id) {
            return Err(SubscriptionError::DuplicateSubscription(subscription.id));
        }

        subscription.status = SubscriptionStatus::Active;
        self.entries.insert(
            subscription.id.clone(),
            SubscriptionEntry {
                subscription,
                status: SubscriptionStatusRecord::activated(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&SubscriptionEntry> {
        self.entries.get(id)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionEntry> {
        self.entries.values()
    }

    /// Mutable entries in insertion order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SubscriptionEntry> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelType;

    fn subscription(id: &str) -> TopicSubscription {
        TopicSubscription::new("http://t/a", ChannelType::RestHook, "https://hook.example/a")
            .with_id(id)
    }

    #[test]
    fn activate_sets_status_and_zero_count() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(subscription("s1")).unwrap();

        let entry = registry.get("s1").unwrap();
        assert!(entry.is_active());
        assert_eq!(entry.subscription().status, SubscriptionStatus::Active);
        assert_eq!(entry.status().event_count, 0);
        assert!(entry.status().last_event_at.is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(subscription("s1")).unwrap();

        let err = registry.activate(subscription("s1")).unwrap_err();
        assert!(matches!(err, SubscriptionError::DuplicateSubscription(id) if id == "s1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn turn_off_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(subscription("s1")).unwrap();

        let entry = registry.iter_mut().next().unwrap();
        assert!(entry.turn_off());
        assert!(!entry.turn_off());
        assert_eq!(entry.subscription().status, SubscriptionStatus::Off);
        assert!(!entry.is_active());
    }

    #[test]
    fn record_event_counts_monotonically() {
        let mut registry = SubscriptionRegistry::new();
        registry.activate(subscription("s1")).unwrap();
        let now = OffsetDateTime::now_utc();

        let entry = registry.iter_mut().next().unwrap();
        assert_eq!(entry.record_event(now), 1);
        assert_eq!(entry.record_event(now), 2);
        assert_eq!(entry.status().last_event_at, Some(now));
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let mut registry = SubscriptionRegistry::new();
        for id in ["z", "a", "m"] {
            registry.activate(subscription(id)).unwrap();
        }
        let ids: Vec<&str> = registry.iter().map(|e| e.subscription().id.as_str()).collect();
        assert_eq!(ids, ["z", "a", "m"]);
    }
}
