//! Topic catalog for subscription topic lookup.
//!
//! Topics are keyed by resource id and indexed by canonical URL, which is how
//! subscriptions refer to them. The catalog itself is not synchronized; the
//! [`SubscriptionEngine`](crate::engine::SubscriptionEngine) keeps it behind
//! the same lock as the subscription registry.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::builtin::builtin_topics;
use crate::types::SubscriptionTopic;

/// Catalog of subscription topics in registration order.
#[derive(Debug, Default)]
pub struct TopicCatalog {
    /// Topics by id
    topics: IndexMap<String, SubscriptionTopic>,

    /// Index: canonical URL -> topic id
    url_index: HashMap<String, String>,
}

impl TopicCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a topic, replacing any topic with the same id.
    ///
    /// Canonical URLs are unique: a topic registered under a different id
    /// that already owns the URL is evicted. Returns the topic previously
    /// registered under the same id.
    pub fn register(&mut self, topic: SubscriptionTopic) -> Option<SubscriptionTopic> {
        if let Some(owner) = self.url_index.get(&topic.url).cloned() {
            if owner != topic.id {
                tracing::warn!(
                    url = topic.url.as_str(),
                    previous_id = owner.as_str(),
                    id = topic.id.as_str(),
                    "Topic URL re-registered under a different id, evicting previous topic"
                );
                self.topics.shift_remove(&owner);
            }
        }

        if let Some(old) = self.topics.get(&topic.id) {
            if old.url != topic.url {
                self.url_index.remove(&old.url);
            }
        }

        self.url_index.insert(topic.url.clone(), topic.id.clone());
        self.topics.insert(topic.id.clone(), topic)
    }

    /// Load the built-in topics. Registering them again replaces them with
    /// identical definitions.
    pub fn register_builtins(&mut self) -> usize {
        let topics = builtin_topics();
        let count = topics.len();
        for topic in topics {
            self.register(topic);
        }
        count
    }

    /// Get a topic by id.
    pub fn get(&self, id: &str) -> Option<&SubscriptionTopic> {
        self.topics.get(id)
    }

    /// Get a topic by canonical URL.
    pub fn get_by_url(&self, url: &str) -> Option<&SubscriptionTopic> {
        self.url_index.get(url).and_then(|id| self.topics.get(id))
    }

    /// All topics in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionTopic> {
        self.topics.values()
    }

    /// Get the number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceTrigger, TriggerInteraction};

    fn topic(id: &str, url: &str) -> SubscriptionTopic {
        SubscriptionTopic::new(id, url).with_trigger(ResourceTrigger::new(
            "Patient",
            &[TriggerInteraction::Create, TriggerInteraction::Update],
        ))
    }

    #[test]
    fn register_and_lookup() {
        let mut catalog = TopicCatalog::new();
        assert!(catalog.register(topic("a", "http://t/a")).is_none());

        assert_eq!(catalog.get("a").map(|t| t.url.as_str()), Some("http://t/a"));
        assert_eq!(catalog.get_by_url("http://t/a").map(|t| t.id.as_str()), Some("a"));
        assert!(catalog.get("missing").is_none());
        assert!(catalog.get_by_url("http://t/missing").is_none());
    }

    #[test]
    fn register_replaces_by_id() {
        let mut catalog = TopicCatalog::new();
        catalog.register(topic("a", "http://t/a"));
        let previous = catalog.register(topic("a", "http://t/a2"));

        assert_eq!(previous.map(|t| t.url), Some("http://t/a".to_string()));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.get_by_url("http://t/a").is_none());
        assert!(catalog.get_by_url("http://t/a2").is_some());
    }

    #[test]
    fn url_taken_by_another_id_evicts_previous_owner() {
        let mut catalog = TopicCatalog::new();
        catalog.register(topic("a", "http://t/U"));
        catalog.register(topic("b", "http://t/U"));

        assert!(catalog.get("a").is_none());
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get_by_url("http://t/U").map(|t| t.id.as_str()), Some("b"));

        catalog.register(topic("b", "http://t/V"));
        assert!(catalog.get_by_url("http://t/U").is_none());
        assert_eq!(catalog.get_by_url("http://t/V").map(|t| t.id.as_str()), Some("b"));

        // Every stored topic stays reachable through its URL.
        for t in catalog.iter() {
            assert_eq!(catalog.get_by_url(&t.url).map(|found| found.id.as_str()), Some(t.id.as_str()));
        }
    }

    #[test]
    fn replacement_keeps_position() {
        let mut catalog = TopicCatalog::new();
        catalog.register(topic("a", "http://t/a"));
        catalog.register(topic("b", "http://t/b"));
        catalog.register(topic("a", "http://t/a"));

        let ids: Vec<&str> = catalog.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut catalog = TopicCatalog::new();
        for id in ["c", "a", "b"] {
            catalog.register(topic(id, &format!("http://t/{id}")));
        }
        let ids: Vec<&str> = catalog.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn builtins_are_idempotent() {
        let mut catalog = TopicCatalog::new();
        assert_eq!(catalog.register_builtins(), 4);
        assert_eq!(catalog.register_builtins(), 4);
        assert_eq!(catalog.len(), 4);
    }
}
