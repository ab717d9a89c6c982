//! Subscription engine.
//!
//! Owns the topic catalog and the subscription registry behind a single
//! lock and runs the evaluation pipeline for committed resource events:
//!
//! 1. expire subscriptions whose `end` has passed
//! 2. skip subscriptions that are not active
//! 3. resolve the subscription's topic by canonical URL
//! 4. match the event against the topic's resource triggers
//! 5. apply the subscriber's filters
//! 6. count the event and build the notification
//!
//! Evaluation takes the lock in write mode for the whole pass, so concurrent
//! events against the same subscription get strictly increasing event
//! numbers with no gaps.

use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::config::EngineConfig;
use crate::criteria::{self, CriteriaDialect};
use crate::error::{SubscriptionError, SubscriptionResult};
use crate::filter::{all_filters_match, validate_filters};
use crate::notification::{NotificationBundle, build_notification};
use crate::subscription_manager::SubscriptionRegistry;
use crate::topic_registry::TopicCatalog;
use crate::types::{
    ChannelType, ResourceEvent, ResourceTrigger, SubscriptionStatusRecord, SubscriptionTopic,
    TopicSubscription,
};

/// Resource types whose changes never trigger notifications, so that
/// subscription bookkeeping cannot feed back into the pipeline.
const IGNORED_RESOURCE_TYPES: &[&str] = &[
    "Subscription",
    "SubscriptionTopic",
    "SubscriptionStatus",
    "AuditEvent",
];

#[derive(Debug, Default)]
struct EngineState {
    topics: TopicCatalog,
    subscriptions: SubscriptionRegistry,
}

/// Topic-based subscription engine.
///
/// `Send + Sync`; share it between request handlers with `Arc`.
#[derive(Debug)]
pub struct SubscriptionEngine {
    state: RwLock<EngineState>,
    enabled: bool,
    allowed_channels: Vec<ChannelType>,
}

impl Default for SubscriptionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionEngine {
    /// Create an enabled engine with an empty catalog accepting every channel.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::default()),
            enabled: true,
            allowed_channels: vec![ChannelType::RestHook, ChannelType::WebSocket, ChannelType::Email],
        }
    }

    /// Create an engine honouring the `subscriptions` configuration section.
    pub fn from_config(config: &EngineConfig) -> Self {
        let settings = &config.subscriptions;
        let engine = Self {
            state: RwLock::new(EngineState::default()),
            enabled: settings.enabled,
            allowed_channels: settings.allowed_channels.clone(),
        };

        if settings.load_builtin_topics {
            engine.register_builtin_topics();
        }

        tracing::info!(
            enabled = settings.enabled,
            channels = ?settings.allowed_channels,
            topics = engine.topic_count(),
            "Subscription engine initialized"
        );

        engine
    }

    /// Whether evaluation produces notifications.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // =========================================================================
    // Topics
    // =========================================================================

    /// Register a topic, replacing any topic with the same id.
    pub fn register_topic(&self, topic: SubscriptionTopic) {
        tracing::debug!(
            topic_id = topic.id.as_str(),
            topic_url = topic.url.as_str(),
            triggers = topic.resource_triggers.len(),
            "Registering subscription topic"
        );
        self.state.write().topics.register(topic);
    }

    /// Register the built-in topics. Safe to call repeatedly.
    pub fn register_builtin_topics(&self) {
        let count = self.state.write().topics.register_builtins();
        tracing::info!(count, "Loaded built-in subscription topics");
    }

    pub fn get_topic(&self, id: &str) -> Option<SubscriptionTopic> {
        self.state.read().topics.get(id).cloned()
    }

    pub fn get_topic_by_url(&self, url: &str) -> Option<SubscriptionTopic> {
        self.state.read().topics.get_by_url(url).cloned()
    }

    /// All topics in registration order.
    pub fn list_topics(&self) -> Vec<SubscriptionTopic> {
        self.state.read().topics.iter().cloned().collect()
    }

    pub fn topic_count(&self) -> usize {
        self.state.read().topics.len()
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Validate and activate a subscription.
    ///
    /// Fails without touching the registry when the channel is not allowed,
    /// the topic is unknown, the id is taken, or a filter is not declared by
    /// the topic. An empty id is replaced with a generated one. Returns the
    /// stored subscription with status `active`.
    pub fn subscribe(
        &self,
        mut subscription: TopicSubscription,
    ) -> SubscriptionResult<TopicSubscription> {
        if !self.allowed_channels.contains(&subscription.channel_type) {
            return Err(SubscriptionError::UnsupportedChannel(
                subscription.channel_type.to_string(),
            ));
        }

        if subscription.id.is_empty() {
            subscription.id = uuid::Uuid::new_v4().to_string();
        }

        let mut state = self.state.write();

        let topic = state
            .topics
            .get_by_url(&subscription.topic_url)
            .ok_or_else(|| SubscriptionError::TopicNotFound(subscription.topic_url.clone()))?;

        if state.subscriptions.contains(&subscription.id) {
            return Err(SubscriptionError::DuplicateSubscription(subscription.id));
        }

        validate_filters(topic, &subscription.filter_by)?;

        let id = subscription.id.clone();
        state.subscriptions.activate(subscription)?;

        let stored = state
            .subscriptions
            .get(&id)
            .map(|entry| entry.subscription().clone())
            .ok_or_else(|| SubscriptionError::invalid_resource("subscription lost on activation"))?;

        tracing::info!(
            subscription_id = stored.id.as_str(),
            topic_url = stored.topic_url.as_str(),
            channel = stored.channel_type.as_str(),
            filters = stored.filter_by.len(),
            "Subscription activated"
        );

        Ok(stored)
    }

    pub fn get_subscription(&self, id: &str) -> Option<TopicSubscription> {
        self.state
            .read()
            .subscriptions
            .get(id)
            .map(|entry| entry.subscription().clone())
    }

    pub fn get_subscription_status(&self, id: &str) -> Option<SubscriptionStatusRecord> {
        self.state
            .read()
            .subscriptions
            .get(id)
            .map(|entry| *entry.status())
    }

    /// All subscriptions in insertion order.
    pub fn list_subscriptions(&self) -> Vec<TopicSubscription> {
        self.state
            .read()
            .subscriptions
            .iter()
            .map(|entry| entry.subscription().clone())
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.read().subscriptions.len()
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate a committed resource event against every subscription.
    pub fn evaluate(&self, event: &ResourceEvent) -> Vec<NotificationBundle> {
        self.evaluate_at(event, OffsetDateTime::now_utc())
    }

    /// Evaluate with an explicit clock, used for subscription expiry.
    ///
    /// Returns notifications in subscription insertion order. Never fails:
    /// a malformed document or criteria simply does not match.
    pub fn evaluate_at(&self, event: &ResourceEvent, now: OffsetDateTime) -> Vec<NotificationBundle> {
        if IGNORED_RESOURCE_TYPES.contains(&event.resource_type.as_str()) {
            tracing::trace!(
                resource_type = event.resource_type.as_str(),
                "Skipping subscription infrastructure resource"
            );
            return Vec::new();
        }

        if !self.enabled {
            return Vec::new();
        }

        let mut state = self.state.write();
        let EngineState {
            topics,
            subscriptions,
        } = &mut *state;

        let mut notifications = Vec::new();

        for entry in subscriptions.iter_mut() {
            if entry.subscription().is_expired_at(now) {
                if entry.turn_off() {
                    tracing::info!(
                        subscription_id = entry.subscription().id.as_str(),
                        "Subscription expired, status set to off"
                    );
                }
                continue;
            }

            if !entry.is_active() {
                continue;
            }

            let Some(topic) = topics.get_by_url(&entry.subscription().topic_url) else {
                tracing::trace!(
                    subscription_id = entry.subscription().id.as_str(),
                    topic_url = entry.subscription().topic_url.as_str(),
                    "Subscription topic not registered"
                );
                continue;
            };

            if !topic_triggered(topic, event) {
                tracing::trace!(
                    subscription_id = entry.subscription().id.as_str(),
                    resource_type = event.resource_type.as_str(),
                    "Event did not match topic triggers"
                );
                continue;
            }

            if !all_filters_match(topic, &entry.subscription().filter_by, event) {
                tracing::trace!(
                    subscription_id = entry.subscription().id.as_str(),
                    resource_type = event.resource_type.as_str(),
                    "Event did not match subscription filters"
                );
                continue;
            }

            let event_number = entry.record_event(event.timestamp);
            tracing::debug!(
                subscription_id = entry.subscription().id.as_str(),
                topic_url = topic.url.as_str(),
                resource_type = event.resource_type.as_str(),
                resource_id = event.resource_id.as_str(),
                event_number,
                "Subscription matched"
            );

            notifications.push(build_notification(
                entry.subscription(),
                topic,
                event,
                event_number,
            ));
        }

        notifications
    }
}

/// Whether any of the topic's resource triggers fires for the event.
fn topic_triggered(topic: &SubscriptionTopic, event: &ResourceEvent) -> bool {
    topic
        .resource_triggers
        .iter()
        .any(|trigger| trigger_matches(trigger, event))
}

fn trigger_matches(trigger: &ResourceTrigger, event: &ResourceEvent) -> bool {
    if trigger.resource_type != event.resource_type
        || !trigger.supported_interactions.contains(&event.action)
    {
        return false;
    }

    let fhirpath_ok = trigger.fhirpath_criteria.as_deref().is_none_or(|expr| {
        criteria::evaluate(expr, CriteriaDialect::FhirPath, &event.resource)
    });

    fhirpath_ok
        && trigger
            .query_criteria
            .as_ref()
            .and_then(|q| q.current.as_deref())
            .is_none_or(|expr| criteria::evaluate(expr, CriteriaDialect::Query, &event.resource))
}
