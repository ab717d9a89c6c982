//! Core types for FHIR R5 Topic-Based Subscriptions.
//!
//! These types represent validated topic and subscription configurations
//! used by the evaluation pipeline. Every coded field is a closed enum whose
//! `FromStr` implementation rejects codes outside the FHIR value set, so an
//! unknown channel type or modifier never reaches the registries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::SubscriptionError;

/// Implements `as_str`, `Display` and a strict `FromStr` for a code enum.
macro_rules! fhir_code {
    ($ty:ident, $field:literal, { $($variant:ident => $code:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the FHIR code for this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = SubscriptionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($code => Ok(Self::$variant),)+
                    other => Err(SubscriptionError::invalid_code($field, other)),
                }
            }
        }
    };
}

// =============================================================================
// SUBSCRIPTION TOPIC TYPES
// =============================================================================

/// A named, reusable category of clinical events.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionTopic {
    /// Resource ID
    pub id: String,

    /// Canonical URL of the topic
    pub url: String,

    /// Business version of the topic definition
    pub version: Option<String>,

    /// Computer-friendly name
    pub name: Option<String>,

    /// Human-readable title
    pub title: Option<String>,

    /// Topic status
    pub status: TopicStatus,

    /// Resource triggers that can activate this topic
    pub resource_triggers: Vec<ResourceTrigger>,

    /// Event triggers (non-resource events), metadata only
    pub event_triggers: Vec<EventTrigger>,

    /// Filter parameters that subscribers can use
    pub can_filter_by: Vec<CanFilterBy>,

    /// Notification shape configuration, metadata only
    pub notification_shape: Vec<NotificationShape>,
}

impl SubscriptionTopic {
    /// Create an active topic with no triggers or filters.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            version: None,
            name: None,
            title: None,
            status: TopicStatus::Active,
            resource_triggers: Vec::new(),
            event_triggers: Vec::new(),
            can_filter_by: Vec::new(),
            notification_shape: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_trigger(mut self, trigger: ResourceTrigger) -> Self {
        self.resource_triggers.push(trigger);
        self
    }

    pub fn with_filter(mut self, filter: CanFilterBy) -> Self {
        self.can_filter_by.push(filter);
        self
    }
}

/// Status of a subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Draft,
    Active,
    Retired,
    #[default]
    Unknown,
}

fhir_code!(TopicStatus, "topic status", {
    Draft => "draft",
    Active => "active",
    Retired => "retired",
    Unknown => "unknown",
});

/// Resource trigger definition - specifies which resource events fire a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceTrigger {
    /// FHIR resource type (e.g., "Encounter", "DiagnosticReport")
    pub resource_type: String,

    /// Interactions that fire this trigger
    pub supported_interactions: Vec<TriggerInteraction>,

    /// Quoted equality expression, e.g. `status = 'finished'`
    pub fhirpath_criteria: Option<String>,

    /// Query-style criteria, e.g. `status=finished`
    pub query_criteria: Option<QueryCriteria>,

    /// Description of the trigger
    pub description: Option<String>,
}

impl ResourceTrigger {
    pub fn new(resource_type: impl Into<String>, interactions: &[TriggerInteraction]) -> Self {
        Self {
            resource_type: resource_type.into(),
            supported_interactions: interactions.to_vec(),
            fhirpath_criteria: None,
            query_criteria: None,
            description: None,
        }
    }

    pub fn with_fhirpath(mut self, criteria: impl Into<String>) -> Self {
        self.fhirpath_criteria = Some(criteria.into());
        self
    }

    pub fn with_query(mut self, current: impl Into<String>) -> Self {
        self.query_criteria = Some(QueryCriteria {
            current: Some(current.into()),
        });
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Query-style criteria for resource triggers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryCriteria {
    /// Query for the current version (after change)
    pub current: Option<String>,
}

/// Types of resource interactions that can trigger a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerInteraction {
    Create,
    Update,
    Delete,
}

fhir_code!(TriggerInteraction, "interaction", {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

/// Event trigger for non-resource events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTrigger {
    /// Event code
    pub event: String,

    /// Description
    pub description: Option<String>,
}

/// Filter declaration - describes which filters subscribers can apply.
#[derive(Debug, Clone, PartialEq)]
pub struct CanFilterBy {
    /// Resource type the filter applies to; `None` applies to every trigger type
    pub resource_type: Option<String>,

    /// Parameter name
    pub filter_parameter: String,

    /// Dotted document path used instead of the built-in parameter table
    pub filter_definition: Option<String>,

    /// Description of the filter
    pub description: Option<String>,

    /// Allowed modifiers besides `eq`
    pub modifiers: Vec<FilterModifier>,
}

impl CanFilterBy {
    pub fn new(resource_type: impl Into<String>, filter_parameter: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            filter_parameter: filter_parameter.into(),
            filter_definition: None,
            description: None,
            modifiers: Vec::new(),
        }
    }

    pub fn with_modifiers(mut self, modifiers: &[FilterModifier]) -> Self {
        self.modifiers = modifiers.to_vec();
        self
    }

    pub fn with_definition(mut self, path: impl Into<String>) -> Self {
        self.filter_definition = Some(path.into());
        self
    }

    /// `eq` is always permitted.
    pub fn permits(&self, modifier: FilterModifier) -> bool {
        modifier == FilterModifier::Eq || self.modifiers.contains(&modifier)
    }

    /// Whether this declaration covers the given resource type.
    pub fn covers(&self, resource_type: Option<&str>) -> bool {
        match (self.resource_type.as_deref(), resource_type) {
            (Some(declared), Some(requested)) => declared == requested,
            _ => true,
        }
    }
}

/// Notification shape - describes what data to include in notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationShape {
    /// Resource type this shape applies to
    pub resource: String,

    /// Elements to include (if empty, include all)
    pub include: Vec<String>,

    /// Related resources to include via _revinclude
    pub rev_include: Vec<String>,
}

// =============================================================================
// SUBSCRIPTION TYPES
// =============================================================================

/// A client's filtered binding to one topic with a delivery channel.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicSubscription {
    /// Resource ID; generated when empty at subscribe time
    pub id: String,

    /// Canonical URL of the referenced topic
    pub topic_url: String,

    /// Current status
    pub status: SubscriptionStatus,

    /// Delivery channel
    pub channel_type: ChannelType,

    /// Channel endpoint (URL, websocket binding or email address)
    pub endpoint: String,

    /// How much of the focus resource to include
    pub content: PayloadContent,

    /// Applied filters from subscriber
    pub filter_by: Vec<SubscriptionFilter>,

    /// Subscription end time (if set)
    pub end: Option<OffsetDateTime>,

    /// Free-text reason from the subscriber
    pub reason: Option<String>,

    /// Heartbeat period in seconds (for WebSocket)
    pub heartbeat_period: Option<u32>,

    /// Maximum events per notification bundle
    pub max_count: Option<u32>,
}

impl TopicSubscription {
    pub fn new(
        topic_url: impl Into<String>,
        channel_type: ChannelType,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            topic_url: topic_url.into(),
            status: SubscriptionStatus::Requested,
            channel_type,
            endpoint: endpoint.into(),
            content: PayloadContent::default(),
            filter_by: Vec::new(),
            end: None,
            reason: None,
            heartbeat_period: None,
            max_count: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_content(mut self, content: PayloadContent) -> Self {
        self.content = content;
        self
    }

    pub fn with_filter(mut self, filter: SubscriptionFilter) -> Self {
        self.filter_by.push(filter);
        self
    }

    pub fn with_end(mut self, end: OffsetDateTime) -> Self {
        self.end = Some(end);
        self
    }

    /// Whether the subscription's end time is at or before `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.end.is_some_and(|end| end <= now)
    }
}

/// Status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Initial state, waiting for server to activate
    #[default]
    Requested,
    /// Active and receiving notifications
    Active,
    /// Subscription is turned off; terminal
    Off,
}

fhir_code!(SubscriptionStatus, "subscription status", {
    Requested => "requested",
    Active => "active",
    Off => "off",
});

/// Channel used by the delivery collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    /// HTTP POST to endpoint
    RestHook,
    /// Real-time websocket connection
    #[serde(rename = "websocket")]
    WebSocket,
    /// Email notifications
    Email,
}

fhir_code!(ChannelType, "channel type", {
    RestHook => "rest-hook",
    WebSocket => "websocket",
    Email => "email",
});

/// Payload content level for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadContent {
    /// No payload, just notification that something happened
    Empty,
    /// Include only resource type and ID
    IdOnly,
    /// Include full resource
    #[default]
    FullResource,
}

fhir_code!(PayloadContent, "payload content", {
    Empty => "empty",
    IdOnly => "id-only",
    FullResource => "full-resource",
});

/// Comparison applied by a subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterModifier {
    /// Exact equality
    #[default]
    Eq,
    /// Not equal
    Ne,
    /// Any element of a comma-separated list
    In,
    /// None of the elements of a comma-separated list
    NotIn,
    /// Substring match
    Contains,
}

fhir_code!(FilterModifier, "filter modifier", {
    Eq => "eq",
    Ne => "ne",
    In => "in",
    NotIn => "not-in",
    Contains => "contains",
});

/// Filter applied by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionFilter {
    /// Resource type the filter is scoped to
    pub resource_type: Option<String>,

    /// Filter parameter name (from topic's canFilterBy)
    pub filter_parameter: String,

    /// Comparison to apply
    pub modifier: FilterModifier,

    /// Filter value
    pub value: String,
}

impl SubscriptionFilter {
    /// An `eq` filter.
    pub fn new(filter_parameter: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            resource_type: None,
            filter_parameter: filter_parameter.into(),
            modifier: FilterModifier::Eq,
            value: value.into(),
        }
    }

    pub fn with_modifier(mut self, modifier: FilterModifier) -> Self {
        self.modifier = modifier;
        self
    }

    pub fn for_resource(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }
}

/// Live status of a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStatusRecord {
    pub status: SubscriptionStatus,

    /// Notifications produced since the subscription was activated
    pub event_count: u64,

    /// Timestamp of the last matched event
    pub last_event_at: Option<OffsetDateTime>,
}

impl SubscriptionStatusRecord {
    /// Fresh record for a newly activated subscription.
    pub fn activated() -> Self {
        Self {
            status: SubscriptionStatus::Active,
            event_count: 0,
            last_event_at: None,
        }
    }
}

// =============================================================================
// EVENT TYPES
// =============================================================================

/// A committed create/update/delete of a clinical resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    /// FHIR resource type (e.g., "Encounter")
    pub resource_type: String,

    /// Resource ID
    pub resource_id: String,

    /// Interaction that produced the event
    pub action: TriggerInteraction,

    /// The resource document; `Null` for deletions without data
    pub resource: serde_json::Value,

    /// Timestamp of the event
    pub timestamp: OffsetDateTime,
}

impl ResourceEvent {
    /// Create a new resource event.
    pub fn new(
        action: TriggerInteraction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: serde_json::Value,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            action,
            resource,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Create a "create" event.
    pub fn created(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: serde_json::Value,
    ) -> Self {
        Self::new(TriggerInteraction::Create, resource_type, resource_id, resource)
    }

    /// Create an "update" event.
    pub fn updated(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: serde_json::Value,
    ) -> Self {
        Self::new(TriggerInteraction::Update, resource_type, resource_id, resource)
    }

    /// Create a "delete" event without resource data.
    pub fn deleted(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::new(
            TriggerInteraction::Delete,
            resource_type,
            resource_id,
            serde_json::Value::Null,
        )
    }

    /// Create an event from the serialized resource body.
    ///
    /// A body that is not valid JSON becomes `Null`, so criteria and filters
    /// simply fail to match instead of rejecting the event.
    pub fn from_raw(
        action: TriggerInteraction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        body: &str,
    ) -> Self {
        let resource_type = resource_type.into();
        let resource = serde_json::from_str(body).unwrap_or_else(|e| {
            tracing::debug!(
                resource_type = resource_type.as_str(),
                error = %e,
                "Event resource is not valid JSON, evaluating without document"
            );
            serde_json::Value::Null
        });
        Self::new(action, resource_type, resource_id, resource)
    }

    /// Set the event timestamp.
    pub fn at(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}
