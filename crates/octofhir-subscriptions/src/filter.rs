//! Subscription filter validation and matching.
//!
//! A subscriber narrows a topic with `filterBy` entries. Each entry must be
//! declared by the topic's `canFilterBy` (checked when subscribing) and is
//! compared against the event resource when the topic fires.

use serde_json::Value;

use crate::criteria::{resolve_path, scalar_text};
use crate::error::{SubscriptionError, SubscriptionResult};
use crate::types::{
    CanFilterBy, FilterModifier, ResourceEvent, SubscriptionFilter, SubscriptionTopic,
};

/// Filter parameter to document path, consulted when a declaration has no
/// `filterDefinition`. Resource-specific rows win over generic (`None`) rows;
/// a parameter missing from the table is used as the path itself.
const PARAMETER_PATHS: &[(Option<&str>, &str, &str)] = &[
    (Some("Encounter"), "class", "class.code"),
    (Some("Encounter"), "service-provider", "serviceProvider.reference"),
    (Some("DiagnosticReport"), "based-on", "basedOn.reference"),
    (None, "_id", "id"),
    (None, "patient", "subject.reference"),
    (None, "subject", "subject.reference"),
    (None, "encounter", "encounter.reference"),
];

/// Document path for a filter parameter on a resource type.
pub fn parameter_path<'a>(resource_type: &str, parameter: &'a str) -> &'a str {
    PARAMETER_PATHS
        .iter()
        .find(|(rt, param, _)| *rt == Some(resource_type) && *param == parameter)
        .or_else(|| {
            PARAMETER_PATHS
                .iter()
                .find(|(rt, param, _)| rt.is_none() && *param == parameter)
        })
        .map_or(parameter, |(_, _, path)| *path)
}

/// Check every filter against the topic's `canFilterBy`, failing on the first
/// one that is not declared or uses a modifier the declaration does not allow.
pub fn validate_filters(
    topic: &SubscriptionTopic,
    filters: &[SubscriptionFilter],
) -> SubscriptionResult<()> {
    for filter in filters {
        let declarations: Vec<&CanFilterBy> = topic
            .can_filter_by
            .iter()
            .filter(|decl| {
                decl.filter_parameter == filter.filter_parameter
                    && decl.covers(filter.resource_type.as_deref())
            })
            .collect();

        if declarations.is_empty() {
            return Err(SubscriptionError::UndeclaredFilter {
                parameter: filter.filter_parameter.clone(),
            });
        }

        if !declarations.iter().any(|decl| decl.permits(filter.modifier)) {
            return Err(SubscriptionError::UnsupportedModifier {
                parameter: filter.filter_parameter.clone(),
                modifier: filter.modifier.to_string(),
            });
        }
    }

    Ok(())
}

/// Evaluate one subscription filter against an event.
///
/// A filter scoped to another resource type than the event's does not apply
/// and passes. A filter whose parameter the topic no longer declares fails.
pub fn filter_matches(
    topic: &SubscriptionTopic,
    filter: &SubscriptionFilter,
    event: &ResourceEvent,
) -> bool {
    if filter
        .resource_type
        .as_deref()
        .is_some_and(|rt| rt != event.resource_type)
    {
        return true;
    }

    let mut declared = topic
        .can_filter_by
        .iter()
        .filter(|decl| decl.filter_parameter == filter.filter_parameter)
        .peekable();

    if declared.peek().is_none() {
        tracing::debug!(
            topic_url = topic.url.as_str(),
            filter = filter.filter_parameter.as_str(),
            "Filter parameter no longer declared by topic"
        );
        return false;
    }

    let Some(decl) = declared.find(|decl| decl.covers(Some(event.resource_type.as_str()))) else {
        return true;
    };

    let path = decl
        .filter_definition
        .as_deref()
        .unwrap_or_else(|| parameter_path(&event.resource_type, &filter.filter_parameter));

    value_matches(&event.resource, path, filter.modifier, &filter.value)
}

/// Whether every filter of a subscription matches the event.
pub fn all_filters_match(
    topic: &SubscriptionTopic,
    filters: &[SubscriptionFilter],
    event: &ResourceEvent,
) -> bool {
    filters
        .iter()
        .all(|filter| filter_matches(topic, filter, event))
}

fn value_matches(resource: &Value, path: &str, modifier: FilterModifier, expected: &str) -> bool {
    let Some(actual) = resolve_path(resource, path).and_then(scalar_text) else {
        return false;
    };
    compare(&actual, modifier, expected)
}

/// Compare a resolved value against a filter value.
pub fn compare(actual: &str, modifier: FilterModifier, expected: &str) -> bool {
    match modifier {
        FilterModifier::Eq => actual == expected,
        FilterModifier::Ne => actual != expected,
        FilterModifier::In => list_items(expected).any(|item| item == actual),
        FilterModifier::NotIn => !list_items(expected).any(|item| item == actual),
        FilterModifier::Contains => actual.contains(expected),
    }
}

fn list_items(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}
