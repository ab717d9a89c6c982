//! Conversion from FHIR `SubscriptionTopic` and `Subscription` resources.
//!
//! Accepts both R5 native shapes and the R4/R4B Subscriptions Backport IG
//! shapes (`criteria` carrying the topic URL and filters, `channel.type` as a
//! plain code). Coded values are parsed strictly: a subscription asking for an
//! unknown channel or filter modifier is rejected here rather than ignored.

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::types::{
    CanFilterBy, ChannelType, EventTrigger, FilterModifier, NotificationShape, PayloadContent,
    QueryCriteria, ResourceTrigger, SubscriptionFilter, SubscriptionStatus, SubscriptionTopic,
    TopicStatus, TopicSubscription, TriggerInteraction,
};

const PAYLOAD_CONTENT_EXTENSION: &str = "backport-payload-content";

impl SubscriptionTopic {
    /// Parse a SubscriptionTopic FHIR resource.
    pub fn from_resource(resource: &Value) -> SubscriptionResult<Self> {
        expect_resource_type(resource, "SubscriptionTopic")?;

        let id = required_str(resource, "id")?.to_string();
        let url = required_str(resource, "url")?.to_string();

        let status = resource
            .get("status")
            .and_then(|v| v.as_str())
            .map(str::parse::<TopicStatus>)
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            id,
            url,
            version: optional_string(resource, "version"),
            name: optional_string(resource, "name"),
            title: optional_string(resource, "title"),
            status,
            resource_triggers: parse_resource_triggers(resource)?,
            event_triggers: parse_event_triggers(resource),
            can_filter_by: parse_filter_declarations(resource),
            notification_shape: parse_notification_shape(resource),
        })
    }
}

impl TopicSubscription {
    /// Parse a Subscription FHIR resource.
    ///
    /// The id may be absent; the engine assigns one when subscribing.
    pub fn from_resource(resource: &Value) -> SubscriptionResult<Self> {
        expect_resource_type(resource, "Subscription")?;

        let id = optional_string(resource, "id").unwrap_or_default();

        // R5: subscription.topic, R4 Backport: subscription.criteria (URL with optional query)
        let (topic_url, criteria_filters) = match resource.get("topic").and_then(|v| v.as_str()) {
            Some(topic) => (topic.to_string(), Vec::new()),
            None => {
                let criteria = required_str(resource, "criteria")?;
                split_backport_criteria(criteria)?
            }
        };

        let status = resource
            .get("status")
            .and_then(|v| v.as_str())
            .map(str::parse::<SubscriptionStatus>)
            .transpose()?
            .unwrap_or_default();

        let channel = resource.get("channel");
        let channel_type = parse_channel_type(resource)?;

        let endpoint = resource
            .get("endpoint")
            .or_else(|| channel.and_then(|c| c.get("endpoint")))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let content = parse_content(resource)?;

        let mut filter_by = parse_filter_by(resource)?;
        filter_by.extend(criteria_filters);

        let end = resource
            .get("end")
            .and_then(|v| v.as_str())
            .map(|s| {
                OffsetDateTime::parse(s, &Rfc3339)
                    .map_err(|e| SubscriptionError::invalid_resource(format!("Invalid end: {e}")))
            })
            .transpose()?;

        let heartbeat_period = bounded_u32(
            resource
                .get("heartbeatPeriod")
                .or_else(|| channel.and_then(|c| c.get("heartbeatPeriod"))),
            "heartbeatPeriod",
        )?;

        let max_count = bounded_u32(resource.get("maxCount"), "maxCount")?;

        Ok(Self {
            id,
            topic_url,
            status,
            channel_type,
            endpoint,
            content,
            filter_by,
            end,
            reason: optional_string(resource, "reason"),
            heartbeat_period,
            max_count,
        })
    }
}

fn expect_resource_type(resource: &Value, expected: &str) -> SubscriptionResult<()> {
    match resource.get("resourceType").and_then(|v| v.as_str()) {
        Some(rt) if rt != expected => Err(SubscriptionError::invalid_resource(format!(
            "Expected {expected}, got {rt}"
        ))),
        _ if !resource.is_object() => Err(SubscriptionError::invalid_resource(format!(
            "{expected} must be a JSON object"
        ))),
        _ => Ok(()),
    }
}

fn required_str<'a>(resource: &'a Value, field: &str) -> SubscriptionResult<&'a str> {
    resource
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SubscriptionError::invalid_resource(format!("Missing {field}")))
}

fn optional_string(resource: &Value, field: &str) -> Option<String> {
    resource
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn bounded_u32(value: Option<&Value>, field: &str) -> SubscriptionResult<Option<u32>> {
    value
        .and_then(|v| v.as_u64())
        .map(|v| {
            u32::try_from(v).map_err(|_| {
                SubscriptionError::invalid_resource(format!("{field} out of range: {v}"))
            })
        })
        .transpose()
}

/// `http://hl7.org/fhir/StructureDefinition/Encounter` -> `Encounter`
fn resource_type_name(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

fn parse_resource_triggers(resource: &Value) -> SubscriptionResult<Vec<ResourceTrigger>> {
    let triggers = resource
        .get("resourceTrigger")
        .and_then(|v| v.as_array())
        .map(|arr| arr.as_slice())
        .unwrap_or(&[]);

    let mut result = Vec::with_capacity(triggers.len());

    for trigger in triggers {
        let Some(resource_type) = trigger
            .get("resource")
            .and_then(|v| v.as_str())
            .map(resource_type_name)
            .filter(|s| !s.is_empty())
        else {
            continue;
        };

        let supported_interactions = match trigger
            .get("supportedInteraction")
            .and_then(|v| v.as_array())
        {
            Some(arr) => arr
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::parse::<TriggerInteraction>)
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![
                TriggerInteraction::Create,
                TriggerInteraction::Update,
                TriggerInteraction::Delete,
            ],
        };

        let query_criteria = trigger.get("queryCriteria").map(|qc| QueryCriteria {
            current: optional_string(qc, "current"),
        });

        result.push(ResourceTrigger {
            resource_type: resource_type.to_string(),
            supported_interactions,
            fhirpath_criteria: optional_string(trigger, "fhirPathCriteria"),
            query_criteria,
            description: optional_string(trigger, "description"),
        });
    }

    Ok(result)
}

fn parse_event_triggers(resource: &Value) -> Vec<EventTrigger> {
    resource
        .get("eventTrigger")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|trigger| {
                    let event = trigger.get("event")?;
                    let code = event
                        .get("coding")
                        .and_then(|c| c.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|c| c.get("code"))
                        .or_else(|| event.get("text"))
                        .and_then(|v| v.as_str())?;
                    Some(EventTrigger {
                        event: code.to_string(),
                        description: optional_string(trigger, "description"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Declared modifiers outside the supported set are dropped: the declaration
/// stays usable with the modifiers we can evaluate.
fn parse_filter_declarations(resource: &Value) -> Vec<CanFilterBy> {
    let filters = resource
        .get("canFilterBy")
        .and_then(|v| v.as_array())
        .map(|arr| arr.as_slice())
        .unwrap_or(&[]);

    filters
        .iter()
        .filter_map(|filter| {
            let filter_parameter = filter
                .get("filterParameter")
                .and_then(|v| v.as_str())?
                .to_string();

            let mut codes = string_array(filter.get("comparator"));
            codes.extend(string_array(filter.get("modifier")));

            let mut modifiers = Vec::new();
            for code in codes {
                match code.parse::<FilterModifier>() {
                    Ok(m) if !modifiers.contains(&m) => modifiers.push(m),
                    Ok(_) => {}
                    Err(_) => tracing::debug!(
                        filter = filter_parameter.as_str(),
                        modifier = code.as_str(),
                        "Ignoring unsupported canFilterBy modifier"
                    ),
                }
            }

            Some(CanFilterBy {
                resource_type: filter
                    .get("resource")
                    .and_then(|v| v.as_str())
                    .map(|s| resource_type_name(s).to_string()),
                filter_parameter,
                filter_definition: optional_string(filter, "filterDefinition"),
                description: optional_string(filter, "description"),
                modifiers,
            })
        })
        .collect()
}

fn parse_notification_shape(resource: &Value) -> Vec<NotificationShape> {
    resource
        .get("notificationShape")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|shape| {
                    let resource_type = shape.get("resource").and_then(|v| v.as_str())?;
                    Some(NotificationShape {
                        resource: resource_type_name(resource_type).to_string(),
                        include: string_array(shape.get("include")),
                        rev_include: string_array(shape.get("revInclude")),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_channel_type(resource: &Value) -> SubscriptionResult<ChannelType> {
    // R5: channelType.code, R4: channel.type (string or CodeableConcept)
    let code = resource
        .get("channelType")
        .and_then(|c| c.get("code"))
        .and_then(|v| v.as_str())
        .or_else(|| {
            resource.get("channel").and_then(|c| c.get("type")).and_then(|t| {
                t.get("coding")
                    .and_then(|c| c.as_array())
                    .and_then(|arr| arr.first())
                    .and_then(|c| c.get("code"))
                    .and_then(|v| v.as_str())
                    .or_else(|| t.as_str())
            })
        })
        .unwrap_or("rest-hook");

    code.parse()
        .map_err(|_| SubscriptionError::UnsupportedChannel(code.to_string()))
}

fn parse_content(resource: &Value) -> SubscriptionResult<PayloadContent> {
    // R5: content, R4 Backport: channel._payload extension
    let code = resource
        .get("content")
        .and_then(|v| v.as_str())
        .or_else(|| {
            resource
                .get("channel")
                .and_then(|c| c.get("_payload"))
                .and_then(|p| p.get("extension"))
                .and_then(|e| e.as_array())
                .and_then(|arr| {
                    arr.iter().find(|ext| {
                        ext.get("url")
                            .and_then(|u| u.as_str())
                            .is_some_and(|u| u.ends_with(PAYLOAD_CONTENT_EXTENSION))
                    })
                })
                .and_then(|ext| ext.get("valueCode"))
                .and_then(|v| v.as_str())
        });

    code.map(str::parse::<PayloadContent>)
        .transpose()
        .map(Option::unwrap_or_default)
}

fn parse_filter_by(resource: &Value) -> SubscriptionResult<Vec<SubscriptionFilter>> {
    let Some(filters) = resource.get("filterBy").and_then(|v| v.as_array()) else {
        return Ok(Vec::new());
    };

    filters
        .iter()
        .map(|f| -> SubscriptionResult<SubscriptionFilter> {
            let filter_parameter = required_str(f, "filterParameter")?;
            let value = required_str(f, "value")?;

            let modifier = f
                .get("modifier")
                .or_else(|| f.get("comparator"))
                .and_then(|v| v.as_str())
                .map(str::parse::<FilterModifier>)
                .transpose()?
                .unwrap_or_default();

            Ok(SubscriptionFilter {
                resource_type: f
                    .get("resourceType")
                    .and_then(|v| v.as_str())
                    .map(|s| resource_type_name(s).to_string()),
                filter_parameter: filter_parameter.to_string(),
                modifier,
                value: value.to_string(),
            })
        })
        .collect()
}

/// Split `http://example.org/topic?patient=Patient/1&status:in=a,b` into the
/// topic URL and its filters.
fn split_backport_criteria(
    criteria: &str,
) -> SubscriptionResult<(String, Vec<SubscriptionFilter>)> {
    let Some((url, query)) = criteria.split_once('?') else {
        return Ok((criteria.to_string(), Vec::new()));
    };

    let filters = query
        .split('&')
        .filter(|param| !param.is_empty())
        .map(|param| -> SubscriptionResult<SubscriptionFilter> {
            let (key, value) = param.split_once('=').ok_or_else(|| {
                SubscriptionError::invalid_resource(format!("Invalid criteria parameter: {param}"))
            })?;
            let (name, modifier) = match key.split_once(':') {
                Some((name, modifier)) => (name, modifier.parse::<FilterModifier>()?),
                None => (key, FilterModifier::Eq),
            };
            Ok(SubscriptionFilter::new(name, value).with_modifier(modifier))
        })
        .collect::<SubscriptionResult<Vec<_>>>()?;

    Ok((url.to_string(), filters))
}
