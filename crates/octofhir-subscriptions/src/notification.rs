//! Notification shaping.
//!
//! A matched (subscription, event) pair becomes a [`NotificationBundle`]: the
//! engine's output artifact handed to the delivery collaborator. The payload
//! carries as much of the focus resource as the subscription's content level
//! asks for. [`NotificationBundle::to_fhir_bundle`] renders the wire form, a
//! FHIR `subscription-notification` Bundle.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::types::{
    ChannelType, PayloadContent, ResourceEvent, SubscriptionStatusRecord, SubscriptionTopic,
    TopicSubscription, TriggerInteraction,
};

/// Type of subscription notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    /// Actual event notification
    EventNotification,
    /// Status query result
    QueryStatus,
}

impl NotificationType {
    /// Returns the FHIR code for this notification type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventNotification => "event-notification",
            Self::QueryStatus => "query-status",
        }
    }
}

/// One notification for one matched subscription/event pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBundle {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    pub subscription_id: String,

    pub topic_url: String,

    /// Events since subscription start, including this one
    pub event_number: u64,

    /// When the triggering event happened
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,

    pub action: TriggerInteraction,

    pub channel_type: ChannelType,

    pub endpoint: String,

    pub content: PayloadContent,

    /// Focus resource shaped per `content`
    pub focus_resource: Option<Value>,

    #[serde(skip)]
    focus_reference: String,
}

/// Build the notification for a matched event. Never fails.
pub fn build_notification(
    subscription: &TopicSubscription,
    topic: &SubscriptionTopic,
    event: &ResourceEvent,
    event_number: u64,
) -> NotificationBundle {
    let focus_resource = match subscription.content {
        PayloadContent::Empty => None,
        PayloadContent::IdOnly => Some(json!({
            "resourceType": event.resource_type,
            "id": event.resource_id,
        })),
        PayloadContent::FullResource => match &event.resource {
            Value::Null => None,
            resource => Some(resource.clone()),
        },
    };

    NotificationBundle {
        notification_type: NotificationType::EventNotification,
        subscription_id: subscription.id.clone(),
        topic_url: topic.url.clone(),
        event_number,
        timestamp: event.timestamp,
        action: event.action,
        channel_type: subscription.channel_type,
        endpoint: subscription.endpoint.clone(),
        content: subscription.content,
        focus_resource,
        focus_reference: format!("{}/{}", event.resource_type, event.resource_id),
    }
}

impl NotificationBundle {
    /// Literal reference to the focus resource, e.g. `Encounter/123`.
    pub fn focus_reference(&self) -> &str {
        &self.focus_reference
    }

    /// Render as a FHIR R5 `subscription-notification` Bundle.
    ///
    /// The first entry is always the `SubscriptionStatus`; a focus entry
    /// follows unless the content level is `empty`.
    pub fn to_fhir_bundle(&self) -> Value {
        let timestamp = format_timestamp(self.timestamp);

        let mut notification_event = json!({
            "eventNumber": self.event_number.to_string(),
            "timestamp": timestamp,
        });
        if self.content != PayloadContent::Empty {
            notification_event["focus"] = json!({ "reference": self.focus_reference });
        }

        let status = json!({
            "resourceType": "SubscriptionStatus",
            "status": "active",
            "type": self.notification_type.as_str(),
            "eventsSinceSubscriptionStart": self.event_number.to_string(),
            "notificationEvent": [notification_event],
            "subscription": {
                "reference": format!("Subscription/{}", self.subscription_id)
            },
            "topic": self.topic_url
        });

        let mut entries = vec![json!({
            "fullUrl": format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            "resource": status,
        })];

        match (self.content, &self.focus_resource) {
            (PayloadContent::FullResource, Some(focus)) => entries.push(json!({
                "fullUrl": self.focus_reference,
                "resource": focus,
            })),
            (PayloadContent::IdOnly, Some(_)) => entries.push(json!({
                "fullUrl": self.focus_reference,
            })),
            _ => {}
        }

        json!({
            "resourceType": "Bundle",
            "type": "subscription-notification",
            "timestamp": timestamp,
            "entry": entries
        })
    }
}

impl SubscriptionStatusRecord {
    /// Render as the `SubscriptionStatus` returned by `Subscription/{id}/$status`.
    pub fn to_resource(&self, subscription: &TopicSubscription) -> Value {
        let mut resource = json!({
            "resourceType": "SubscriptionStatus",
            "id": format!("{}-status", subscription.id),
            "status": self.status.as_str(),
            "type": NotificationType::QueryStatus.as_str(),
            "eventsSinceSubscriptionStart": self.event_count.to_string(),
            "subscription": {
                "reference": format!("Subscription/{}", subscription.id)
            },
            "topic": subscription.topic_url,
            "notificationEvent": []
        });

        if let Some(last) = self.last_event_at {
            resource["notificationEvent"] = json!([{
                "eventNumber": self.event_count.to_string(),
                "timestamp": format_timestamp(last),
            }]);
        }

        resource
    }
}

/// RFC 3339 rendering; years outside 0000-9999 fall back to unix seconds.
fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|e| {
        tracing::warn!(
            timestamp = %at,
            error = %e,
            "Timestamp not representable as RFC 3339, using unix seconds"
        );
        at.unix_timestamp().to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceTrigger, SubscriptionStatus};
    use assert_json_diff::assert_json_eq;

    fn topic() -> SubscriptionTopic {
        SubscriptionTopic::new("encounter-start", "http://example.org/SubscriptionTopic/start")
            .with_trigger(ResourceTrigger::new("Encounter", &[TriggerInteraction::Create]))
    }

    fn subscription(content: PayloadContent) -> TopicSubscription {
        TopicSubscription::new(
            "http://example.org/SubscriptionTopic/start",
            ChannelType::RestHook,
            "https://hook.example/notify",
        )
        .with_id("sub-1")
        .with_content(content)
    }

    fn event() -> ResourceEvent {
        ResourceEvent::created(
            "Encounter",
            "enc-1",
            json!({
                "resourceType": "Encounter",
                "id": "enc-1",
                "status": "in-progress",
                "class": {"code": "IMP"},
                "subject": {"reference": "Patient/p1"}
            }),
        )
    }

    #[test]
    fn common_fields_are_always_set() {
        let n = build_notification(&subscription(PayloadContent::Empty), &topic(), &event(), 3);
        assert_eq!(n.notification_type, NotificationType::EventNotification);
        assert_eq!(n.subscription_id, "sub-1");
        assert_eq!(n.topic_url, "http://example.org/SubscriptionTopic/start");
        assert_eq!(n.event_number, 3);
        assert_eq!(n.action, TriggerInteraction::Create);
        assert_eq!(n.channel_type, ChannelType::RestHook);
        assert_eq!(n.focus_reference(), "Encounter/enc-1");
    }

    #[test]
    fn empty_content_has_no_focus() {
        let n = build_notification(&subscription(PayloadContent::Empty), &topic(), &event(), 1);
        assert!(n.focus_resource.is_none());
    }

    #[test]
    fn id_only_content_has_exactly_type_and_id() {
        let n = build_notification(&subscription(PayloadContent::IdOnly), &topic(), &event(), 1);
        assert_json_eq!(
            n.focus_resource.unwrap(),
            json!({"resourceType": "Encounter", "id": "enc-1"})
        );
    }

    #[test]
    fn full_resource_content_is_unmodified() {
        let event = event();
        let n = build_notification(
            &subscription(PayloadContent::FullResource),
            &topic(),
            &event,
            1,
        );
        assert_json_eq!(n.focus_resource.unwrap(), event.resource);
    }

    #[test]
    fn full_resource_for_delete_has_no_focus() {
        let deleted = ResourceEvent::deleted("Encounter", "enc-1");
        let n = build_notification(
            &subscription(PayloadContent::FullResource),
            &topic(),
            &deleted,
            1,
        );
        assert!(n.focus_resource.is_none());
    }

    #[test]
    fn fhir_bundle_shape() {
        let n = build_notification(
            &subscription(PayloadContent::FullResource),
            &topic(),
            &event(),
            7,
        );
        let bundle = n.to_fhir_bundle();

        assert_eq!(bundle["resourceType"], "Bundle");
        assert_eq!(bundle["type"], "subscription-notification");

        let entries = bundle["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);

        let status = &entries[0]["resource"];
        assert_eq!(status["resourceType"], "SubscriptionStatus");
        assert_eq!(status["type"], "event-notification");
        assert_eq!(status["eventsSinceSubscriptionStart"], "7");
        assert_eq!(status["subscription"]["reference"], "Subscription/sub-1");
        assert_eq!(status["notificationEvent"][0]["focus"]["reference"], "Encounter/enc-1");

        assert_eq!(entries[1]["fullUrl"], "Encounter/enc-1");
        assert_eq!(entries[1]["resource"]["status"], "in-progress");
    }

    #[test]
    fn fhir_bundle_for_empty_and_id_only() {
        let empty = build_notification(&subscription(PayloadContent::Empty), &topic(), &event(), 1)
            .to_fhir_bundle();
        assert_eq!(empty["entry"].as_array().unwrap().len(), 1);
        assert!(empty["entry"][0]["resource"]["notificationEvent"][0]["focus"].is_null());

        let id_only =
            build_notification(&subscription(PayloadContent::IdOnly), &topic(), &event(), 1)
                .to_fhir_bundle();
        let entries = id_only["entry"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["fullUrl"], "Encounter/enc-1");
        assert!(entries[1].get("resource").is_none());
    }

    #[test]
    fn status_resource() {
        let sub = subscription(PayloadContent::IdOnly);
        let record = SubscriptionStatusRecord {
            status: SubscriptionStatus::Active,
            event_count: 0,
            last_event_at: None,
        };
        let resource = record.to_resource(&sub);
        assert_json_eq!(
            resource,
            json!({
                "resourceType": "SubscriptionStatus",
                "id": "sub-1-status",
                "status": "active",
                "type": "query-status",
                "eventsSinceSubscriptionStart": "0",
                "subscription": {"reference": "Subscription/sub-1"},
                "topic": "http://example.org/SubscriptionTopic/start",
                "notificationEvent": []
            })
        );
    }

    #[test]
    fn timestamp_outside_rfc3339_range_is_never_blank() {
        // Year -1
        let ancient = OffsetDateTime::from_unix_timestamp(-62_200_000_000).unwrap();
        assert!(ancient.format(&Rfc3339).is_err());

        let formatted = format_timestamp(ancient);
        assert_eq!(formatted, ancient.unix_timestamp().to_string());

        let n = build_notification(
            &subscription(PayloadContent::Empty),
            &topic(),
            &event().at(ancient),
            1,
        );
        assert_eq!(n.to_fhir_bundle()["timestamp"], formatted);
    }

    #[test]
    fn timestamp_in_range_uses_rfc3339() {
        let at = time::macros::datetime!(2026-03-01 08:30 UTC);
        assert_eq!(format_timestamp(at), "2026-03-01T08:30:00Z");
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let n = build_notification(&subscription(PayloadContent::IdOnly), &topic(), &event(), 2);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "event-notification");
        assert_eq!(value["subscriptionId"], "sub-1");
        assert_eq!(value["channelType"], "rest-hook");
        assert_eq!(value["content"], "id-only");
        assert!(value.get("focusReference").is_none());
    }
}
