//! Built-in subscription topics shipped with the server.
//!
//! These definitions are part of the server's interoperability surface:
//! external subscribers refer to them by canonical URL, so ids, URLs,
//! triggers and criteria must stay exactly as written here. Changing any of
//! them requires bumping [`BUILTIN_TOPIC_VERSION`].

use crate::types::{
    CanFilterBy, FilterModifier, ResourceTrigger, SubscriptionTopic, TriggerInteraction,
};

/// Canonical URL prefix of the built-in topics.
pub const BUILTIN_TOPIC_BASE_URL: &str = "http://octofhir.io/SubscriptionTopic";

/// Business version of the built-in topic definitions.
pub const BUILTIN_TOPIC_VERSION: &str = "1.0.0";

pub const ENCOUNTER_START: &str = "encounter-start";
pub const ENCOUNTER_END: &str = "encounter-end";
pub const NEW_LAB_RESULT: &str = "new-lab-result";
pub const ADMISSION_DISCHARGE: &str = "admission-discharge";

/// Canonical URL of a built-in topic.
pub fn builtin_topic_url(id: &str) -> String {
    format!("{BUILTIN_TOPIC_BASE_URL}/{id}")
}

/// The four built-in topics, in registration order.
pub fn builtin_topics() -> Vec<SubscriptionTopic> {
    vec![
        builtin(ENCOUNTER_START, "EncounterStart", "Encounter started")
            .with_trigger(
                ResourceTrigger::new("Encounter", &[TriggerInteraction::Create])
                    .with_fhirpath("status = 'in-progress'")
                    .with_description("An Encounter is created in progress"),
            )
            .with_encounter_filters(),
        builtin(ENCOUNTER_END, "EncounterEnd", "Encounter finished")
            .with_trigger(
                ResourceTrigger::new("Encounter", &[TriggerInteraction::Update])
                    .with_fhirpath("status = 'finished'")
                    .with_description("An Encounter is updated to finished"),
            )
            .with_encounter_filters(),
        builtin(NEW_LAB_RESULT, "NewLabResult", "New final lab result")
            .with_trigger(
                ResourceTrigger::new("DiagnosticReport", &[TriggerInteraction::Create])
                    .with_fhirpath("status = 'final'")
                    .with_description("A DiagnosticReport is created as final"),
            )
            .with_filter(CanFilterBy::new("DiagnosticReport", "patient"))
            .with_filter(
                CanFilterBy::new("DiagnosticReport", "status")
                    .with_modifiers(&[FilterModifier::In]),
            )
            .with_filter(CanFilterBy::new("DiagnosticReport", "based-on")),
        builtin(
            ADMISSION_DISCHARGE,
            "AdmissionDischarge",
            "Inpatient admission or discharge",
        )
        .with_trigger(
            ResourceTrigger::new("Encounter", &[TriggerInteraction::Create])
                .with_fhirpath("class.code = 'IMP' and status = 'in-progress'")
                .with_description("Inpatient admission"),
        )
        .with_trigger(
            ResourceTrigger::new("Encounter", &[TriggerInteraction::Update])
                .with_fhirpath("class.code = 'IMP' and status = 'finished'")
                .with_description("Inpatient discharge"),
        )
        .with_encounter_filters(),
    ]
}

fn builtin(id: &str, name: &str, title: &str) -> SubscriptionTopic {
    let mut topic = SubscriptionTopic::new(id, builtin_topic_url(id)).with_title(title);
    topic.name = Some(name.to_string());
    topic.version = Some(BUILTIN_TOPIC_VERSION.to_string());
    topic
}

trait EncounterFilters {
    fn with_encounter_filters(self) -> Self;
}

impl EncounterFilters for SubscriptionTopic {
    fn with_encounter_filters(self) -> Self {
        self.with_filter(CanFilterBy::new("Encounter", "patient"))
            .with_filter(
                CanFilterBy::new("Encounter", "status")
                    .with_modifiers(&[FilterModifier::In, FilterModifier::NotIn]),
            )
            .with_filter(CanFilterBy::new("Encounter", "class").with_modifiers(&[FilterModifier::In]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TopicStatus;

    #[test]
    fn catalog_contents_are_stable() {
        let topics = builtin_topics();
        let ids: Vec<&str> = topics.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(
            ids,
            [ENCOUNTER_START, ENCOUNTER_END, NEW_LAB_RESULT, ADMISSION_DISCHARGE]
        );

        for topic in &topics {
            assert_eq!(
                topic.url,
                format!("http://octofhir.io/SubscriptionTopic/{}", topic.id)
            );
            assert_eq!(topic.version.as_deref(), Some("1.0.0"));
            assert_eq!(topic.status, TopicStatus::Active);
            assert!(!topic.resource_triggers.is_empty());
        }
    }

    #[test]
    fn admission_discharge_has_two_triggers() {
        let topics = builtin_topics();
        let topic = topics.iter().find(|t| t.id == ADMISSION_DISCHARGE).unwrap();

        assert_eq!(topic.resource_triggers.len(), 2);
        assert_eq!(
            topic.resource_triggers[0].supported_interactions,
            vec![TriggerInteraction::Create]
        );
        assert_eq!(
            topic.resource_triggers[1].fhirpath_criteria.as_deref(),
            Some("class.code = 'IMP' and status = 'finished'")
        );
    }

    #[test]
    fn lab_result_triggers_on_final_reports() {
        let topics = builtin_topics();
        let topic = topics.iter().find(|t| t.id == NEW_LAB_RESULT).unwrap();
        let trigger = &topic.resource_triggers[0];
        assert_eq!(trigger.resource_type, "DiagnosticReport");
        assert_eq!(trigger.fhirpath_criteria.as_deref(), Some("status = 'final'"));
    }
}
