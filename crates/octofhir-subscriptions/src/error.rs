//! Subscription error types.

use thiserror::Error;

/// Result type for subscription operations.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Errors that can occur while registering topics or subscriptions.
///
/// Evaluation never produces these: a resource that does not match is a
/// plain `false`, and a lookup miss is `None`.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The subscription references a topic URL that is not in the catalog
    #[error("Subscription topic not found: {0}")]
    TopicNotFound(String),

    /// Channel type is unknown or disabled by configuration
    #[error("Unsupported channel type: {0}")]
    UnsupportedChannel(String),

    /// Filter parameter is not declared by the topic's canFilterBy
    #[error("Filter parameter '{parameter}' is not allowed by the subscription topic")]
    UndeclaredFilter { parameter: String },

    /// Modifier is not permitted for the declared filter parameter
    #[error("Modifier '{modifier}' is not allowed for filter parameter '{parameter}'")]
    UnsupportedModifier { parameter: String, modifier: String },

    /// A coded field carried a value outside its value set
    #[error("Invalid {field} code: {value}")]
    InvalidCode { field: &'static str, value: String },

    /// A subscription with this id is already registered
    #[error("Subscription already exists: {0}")]
    DuplicateSubscription(String),

    /// A FHIR resource could not be converted into the subscription model
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubscriptionError {
    /// Create a new InvalidCode error
    pub fn invalid_code(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidCode {
            field,
            value: value.into(),
        }
    }

    /// Create a new InvalidResource error
    pub fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_filter_names_the_parameter() {
        let err = SubscriptionError::UndeclaredFilter {
            parameter: "ward".to_string(),
        };
        assert!(err.to_string().contains("'ward'"));
    }

    #[test]
    fn invalid_code_display() {
        let err = SubscriptionError::invalid_code("channel type", "sms");
        assert_eq!(err.to_string(), "Invalid channel type code: sms");
    }
}
