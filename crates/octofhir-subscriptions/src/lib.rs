//! FHIR R5 Topic-Based Subscriptions engine
//!
//! Decides, for every committed create/update/delete of a clinical resource,
//! which registered subscriptions must be notified and builds the
//! notification for each. Delivery over the channels is left to the caller.
//!
//! ## Architecture
//!
//! ```text
//! FHIR Write (POST/PUT/DELETE)
//!        ↓
//! ResourceEvent
//!        ↓
//! SubscriptionEngine::evaluate
//!        ├── expiry check (end <= now → off)
//!        ├── TopicCatalog (topic by canonical URL)
//!        ├── criteria (fhirPathCriteria / queryCriteria.current)
//!        └── filter (subscriber filterBy vs topic canFilterBy)
//!        ↓
//! NotificationBundle (id-only / full-resource / empty)
//!        ↓
//! Channels (REST-hook, WebSocket, Email) - caller's responsibility
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [subscriptions]
//! enabled = true
//! load_builtin_topics = true
//! allowed_channels = ["rest-hook", "websocket", "email"]
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every key can be overridden from the environment, e.g.
//! `OCTOFHIR__SUBSCRIPTIONS__ENABLED=false`.
//!
//! ## Built-in topics
//!
//! `encounter-start`, `encounter-end`, `new-lab-result` and
//! `admission-discharge`, published under
//! `http://octofhir.io/SubscriptionTopic/<id>`.

pub mod builtin;
pub mod config;
pub mod criteria;
pub mod engine;
pub mod error;
pub mod filter;
pub mod notification;
pub mod observability;
pub mod resource;
pub mod subscription_manager;
pub mod topic_registry;
pub mod types;

pub use config::{ConfigError, EngineConfig, LoggingConfig, SubscriptionSettings};
pub use criteria::{Criteria, CriteriaDialect, CriteriaError};
pub use engine::SubscriptionEngine;
pub use error::{SubscriptionError, SubscriptionResult};
pub use notification::{NotificationBundle, NotificationType, build_notification};
pub use subscription_manager::{SubscriptionEntry, SubscriptionRegistry};
pub use topic_registry::TopicCatalog;
pub use types::*;
