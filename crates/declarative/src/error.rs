//! Error types for the declarative crate

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while composing or converging recipes
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Error {
    /// A required external dependency (package, binary, parent path, ...) is unavailable
    #[error("precondition failed for {resource}: {reason}")]
    PreconditionFailed { resource: String, reason: String },

    /// The host refused to mutate the target
    #[error("permission denied for {resource}: {reason}")]
    PermissionDenied { resource: String, reason: String },

    /// A recipe references an attribute that no layer defines
    #[error("missing attribute '{key}'")]
    MissingAttribute { key: String },

    /// The run exceeded its time budget
    #[error("run timed out after {:.1}s", .elapsed.as_secs_f64())]
    TimedOut { elapsed: Duration },

    /// Resources notify each other in a loop
    #[error("notification cycle: {}", .cycle.join(" -> "))]
    NotificationCycle { cycle: Vec<String> },

    /// Recipe could not be parsed or its dependencies cannot be ordered
    #[error("invalid recipe '{recipe}': {reason}")]
    InvalidRecipe { recipe: String, reason: String },

    /// A resource declaration could not be turned into a resource
    #[error("invalid resource #{index} in recipe '{recipe}': {reason}")]
    InvalidResource {
        recipe: String,
        index: usize,
        reason: String,
    },

    /// A notification points at a resource that is not part of the run
    #[error("{source_ref} notifies unknown resource {target}")]
    UnknownNotificationTarget { source_ref: String, target: String },

    /// Two resources share the same `kind[name]` reference
    #[error("resource {resource} is declared more than once")]
    DuplicateResource { resource: String },

    /// Attribute layer could not be parsed
    #[error("invalid attributes in layer '{layer}': {reason}")]
    InvalidAttributes { layer: String, reason: String },

    /// Template source missing or failed to render
    #[error("template error in {resource}: {reason}")]
    Template { resource: String, reason: String },

    /// Host operation failed for a reason other than a precondition or permission
    #[error("{resource}: {reason}")]
    Host { resource: String, reason: String },

    /// Worker pool for parallel node runs could not be created
    #[error("failed to create worker pool: {reason}")]
    WorkerPool { reason: String },
}

impl Error {
    /// Short machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PreconditionFailed { .. } => "precondition_failed",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::MissingAttribute { .. } => "missing_attribute",
            Self::TimedOut { .. } => "timed_out",
            Self::NotificationCycle { .. } => "notification_cycle",
            Self::InvalidRecipe { .. } => "invalid_recipe",
            Self::InvalidResource { .. } => "invalid_resource",
            Self::UnknownNotificationTarget { .. } => "unknown_notification_target",
            Self::DuplicateResource { .. } => "duplicate_resource",
            Self::InvalidAttributes { .. } => "invalid_attributes",
            Self::Template { .. } => "template",
            Self::Host { .. } => "host",
            Self::WorkerPool { .. } => "worker_pool",
        }
    }
}

/// Result type for declarative operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_joins_path() {
        let err = Error::NotificationCycle {
            cycle: vec![
                "service[a]".to_string(),
                "service[b]".to_string(),
                "service[a]".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "notification cycle: service[a] -> service[b] -> service[a]"
        );
    }

    #[test]
    fn test_error_serializes_with_kind_tag() {
        let err = Error::MissingAttribute {
            key: "db.password".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"missing_attribute\""));
        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
