//! Error types for planning and reconciliation.
//!
//! Errors are categorized so callers can tell pre-flight failures (nothing
//! was touched) from provider failures (rollback may have run) and decide
//! what is worth retrying.

use crate::types::Operation;
use thiserror::Error;

/// Categories of reconciliation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Raised before any provider call; no state was changed
    Preflight,
    /// Provider reported a transient condition (throttling, timeout)
    Transient,
    /// Provider rejected the request
    Fatal,
    /// Compensation after a failure did not complete
    Rollback,
    /// The run was interrupted
    Cancelled,
    /// Stack state could not be read or written
    State,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Preflight => "Template or plan is invalid",
            Self::Transient => "Provider temporarily unavailable",
            Self::Fatal => "Provider rejected the operation",
            Self::Rollback => "Rollback did not complete",
            Self::Cancelled => "Run cancelled",
            Self::State => "Stack state unavailable",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Preflight => "Fix the template or parameters and run again",
            Self::Transient => "Wait a moment and run again",
            Self::Fatal => "Check the resource properties and provider permissions",
            Self::Rollback => {
                "Inspect the stack with `cairn status` and clean up the listed resources"
            }
            Self::Cancelled => "Run apply again to converge the stack",
            Self::State => "Check the state directory permissions",
        }
    }
}

/// Errors that can occur while planning or reconciling a stack
#[derive(Debug, Error)]
pub enum Error {
    /// Template loading or value resolution failed
    #[error(transparent)]
    Template(#[from] template::Error),

    /// Resource dependencies form a cycle
    #[error("dependency cycle detected among: {}", .resources.join(", "))]
    CycleDetected {
        /// Every resource on a cycle, in declaration order
        resources: Vec<String>,
    },

    /// A resource or output refers to a name that is not a realized resource
    #[error("{from} references {target}, which is not a resource in this stack")]
    UnresolvedReference {
        /// The referring resource or output
        from: String,
        /// The missing name
        target: String,
    },

    /// No provider is registered for a resource type
    #[error("{logical_name}: no provider for resource type {resource_type}")]
    UnsupportedResourceType {
        logical_name: String,
        resource_type: String,
    },

    /// Provider call failed with a transient condition
    #[error("{operation} {logical_name} failed after retries: {message}")]
    ProviderTransient {
        logical_name: String,
        operation: Operation,
        message: String,
    },

    /// Provider call failed permanently
    #[error("{operation} {logical_name} failed: {message}")]
    ProviderFatal {
        logical_name: String,
        operation: Operation,
        message: String,
    },

    /// One or more compensating operations failed
    #[error("rollback failed for {}: {message}", .resources.join(", "))]
    RollbackFailed {
        /// Resources left in an unknown state
        resources: Vec<String>,
        message: String,
    },

    /// The run was cancelled before it finished
    #[error("operation cancelled")]
    Cancelled,

    /// Stack state could not be loaded or persisted
    #[error("state error: {0}")]
    State(String),
}

impl Error {
    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Template(_)
            | Error::CycleDetected { .. }
            | Error::UnresolvedReference { .. }
            | Error::UnsupportedResourceType { .. } => ErrorCategory::Preflight,
            Error::ProviderTransient { .. } => ErrorCategory::Transient,
            Error::ProviderFatal { .. } => ErrorCategory::Fatal,
            Error::RollbackFailed { .. } => ErrorCategory::Rollback,
            Error::Cancelled => ErrorCategory::Cancelled,
            Error::State(_) => ErrorCategory::State,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the error was raised before any provider call
    pub fn is_preflight(&self) -> bool {
        self.category() == ErrorCategory::Preflight
    }

    /// Logical name of the resource involved, if any
    pub fn logical_name(&self) -> Option<&str> {
        match self {
            Error::UnresolvedReference { from, .. } => Some(from),
            Error::UnsupportedResourceType { logical_name, .. }
            | Error::ProviderTransient { logical_name, .. }
            | Error::ProviderFatal { logical_name, .. } => Some(logical_name),
            _ => None,
        }
    }
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        let transient = Error::ProviderTransient {
            logical_name: "Vpc".into(),
            operation: Operation::Create,
            message: "throttled".into(),
        };
        let fatal = Error::ProviderFatal {
            logical_name: "Vpc".into(),
            operation: Operation::Create,
            message: "bad cidr".into(),
        };
        assert!(transient.is_retryable());
        assert!(!fatal.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_preflight_category() {
        let err = Error::CycleDetected {
            resources: vec!["A".into(), "B".into()],
        };
        assert!(err.is_preflight());
        assert_eq!(err.to_string(), "dependency cycle detected among: A, B");

        let err: Error = template::Error::Unresolved { name: "X".into() }.into();
        assert!(err.is_preflight());
    }

    #[test]
    fn test_provider_error_names_resource_and_operation() {
        let err = Error::ProviderFatal {
            logical_name: "Subnet".into(),
            operation: Operation::Update,
            message: "conflict".into(),
        };
        assert_eq!(err.to_string(), "update Subnet failed: conflict");
        assert_eq!(err.logical_name(), Some("Subnet"));
    }
}
