//! Error types for template parsing and value resolution.
//!
//! Everything in this crate runs before any provider call, so every error
//! here is a pre-flight error: none of them is retryable.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or resolving a template
#[derive(Debug, Error)]
pub enum Error {
    /// The document is structurally invalid
    #[error("invalid template at {location}: {message}")]
    Template {
        /// Dotted path of the offending element (e.g. `Resources.Vpc.Properties`)
        location: String,
        /// What is wrong with it
        message: String,
    },

    /// A parameter override is missing, undeclared or fails its constraints
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A mapping lookup found no entry for a key
    #[error("mapping {map} has no entry for key {key}")]
    MappingKeyNotFound {
        /// Mapping name
        map: String,
        /// The missing key (`top` or `top.second`)
        key: String,
    },

    /// Conditions reference each other in a loop
    #[error("condition cycle detected: {}", .conditions.join(" -> "))]
    ConditionCycle {
        /// Conditions on the cycle, in reference order
        conditions: Vec<String>,
    },

    /// A value depends on a resource that has not been materialized yet
    #[error("value of {reference} is not known until apply")]
    Unknown {
        /// The `Ref` or `Res.Attr` that is still pending
        reference: String,
    },

    /// A reference names nothing the evaluation scope can resolve
    #[error("unresolved reference {name}")]
    Unresolved {
        /// The referenced name
        name: String,
    },

    /// An intrinsic function received arguments it cannot work with
    #[error("{function}: {message}")]
    Evaluation {
        /// Intrinsic function name (e.g. `Fn::Select`)
        function: &'static str,
        /// Description of the failure
        message: String,
    },

    /// Template file could not be read
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON syntax error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML syntax error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Shorthand for a structural template error
    pub fn template(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an intrinsic function failure
    pub fn evaluation(function: &'static str, message: impl Into<String>) -> Self {
        Self::Evaluation {
            function,
            message: message.into(),
        }
    }

    /// Whether this error only means "not known yet" rather than "wrong"
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

/// Result type for template operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_cycle_lists_participants() {
        let err = Error::ConditionCycle {
            conditions: vec!["IsProd".into(), "UseNat".into(), "IsProd".into()],
        };
        assert_eq!(
            err.to_string(),
            "condition cycle detected: IsProd -> UseNat -> IsProd"
        );
    }

    #[test]
    fn test_unknown_is_distinguishable() {
        assert!(
            Error::Unknown {
                reference: "Vpc".into()
            }
            .is_unknown()
        );
        assert!(!Error::template("Resources", "empty").is_unknown());
    }
}
