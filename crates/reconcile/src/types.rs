//! Core types for stack reconciliation

use crate::error::Error;
use crate::retry::RetryConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Provider operation kinds, used in errors and events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// Lifecycle status of a single resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    /// Removed from the provider
    Deleted,
    /// Removed from the stack but left in place
    Retained,
    /// Change undone after a failure elsewhere
    RolledBack,
}

impl ResourceStatus {
    /// Whether the status is final for this run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Deleted => "DELETED",
            Self::Retained => "RETAINED",
            Self::RolledBack => "ROLLED_BACK",
        })
    }
}

/// Aggregate status of a stack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
    RollingBack,
    RolledBack,
}

impl StackStatus {
    /// Whether the last run left the stack converged
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Derive the aggregate status from resource statuses
    ///
    /// Used for stacks whose run was interrupted before the engine could
    /// record a final status.
    pub fn aggregate<'a>(statuses: impl IntoIterator<Item = &'a ResourceStatus>) -> Self {
        let mut any = false;
        let mut all_done = true;
        for status in statuses {
            any = true;
            match status {
                ResourceStatus::InProgress => return Self::InProgress,
                ResourceStatus::Failed => return Self::Failed,
                ResourceStatus::Pending => all_done = false,
                _ => {}
            }
        }
        if any && all_done {
            Self::Complete
        } else {
            Self::Pending
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
        })
    }
}

/// Status carried by an event: either a resource or the whole stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventStatus {
    Resource(ResourceStatus),
    Stack(StackStatus),
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(s) => s.fmt(f),
            Self::Stack(s) => s.fmt(f),
        }
    }
}

/// A status transition observed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
    pub timestamp: DateTime<Utc>,
    /// Logical name, or the stack name for stack-level events
    pub logical_name: String,
    /// Resource type, or `Stack` for stack-level events
    pub resource_type: String,
    pub status: EventStatus,
    pub reason: Option<String>,
}

impl StackEvent {
    /// Event for a resource transition
    pub fn resource(
        logical_name: &str,
        resource_type: &str,
        status: ResourceStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            logical_name: logical_name.to_string(),
            resource_type: resource_type.to_string(),
            status: EventStatus::Resource(status),
            reason,
        }
    }

    /// Event for a stack transition
    pub fn stack(name: &str, status: StackStatus, reason: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            logical_name: name.to_string(),
            resource_type: "Stack".to_string(),
            status: EventStatus::Stack(status),
            reason,
        }
    }

    /// Whether this is a stack-level event
    pub fn is_stack(&self) -> bool {
        matches!(self.status, EventStatus::Stack(_))
    }
}

/// Options for engine runs
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of provider calls in flight
    pub jobs: usize,
    /// Upper bound for a single provider call; `None` waits forever
    pub operation_timeout: Option<Duration>,
    /// Backoff for transient provider errors
    pub retry: RetryConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            operation_timeout: Some(Duration::from_secs(300)),
            retry: RetryConfig::default(),
        }
    }
}

/// Counts of what a run did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub retained: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub rolled_back: usize,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted + self.retained
    }
}

/// Outcome of an apply or destroy run that got past pre-flight
#[derive(Debug, Default)]
pub struct RunReport {
    pub status: StackStatus,
    pub summary: RunSummary,
    /// The failure that stopped the run, if any
    pub error: Option<Error>,
    /// Compensation failures; the stack needs manual attention
    pub rollback_errors: Vec<Error>,
    /// Non-fatal failures while deleting removed or superseded resources
    pub cleanup_errors: Vec<Error>,
}

impl RunReport {
    /// Whether the stack converged
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
