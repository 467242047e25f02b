//! Event sinks and cancellation
//!
//! These let the engine report progress and be interrupted without
//! depending on any particular terminal UI or signal handling.

use crate::types::StackEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receiver for stack events
///
/// Implement this trait to stream status transitions to a UI or log.
/// Events arrive from the engine's coordinating thread only.
pub trait EventSink: Send + Sync {
    /// Called for every resource or stack status transition
    fn on_event(&self, event: &StackEvent);
}

/// Sink that drops every event
pub struct NoEvents;

impl EventSink for NoEvents {
    fn on_event(&self, _event: &StackEvent) {}
}

/// Sink that forwards events to the `log` facade
pub struct LogEvents;

impl EventSink for LogEvents {
    fn on_event(&self, event: &StackEvent) {
        match &event.reason {
            Some(reason) => log::info!(
                "{} {} {}: {}",
                event.logical_name,
                event.resource_type,
                event.status,
                reason
            ),
            None => log::info!(
                "{} {} {}",
                event.logical_name,
                event.resource_type,
                event.status
            ),
        }
    }
}

/// Shared flag asking a run to stop dispatching new work
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
